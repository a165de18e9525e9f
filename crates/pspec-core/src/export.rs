//! Text serialization shared by the spectrum and transform exporters.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Result, SpectralError};

/// Digits after the decimal point in scientific notation, enough for a full
/// decimal round trip of a 64-bit double: ceil(log10(2^64)).
const ROUND_TRIP_DIGITS: usize = 20;

/// Write a `# header` line followed by one `a, b` row per pair, both values
/// in scientific notation at full double precision.
///
/// A `None` destination is a no-op by contract; open and write failures are
/// I/O errors.
pub fn write_pairs<I>(dest: Option<&Path>, header: &str, rows: I) -> Result<()>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let Some(path) = dest else {
        return Ok(());
    };
    let file = File::create(path).map_err(|e| SpectralError::io(path, e))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "{header}").map_err(|e| SpectralError::io(path, e))?;
    for (a, b) in rows {
        writeln!(out, "{a:.ROUND_TRIP_DIGITS$e}, {b:.ROUND_TRIP_DIGITS$e}")
            .map_err(|e| SpectralError::io(path, e))?;
    }
    out.flush().map_err(|e| SpectralError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_destination_is_a_no_op() {
        write_pairs(None, "# never", [(1.0, 2.0)]).unwrap();
    }

    #[test]
    fn rows_round_trip_at_full_precision() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("table.txt");
        let value = std::f64::consts::PI * 1e-7;
        write_pairs(Some(&path), "# Hz, J", [(value, 2.0)]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "# Hz, J");
        let row = lines.next().unwrap();
        let (a, b) = row.split_once(", ").unwrap();
        assert_eq!(a.parse::<f64>().unwrap(), value);
        assert_eq!(b.parse::<f64>().unwrap(), 2.0);
        assert!(lines.next().is_none());
    }

    #[test]
    fn unwritable_destination_is_an_io_error() {
        let err = write_pairs(Some(Path::new("/no/such/dir/out.txt")), "# x", [])
            .err()
            .unwrap();
        assert!(matches!(err, SpectralError::Io { .. }));
    }
}
