//! Signal source: file-backed real-valued sample stream.
//!
//! The input is a flat binary file of little-endian IEEE-754 doubles, no
//! header, no metadata; the sample count is the file size divided by eight.
//! Opening is a collective operation (every rank opens the file, and a
//! failure is made observable on every rank), because the next thing the
//! job does with the length is create a plan that must be identical
//! everywhere.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::collective::Communicator;
use crate::engine::Partition;
use crate::error::{Result, SpectralError};

/// Bytes per sample in the input file.
pub const SAMPLE_BYTES: u64 = std::mem::size_of::<f64>() as u64;

/// An open input signal file plus its total sample count.
///
/// The underlying file handle is closed by [`SignalSource::read_partition`],
/// not on drop: the read and the close are deliberately coupled so the
/// collective file view is not held open longer than necessary.
pub struct SignalSource {
    path: PathBuf,
    file: Option<File>,
    samples: u64,
}

impl SignalSource {
    /// Open the input file on every rank and determine its sample count.
    ///
    /// Collective; all ranks must call this together. Fails with an I/O
    /// error when the file cannot be opened and with
    /// [`SpectralError::EmptyInput`] when it holds no complete sample.
    pub fn open(comm: &Communicator, path: &Path) -> Result<Self> {
        let local = Self::open_local(path);
        comm.checkpoint(local)
    }

    fn open_local(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| SpectralError::io(path, e))?;
        let bytes = file
            .metadata()
            .map_err(|e| SpectralError::io(path, e))?
            .len();
        // A trailing partial sample is ignored, truncating toward zero.
        let samples = bytes / SAMPLE_BYTES;
        if samples == 0 {
            return Err(SpectralError::EmptyInput {
                path: path.to_path_buf(),
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            samples,
        })
    }

    /// Total number of samples in the signal. Always at least 1.
    pub fn len(&self) -> u64 {
        self.samples
    }

    /// Kept for API symmetry; an open source is never empty.
    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    /// Path the source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read this rank's partition into the strided engine layout, then close
    /// the file.
    ///
    /// Skips `skip_count` samples, then places `read_count` samples at every
    /// other slot of `buf` (stride 2): the engine's input format reserves a
    /// gap after each real value for an implicit imaginary component. Slots
    /// not covered by the read are untouched padding. The file handle is
    /// released as the final step of this call; a second read is an error.
    pub(crate) fn read_partition(&mut self, part: &Partition, buf: &mut [f64]) -> Result<()> {
        let mut file = self.file.take().ok_or_else(|| {
            SpectralError::Internal("signal data was already consumed by an earlier read".into())
        })?;
        let read_count = part.read_count as usize;
        if read_count > 0 && buf.len() < 2 * read_count - 1 {
            return Err(SpectralError::Internal(format!(
                "input buffer of {} reals cannot hold {} strided samples",
                buf.len(),
                read_count
            )));
        }
        file.seek(SeekFrom::Start(part.skip_count * SAMPLE_BYTES))
            .map_err(|e| SpectralError::io(&self.path, e))?;
        let mut reader = BufReader::new(file);
        let mut raw = [0u8; SAMPLE_BYTES as usize];
        for i in 0..read_count {
            reader
                .read_exact(&mut raw)
                .map_err(|e| SpectralError::io(&self.path, e))?;
            buf[2 * i] = f64::from_le_bytes(raw);
        }
        // `reader` (and with it the file handle) drops here: read and close
        // are one operation.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::run_job;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_samples(dir: &TempDir, name: &str, samples: &[f64]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        for s in samples {
            file.write_all(&s.to_le_bytes()).unwrap();
        }
        path
    }

    #[test]
    fn sample_count_is_byte_length_over_eight() {
        let dir = TempDir::new().unwrap();
        let path = write_samples(&dir, "sig.f64", &[1.0, 2.0, 3.0]);
        let results = run_job(2, |comm| {
            let source = SignalSource::open(comm, &path)?;
            Ok(source.len())
        });
        for result in results {
            assert_eq!(result.unwrap(), 3);
        }
    }

    #[test]
    fn trailing_partial_sample_truncates_toward_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ragged.f64");
        let mut file = File::create(&path).unwrap();
        file.write_all(&[0u8; 8 * 2 + 5]).unwrap(); // 2 samples + 5 stray bytes
        drop(file);
        let results = run_job(1, |comm| Ok(SignalSource::open(comm, &path)?.len()));
        assert_eq!(results.into_iter().next().unwrap().unwrap(), 2);
    }

    #[test]
    fn empty_file_fails_with_empty_input_kind() {
        let dir = TempDir::new().unwrap();
        let path = write_samples(&dir, "empty.f64", &[]);
        let results = run_job(1, |comm| SignalSource::open(comm, &path).map(|_| ()));
        assert!(matches!(
            results.into_iter().next().unwrap(),
            Err(SpectralError::EmptyInput { .. })
        ));
    }

    #[test]
    fn missing_file_fails_on_every_rank() {
        let path = PathBuf::from("/definitely/not/here.f64");
        let results = run_job(3, |comm| SignalSource::open(comm, &path).map(|_| ()));
        for result in results {
            // The condition is itself collective, so each rank observes the
            // open failure directly rather than an abort echo.
            assert!(matches!(result, Err(SpectralError::Io { .. })));
        }
    }

    #[test]
    fn read_is_strided_and_skips_the_partition_offset() {
        let dir = TempDir::new().unwrap();
        let path = write_samples(&dir, "sig.f64", &[10.0, 11.0, 12.0, 13.0, 14.0]);
        let results = run_job(1, |comm| {
            let mut source = SignalSource::open(comm, &path)?;
            let part = Partition {
                skip_count: 2,
                read_count: 3,
                local_len: 6,
            };
            let mut buf = vec![-1.0; part.local_len];
            source.read_partition(&part, &mut buf)?;
            Ok(buf)
        });
        let buf = results.into_iter().next().unwrap().unwrap();
        // Data lands at even slots; odd slots stay as engine padding.
        assert_eq!(buf[0], 12.0);
        assert_eq!(buf[2], 13.0);
        assert_eq!(buf[4], 14.0);
        assert_eq!(buf[1], -1.0);
        assert_eq!(buf[3], -1.0);
    }

    #[test]
    fn second_read_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_samples(&dir, "sig.f64", &[1.0]);
        let results = run_job(1, |comm| {
            let mut source = SignalSource::open(comm, &path)?;
            let part = Partition {
                skip_count: 0,
                read_count: 1,
                local_len: 2,
            };
            let mut buf = vec![0.0; 2];
            source.read_partition(&part, &mut buf)?;
            Ok(source.read_partition(&part, &mut buf).is_err())
        });
        assert!(results.into_iter().next().unwrap().unwrap());
    }
}
