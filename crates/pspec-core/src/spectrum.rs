//! One-sided power spectrum generation.
//!
//! Consumes the full reduced transform output (coordinator only) and
//! produces `floor(N/2) + 1` entries of `{hz, joules_per_hz}`, ascending
//! from DC to the Nyquist frequency, normalized per Parseval's theorem:
//! the energy of every mirrored negative-frequency bin is folded into its
//! positive counterpart, so the integral of the spectrum over frequency
//! recovers the time-domain energy.
//!
//! The generator is a pure read-only borrower of the transform output:
//! recomputing from the same output yields the same spectrum.

use std::path::Path;

use num_complex::Complex64;

use crate::error::{Result, SpectralError};
use crate::export;
use crate::transform::RealFftTransform;

/// Reject sample rates that cannot describe a physical signal.
pub(crate) fn validate_rate(sample_rate_hz: f64) -> Result<()> {
    if !sample_rate_hz.is_finite() || sample_rate_hz <= 0.0 {
        return Err(SpectralError::Validation(format!(
            "sample rate must be a finite positive number of Hz, got {sample_rate_hz}"
        )));
    }
    Ok(())
}

/// One spectrum entry: a frequency and its power density.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumEntry {
    /// Frequency in Hz.
    pub hz: f64,
    /// Power density in J/Hz.
    pub joules_per_hz: f64,
}

/// An ordered one-sided power spectrum.
#[derive(Debug, Clone)]
pub struct PowerSpectrum {
    entries: Vec<SpectrumEntry>,
    bin_size: f64,
}

impl PowerSpectrum {
    /// Compute the spectrum from a finished transform.
    ///
    /// Only meaningful on the rank holding the reduced transform output;
    /// elsewhere this fails rather than reading a stale partial buffer. The
    /// sample rate must be a finite positive number of Hz.
    pub fn compute(transform: &RealFftTransform, sample_rate_hz: f64) -> Result<Self> {
        validate_rate(sample_rate_hz)?;
        let bins = transform.output().ok_or_else(|| {
            SpectralError::Internal(
                "power spectrum requires the reduced transform output (coordinator only)".into(),
            )
        })?;
        Self::from_bins(bins, transform.signal_len(), sample_rate_hz)
    }

    fn from_bins(bins: &[Complex64], n: u64, sample_rate_hz: f64) -> Result<Self> {
        if bins.len() as u64 != n {
            return Err(SpectralError::Internal(format!(
                "transform output holds {} bins for a signal of {} samples",
                bins.len(),
                n
            )));
        }
        let count = (n / 2 + 1) as usize;
        let nf = n as f64;
        let bin_size = sample_rate_hz / nf;

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(count)
            .map_err(|_| SpectralError::Memory { len: count })?;

        // DC has no negative-frequency mirror: no factor of 2.
        entries.push(SpectrumEntry {
            hz: 0.0,
            joules_per_hz: bins[0].re * bins[0].re / nf,
        });

        // Exact integer bound: (n + 1) / 2 == ceil(n / 2).
        let half_up = ((n + 1) / 2) as usize;
        for k in 1..half_up {
            let bin = bins[k];
            entries.push(SpectrumEntry {
                hz: k as f64 * bin_size,
                // Factor 2 folds the mirrored negative-frequency bin in.
                joules_per_hz: 2.0 * (bin.re * bin.re + bin.im * bin.im) / nf,
            });
        }

        // For even n the Nyquist bin is its own mirror: no factor of 2.
        if n % 2 == 0 {
            let k = (n / 2) as usize;
            entries.push(SpectrumEntry {
                hz: k as f64 * bin_size,
                joules_per_hz: bins[k].re * bins[k].re / nf,
            });
        }

        debug_assert_eq!(entries.len(), count);
        Ok(Self { entries, bin_size })
    }

    /// Entries in ascending frequency order, DC first.
    pub fn entries(&self) -> &[SpectrumEntry] {
        &self.entries
    }

    /// Width of one frequency bin in Hz.
    pub fn bin_size(&self) -> f64 {
        self.bin_size
    }

    /// Number of entries, `floor(N/2) + 1`.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false for a computed spectrum.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry with the most power.
    pub fn peak(&self) -> &SpectrumEntry {
        let mut best = &self.entries[0];
        for entry in &self.entries[1..] {
            if entry.joules_per_hz > best.joules_per_hz {
                best = entry;
            }
        }
        best
    }

    /// Export the spectrum as `# Hz, J` text. No-op without a destination.
    pub fn export(&self, dest: Option<&Path>) -> Result<()> {
        export::write_pairs(
            dest,
            "# Hz, J",
            self.entries.iter().map(|e| (e.hz, e.joules_per_hz)),
        )
    }
}
