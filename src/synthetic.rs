//! Reproducible synthetic transient traces.
//!
//! Ground-truth signals for tests and calibration: flat baseline, a linear
//! rise to each peak, an exponential decay back, optional Gaussian noise
//! from a seeded generator so every run sees the same trace.
use nalgebra::DMatrix;
use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::KineticsError;

/// The shape shared by every transient of a synthetic trace.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct TransientShape {
    /// Resting level of the trace.
    pub baseline: f64,
    /// Peak deflection above the baseline.
    pub amplitude: f64,
    /// Duration of the linear rise to the peak, in ms.
    pub rise_ms: f64,
    /// Time constant of the exponential decay, in ms.
    pub decay_tau_ms: f64,
}

impl Default for TransientShape {
    fn default() -> Self {
        TransientShape {
            baseline: 1.0,
            amplitude: 2.0,
            rise_ms: 20.0,
            decay_tau_ms: 150.0,
        }
    }
}

impl TransientShape {
    fn validate(&self) -> Result<(), KineticsError> {
        if !self.baseline.is_finite() {
            return Err(KineticsError::InvalidParameter(format!(
                "baseline must be finite, got {}",
                self.baseline
            )));
        }
        for (name, value) in [
            ("amplitude", self.amplitude),
            ("rise duration", self.rise_ms),
            ("decay time constant", self.decay_tau_ms),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(KineticsError::InvalidParameter(format!(
                    "{} must be positive and finite, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// The contribution of one transient peaking at sample `peak`, at
    /// sample `index`, for the given sampling rate.
    fn value_at(&self, index: usize, peak: usize, sampling: f64) -> f64 {
        let rise_samples = (self.rise_ms / 1000.0 * sampling).round().max(1.0);
        let decay_samples = self.decay_tau_ms / 1000.0 * sampling;
        let offset = index as f64 - peak as f64;
        if offset > 0.0 {
            self.amplitude * (-offset / decay_samples).exp()
        } else if offset >= -rise_samples {
            self.amplitude * (1.0 + offset / rise_samples)
        } else {
            0.0
        }
    }
}

/// Generate a synthetic trace of `len` samples with one transient peaking
/// at each of `peak_positions`, plus Gaussian noise of standard deviation
/// `noise_sd` drawn from a generator seeded with `seed`.
///
/// # Examples
///
/// ```rust
/// use ca_kinetics::synthetic::{synthetic_trace, TransientShape};
///
/// let trace = synthetic_trace(&TransientShape::default(), 535.0, &[600], 3000, 0.01, 42).unwrap();
/// assert_eq!(trace.len(), 3000);
/// ```
pub fn synthetic_trace(
    shape: &TransientShape,
    sampling: f64,
    peak_positions: &[usize],
    len: usize,
    noise_sd: f64,
    seed: u64,
) -> Result<Vec<f64>, KineticsError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    sample_trace(shape, sampling, peak_positions, len, noise_sd, &mut rng)
}

/// Generate a synthetic linescan image (rows = spatial position, columns =
/// time): every row carries the same transients as [`synthetic_trace`],
/// shifted right by its entry of `row_onset_offsets` to emulate a
/// propagating release front.
pub fn synthetic_linescan(
    shape: &TransientShape,
    sampling: f64,
    peak_positions: &[usize],
    len: usize,
    row_onset_offsets: &[usize],
    noise_sd: f64,
    seed: u64,
) -> Result<DMatrix<f64>, KineticsError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let rows: Vec<Vec<f64>> = row_onset_offsets
        .iter()
        .map(|offset| {
            let shifted: Vec<usize> = peak_positions.iter().map(|peak| peak + offset).collect();
            sample_trace(shape, sampling, &shifted, len, noise_sd, &mut rng)
        })
        .collect::<Result<_, _>>()?;
    Ok(DMatrix::from_fn(rows.len(), len, |r, c| rows[r][c]))
}

fn sample_trace(
    shape: &TransientShape,
    sampling: f64,
    peak_positions: &[usize],
    len: usize,
    noise_sd: f64,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<f64>, KineticsError> {
    shape.validate()?;
    if !(sampling > 0.0 && sampling.is_finite()) {
        return Err(KineticsError::InvalidParameter(format!(
            "sampling rate must be positive and finite, got {}",
            sampling
        )));
    }
    if let Some(&peak) = peak_positions.iter().find(|&&peak| peak >= len) {
        return Err(KineticsError::InvalidParameter(format!(
            "peak position {} is outside the {}-sample trace",
            peak, len
        )));
    }
    if !(noise_sd >= 0.0 && noise_sd.is_finite()) {
        return Err(KineticsError::InvalidParameter(format!(
            "noise level must be non-negative, got {}",
            noise_sd
        )));
    }

    let mut trace: Vec<f64> = (0..len)
        .map(|index| {
            shape.baseline
                + peak_positions
                    .iter()
                    .map(|&peak| shape.value_at(index, peak, sampling))
                    .sum::<f64>()
        })
        .collect();

    if noise_sd > 0.0 {
        let noise = Normal::new(0.0, noise_sd)
            .map_err(|e| KineticsError::InvalidParameter(format!("invalid noise level: {}", e)))?;
        for value in trace.iter_mut() {
            *value += noise.sample(rng);
        }
    }

    Ok(trace)
}
