//! Single-transient kinetics measurement.
//!
//! The functions here operate on a short windowed crop of a trace that is
//! expected to contain exactly one dominant transient. Every failure mode
//! (no peak, several peaks, a threshold crossing that never happens, a time
//! below the noise floor) is contained in the returned record as NaN; no
//! expected numeric edge case raises an error.
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::linescan::{row_delays, synchrony_stats, SynchronyStats};
use crate::peaks::detect_peaks;
use crate::trace::{baseline, f64_from_nullable, nanmax, nanmin};
use crate::{CROP_MIN_DISTANCE, DECAY90_FLOOR_MS, TIME_FLOOR_MS};

/// Peak detection threshold inside a crop during synchrony analysis.
const SYNC_CROP_THRESHOLD: f64 = 0.9;
/// Peak detection threshold for sarcomere shortening crops (on the
/// inverted trace).
const SHORTENING_THRESHOLD: f64 = 0.5;
/// Minimum inter-peak distance (in samples) for sarcomere shortening crops.
const SHORTENING_MIN_DISTANCE: usize = 50;

/// Acquisition mode of the calcium trace, selecting the detection
/// thresholds appropriate for its dynamic range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    /// Single-wavelength fluorescence (F/F0 normalized).
    #[default]
    Single,
    /// Ratiometric fluorescence.
    Ratio,
}

impl Mode {
    /// Relative peak threshold when re-detecting the single peak inside an
    /// already isolated crop.
    pub fn crop_threshold(self) -> f64 {
        match self {
            Mode::Single => 0.8,
            Mode::Ratio => 0.9,
        }
    }

    /// Relative peak threshold for the coarse full-trace scan, which must
    /// separate distinct transients rather than find one peak in a crop.
    pub fn scan_threshold(self) -> f64 {
        match self {
            Mode::Single => 0.45,
            Mode::Ratio => 0.6,
        }
    }
}

/// Sign convention of a transient: calcium fluorescence rises from the
/// baseline, sarcomere length falls during shortening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    /// The transient deflects above the baseline.
    Upward,
    /// The transient deflects below the baseline.
    Downward,
}

impl Polarity {
    /// The (non-negative) transient amplitude.
    fn amplitude(self, baseline: f64, peak: f64) -> f64 {
        match self {
            Polarity::Upward => peak - baseline,
            Polarity::Downward => baseline - peak,
        }
    }

    /// The level at `fraction` of the amplitude away from the baseline,
    /// toward the peak.
    fn rise_level(self, baseline: f64, amplitude: f64, fraction: f64) -> f64 {
        match self {
            Polarity::Upward => baseline + amplitude * fraction,
            Polarity::Downward => baseline - amplitude * fraction,
        }
    }

    /// The level at `fraction` of the amplitude away from the peak, back
    /// toward the baseline.
    fn decay_level(self, peak: f64, amplitude: f64, fraction: f64) -> f64 {
        match self {
            Polarity::Upward => peak - amplitude * fraction,
            Polarity::Downward => peak + amplitude * fraction,
        }
    }

    /// Whether `value` has reached `level` in the peak direction.
    fn reaches(self, value: f64, level: f64) -> bool {
        match self {
            Polarity::Upward => value >= level,
            Polarity::Downward => value <= level,
        }
    }

    /// Whether `value` has recovered past `level`, back toward the baseline.
    fn recovers(self, value: f64, level: f64) -> bool {
        match self {
            Polarity::Upward => value <= level,
            Polarity::Downward => value >= level,
        }
    }
}

/// Kinetic parameters of a single transient. NaN marks a metric that could
/// not be measured; [`TransientKinetics::is_valid`] tells a rejected crop
/// (no single dominant peak) apart from a measured one.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct TransientKinetics {
    /// Resting level, mean of the first samples of the crop.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub baseline: f64,
    /// Trace value at the detected peak.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub peak: f64,
    /// Absolute deflection of the peak from the baseline.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub amplitude: f64,
    /// Elapsed time between the 10% and 90% amplitude crossings, in ms.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub rise_time_ms: f64,
    /// Time from the peak until 50% of the amplitude is recovered, in ms.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub decay50_ms: f64,
    /// Time from the peak until 90% of the amplitude is recovered, in ms.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub decay90_ms: f64,
}

impl TransientKinetics {
    /// An all-NaN record, the outcome of a rejected crop.
    pub fn nan() -> Self {
        TransientKinetics {
            baseline: f64::NAN,
            peak: f64::NAN,
            amplitude: f64::NAN,
            rise_time_ms: f64::NAN,
            decay50_ms: f64::NAN,
            decay90_ms: f64::NAN,
        }
    }

    /// Whether the crop contained exactly one dominant peak. Individual
    /// metrics may still be NaN when their crossing was never found.
    pub fn is_valid(&self) -> bool {
        self.peak.is_finite()
    }
}

/// Kinetic parameters of a single sarcomere shortening contraction.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ShorteningKinetics {
    /// Resting sarcomere length, mean of the first samples of the crop.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub baseline: f64,
    /// Sarcomere length at the contraction peak.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub peak: f64,
    /// Fractional shortening, amplitude over baseline, in percent.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub fractional_shortening: f64,
    /// Elapsed time between the 10% and 90% amplitude crossings, in ms.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub rise_time_ms: f64,
    /// Time from the peak until 50% of the amplitude is recovered, in ms.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub decay50_ms: f64,
    /// Time from the peak until 90% of the amplitude is recovered, in ms.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub decay90_ms: f64,
    /// Largest contraction velocity, minimum of the derivative crop.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub contraction_peak: f64,
    /// Largest relaxation velocity, maximum of the derivative crop.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub relaxation_peak: f64,
}

impl ShorteningKinetics {
    /// An all-NaN record, the outcome of a rejected crop.
    pub fn nan() -> Self {
        ShorteningKinetics {
            baseline: f64::NAN,
            peak: f64::NAN,
            fractional_shortening: f64::NAN,
            rise_time_ms: f64::NAN,
            decay50_ms: f64::NAN,
            decay90_ms: f64::NAN,
            contraction_peak: f64::NAN,
            relaxation_peak: f64::NAN,
        }
    }
}

/// Measure the kinetics of the single calcium transient contained in
/// `crop`, sampled at `sampling` Hz.
///
/// The crop is re-scanned with the mode crop threshold; anything but
/// exactly one peak rejects the whole record (all NaN, a warning is logged)
/// so that the caller can carry on with its remaining transients.
pub fn analyze_transient(crop: &[f64], sampling: f64, mode: Mode) -> TransientKinetics {
    measure(
        crop,
        sampling,
        Polarity::Upward,
        mode.crop_threshold(),
        CROP_MIN_DISTANCE,
    )
}

/// Measure the kinetics of the single sarcomere shortening contraction
/// contained in `crop`, with `derivative` the matching crop of the length
/// derivative trace (used for the contraction/relaxation velocity peaks).
pub fn analyze_shortening(
    crop: &[f64],
    derivative: &[f64],
    sampling: f64,
) -> ShorteningKinetics {
    let kinetics = measure(
        crop,
        sampling,
        Polarity::Downward,
        SHORTENING_THRESHOLD,
        SHORTENING_MIN_DISTANCE,
    );
    if !kinetics.is_valid() {
        return ShorteningKinetics::nan();
    }
    ShorteningKinetics {
        baseline: kinetics.baseline,
        peak: kinetics.peak,
        fractional_shortening: kinetics.amplitude / kinetics.baseline * 100.0,
        rise_time_ms: kinetics.rise_time_ms,
        decay50_ms: kinetics.decay50_ms,
        decay90_ms: kinetics.decay90_ms,
        contraction_peak: nanmin(derivative),
        relaxation_peak: nanmax(derivative),
    }
}

/// Measure the single calcium transient in `crop` together with its spatial
/// synchrony over the aligned linescan `image_crop` (rows = position,
/// columns = time).
///
/// Returns the kinetics, the per-row delay statistics, and the per-row
/// delay profile itself. A rejected crop yields all-NaN kinetics and
/// statistics plus an all-NaN profile, keeping the profile stack aligned
/// with the measurement rows.
pub fn analyze_transient_sync(
    crop: &[f64],
    sampling: f64,
    image_crop: &DMatrix<f64>,
    delay_fraction: f64,
) -> (TransientKinetics, SynchronyStats, Vec<f64>) {
    let kinetics = measure(
        crop,
        sampling,
        Polarity::Upward,
        SYNC_CROP_THRESHOLD,
        CROP_MIN_DISTANCE,
    );
    if !kinetics.is_valid() {
        return (
            kinetics,
            SynchronyStats::nan(),
            vec![f64::NAN; image_crop.nrows()],
        );
    }

    let delays = row_delays(image_crop, sampling, delay_fraction);
    let stats = synchrony_stats(&delays);
    (kinetics, stats, delays)
}

/// The shared measurement protocol: re-detect the peak, then extract rise
/// and decay times via threshold-crossing search under the given sign
/// convention.
fn measure(
    crop: &[f64],
    sampling: f64,
    polarity: Polarity,
    threshold: f64,
    min_distance: usize,
) -> TransientKinetics {
    // downward transients are detected on the inverted trace
    let peaks = match polarity {
        Polarity::Upward => detect_peaks(crop, threshold, min_distance),
        Polarity::Downward => {
            let inverted: Vec<f64> = crop.iter().map(|value| -value).collect();
            detect_peaks(&inverted, threshold, min_distance)
        }
    };
    if peaks.len() != 1 {
        log::warn!(
            "invalid transient: expected exactly one peak in the crop, found {}",
            peaks.len()
        );
        return TransientKinetics::nan();
    }
    measure_at(crop, peaks[0], sampling, polarity)
}

/// Extract the kinetics around an already located peak index.
fn measure_at(
    crop: &[f64],
    peak_index: usize,
    sampling: f64,
    polarity: Polarity,
) -> TransientKinetics {
    let baseline = baseline(crop);
    let peak = crop[peak_index];
    let amplitude = polarity.amplitude(baseline, peak);

    // rise time 10-90%, searched from the start of the crop
    let rise10 = first_rise_index(crop, polarity, baseline, amplitude, 0.1);
    let rise90 = first_rise_index(crop, polarity, baseline, amplitude, 0.9);
    let rise_time_ms = match (rise10, rise90) {
        (Some(i10), Some(i90)) => {
            floor_guarded((i90 as f64 - i10 as f64) / sampling * 1000.0, TIME_FLOOR_MS)
        }
        _ => f64::NAN,
    };

    // decay times, searched from the peak onward
    let decay50_ms = decay_time_ms(
        crop,
        peak_index,
        polarity,
        peak,
        amplitude,
        0.5,
        sampling,
        TIME_FLOOR_MS,
    );
    let decay90_ms = decay_time_ms(
        crop,
        peak_index,
        polarity,
        peak,
        amplitude,
        0.9,
        sampling,
        DECAY90_FLOOR_MS,
    );

    TransientKinetics {
        baseline,
        peak,
        amplitude,
        rise_time_ms,
        decay50_ms,
        decay90_ms,
    }
}

/// First index at which the crop reaches `fraction` of the amplitude away
/// from the baseline.
fn first_rise_index(
    crop: &[f64],
    polarity: Polarity,
    baseline: f64,
    amplitude: f64,
    fraction: f64,
) -> Option<usize> {
    let level = polarity.rise_level(baseline, amplitude, fraction);
    crop.iter().position(|&value| polarity.reaches(value, level))
}

/// Time (ms) from the peak until the crop recovers `fraction` of the
/// amplitude, NaN when the crossing is never found or below `floor_ms`.
#[allow(clippy::too_many_arguments)]
fn decay_time_ms(
    crop: &[f64],
    peak_index: usize,
    polarity: Polarity,
    peak: f64,
    amplitude: f64,
    fraction: f64,
    sampling: f64,
    floor_ms: f64,
) -> f64 {
    let level = polarity.decay_level(peak, amplitude, fraction);
    match crop[peak_index..]
        .iter()
        .position(|&value| polarity.recovers(value, level))
    {
        Some(index) => floor_guarded(index as f64 / sampling * 1000.0, floor_ms),
        None => f64::NAN,
    }
}

/// NaN below the noise floor, unchanged otherwise.
fn floor_guarded(time_ms: f64, floor_ms: f64) -> f64 {
    if time_ms < floor_ms {
        f64::NAN
    } else {
        time_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{synthetic_trace, TransientShape};
    use approx::assert_relative_eq;

    const SAMPLING: f64 = 535.0;

    /// A clean single-transient crop: 50 baseline samples, linear rise,
    /// exponential decay.
    fn single_crop(shape: &TransientShape) -> Vec<f64> {
        synthetic_trace(shape, SAMPLING, &[100], 500, 0.0, 0).unwrap()[50..478].to_vec()
    }

    #[test]
    fn test_analyze_recovers_baseline_peak_and_amplitude() {
        let shape = TransientShape::default();
        let crop = single_crop(&shape);
        let kinetics = analyze_transient(&crop, SAMPLING, Mode::Single);

        assert!(kinetics.is_valid());
        assert_relative_eq!(kinetics.baseline, shape.baseline, epsilon = 1e-9);
        assert_relative_eq!(kinetics.peak, shape.baseline + shape.amplitude, epsilon = 1e-9);
        assert_relative_eq!(kinetics.amplitude, shape.amplitude, epsilon = 1e-9);
    }

    #[test]
    fn test_rise_time_matches_the_synthetic_ramp() {
        let shape = TransientShape {
            rise_ms: 40.0,
            ..TransientShape::default()
        };
        let crop = single_crop(&shape);
        let kinetics = analyze_transient(&crop, SAMPLING, Mode::Single);

        // a linear ramp crosses 10% and 90% of the amplitude 0.8 rise
        // lengths apart; quantization adds at most one sample per crossing
        let sample_ms = 1000.0 / SAMPLING;
        assert!((kinetics.rise_time_ms - 0.8 * shape.rise_ms).abs() <= 2.0 * sample_ms);
    }

    #[test]
    fn test_decay_times_match_the_synthetic_time_constant() {
        let shape = TransientShape::default();
        let crop = single_crop(&shape);
        let kinetics = analyze_transient(&crop, SAMPLING, Mode::Single);

        let sample_ms = 1000.0 / SAMPLING;
        let expected50 = shape.decay_tau_ms * 2.0_f64.ln();
        let expected90 = shape.decay_tau_ms * 10.0_f64.ln();
        assert!((kinetics.decay50_ms - expected50).abs() <= 2.0 * sample_ms);
        assert!((kinetics.decay90_ms - expected90).abs() <= 2.0 * sample_ms);
    }

    #[test]
    fn test_decay_time_grows_with_the_time_constant() {
        let mut previous = 0.0;
        for decay_tau_ms in [60.0, 120.0, 240.0] {
            let shape = TransientShape {
                decay_tau_ms,
                ..TransientShape::default()
            };
            let crop = single_crop(&shape);
            let kinetics = analyze_transient(&crop, SAMPLING, Mode::Single);
            assert!(kinetics.decay50_ms > previous);
            previous = kinetics.decay50_ms;
        }
    }

    #[test]
    fn test_two_peaks_reject_the_crop_without_panicking() {
        let shape = TransientShape::default();
        let crop = synthetic_trace(&shape, SAMPLING, &[100, 300], 500, 0.0, 0).unwrap();
        let kinetics = analyze_transient(&crop, SAMPLING, Mode::Single);

        assert!(!kinetics.is_valid());
        assert!(kinetics.baseline.is_nan());
        assert!(kinetics.amplitude.is_nan());
        assert!(kinetics.rise_time_ms.is_nan());
        assert!(kinetics.decay50_ms.is_nan());
        assert!(kinetics.decay90_ms.is_nan());
    }

    #[test]
    fn test_empty_and_flat_crops_reject() {
        assert!(!analyze_transient(&[], SAMPLING, Mode::Single).is_valid());
        assert!(!analyze_transient(&[1.0; 200], SAMPLING, Mode::Single).is_valid());
    }

    #[test]
    fn test_never_crossed_decay_is_nan_but_rise_survives() {
        let shape = TransientShape::default();
        // cut the crop shortly after the peak so the 90% recovery is never seen
        let trace = synthetic_trace(&shape, SAMPLING, &[100], 500, 0.0, 0).unwrap();
        let crop = &trace[50..140];
        let kinetics = analyze_transient(crop, SAMPLING, Mode::Single);

        assert!(kinetics.is_valid());
        assert!(kinetics.rise_time_ms.is_finite());
        assert!(kinetics.decay90_ms.is_nan());
    }

    #[test]
    fn test_shortening_mirror_of_the_calcium_protocol() {
        let shape = TransientShape {
            baseline: 1.8,
            amplitude: 0.25,
            rise_ms: 40.0,
            decay_tau_ms: 120.0,
        };
        // invert a calcium-like trace into a shortening trace around the
        // sarcomere resting length
        let upward = synthetic_trace(&shape, SAMPLING, &[100], 500, 0.0, 0).unwrap();
        let crop: Vec<f64> = upward[50..478]
            .iter()
            .map(|value| 2.0 * shape.baseline - value)
            .collect();
        let derivative: Vec<f64> = crop.windows(2).map(|w| (w[1] - w[0]) * SAMPLING).collect();

        let kinetics = analyze_shortening(&crop, &derivative, SAMPLING);
        assert_relative_eq!(kinetics.baseline, shape.baseline, epsilon = 1e-9);
        assert_relative_eq!(
            kinetics.peak,
            shape.baseline - shape.amplitude,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            kinetics.fractional_shortening,
            shape.amplitude / shape.baseline * 100.0,
            epsilon = 1e-9
        );
        assert!(kinetics.rise_time_ms.is_finite());
        assert!(kinetics.decay50_ms.is_finite());
        // shortening is the fastest deflection, relaxation the recovery
        assert!(kinetics.contraction_peak < 0.0);
        assert!(kinetics.relaxation_peak > 0.0);
    }

    #[test]
    fn test_rejected_records_serialize_and_reload_as_nan() {
        let json = serde_json::to_string(&TransientKinetics::nan()).unwrap();
        let reloaded: TransientKinetics = serde_json::from_str(&json).unwrap();
        assert!(!reloaded.is_valid());
        assert!(reloaded.rise_time_ms.is_nan());
    }
}
