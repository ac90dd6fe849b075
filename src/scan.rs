//! Full-trace transient scanning.
//!
//! The scanner runs the peak detector over a whole recording, carves a
//! window around every retained peak and dispatches each window to the
//! single-transient analyzer, assembling the per-transient measurement
//! rows (and, with a linescan image, the stacked delay profiles).
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use itertools::Itertools;
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::KineticsError;
use crate::linescan::{mean_profile, SynchronyStats};
use crate::peaks::detect_peaks;
use crate::trace::{f64_from_nullable, profiles_from_nullable};
use crate::transient::{analyze_transient, analyze_transient_sync, Mode, TransientKinetics};
use crate::{PRE_PEAK_MARGIN, SCAN_MIN_DISTANCE, WINDOW_FILL};

/// Minimum number of traces to parallelize a batch scan.
pub const MIN_TRACES_PAR: usize = 8;

/// Scanner configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Acquisition mode, selecting detection thresholds.
    pub mode: Mode,
    /// Keep the last detected transient. By default the final transient of
    /// a finite recording is assumed truncated and excluded whenever more
    /// than one peak is found.
    pub keep_last: bool,
    /// Fraction of the row amplitude at which per-row onset delays are
    /// taken during synchrony analysis.
    pub delay_fraction: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            mode: Mode::Single,
            keep_last: false,
            delay_fraction: 0.5,
        }
    }
}

impl ScanConfig {
    fn validate(&self) -> Result<(), KineticsError> {
        if !(self.delay_fraction > 0.0 && self.delay_fraction <= 1.0) {
            return Err(KineticsError::InvalidParameter(format!(
                "delay fraction must be in (0, 1], got {}",
                self.delay_fraction
            )));
        }
        Ok(())
    }
}

/// One measurement row per retained transient. NaN is the "no value"
/// sentinel for every field; a row whose peak sits closer than
/// [`PRE_PEAK_MARGIN`] samples to the trace start is entirely NaN but
/// still occupies its slot.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct MeasurementRow {
    /// First sample index of the transient window.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub begin: f64,
    /// Past-the-end sample index of the transient window.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub end: f64,
    /// Instantaneous local frequency estimate, in Hz.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub frequency: f64,
    /// Kinetics of the windowed transient.
    pub kinetics: TransientKinetics,
    /// Per-row delay statistics; present only when the scan was given a
    /// linescan image.
    pub synchrony: Option<SynchronyStats>,
}

impl MeasurementRow {
    /// An all-NaN row for a transient too close to the trace start.
    fn nan(with_synchrony: bool) -> Self {
        MeasurementRow {
            begin: f64::NAN,
            end: f64::NAN,
            frequency: f64::NAN,
            kinetics: TransientKinetics::nan(),
            synchrony: with_synchrony.then(SynchronyStats::nan),
        }
    }
}

/// The assembled output of a scan.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// Sampling rate of the scanned trace, in Hz.
    pub sampling: f64,
    /// One row per retained transient.
    pub rows: Vec<MeasurementRow>,
    /// Stacked per-transient delay profiles (one entry per row, one value
    /// per spatial row of the image); present only for synchrony scans.
    #[serde(deserialize_with = "profiles_from_nullable", default)]
    pub delay_profiles: Option<Vec<Vec<f64>>>,
}

impl ScanResult {
    /// Mean delay profile across transients, one value per spatial row.
    pub fn mean_delay_profile(&self) -> Option<Vec<f64>> {
        self.delay_profiles
            .as_ref()
            .map(|profiles| mean_profile(profiles))
    }

    /// Save the scan result to a JSON file. NaN fields are written as
    /// `null` and restored as NaN on load.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), KineticsError> {
        let file = File::create(path).map_err(|e| KineticsError::IOError(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| KineticsError::IOError(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| KineticsError::IOError(e.to_string()))
    }

    /// Load a scan result from a JSON file.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, KineticsError> {
        let file = File::open(path).map_err(|e| KineticsError::IOError(e.to_string()))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| KineticsError::IOError(e.to_string()))
    }
}

/// Find and measure every transient of `signal`, sampled at `sampling` Hz.
///
/// A trace with no peak above the scan threshold is an explicit
/// [`KineticsError::NoTransientsDetected`] outcome, not an empty result.
pub fn scan(
    signal: &[f64],
    sampling: f64,
    config: &ScanConfig,
) -> Result<ScanResult, KineticsError> {
    scan_inner(signal, sampling, None, config)
}

/// Find and measure every transient of `signal` together with its spatial
/// synchrony over the aligned linescan `image` (rows = position, columns =
/// time, same time axis as the signal).
pub fn scan_with_image(
    signal: &[f64],
    sampling: f64,
    image: &DMatrix<f64>,
    config: &ScanConfig,
) -> Result<ScanResult, KineticsError> {
    if image.ncols() != signal.len() {
        return Err(KineticsError::IncompatibleImage(format!(
            "image has {} columns but the signal has {} samples",
            image.ncols(),
            signal.len()
        )));
    }
    scan_inner(signal, sampling, Some(image), config)
}

fn scan_inner(
    signal: &[f64],
    sampling: f64,
    image: Option<&DMatrix<f64>>,
    config: &ScanConfig,
) -> Result<ScanResult, KineticsError> {
    if !(sampling > 0.0 && sampling.is_finite()) {
        return Err(KineticsError::InvalidParameter(format!(
            "sampling rate must be positive and finite, got {}",
            sampling
        )));
    }
    config.validate()?;

    let peaks = detect_peaks(signal, config.mode.scan_threshold(), SCAN_MIN_DISTANCE);
    if peaks.is_empty() {
        return Err(KineticsError::NoTransientsDetected);
    }
    log::debug!("{} candidate transients detected", peaks.len());

    // the final transient of a finite recording is assumed truncated and
    // dropped, unless it is the only one or the caller opted out
    let retained = if peaks.len() > 1 && !config.keep_last {
        peaks.len() - 1
    } else {
        peaks.len()
    };

    // local frequency from the inter-peak interval; the last peak has no
    // successor and falls back to 1 Hz
    let frequencies: Vec<f64> = peaks
        .iter()
        .tuple_windows()
        .map(|(&current, &next)| (sampling / (next - current) as f64).round().max(1.0))
        .chain(std::iter::once(1.0))
        .collect();

    let mut rows = Vec::with_capacity(retained);
    let mut profiles = image.map(|_| Vec::with_capacity(retained));

    for (index, &peak) in peaks[..retained].iter().enumerate() {
        if peak < PRE_PEAK_MARGIN {
            log::warn!(
                "transient #{} at sample {} is too close to the trace start",
                index,
                peak
            );
            rows.push(MeasurementRow::nan(image.is_some()));
            if let (Some(profiles), Some(image)) = (profiles.as_mut(), image) {
                profiles.push(vec![f64::NAN; image.nrows()]);
            }
            continue;
        }

        let frequency = frequencies[index];
        let duration = ((1000.0 / frequency) * WINDOW_FILL / (1000.0 / sampling)) as usize;
        let begin = peak - PRE_PEAK_MARGIN;
        let end = (peak + duration).min(signal.len());
        log::debug!(
            "transient #{}: window [{}, {}) at {} Hz",
            index,
            begin,
            end,
            frequency
        );
        let crop = &signal[begin..end];

        match image {
            None => {
                let kinetics = analyze_transient(crop, sampling, config.mode);
                rows.push(MeasurementRow {
                    begin: begin as f64,
                    end: end as f64,
                    frequency,
                    kinetics,
                    synchrony: None,
                });
            }
            Some(image) => {
                let image_crop = image.columns(begin, end - begin).into_owned();
                let (kinetics, stats, delays) =
                    analyze_transient_sync(crop, sampling, &image_crop, config.delay_fraction);
                rows.push(MeasurementRow {
                    begin: begin as f64,
                    end: end as f64,
                    frequency,
                    kinetics,
                    synchrony: Some(stats),
                });
                if let Some(profiles) = profiles.as_mut() {
                    profiles.push(delays);
                }
            }
        }
    }

    Ok(ScanResult {
        sampling,
        rows,
        delay_profiles: profiles,
    })
}

/// Scan a batch of independent traces sharing one sampling rate, in
/// parallel when the batch is large enough. Per-trace outcomes are kept
/// separate so one empty trace does not abort the batch.
pub fn scan_batch(
    traces: &[Vec<f64>],
    sampling: f64,
    config: &ScanConfig,
) -> Vec<Result<ScanResult, KineticsError>> {
    log::info!("scanning a batch of {} traces", traces.len());
    if traces.len() >= MIN_TRACES_PAR {
        traces
            .par_iter()
            .map(|trace| scan(trace, sampling, config))
            .collect()
    } else {
        traces
            .iter()
            .map(|trace| scan(trace, sampling, config))
            .collect()
    }
}
