//! Row-wise delay extraction over a 2-D linescan intensity image.
//!
//! A linescan image maps spatial position (rows) against time (columns).
//! For a windowed transient, the onset delay of each row quantifies how
//! uniformly the release spreads along the scanned line; the coefficient of
//! variation of those delays is the synchrony index.
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::trace::{f64_from_nullable, nanmax, nanmean, nanstd};
use crate::{BASELINE_WINDOW, TIME_FLOOR_MS};

/// Per-row delay statistics of a single transient.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SynchronyStats {
    /// Mean onset delay across rows, in ms.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub delay_mean_ms: f64,
    /// Population standard deviation of the onset delays, in ms.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub delay_sd_ms: f64,
    /// Synchrony index: delay standard deviation over delay mean.
    #[serde(deserialize_with = "f64_from_nullable")]
    pub synchrony_index: f64,
}

impl SynchronyStats {
    /// An all-NaN record, the outcome of a rejected crop.
    pub fn nan() -> Self {
        SynchronyStats {
            delay_mean_ms: f64::NAN,
            delay_sd_ms: f64::NAN,
            synchrony_index: f64::NAN,
        }
    }
}

/// Onset delay of every row of a windowed linescan image, in ms from the
/// start of the window.
///
/// Each row gets its own baseline (mean of its first [`BASELINE_WINDOW`]
/// columns), maximum intensity and amplitude; the row delay is the time of
/// the first sample reaching `delay_fraction` of that amplitude above the
/// baseline. Rows that never cross, or cross below the noise floor, are
/// NaN.
pub fn row_delays(image: &DMatrix<f64>, sampling: f64, delay_fraction: f64) -> Vec<f64> {
    let columns = image.ncols();
    (0..image.nrows())
        .map(|r| {
            let row: Vec<f64> = (0..columns).map(|c| image[(r, c)]).collect();
            let row_baseline = nanmean(&row[..columns.min(BASELINE_WINDOW)]);
            let row_max = nanmax(&row);
            let row_amplitude = row_max - row_baseline;
            // threshold at delay_fraction of the amplitude above the baseline
            let level = row_max - row_amplitude * (1.0 - delay_fraction);
            match row.iter().position(|&value| value >= level) {
                Some(index) => {
                    let delay_ms = index as f64 / sampling * 1000.0;
                    if delay_ms < TIME_FLOOR_MS {
                        f64::NAN
                    } else {
                        delay_ms
                    }
                }
                None => f64::NAN,
            }
        })
        .collect()
}

/// Aggregate a per-row delay profile into its summary statistics, ignoring
/// NaN rows.
///
/// # Examples
///
/// ```rust
/// use approx::assert_relative_eq;
/// use ca_kinetics::linescan::synchrony_stats;
///
/// let delays = vec![80.0, 100.0, f64::NAN, 120.0];
/// let stats = synchrony_stats(&delays);
///
/// assert_relative_eq!(stats.delay_mean_ms, 100.0);
/// assert_relative_eq!(stats.synchrony_index, stats.delay_sd_ms / 100.0);
/// ```
pub fn synchrony_stats(delays: &[f64]) -> SynchronyStats {
    let delay_mean_ms = nanmean(delays);
    let delay_sd_ms = nanstd(delays);
    SynchronyStats {
        delay_mean_ms,
        delay_sd_ms,
        synchrony_index: delay_sd_ms / delay_mean_ms,
    }
}

/// Mean delay profile across transients: the NaN-mean of the stacked
/// per-transient profiles, one value per spatial row.
pub fn mean_profile(profiles: &[Vec<f64>]) -> Vec<f64> {
    let rows = profiles.first().map_or(0, |profile| profile.len());
    (0..rows)
        .map(|r| {
            let across: Vec<f64> = profiles
                .iter()
                .filter_map(|profile| profile.get(r).copied())
                .collect();
            nanmean(&across)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SAMPLING: f64 = 535.0;

    /// An image whose rows switch from 1.0 to 3.0 at the given columns.
    fn step_image(onsets: &[usize], columns: usize) -> DMatrix<f64> {
        DMatrix::from_fn(onsets.len(), columns, |r, c| {
            if c >= onsets[r] {
                3.0
            } else {
                1.0
            }
        })
    }

    #[test]
    fn test_row_delays_follow_the_onsets() {
        let onsets = [60, 70, 80];
        let delays = row_delays(&step_image(&onsets, 200), SAMPLING, 0.5);

        assert_eq!(delays.len(), 3);
        for (delay, onset) in delays.iter().zip(onsets) {
            assert_relative_eq!(*delay, onset as f64 / SAMPLING * 1000.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_flat_row_has_nan_delay() {
        let mut image = step_image(&[60, 70], 200);
        // overwrite the second row with a constant: amplitude 0, the
        // threshold collapses onto the baseline level which every sample
        // reaches at column 0, below the noise floor
        for c in 0..200 {
            image[(1, c)] = 1.0;
        }
        let delays = row_delays(&image, SAMPLING, 0.5);
        assert!(delays[0].is_finite());
        assert!(delays[1].is_nan());
    }

    #[test]
    fn test_early_onset_is_floor_guarded() {
        // crossing at column 2 is about 3.7 ms, under the 10 ms floor
        let delays = row_delays(&step_image(&[2, 60], 200), SAMPLING, 0.5);
        assert!(delays[0].is_nan());
        assert!(delays[1].is_finite());
    }

    #[test]
    fn test_synchrony_stats_ignore_nan_rows() {
        let delays = [90.0, 110.0, f64::NAN];
        let stats = synchrony_stats(&delays);
        assert_relative_eq!(stats.delay_mean_ms, 100.0);
        assert_relative_eq!(stats.delay_sd_ms, 10.0);
        assert_relative_eq!(stats.synchrony_index, 0.1);
    }

    #[test]
    fn test_all_nan_profile_yields_nan_stats() {
        let stats = synchrony_stats(&[f64::NAN, f64::NAN]);
        assert!(stats.delay_mean_ms.is_nan());
        assert!(stats.synchrony_index.is_nan());
    }

    #[test]
    fn test_mean_profile_averages_across_transients() {
        let profiles = vec![vec![80.0, 100.0, f64::NAN], vec![90.0, f64::NAN, f64::NAN]];
        let mean = mean_profile(&profiles);
        assert_relative_eq!(mean[0], 85.0);
        assert_relative_eq!(mean[1], 100.0);
        assert!(mean[2].is_nan());
    }
}
