//! Thresholded local-maximum detection on 1-D traces.
use std::cmp::Ordering;

use crate::trace::{nanmax, nanmin};

/// Indices of the local maxima of `trace` that exceed the relative
/// `threshold` and are at least `min_distance` samples apart.
///
/// The threshold is expressed as a fraction of the trace dynamic range: a
/// candidate must exceed `min + threshold * (max - min)`, with min and max
/// taken over the non-NaN samples. A flat-top maximum reports its midpoint.
/// When two candidates are closer than `min_distance`, the lower one is
/// suppressed.
///
/// The returned indices are unique and sorted in ascending order. An empty
/// result is not an error; callers must check the cardinality themselves.
///
/// # Examples
///
/// ```rust
/// use ca_kinetics::peaks::detect_peaks;
///
/// let trace = [0.0, 0.2, 1.0, 0.3, 0.1, 0.2, 0.9, 0.2, 0.0];
/// assert_eq!(detect_peaks(&trace, 0.5, 1), vec![2, 6]);
///
/// // candidates closer than the minimum distance collapse onto the highest
/// assert_eq!(detect_peaks(&trace, 0.5, 10), vec![2]);
/// ```
pub fn detect_peaks(trace: &[f64], threshold: f64, min_distance: usize) -> Vec<usize> {
    if trace.len() < 3 {
        return vec![];
    }

    let min = nanmin(trace);
    let max = nanmax(trace);
    // flat or all-NaN traces have no dynamic range to pick peaks from
    if !(max > min) {
        return vec![];
    }
    let level = min + threshold * (max - min);

    let mut peaks = local_maxima(trace, level);
    if peaks.len() > 1 && min_distance > 1 {
        suppress_close_peaks(trace, &mut peaks, min_distance);
    }
    peaks
}

/// Indices of the strict local maxima of `trace` above `level`, with
/// plateau handling: a run of equal samples bounded by a rise and a fall
/// counts as one maximum at its midpoint.
fn local_maxima(trace: &[f64], level: f64) -> Vec<usize> {
    let mut peaks = Vec::new();
    let mut idx = 1;
    while idx < trace.len() {
        // NaN comparisons are false, so NaN samples never start a candidate
        if !(trace[idx] > trace[idx - 1]) {
            idx += 1;
            continue;
        }
        let mut end = idx;
        while end + 1 < trace.len() && trace[end + 1] == trace[idx] {
            end += 1;
        }
        if end + 1 < trace.len() && trace[end + 1] < trace[idx] && trace[idx] > level {
            peaks.push((idx + end) / 2);
        }
        idx = end + 1;
    }
    peaks
}

/// Greedy highest-first suppression: candidates within `min_distance` of an
/// already accepted (higher) peak are removed.
fn suppress_close_peaks(trace: &[f64], peaks: &mut Vec<usize>, min_distance: usize) {
    let mut by_height = peaks.clone();
    by_height.sort_by(|&a, &b| trace[b].partial_cmp(&trace[a]).unwrap_or(Ordering::Equal));

    let mut suppressed = vec![true; trace.len()];
    for &peak in peaks.iter() {
        suppressed[peak] = false;
    }
    for peak in by_height {
        if !suppressed[peak] {
            let window_start = peak.saturating_sub(min_distance);
            let window_end = (peak + min_distance + 1).min(trace.len());
            for slot in suppressed[window_start..window_end].iter_mut() {
                *slot = true;
            }
            suppressed[peak] = false;
        }
    }
    peaks.retain(|&peak| !suppressed[peak]);
}
