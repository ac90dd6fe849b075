//! NaN-aware helpers for 1-D intensity traces.
//!
//! Upstream filtering and normalization may leave NaN placeholders in a
//! trace; every reduction in this module skips them. NaN is also the "no
//! value" sentinel used throughout the measurement records, so the helpers
//! here are the single place where NaN semantics are defined.
use core::f64;

use crate::BASELINE_WINDOW;

/// The smallest non-NaN value of the trace, or NaN if there is none.
pub fn nanmin(trace: &[f64]) -> f64 {
    trace.iter().copied().fold(f64::NAN, f64::min)
}

/// The largest non-NaN value of the trace, or NaN if there is none.
pub fn nanmax(trace: &[f64]) -> f64 {
    trace.iter().copied().fold(f64::NAN, f64::max)
}

/// The mean of the non-NaN values of the trace, or NaN if there is none.
pub fn nanmean(trace: &[f64]) -> f64 {
    let (sum, count) = trace
        .iter()
        .filter(|x| !x.is_nan())
        .fold((0.0, 0_usize), |(sum, count), x| (sum + x, count + 1));
    if count > 0 {
        sum / count as f64
    } else {
        f64::NAN
    }
}

/// The population standard deviation of the non-NaN values of the trace,
/// or NaN if there is none.
pub fn nanstd(trace: &[f64]) -> f64 {
    let mean = nanmean(trace);
    if mean.is_nan() {
        return f64::NAN;
    }
    let (sum_sq, count) = trace
        .iter()
        .filter(|x| !x.is_nan())
        .fold((0.0, 0_usize), |(sum_sq, count), x| {
            (sum_sq + (x - mean) * (x - mean), count + 1)
        });
    (sum_sq / count as f64).sqrt()
}

/// The resting level of a transient window, estimated as the mean of its
/// first [`BASELINE_WINDOW`] samples (fewer if the window is shorter).
pub fn baseline(window: &[f64]) -> f64 {
    nanmean(&window[..window.len().min(BASELINE_WINDOW)])
}

/// Deserialize an `f64` that may have been written as JSON `null`, the
/// serialized form of NaN.
pub fn f64_from_nullable<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Deserialize stacked delay profiles whose NaN entries were written as
/// JSON `null`.
pub fn profiles_from_nullable<'de, D>(deserializer: D) -> Result<Option<Vec<Vec<f64>>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    let profiles = Option::<Vec<Vec<Option<f64>>>>::deserialize(deserializer)?;
    Ok(profiles.map(|profiles| {
        profiles
            .into_iter()
            .map(|profile| {
                profile
                    .into_iter()
                    .map(|delay| delay.unwrap_or(f64::NAN))
                    .collect()
            })
            .collect()
    }))
}
