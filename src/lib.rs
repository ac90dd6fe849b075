//! This crate extracts kinetic parameters from calcium-imaging line-scan
//! traces: per-transient rise time, decay times, amplitude, and the spatial
//! synchrony of the release along the scanned line.
//!
//! The input is a normalized 1-D fluorescence trace (optionally paired with
//! a 2-D space-time linescan image); upstream filtering, cropping and F/F0
//! normalization are the caller's concern, as is any export formatting of
//! the numeric output.
//!
//! # Scanning a Trace
//!
//! ```rust
//! use ca_kinetics::scan::{scan, ScanConfig};
//! use ca_kinetics::synthetic::{synthetic_trace, TransientShape};
//!
//! // three identical transients at 535 Hz
//! let shape = TransientShape::default();
//! let trace = synthetic_trace(&shape, 535.0, &[600, 1200, 1800], 3000, 0.0, 42).unwrap();
//!
//! let result = scan(&trace, 535.0, &ScanConfig::default()).unwrap();
//!
//! // the final transient of a finite recording is assumed truncated and dropped
//! assert_eq!(result.rows.len(), 2);
//! assert!(result.rows.iter().all(|row| row.kinetics.is_valid()));
//! ```
//!
//! # Measuring a Single Window
//!
//! ```rust
//! use approx::assert_relative_eq;
//! use ca_kinetics::transient::{analyze_transient, Mode};
//! use ca_kinetics::synthetic::{synthetic_trace, TransientShape};
//!
//! let shape = TransientShape::default();
//! let trace = synthetic_trace(&shape, 535.0, &[100], 500, 0.0, 42).unwrap();
//!
//! let kinetics = analyze_transient(&trace[50..], 535.0, Mode::Single);
//! assert_relative_eq!(kinetics.baseline, 1.0, epsilon = 1e-9);
//! assert_relative_eq!(kinetics.amplitude, 2.0, epsilon = 1e-9);
//! ```
//!
//! # Synchrony Analysis
//!
//! With a linescan image aligned to the trace, every measurement row also
//! carries the mean onset delay, its standard deviation and the synchrony
//! index (their ratio) across the spatial rows of the image; see
//! [`scan::scan_with_image`].

pub mod error;
pub mod linescan;
pub mod peaks;
pub mod scan;
pub mod synthetic;
pub mod trace;
pub mod transient;

/// Number of leading samples of a window used to estimate its baseline.
pub const BASELINE_WINDOW: usize = 10;
/// Number of samples kept before a detected peak when carving a transient window.
pub const PRE_PEAK_MARGIN: usize = 50;
/// Fraction of the estimated inter-transient interval covered by a window.
pub const WINDOW_FILL: f64 = 0.8;
/// Minimum inter-peak distance (in samples) for the coarse full-trace scan.
pub const SCAN_MIN_DISTANCE: usize = 200;
/// Minimum inter-peak distance (in samples) when re-detecting the peak inside a crop.
pub const CROP_MIN_DISTANCE: usize = 100;
/// Noise floor for rise times, 50% decay times and row delays, in milliseconds.
pub const TIME_FLOOR_MS: f64 = 10.0;
/// Noise floor for 90% decay times, in milliseconds.
pub const DECAY90_FLOOR_MS: f64 = 50.0;
