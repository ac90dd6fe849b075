//! Error module for the calcium kinetics library.
use std::error::Error;
use std::fmt;

/// Error types for the library.
#[derive(Debug, PartialEq)]
pub enum KineticsError {
    /// No peak exceeded the detection threshold over the full trace.
    NoTransientsDetected,
    /// Error for invalid parameters, e.g., a relative threshold outside (0, 1).
    InvalidParameter(String),
    /// Error for a linescan image that does not align with its companion signal.
    IncompatibleImage(String),
    /// Error for I/O operations.
    IOError(String),
}

impl fmt::Display for KineticsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KineticsError::NoTransientsDetected => write!(f, "No transient found"),
            KineticsError::InvalidParameter(e) => write!(f, "Invalid parameter: {}", e),
            KineticsError::IncompatibleImage(e) => write!(f, "Incompatible linescan image: {}", e),
            KineticsError::IOError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for KineticsError {}
