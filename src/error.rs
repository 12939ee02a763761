// src/error.rs

use crate::eigenfaces::ModelState;
use thiserror::Error;

/// Every failure the crate can report.
///
/// Argument problems, numerical failures, lifecycle misuse, text parsing and
/// I/O are kept apart so callers can react to each kind separately.
#[derive(Error, Debug)]
pub enum EigenfacesError {
    /// A caller-supplied value is out of range or has the wrong dimensions.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The symmetric eigendecomposition did not converge or the backend failed.
    #[error("computation failed: {0}")]
    ComputationFailure(String),

    /// The operation is not allowed in the model's current lifecycle state.
    #[error("{operation} is not allowed while the model is {state:?}")]
    PreconditionViolation {
        operation: &'static str,
        state: ModelState,
    },

    /// Malformed text-format vector.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EigenfacesError>;
