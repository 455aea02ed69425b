//! Error types for the TSM engine.
//!
//! All errors are surfaced synchronously at the API boundary. The engine
//! never retries, never panics on data-dependent conditions, and never
//! silently drops a configuration change.

use std::fmt;

/// Errors returned from the public API.
#[derive(Debug, Clone, PartialEq)]
pub enum TsmError {
    /// A configuration value was outside its documented range.
    InvalidConfiguration {
        field: &'static str,
        reason: String,
    },
    /// A ring buffer could not grow to hold new data.
    AllocationFailed,
    /// The caller invoked an operation that the stream's state machine forbids,
    /// e.g. writing after `flush()`.
    InvalidState { reason: &'static str },
}

impl fmt::Display for TsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TsmError::InvalidConfiguration { field, reason } => {
                write!(f, "invalid configuration for `{field}`: {reason}")
            }
            TsmError::AllocationFailed => write!(f, "ring buffer allocation failed"),
            TsmError::InvalidState { reason } => write!(f, "invalid stream state: {reason}"),
        }
    }
}

impl std::error::Error for TsmError {}

pub type TsmResult<T> = Result<T, TsmError>;
