//! Arena-specific error types.
//!
//! Only configuration problems are reported as values. Contract violations
//! (invalid refs, freeing a non-held element of a buffer on hold, element
//! type mismatches) and buffer-id exhaustion panic: they mean an invariant
//! is already broken and the store cannot safely continue.

use std::error::Error;
use std::fmt;

/// Errors that can occur while configuring a data store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// A configuration value is out of range.
    InvalidConfig {
        /// Human-readable description of the problem.
        reason: String,
    },
    /// Every buffer id would be needed just to give each type a primary buffer.
    TooManyTypes {
        /// Number of buffers the store can address.
        max: u32,
    },
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { reason } => write!(f, "invalid config: {reason}"),
            Self::TooManyTypes { max } => {
                write!(f, "too many buffer types: store addresses only {max} buffers")
            }
        }
    }
}

impl Error for ArenaError {}
