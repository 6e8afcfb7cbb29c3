//! # Runtime Error Types
//!
//! Recoverable errors for persistence and IO. Numeric misuse (shape or
//! dtype mismatches, pipeline underflow) is a programming error and stays
//! a fatal assertion instead.

use alloc::string::String;
use core::fmt;

// ============================================================================
// RESULT TYPE
// ============================================================================

/// Result type for runtime operations
pub type SynapseResult<T> = Result<T, SynapseError>;

// ============================================================================
// ERROR ENUM
// ============================================================================

/// Recoverable runtime error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynapseError {
    /// A serialized field could not be parsed
    ParseField {
        /// Zero-based index of the 16-byte field in the input
        index: usize,
    },

    /// Serialized data does not match the destination tensor's element count
    LengthMismatch { expected: usize, actual: usize },

    /// Layer index outside the model's stack
    NoSuchLayer { index: usize },

    /// File IO failed (std builds only)
    Io(String),
}

impl fmt::Display for SynapseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseField { index } => {
                write!(f, "malformed value at field {index}")
            }
            Self::LengthMismatch { expected, actual } => {
                write!(f, "expected {expected} serialized values, found {actual}")
            }
            Self::NoSuchLayer { index } => {
                write!(f, "no trainable layer at index {index}")
            }
            Self::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SynapseError {}

#[cfg(feature = "std")]
impl From<std::io::Error> for SynapseError {
    fn from(err: std::io::Error) -> Self {
        use alloc::string::ToString;
        Self::Io(err.to_string())
    }
}
