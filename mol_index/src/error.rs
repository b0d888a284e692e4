//! Error taxonomy shared by the decoder, matcher and search pipelines.
//!
//! Structural and inconclusive failures are local to one candidate and never abort a
//! search stream. Out-of-memory and cancellation propagate to the caller.

use std::fmt;
use thiserror::Error;

/// Why a match attempt stopped before it could decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    TimedOut,
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Interrupt::Cancelled => write!(f, "cancelled"),
            Interrupt::TimedOut => write!(f, "timed out"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed molecule blob (degree overflow, inconsistent counts, truncated data)
    #[error("malformed molecule: {0}")]
    Structural(String),

    #[error("bitset capacity mismatch: {left} words vs {right} words")]
    CapacityMismatch { left: usize, right: usize },

    #[error("allocation failed: {0}")]
    OutOfMemory(String),

    #[error("match inconclusive: {0}")]
    Inconclusive(Interrupt),

    #[error("search cancelled")]
    Cancelled,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<std::collections::TryReserveError> for Error {
    fn from(e: std::collections::TryReserveError) -> Error {
        Error::OutOfMemory(e.to_string())
    }
}

impl Error {
    /// Errors that end a whole query stream rather than skipping one candidate.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Structural(_) | Error::Inconclusive(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
