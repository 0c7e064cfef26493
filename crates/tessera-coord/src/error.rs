//! Error types for coordination-store access
//!
//! The retry loop in the cache keys off is_transient(): transient failures
//! are retried with backoff, everything else surfaces to the caller.

use std::error::Error;
use std::fmt;

/// Coordination client error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordError {
    /// Connection to the coordination store dropped mid-request
    ConnectionLoss,

    /// The request was interrupted before completing
    Interrupted,

    /// The path does not exist
    NoNode {
        /// Path that was requested
        path: String,
    },

    /// The node changed version between dependent calls
    BadVersion {
        /// Path whose version no longer matched
        path: String,
    },

    /// The session to the coordination store expired; every watch is gone
    SessionExpired,

    /// The client was closed and cannot serve requests
    Closed,

    /// Any other client-reported failure
    Internal {
        /// Client-provided description
        message: String,
    },
}

impl CoordError {
    /// Whether the retry loop may recover from this locally.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordError::ConnectionLoss | CoordError::Interrupted)
    }
}

impl fmt::Display for CoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordError::ConnectionLoss => write!(f, "lost connection to coordination store"),
            CoordError::Interrupted => write!(f, "coordination request interrupted"),
            CoordError::NoNode { path } => write!(f, "no such node: {}", path),
            CoordError::BadVersion { path } => write!(f, "version mismatch on {}", path),
            CoordError::SessionExpired => write!(f, "coordination session expired"),
            CoordError::Closed => write!(f, "coordination client is closed"),
            CoordError::Internal { message } => write!(f, "coordination failure: {}", message),
        }
    }
}

impl Error for CoordError {}

/// Result type alias for coordination operations
pub type CoordResult<T> = Result<T, CoordError>;
