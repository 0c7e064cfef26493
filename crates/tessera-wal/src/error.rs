//! Error types for the write-ahead log
//!
//! All WAL errors are represented by the WalError enum. Variants carry enough
//! context to diagnose a failure without re-reading the file. The enum is
//! Clone because the group-commit sync worker records the outcome of one
//! durable sync on every work item in the drained batch.

use std::error::Error;
use std::fmt;
use std::path::PathBuf;

/// WAL error types with structured context
#[derive(Debug, Clone)]
pub enum WalError {
    /// I/O operation failed
    Io {
        /// File path where the error occurred, if known
        path: Option<PathBuf>,
        /// Underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// Operation arrived after close() was initiated
    LogClosed,

    /// File header is missing, truncated, or inconsistent
    BadHeader {
        /// File being read
        path: PathBuf,
        /// What was wrong with the header
        reason: String,
    },

    /// Record stream is corrupt (truncated record, bad length field, ...)
    Corrupt {
        /// Description of the corruption
        reason: String,
    },

    /// Record carries an event tag this version does not know
    UnknownEvent {
        /// The unrecognized tag byte
        tag: u8,
    },

    /// Cipher module name not present in the registry
    UnknownCryptoModule {
        /// Name as found in the header or configuration
        name: String,
    },

    /// Cipher module failed to initialize (bad key, bad parameters)
    CryptoInit {
        /// Module that failed
        module: String,
        /// Initialization failure description
        reason: String,
    },

    /// Encryption or authentication failure on the record stream
    CipherFailed {
        /// Description of the cipher failure
        reason: String,
    },

    /// Configuration rejected by validation
    InvalidConfig {
        /// Which parameter was invalid and why
        reason: String,
    },
}

impl fmt::Display for WalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalError::Io { path, kind, message } => {
                if let Some(path) = path {
                    write!(f, "I/O error in {}: {} ({})", path.display(), message, kind)
                } else {
                    write!(f, "I/O error: {} ({})", message, kind)
                }
            }

            WalError::LogClosed => {
                write!(f, "write-ahead log is closed")
            }

            WalError::BadHeader { path, reason } => {
                write!(f, "bad log file header in {}: {}", path.display(), reason)
            }

            WalError::Corrupt { reason } => {
                write!(f, "corrupt log record stream: {}", reason)
            }

            WalError::UnknownEvent { tag } => {
                write!(f, "unknown log event tag {:#04x}", tag)
            }

            WalError::UnknownCryptoModule { name } => {
                write!(f, "no crypto module registered under name '{}'", name)
            }

            WalError::CryptoInit { module, reason } => {
                write!(f, "crypto module '{}' failed to initialize: {}", module, reason)
            }

            WalError::CipherFailed { reason } => {
                write!(f, "cipher failure: {}", reason)
            }

            WalError::InvalidConfig { reason } => {
                write!(f, "invalid WAL configuration: {}", reason)
            }
        }
    }
}

impl Error for WalError {}

/// Convert std::io::Error to WalError::Io
impl From<std::io::Error> for WalError {
    fn from(err: std::io::Error) -> Self {
        WalError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for WAL operations
pub type WalResult<T> = Result<T, WalError>;
