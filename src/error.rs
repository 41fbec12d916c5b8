//! Error types for the console driver.
//!
//! Failure policy, per call site: transport faults stop the background reader
//! and turn later session calls into [`Error::ConnectionClosed`]; control-line
//! toggling failures during a reset sequence are logged and swallowed (reset
//! is best-effort, correctness is enforced by the caller's follow-up
//! assertions); wait timeouts surface as [`Error::Timeout`] carrying the full
//! transcript captured since the relevant mark; malformed byte sequences are
//! decoded lossily and never fail.

use std::time::Duration;

use thiserror::Error;

/// Categories of low-level serial port failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialPortErrorKind {
    /// No device found.
    NoDevice,
    /// Invalid input.
    InvalidInput,
    /// I/O error.
    Io,
    /// Unknown error.
    Unknown,
}

/// Low-level serial port error.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {description}")]
pub struct SerialPortError {
    /// Error kind.
    pub kind: SerialPortErrorKind,
    /// Error description.
    pub description: String,
}

impl SerialPortError {
    /// Creates a new serial port error.
    pub fn new(kind: SerialPortErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Creates an I/O error.
    pub fn io(description: impl Into<String>) -> Self {
        Self::new(SerialPortErrorKind::Io, description)
    }
}

impl From<serialport::Error> for SerialPortError {
    fn from(e: serialport::Error) -> Self {
        let kind = match e.kind {
            serialport::ErrorKind::NoDevice => SerialPortErrorKind::NoDevice,
            serialport::ErrorKind::InvalidInput => SerialPortErrorKind::InvalidInput,
            serialport::ErrorKind::Io(_) => SerialPortErrorKind::Io,
            serialport::ErrorKind::Unknown => SerialPortErrorKind::Unknown,
        };
        SerialPortError::new(kind, e.to_string())
    }
}

impl From<std::io::Error> for SerialPortError {
    fn from(e: std::io::Error) -> Self {
        SerialPortError::io(e.to_string())
    }
}

/// Errors surfaced by console operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The serial transport failed.
    #[error("serial port error: {0}")]
    Port(#[from] SerialPortError),

    /// The background reader has stopped; the session is no longer usable.
    #[error("console connection is closed")]
    ConnectionClosed,

    /// A wait primitive ran out its deadline.
    ///
    /// Carries everything captured since the mark the wait was scoped to, so
    /// a single failed run can be diagnosed without reproduction.
    #[error(
        "timed out after {timeout:?} waiting for {operation}\n\
         --- captured output ---\n{transcript}\n--- end captured output ---"
    )]
    Timeout {
        /// What the wait was looking for.
        operation: String,
        /// The deadline that elapsed.
        timeout: Duration,
        /// Clean text captured since the wait's mark.
        transcript: String,
    },

    /// A sentinel pattern in a device profile failed to compile.
    #[error("invalid sentinel pattern")]
    Pattern(#[from] regex::Error),

    /// The background reader thread could not be started.
    #[error("failed to start reader thread: {0}")]
    Spawn(std::io::Error),
}

impl Error {
    /// Builds a [`Error::Timeout`] for a wait on `operation`.
    pub(crate) fn timed_out(
        operation: impl Into<String>,
        timeout: Duration,
        transcript: impl Into<String>,
    ) -> Self {
        Error::Timeout {
            operation: operation.into(),
            timeout,
            transcript: transcript.into(),
        }
    }
}

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;
