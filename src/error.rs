//! Error types for the broker
//!
//! Everything in here is fatal to the broker. Failures that only concern a
//! single subscriber live in [`crate::registry::DeliveryError`] and never
//! reach this type.

use std::io;
use std::process::ExitStatus;

use crate::capture::CaptureError;

/// Result type alias using the broker error type
pub type Result<T> = std::result::Result<T, Error>;

/// Broker-level error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration rejected before startup
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Capture command could not be split into argv
    #[error("failed to parse capture command: {0:?}")]
    InvalidCommand(String),

    /// Capture process could not be started
    #[error("failed to start capture command {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The capture stream could not be decoded
    #[error("capture stream error: {0}")]
    Capture(#[from] CaptureError),

    /// Listener could not be bound
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Accept failed while the broker was not shutting down
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    /// Capture process ended before the stream header was read
    #[error("capture process exited before producing a stream header ({0})")]
    EarlyExit(ExitStatus),

    /// Shutdown was requested before the broker finished starting
    #[error("shutdown requested during startup")]
    Interrupted,

    /// A broker task panicked or was aborted
    #[error("broker task failed: {0}")]
    Task(String),

    /// Other I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
