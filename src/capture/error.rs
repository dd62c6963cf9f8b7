//! Capture stream error types

use std::io;

/// Error decoding the capture byte stream
///
/// There is no way to resynchronize on record boundaries, so every variant
/// is terminal for the stream that produced it.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Global header magic is not a known classic pcap magic
    #[error("unrecognized capture magic number {0:#010x}")]
    UnknownMagic(u32),

    /// Global header declares a format version we cannot read
    #[error("unsupported capture format version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    /// Stream ended before the global header was complete
    #[error("capture stream ended after {got} of {expected} global header bytes")]
    TruncatedHeader { got: usize, expected: usize },

    /// Stream ended inside a record header or payload
    #[error("record {index}: capture stream ended after {got} of {expected} bytes")]
    TruncatedRecord {
        index: u64,
        got: usize,
        expected: usize,
    },

    /// Captured length larger than any valid capture could produce
    #[error("record {index}: captured length {caplen} exceeds limit {limit}")]
    RecordTooLarge { index: u64, caplen: u32, limit: u32 },

    /// Sub-second timestamp field outside its unit's range
    #[error("record {index}: timestamp fraction {fraction} out of range")]
    InvalidTimestamp { index: u64, fraction: u32 },

    /// Record rejected by the pcap parser
    #[error("record {index}: malformed record: {reason}")]
    Malformed { index: u64, reason: String },

    /// Header or record could not be serialized
    #[error("failed to encode capture data: {0}")]
    Encode(String),

    /// Reading the pipe failed
    #[error("failed to read capture stream: {0}")]
    Io(#[from] io::Error),
}
