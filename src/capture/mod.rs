//! Capture ingestion
//!
//! This module provides:
//! - Capture process spawning and supervision
//! - Classic pcap global header parsing and encoding
//! - Streaming record decoding from the capture pipe

pub mod decoder;
pub mod error;
pub mod header;
pub mod process;
pub mod record;

pub use decoder::CaptureDecoder;
pub use error::CaptureError;
pub use header::{ByteOrder, LinkType, StreamHeader, TimestampPrecision, OUTBOUND_SNAPLEN};
pub use process::{CaptureExit, CaptureProcess, EXIT_GRACE};
pub use record::PacketRecord;
