//! Packet records
//!
//! ```text
//! +-----------+------------+-----------+------------+-------------+
//! | ts_sec(4) | ts_frac(4) | caplen(4) | origlen(4) | payload(N)  |
//! +-----------+------------+-----------+------------+-------------+
//! ```

use bytes::Bytes;

/// One captured packet
///
/// Cheap to clone: the payload is a reference-counted `Bytes`. The broker
/// never keeps a record once its fan-out pass is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    /// Capture timestamp, whole seconds since the epoch
    pub ts_sec: u32,
    /// Capture timestamp, sub-second part in nanoseconds
    pub ts_nanos: u32,
    /// Length of the packet on the wire
    pub orig_len: u32,
    /// Captured bytes
    pub data: Bytes,
}

impl PacketRecord {
    /// Number of captured payload bytes
    pub fn captured_len(&self) -> u32 {
        self.data.len() as u32
    }
}
