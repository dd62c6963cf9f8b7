//! Classic pcap global header
//!
//! Every capture stream, inbound from the capture process and outbound to each
//! subscriber, starts with one 24 byte global header:
//!
//! ```text
//! +----------+---------+---------+----------+---------+---------+----------+
//! | magic(4) | major(2)| minor(2)| zone(4)  | sigs(4) | snap(4) | link(4)  |
//! +----------+---------+---------+----------+---------+---------+----------+
//! ```
//!
//! The magic number decides the byte order of every later field (including
//! the record headers) and whether timestamp fractions are micro- or
//! nanoseconds. pcapng is not accepted.
//!
//! Parsing and serialization are done by `pcap_parser`; this module maps its
//! types onto the broker's own.

use bytes::Bytes;
use pcap_parser::{parse_pcap_header, LegacyPcapBlock, Linktype, PcapHeader, ToVec};

use super::error::CaptureError;
use super::record::PacketRecord;

/// Size of the global header in bytes
pub const GLOBAL_HEADER_LEN: usize = 24;

/// Size of a per-record header in bytes
pub const RECORD_HEADER_LEN: usize = 16;

/// Magic for microsecond-resolution captures
pub const MAGIC_MICROS: u32 = 0xa1b2_c3d4;

/// Magic for nanosecond-resolution captures
pub const MAGIC_NANOS: u32 = 0xa1b2_3c4d;

/// Only major version in use for classic pcap
pub const VERSION_MAJOR: u16 = 2;

/// Minor version written to subscribers
pub const VERSION_MINOR: u16 = 4;

/// Snapshot length advertised to subscribers
pub const OUTBOUND_SNAPLEN: u32 = 65535;

/// Largest captured length libpcap itself will accept
pub const MAX_SNAPLEN: u32 = 262_144;

/// Link-layer header type (LINKTYPE_* value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkType(pub u32);

impl LinkType {
    pub const NULL: LinkType = LinkType(0);
    pub const ETHERNET: LinkType = LinkType(1);
    pub const RAW: LinkType = LinkType(101);
    pub const IEEE802_11: LinkType = LinkType(105);
    pub const LOOP: LinkType = LinkType(108);
    pub const LINUX_SLL: LinkType = LinkType(113);
    pub const IEEE802_11_RADIOTAP: LinkType = LinkType(127);
    pub const IPV4: LinkType = LinkType(228);
    pub const IPV6: LinkType = LinkType(229);
    pub const LINUX_SLL2: LinkType = LinkType(276);

    /// Short name for well-known link types
    pub fn name(&self) -> Option<&'static str> {
        match self.0 {
            0 => Some("NULL"),
            1 => Some("ETHERNET"),
            101 => Some("RAW"),
            105 => Some("IEEE802_11"),
            108 => Some("LOOP"),
            113 => Some("LINUX_SLL"),
            127 => Some("IEEE802_11_RADIOTAP"),
            228 => Some("IPV4"),
            229 => Some("IPV6"),
            276 => Some("LINUX_SLL2"),
            _ => None,
        }
    }
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "LINKTYPE_{}", self.0),
        }
    }
}

/// Byte order of a capture stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Unit of the sub-second timestamp field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampPrecision {
    Micros,
    Nanos,
}

impl TimestampPrecision {
    /// Number of fraction units in one second
    pub fn units_per_second(&self) -> u32 {
        match self {
            TimestampPrecision::Micros => 1_000_000,
            TimestampPrecision::Nanos => 1_000_000_000,
        }
    }

    fn magic(&self) -> u32 {
        match self {
            TimestampPrecision::Micros => MAGIC_MICROS,
            TimestampPrecision::Nanos => MAGIC_NANOS,
        }
    }
}

/// Decoded global header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    /// Link-layer type of every packet in the stream
    pub link_type: LinkType,
    /// Maximum captured bytes per packet
    pub snaplen: u32,
    /// Byte order of all header fields
    pub byte_order: ByteOrder,
    /// Unit of record timestamp fractions
    pub precision: TimestampPrecision,
    /// Format version (major, minor)
    pub version: (u16, u16),
}

impl StreamHeader {
    /// Header written to subscribers: little-endian, microseconds, v2.4
    pub fn outbound(link_type: LinkType, snaplen: u32) -> Self {
        Self {
            link_type,
            snaplen,
            byte_order: ByteOrder::Little,
            precision: TimestampPrecision::Micros,
            version: (VERSION_MAJOR, VERSION_MINOR),
        }
    }

    /// Parse a global header
    pub fn parse(buf: &[u8; GLOBAL_HEADER_LEN]) -> Result<Self, CaptureError> {
        let header = match parse_pcap_header(buf) {
            Ok((_, header)) => header,
            // The buffer is complete, so any failure is the magic number
            Err(_) => {
                let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
                return Err(CaptureError::UnknownMagic(magic));
            }
        };

        if header.version_major != VERSION_MAJOR {
            return Err(CaptureError::UnsupportedVersion {
                major: header.version_major,
                minor: header.version_minor,
            });
        }

        let byte_order = if header.is_bigendian() {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        };
        let precision = if header.is_nanosecond_precision() {
            TimestampPrecision::Nanos
        } else {
            TimestampPrecision::Micros
        };

        Ok(Self {
            // Upper bits of the link type field carry FCS info we don't use
            link_type: LinkType(header.network.0 as u32 & 0x0FFF_FFFF),
            snaplen: header.snaplen,
            byte_order,
            precision,
            version: (header.version_major, header.version_minor),
        })
    }

    /// Encode this header, always little-endian
    pub fn encode(&self) -> Result<Bytes, CaptureError> {
        let header = PcapHeader {
            magic_number: self.precision.magic(),
            version_major: self.version.0,
            version_minor: self.version.1,
            thiszone: 0,
            sigfigs: 0,
            snaplen: self.snaplen,
            network: Linktype(self.link_type.0 as i32),
        };

        header
            .to_vec_raw()
            .map(Bytes::from)
            .map_err(|e| CaptureError::Encode(format!("{:?}", e)))
    }

    /// Frame a record (record header + payload) in this header's precision
    ///
    /// The result is little-endian and shared by every subscriber of one
    /// fan-out pass.
    pub fn frame_record(&self, record: &PacketRecord) -> Result<Bytes, CaptureError> {
        let fraction = match self.precision {
            TimestampPrecision::Micros => record.ts_nanos / 1_000,
            TimestampPrecision::Nanos => record.ts_nanos,
        };

        let block = LegacyPcapBlock {
            ts_sec: record.ts_sec,
            ts_usec: fraction,
            caplen: record.captured_len(),
            origlen: record.orig_len,
            data: &record.data[..],
        };

        block
            .to_vec_raw()
            .map(Bytes::from)
            .map_err(|e| CaptureError::Encode(format!("{:?}", e)))
    }

    /// Upper bound for a record's captured length in this stream
    pub fn max_caplen(&self) -> u32 {
        self.snaplen.max(MAX_SNAPLEN)
    }

    /// Captured length field of a raw record header, read without parsing
    /// the rest of the record
    pub(crate) fn peek_caplen(&self, record_header: &[u8]) -> u32 {
        let raw = [
            record_header[8],
            record_header[9],
            record_header[10],
            record_header[11],
        ];
        match self.byte_order {
            ByteOrder::Little => u32::from_le_bytes(raw),
            ByteOrder::Big => u32::from_be_bytes(raw),
        }
    }
}
