//! Streaming capture decoder
//!
//! Reads the capture process's stdout one record at a time. A record is
//! handed out as soon as its last byte arrives; nothing waits for later
//! records, so a record reaches subscribers as soon as the capture process
//! flushes it.
//!
//! Bytes are collected in a `BytesMut` and each complete record is decoded by
//! `pcap_parser`. Payloads are split off the buffer without copying.

use std::io;

use bytes::{Buf, BytesMut};
use pcap_parser::{parse_pcap_frame, parse_pcap_frame_be};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::CaptureError;
use super::header::{
    ByteOrder, StreamHeader, TimestampPrecision, GLOBAL_HEADER_LEN, RECORD_HEADER_LEN,
};
use super::record::PacketRecord;

/// Decoder over a classic pcap byte stream
pub struct CaptureDecoder<R> {
    reader: R,
    buf: BytesMut,
    header: StreamHeader,
    max_caplen: u32,
    records_read: u64,
    bytes_read: u64,
}

impl<R: AsyncRead + Unpin> CaptureDecoder<R> {
    /// Read and validate the global header
    ///
    /// Fails if the stream ends early or the header is not classic pcap.
    pub async fn open(mut reader: R) -> Result<Self, CaptureError> {
        let mut buf = BytesMut::with_capacity(GLOBAL_HEADER_LEN);
        if !fill(&mut reader, &mut buf, GLOBAL_HEADER_LEN).await? {
            return Err(CaptureError::TruncatedHeader {
                got: buf.len(),
                expected: GLOBAL_HEADER_LEN,
            });
        }

        let mut raw = [0u8; GLOBAL_HEADER_LEN];
        raw.copy_from_slice(&buf[..GLOBAL_HEADER_LEN]);
        buf.advance(GLOBAL_HEADER_LEN);

        let header = StreamHeader::parse(&raw)?;

        tracing::debug!(
            link_type = %header.link_type,
            snaplen = header.snaplen,
            byte_order = ?header.byte_order,
            precision = ?header.precision,
            "Capture header decoded"
        );

        Ok(Self {
            reader,
            buf,
            max_caplen: header.max_caplen(),
            header,
            records_read: 0,
            bytes_read: GLOBAL_HEADER_LEN as u64,
        })
    }

    /// Header of the capture stream
    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    /// Number of records decoded so far
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Number of stream bytes consumed so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read the next record
    ///
    /// Returns `Ok(None)` when the stream ends on a record boundary.
    ///
    /// Cancel safe: bytes of a partially read record stay buffered and the
    /// next call picks up where the dropped one left off.
    pub async fn next_record(&mut self) -> Result<Option<PacketRecord>, CaptureError> {
        let index = self.records_read + 1;

        if !fill(&mut self.reader, &mut self.buf, RECORD_HEADER_LEN).await? {
            if self.buf.is_empty() {
                return Ok(None);
            }
            return Err(CaptureError::TruncatedRecord {
                index,
                got: self.buf.len(),
                expected: RECORD_HEADER_LEN,
            });
        }

        // Checked before buffering so a corrupt length can't make us wait for
        // gigabytes that will never come
        let caplen = self.header.peek_caplen(&self.buf[..RECORD_HEADER_LEN]);
        if caplen > self.max_caplen {
            return Err(CaptureError::RecordTooLarge {
                index,
                caplen,
                limit: self.max_caplen,
            });
        }

        let record_len = RECORD_HEADER_LEN + caplen as usize;
        if !fill(&mut self.reader, &mut self.buf, record_len).await? {
            return Err(CaptureError::TruncatedRecord {
                index,
                got: self.buf.len(),
                expected: record_len,
            });
        }

        let raw = &self.buf[..record_len];
        let parsed = match self.header.byte_order {
            ByteOrder::Little => parse_pcap_frame(raw),
            ByteOrder::Big => parse_pcap_frame_be(raw),
        };
        let (ts_sec, ts_frac, orig_len) = match parsed {
            Ok((_, block)) => (block.ts_sec, block.ts_usec, block.origlen),
            Err(e) => {
                return Err(CaptureError::Malformed {
                    index,
                    reason: format!("{:?}", e),
                })
            }
        };

        if ts_frac >= self.header.precision.units_per_second() {
            return Err(CaptureError::InvalidTimestamp {
                index,
                fraction: ts_frac,
            });
        }

        let ts_nanos = match self.header.precision {
            TimestampPrecision::Micros => ts_frac * 1_000,
            TimestampPrecision::Nanos => ts_frac,
        };

        let mut frame = self.buf.split_to(record_len).freeze();
        let data = frame.split_off(RECORD_HEADER_LEN);

        self.records_read = index;
        self.bytes_read += record_len as u64;

        Ok(Some(PacketRecord {
            ts_sec,
            ts_nanos,
            orig_len,
            data,
        }))
    }
}

/// Read until `buf` holds at least `want` bytes; `false` if the stream ends
/// first
async fn fill<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut BytesMut,
    want: usize,
) -> io::Result<bool> {
    while buf.len() < want {
        buf.reserve(want - buf.len());
        if reader.read_buf(buf).await? == 0 {
            return Ok(false);
        }
    }
    Ok(true)
}
