//! End-to-end tests: a real capture command, a real listener, real clients

#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use bytes::{BufMut, Bytes};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use pcap_broker::capture::TimestampPrecision;
use pcap_broker::{
    Broker, BrokerConfig, CaptureError, CaptureExit, Error, LinkType, PacketRecord, StreamHeader,
};

fn config(command: String) -> BrokerConfig {
    BrokerConfig::new(command)
        .listen("127.0.0.1:0")
        .disable_reverse_lookup()
        .shutdown_timeout(Duration::from_secs(3))
}

/// Big-endian nanosecond capture header, the least convenient input format
fn capture_header() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.put_u32(0xa1b2_3c4d);
    buf.put_u16(2);
    buf.put_u16(4);
    buf.put_i32(0);
    buf.put_u32(0);
    buf.put_u32(262144);
    buf.put_u32(LinkType::RAW.0);
    buf
}

fn capture_record(buf: &mut Vec<u8>, packet: &PacketRecord) {
    buf.put_u32(packet.ts_sec);
    buf.put_u32(packet.ts_nanos);
    buf.put_u32(packet.captured_len());
    buf.put_u32(packet.orig_len);
    buf.put_slice(&packet.data);
}

fn packets() -> Vec<PacketRecord> {
    (1..=3u8)
        .map(|seq| PacketRecord {
            ts_sec: 1_700_000_000 + u32::from(seq),
            ts_nanos: 123_456_789,
            orig_len: 100,
            data: Bytes::from(vec![seq; 20 * usize::from(seq)]),
        })
        .collect()
}

fn write_capture(dir: &Path) -> (String, String) {
    let header_path = dir.join("header.pcap");
    let records_path = dir.join("records.pcap");

    std::fs::write(&header_path, capture_header()).unwrap();

    let mut records = Vec::new();
    for packet in packets() {
        capture_record(&mut records, &packet);
    }
    std::fs::write(&records_path, records).unwrap();

    (
        header_path.display().to_string(),
        records_path.display().to_string(),
    )
}

async fn read_to_end(mut client: TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), client.read_to_end(&mut out))
        .await
        .expect("client never saw EOF")
        .unwrap();
    out
}

#[tokio::test]
async fn test_live_records_reach_every_client() {
    let dir = tempfile::tempdir().unwrap();
    let (header, records) = write_capture(dir.path());
    let command = format!("sh -c \"cat {}; sleep 1; cat {}; sleep 5\"", header, records);

    let running = Broker::new(config(command))
        .start(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(running.capture_header().link_type, LinkType::RAW);
    assert_eq!(running.capture_header().precision, TimestampPrecision::Nanos);

    let outbound = StreamHeader::outbound(LinkType::RAW, 65535);
    assert_eq!(*running.stream_header(), outbound);

    let mut client = TcpStream::connect(running.local_addr()).await.unwrap();
    let mut quitter = TcpStream::connect(running.local_addr()).await.unwrap();

    // First bytes are exactly the outbound header
    let mut received = [0u8; 24];
    client.read_exact(&mut received).await.unwrap();
    assert_eq!(&received[..], &outbound.encode().unwrap()[..]);
    quitter.read_exact(&mut received).await.unwrap();
    drop(quitter);

    // Every record, reframed little-endian with microsecond fractions
    let mut expected = Vec::new();
    for packet in packets() {
        expected.extend_from_slice(&outbound.frame_record(&packet).unwrap());
    }
    let mut frames = vec![0u8; expected.len()];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut frames))
        .await
        .expect("records never arrived")
        .unwrap();
    assert_eq!(frames, expected);
    assert_eq!(u32::from_le_bytes([frames[4], frames[5], frames[6], frames[7]]), 123_456);

    running.shutdown();
    let report = running.wait().await.unwrap();

    assert!(matches!(report.capture_exit, CaptureExit::Terminated(_)));
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.stats.records_read, 3);
    assert!(report.stats.deliveries >= 3);
    assert_eq!(report.stats.subscribers_joined, 2);

    // Closed by the broker once it stopped
    assert!(read_to_end(client).await.is_empty());
}

#[tokio::test]
async fn test_capture_exit_shuts_broker_down() {
    let dir = tempfile::tempdir().unwrap();
    let (header, _) = write_capture(dir.path());
    let command = format!("sh -c \"cat {}; sleep 1; exit 3\"", header);

    let running = Broker::new(config(command))
        .start(CancellationToken::new())
        .await
        .unwrap();
    let addr = running.local_addr();

    let mut client = TcpStream::connect(addr).await.unwrap();
    let mut received = [0u8; 24];
    client.read_exact(&mut received).await.unwrap();

    let report = tokio::time::timeout(Duration::from_secs(10), running.wait())
        .await
        .expect("broker did not stop after the capture exited")
        .unwrap();

    assert_eq!(report.capture_exit.status().code(), Some(3));
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.stats.records_read, 0);

    // Connection closed, listener gone
    assert!(read_to_end(client).await.is_empty());
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_malformed_header_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bogus.pcap");
    std::fs::write(&path, [0x0a, 0x0d, 0x0d, 0x0a].repeat(8)).unwrap();

    let command = format!("cat {}", path.display());
    let result = Broker::new(config(command))
        .start(CancellationToken::new())
        .await;

    match result {
        Err(Error::Capture(CaptureError::UnknownMagic(magic))) => assert_eq!(magic, 0x0a0d_0d0a),
        Err(e) => panic!("expected unknown magic, got {}", e),
        Ok(_) => panic!("broker started on a pcapng stream"),
    }
}

#[tokio::test]
async fn test_missing_capture_program() {
    let result = Broker::new(config("/nonexistent/tcpdump -w -".to_string()))
        .start(CancellationToken::new())
        .await;

    assert!(matches!(result, Err(Error::Spawn { .. })));
}

#[tokio::test]
async fn test_interrupt_stops_running_broker() {
    let dir = tempfile::tempdir().unwrap();
    let (header, _) = write_capture(dir.path());
    let command = format!("sh -c \"cat {}; sleep 30\"", header);

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        Broker::new(config(command)).run(tokio::time::sleep(Duration::from_millis(500))),
    )
    .await
    .expect("broker ignored the interrupt")
    .unwrap();

    assert!(matches!(report.capture_exit, CaptureExit::Terminated(_)));
    assert_eq!(report.exit_code(), 0);
}
