//! Subscriber entry and state types
//!
//! A subscriber moves through `Pending -> Active -> Removed` and never back.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::error::DeliveryError;
use crate::stats::SubscriberStats;

/// Unique identifier for a subscriber connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a subscriber connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// Accepted, stream header not yet written
    Pending,
    /// Header written, receiving records
    Active,
    /// Write failed or broker shut down
    Removed,
}

/// A single subscriber connection
pub struct Subscriber<W> {
    id: SubscriberId,
    peer: SocketAddr,
    writer: W,
    state: SubscriberState,
    stats: SubscriberStats,
    connected_at: Instant,
}

impl<W: AsyncWrite + Unpin> Subscriber<W> {
    /// Wrap a freshly accepted connection
    pub fn new(id: SubscriberId, peer: SocketAddr, writer: W) -> Self {
        Self {
            id,
            peer,
            writer,
            state: SubscriberState::Pending,
            stats: SubscriberStats::new(),
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SubscriberState {
        self.state
    }

    pub fn stats(&self) -> SubscriberStats {
        self.stats
    }

    /// Time since the connection was accepted
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Write the stream header, moving `Pending -> Active`
    ///
    /// On failure the subscriber must be discarded, not registered.
    pub async fn send_header(
        &mut self,
        header: &[u8],
        timeout: Duration,
    ) -> Result<(), DeliveryError> {
        debug_assert_eq!(self.state, SubscriberState::Pending);

        write_with_timeout(&mut self.writer, header, timeout).await?;
        self.state = SubscriberState::Active;
        Ok(())
    }

    /// Write one framed record and count it on success
    pub(super) async fn deliver(
        &mut self,
        frame: &[u8],
        captured_len: u32,
        timeout: Duration,
    ) -> Result<(), DeliveryError> {
        write_with_timeout(&mut self.writer, frame, timeout).await?;
        self.stats.record_delivery(captured_len);
        Ok(())
    }

    /// Shut down the writer and mark the subscriber removed
    ///
    /// Calling this on an already removed subscriber does nothing.
    pub async fn close(&mut self, timeout: Duration) {
        if self.state == SubscriberState::Removed {
            return;
        }
        self.state = SubscriberState::Removed;

        match tokio::time::timeout(timeout, self.writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(subscriber = %self.id, error = %e, "Failed to close connection");
            }
            Err(_) => {
                tracing::debug!(subscriber = %self.id, "Timed out closing connection");
            }
        }
    }
}

impl<W> std::fmt::Debug for Subscriber<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}

async fn write_with_timeout<W: AsyncWrite + Unpin>(
    writer: &mut W,
    buf: &[u8],
    timeout: Duration,
) -> Result<(), DeliveryError> {
    let write = async {
        writer.write_all(buf).await?;
        writer.flush().await
    };

    match tokio::time::timeout(timeout, write).await {
        Ok(result) => result.map_err(DeliveryError::from),
        Err(_) => Err(DeliveryError::TimedOut(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_subscriber_lifecycle() {
        let (client, server) = tokio::io::duplex(1024);
        let mut sub = Subscriber::new(SubscriberId(1), peer(), server);
        assert_eq!(sub.state(), SubscriberState::Pending);

        sub.send_header(b"HEADER", TIMEOUT).await.unwrap();
        assert_eq!(sub.state(), SubscriberState::Active);

        sub.deliver(b"frame-1", 3, TIMEOUT).await.unwrap();
        assert_eq!(sub.stats().total_packets, 1);
        assert_eq!(sub.stats().total_bytes, 3);

        sub.close(TIMEOUT).await;
        assert_eq!(sub.state(), SubscriberState::Removed);

        // Second close is a no-op
        sub.close(TIMEOUT).await;
        assert_eq!(sub.state(), SubscriberState::Removed);

        let mut client = client;
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"HEADERframe-1");
    }

    #[tokio::test]
    async fn test_header_write_timeout() {
        // Buffer smaller than the header and nobody reading
        let (_client, server) = tokio::io::duplex(4);
        let mut sub = Subscriber::new(SubscriberId(2), peer(), server);

        let result = sub
            .send_header(&[0u8; 24], Duration::from_millis(50))
            .await;

        assert!(matches!(result, Err(DeliveryError::TimedOut(_))));
        assert_eq!(sub.state(), SubscriberState::Pending);
    }

    #[tokio::test]
    async fn test_header_write_to_closed_peer() {
        let (client, server) = tokio::io::duplex(1024);
        drop(client);

        let mut sub = Subscriber::new(SubscriberId(3), peer(), server);
        let result = sub.send_header(b"HEADER", TIMEOUT).await;

        assert!(matches!(result, Err(DeliveryError::Io(_))));
    }

    #[test]
    fn test_subscriber_id_display() {
        assert_eq!(SubscriberId(42).to_string(), "#42");
    }
}
