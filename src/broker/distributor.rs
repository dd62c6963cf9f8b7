//! Record fan-out loop
//!
//! Pulls records from the capture decoder one at a time and writes each one
//! to every registered subscriber.

use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureDecoder, CaptureError, StreamHeader};
use crate::registry::{Subscriber, SubscriberRegistry};
use crate::stats::BrokerStats;

/// Owns the subscriber registry and drives delivery
pub struct Distributor<R, W> {
    decoder: CaptureDecoder<R>,
    outbound: StreamHeader,
    registry: SubscriberRegistry<W>,
    incoming: mpsc::Receiver<Subscriber<W>>,
    stats: BrokerStats,
}

impl<R, W> Distributor<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Create a distributor
    ///
    /// `outbound` is the header subscribers were sent; records are reframed in
    /// its encoding. New subscribers are taken from `incoming`.
    pub fn new(
        decoder: CaptureDecoder<R>,
        outbound: StreamHeader,
        write_timeout: Duration,
        incoming: mpsc::Receiver<Subscriber<W>>,
    ) -> Self {
        Self {
            decoder,
            outbound,
            registry: SubscriberRegistry::new(write_timeout),
            incoming,
            stats: BrokerStats::new(),
        }
    }

    /// Distribute records until the stream ends, fails, or `cancel` fires
    ///
    /// On return `cancel` is cancelled and every subscriber has been closed.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<BrokerStats, CaptureError> {
        let started = Instant::now();

        let result = self.pump(&cancel).await;

        cancel.cancel();
        self.incoming.close();
        // Subscribers still queued are admitted so they get closed like the rest
        self.admit_pending();
        let closed = self.registry.close_all().await;

        self.stats.uptime = started.elapsed();

        tracing::info!(
            records = self.stats.records_read,
            bytes = self.stats.bytes_read,
            deliveries = self.stats.deliveries,
            subscribers_joined = self.stats.subscribers_joined,
            subscribers_dropped = self.stats.subscribers_dropped,
            subscribers_closed = closed,
            peak_subscribers = self.stats.peak_subscribers,
            uptime_secs = self.stats.uptime.as_secs(),
            records_per_sec = self.stats.record_rate(),
            "Distributor finished"
        );

        match result {
            Ok(()) => Ok(self.stats),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    records = self.decoder.records_read(),
                    offset = self.decoder.bytes_read(),
                    "Failed to decode capture stream"
                );
                Err(e)
            }
        }
    }

    async fn pump(&mut self, cancel: &CancellationToken) -> Result<(), CaptureError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Distributor cancelled");
                    return Ok(());
                }
                next = self.decoder.next_record() => next?,
            };

            let Some(record) = next else {
                tracing::info!(records = self.stats.records_read, "Capture stream ended");
                return Ok(());
            };

            if cancel.is_cancelled() {
                return Ok(());
            }

            self.stats.records_read += 1;
            self.stats.bytes_read += u64::from(record.captured_len());

            self.admit_pending();
            if self.registry.is_empty() {
                continue;
            }

            let frame = self.outbound.frame_record(&record)?;

            // A stalled subscriber must not hold shutdown for its whole write
            // timeout. Writes cut short here are followed by close_all.
            let fan_out = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Distributor cancelled during fan-out");
                    return Ok(());
                }
                fan_out = self.registry.distribute(&frame, record.captured_len()) => fan_out,
            };

            self.stats.deliveries += fan_out.delivered as u64;
            self.stats.subscribers_dropped += fan_out.dropped.len() as u64;
        }
    }

    /// Move every queued subscriber into the registry without waiting
    fn admit_pending(&mut self) {
        while let Ok(subscriber) = self.incoming.try_recv() {
            let peer = subscriber.peer();
            match self.registry.insert(subscriber) {
                Ok(id) => {
                    self.stats.subscribers_joined += 1;
                    let active = self.registry.len();
                    self.stats.peak_subscribers = self.stats.peak_subscribers.max(active);
                    tracing::debug!(subscriber = %id, peer = %peer, "Subscriber joined");
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "Rejected subscriber");
                }
            }
        }
    }
}
