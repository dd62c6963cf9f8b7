//! Subscriber registry implementation
//!
//! The registry is owned by the distributor task and is never shared. New
//! subscribers reach it over a channel, so a fan-out pass always iterates a
//! set that nothing else can change underneath it.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use tokio::io::AsyncWrite;

use super::entry::{Subscriber, SubscriberId, SubscriberState};
use super::error::{DeliveryError, RegistryError};
use crate::stats::SubscriberStats;

/// Outcome of distributing one record
#[derive(Debug, Default)]
pub struct FanOut {
    /// Subscribers the record was written to
    pub delivered: usize,
    /// Subscribers removed because the write failed
    pub dropped: Vec<(SubscriberId, DeliveryError)>,
}

/// Set of active subscribers and their counters
pub struct SubscriberRegistry<W> {
    subscribers: HashMap<SubscriberId, Subscriber<W>>,
    write_timeout: Duration,
}

impl<W: AsyncWrite + Unpin> SubscriberRegistry<W> {
    /// Create an empty registry; every write is bounded by `write_timeout`
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            subscribers: HashMap::new(),
            write_timeout,
        }
    }

    /// Add a subscriber that has already received the stream header
    pub fn insert(&mut self, subscriber: Subscriber<W>) -> Result<SubscriberId, RegistryError> {
        let id = subscriber.id();

        if subscriber.state() != SubscriberState::Active {
            return Err(RegistryError::HeaderNotSent(id));
        }
        if self.subscribers.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }

        self.subscribers.insert(id, subscriber);

        tracing::debug!(
            subscriber = %id,
            subscribers = self.subscribers.len(),
            "Subscriber added"
        );

        Ok(id)
    }

    /// Remove and close a subscriber
    ///
    /// Returns its final counters, or `None` if it was not registered. A
    /// second call for the same id has no effect.
    pub async fn remove(&mut self, id: SubscriberId) -> Option<SubscriberStats> {
        let mut subscriber = self.subscribers.remove(&id)?;
        subscriber.close(self.write_timeout).await;

        let stats = subscriber.stats();
        tracing::info!(
            subscriber = %id,
            peer = %subscriber.peer(),
            packets = stats.total_packets,
            bytes = stats.total_bytes,
            connected_secs = subscriber.connected_for().as_secs(),
            "Subscriber removed"
        );

        Some(stats)
    }

    /// Write one framed record to every subscriber
    ///
    /// Writes run concurrently. A subscriber whose write fails or times out is
    /// removed and closed; the others are unaffected.
    pub async fn distribute(&mut self, frame: &[u8], captured_len: u32) -> FanOut {
        let timeout = self.write_timeout;

        let results = join_all(self.subscribers.iter_mut().map(|(id, subscriber)| {
            let id = *id;
            async move { (id, subscriber.deliver(frame, captured_len, timeout).await) }
        }))
        .await;

        let mut fan_out = FanOut::default();
        for (id, result) in results {
            match result {
                Ok(()) => fan_out.delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        subscriber = %id,
                        error = %e,
                        "Failed to write packet to subscriber"
                    );
                    self.remove(id).await;
                    fan_out.dropped.push((id, e));
                }
            }
        }

        fan_out
    }

    /// Close and remove every subscriber; returns how many were closed
    pub async fn close_all(&mut self) -> usize {
        let ids: Vec<SubscriberId> = self.subscribers.keys().copied().collect();
        let count = ids.len();

        for id in ids {
            self.remove(id).await;
        }

        count
    }

    /// Current counters for a subscriber
    pub fn stats(&self, id: SubscriberId) -> Option<SubscriberStats> {
        self.subscribers.get(&id).map(Subscriber::stats)
    }

    pub fn get(&self, id: SubscriberId) -> Option<&Subscriber<W>> {
        self.subscribers.get(&id)
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }

    /// Ids of all registered subscribers, sorted
    pub fn ids(&self) -> Vec<SubscriberId> {
        let mut ids: Vec<_> = self.subscribers.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
