//! Delivery counters for subscribers and the broker as a whole

use std::time::Duration;

/// Per-subscriber delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    /// Records successfully written
    pub total_packets: u64,
    /// Captured payload bytes successfully written
    pub total_bytes: u64,
}

impl SubscriberStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one delivered record of `captured_len` bytes
    pub fn record_delivery(&mut self, captured_len: u32) {
        self.total_packets += 1;
        self.total_bytes += u64::from(captured_len);
    }
}

/// Broker-wide statistics
#[derive(Debug, Clone, Default)]
pub struct BrokerStats {
    /// Records decoded from the capture stream
    pub records_read: u64,
    /// Captured payload bytes decoded from the capture stream
    pub bytes_read: u64,
    /// Successful record writes across all subscribers
    pub deliveries: u64,
    /// Subscribers that joined the fan-out
    pub subscribers_joined: u64,
    /// Subscribers removed after a failed write
    pub subscribers_dropped: u64,
    /// Largest number of simultaneous subscribers seen
    pub peak_subscribers: usize,
    /// How long the distributor ran
    pub uptime: Duration,
}

impl BrokerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Average records per second over the run
    pub fn record_rate(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.records_read as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_stats_new() {
        let stats = SubscriberStats::new();
        assert_eq!(stats.total_packets, 0);
        assert_eq!(stats.total_bytes, 0);
    }

    #[test]
    fn test_subscriber_stats_accumulate() {
        let mut stats = SubscriberStats::new();
        for len in [60, 1514, 0, 42] {
            stats.record_delivery(len);
        }

        assert_eq!(stats.total_packets, 4);
        assert_eq!(stats.total_bytes, 60 + 1514 + 42);
    }

    #[test]
    fn test_broker_stats_record_rate() {
        let mut stats = BrokerStats::new();
        stats.records_read = 1_000;
        stats.uptime = Duration::from_secs(10);

        assert_eq!(stats.record_rate(), 100.0);
    }

    #[test]
    fn test_broker_stats_record_rate_zero_uptime() {
        let mut stats = BrokerStats::new();
        stats.records_read = 1_000;

        assert_eq!(stats.record_rate(), 0.0);
    }
}
