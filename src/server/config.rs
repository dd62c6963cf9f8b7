//! Subscriber server configuration

use std::time::Duration;

/// Default listen address for PCAP-over-IP
pub const DEFAULT_LISTEN_ADDR: &str = "localhost:4242";

/// Subscriber server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (`host:port`, host may be a name)
    pub listen_addr: String,

    /// Resolve subscriber hostnames for the connection log line
    pub reverse_lookup: bool,

    /// Upper bound on a reverse lookup
    pub lookup_timeout: Duration,

    /// Upper bound on a single write to a subscriber
    pub write_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Capacity of the queue handing new subscribers to the distributor
    pub subscriber_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            reverse_lookup: true,
            lookup_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_secs(5),
            tcp_nodelay: true,
            subscriber_queue: 64,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom listen address
    pub fn with_addr(addr: impl Into<String>) -> Self {
        Self {
            listen_addr: addr.into(),
            ..Default::default()
        }
    }

    /// Set the listen address
    pub fn listen(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Disable reverse lookup of subscriber addresses
    pub fn disable_reverse_lookup(mut self) -> Self {
        self.reverse_lookup = false;
        self
    }

    /// Set reverse lookup timeout
    pub fn lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Set per-write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}
