//! Broker configuration

use std::time::Duration;

use crate::error::{Error, Result};
use crate::server::ServerConfig;

/// Complete broker configuration
///
/// Built once at startup and handed to [`crate::Broker`]. Nothing reads
/// configuration from anywhere else.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Shell-style command line of the capture process
    pub capture_command: String,

    /// Subscriber server options
    pub server: ServerConfig,

    /// Bound on waiting for tasks to finish after shutdown starts
    pub shutdown_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            capture_command: String::new(),
            server: ServerConfig::default(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl BrokerConfig {
    /// Create a config running `command` with default server options
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            capture_command: command.into(),
            ..Default::default()
        }
    }

    /// Set the listen address
    pub fn listen(mut self, addr: impl Into<String>) -> Self {
        self.server.listen_addr = addr.into();
        self
    }

    /// Replace the server options
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.server = server;
        self
    }

    /// Disable reverse lookup of subscriber addresses
    pub fn disable_reverse_lookup(mut self) -> Self {
        self.server.reverse_lookup = false;
        self
    }

    /// Set per-write timeout for subscriber sockets
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.server.write_timeout = timeout;
        self
    }

    /// Set the shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Check the configuration before anything is started
    pub fn validate(&self) -> Result<()> {
        if self.capture_command.trim().is_empty() {
            return Err(Error::Config("capture command must not be empty".into()));
        }
        if self.server.listen_addr.trim().is_empty() {
            return Err(Error::Config("listen address must not be empty".into()));
        }
        if self.server.subscriber_queue == 0 {
            return Err(Error::Config("subscriber queue must hold at least one entry".into()));
        }

        let timeouts = [
            ("write timeout", self.server.write_timeout),
            ("lookup timeout", self.server.lookup_timeout),
            ("shutdown timeout", self.shutdown_timeout),
        ];
        for (name, timeout) in timeouts {
            if timeout.is_zero() {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }

        Ok(())
    }
}
