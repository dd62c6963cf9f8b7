//! Command line interface

use std::time::Duration;

use clap::Parser;

use pcap_broker::server::DEFAULT_LISTEN_ADDR;
use pcap_broker::BrokerConfig;

/// Share one live packet capture with many PCAP-over-IP clients
#[derive(Parser, Debug)]
#[command(name = "pcap-broker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Capture command whose stdout is a pcap stream, e.g. "tcpdump -U -w -"
    #[arg(long = "cmd", env = "PCAP_COMMAND", default_value = "")]
    pub command: String,

    /// Address to listen on for PCAP-over-IP clients
    #[arg(long, env = "LISTEN_ADDRESS", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: String,

    /// Disable reverse DNS lookup of client addresses
    #[arg(short = 'n')]
    pub no_lookup: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Log as JSON
    #[arg(long)]
    pub json: bool,

    /// Timeout for a single write to a client, in milliseconds
    #[arg(long, env = "WRITE_TIMEOUT_MS", default_value_t = 5000)]
    pub write_timeout_ms: u64,
}

impl Cli {
    /// Build the broker configuration from the parsed arguments
    pub fn broker_config(&self) -> BrokerConfig {
        let mut config = BrokerConfig::new(self.command.clone())
            .listen(self.listen.clone())
            .write_timeout(Duration::from_millis(self.write_timeout_ms));

        if self.no_lookup {
            config = config.disable_reverse_lookup();
        }

        config
    }
}
