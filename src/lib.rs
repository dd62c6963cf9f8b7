//! pcap-broker: share one live packet capture with many PCAP-over-IP
//! subscribers
//!
//! A single capture command (e.g. `tcpdump -U -w -`) is started once. Its
//! stdout is decoded record by record and every record is written to each
//! TCP subscriber that connected before the record was read.
//!
//! # Example
//!
//! ```no_run
//! use pcap_broker::{Broker, BrokerConfig};
//!
//! #[tokio::main]
//! async fn main() -> pcap_broker::Result<()> {
//!     let config = BrokerConfig::new("tcpdump -U -w - -i eth0").listen("0.0.0.0:4242");
//!
//!     let report = Broker::new(config)
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!
//!     println!("delivered {} records", report.stats.deliveries);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`capture`]: capture process and pcap stream decoding
//! - [`server`]: subscriber listener
//! - [`registry`]: subscriber set and fan-out
//! - [`broker`]: task wiring and shutdown

pub mod broker;
pub mod capture;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod stats;

pub use broker::{Broker, BrokerReport, RunningBroker};
pub use capture::{CaptureError, CaptureExit, LinkType, PacketRecord, StreamHeader};
pub use config::BrokerConfig;
pub use error::{Error, Result};
pub use registry::{DeliveryError, SubscriberId};
pub use server::ServerConfig;
pub use stats::{BrokerStats, SubscriberStats};
