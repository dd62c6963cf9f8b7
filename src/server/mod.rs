//! Subscriber-facing TCP server

pub mod config;
pub mod listener;
pub mod lookup;

pub use config::{ServerConfig, DEFAULT_LISTEN_ADDR};
pub use listener::SubscriberAcceptor;
pub use lookup::reverse_lookup;
