//! Subscriber registry for packet fan-out
//!
//! The registry holds every subscriber that has received the stream header
//! and writes each packet record to all of them.
//!
//! # Architecture
//!
//! ```text
//!   [Acceptor task]                         [Distributor task]
//!   accept() ─► send_header()               owns SubscriberRegistry<W>
//!        │                                  ┌──────────────────────────┐
//!        └──── mpsc::Sender<Subscriber> ───►│ subscribers: HashMap<    │
//!                                           │   SubscriberId,          │
//!                                           │   Subscriber { writer,   │
//!                                           │                stats } > │
//!                                           └────────────┬─────────────┘
//!                                                        │ distribute(frame)
//!                        ┌───────────────────────────────┼──────────────┐
//!                        ▼                               ▼              ▼
//!                      TCP                             TCP            TCP
//! ```
//!
//! # Zero-Copy Design
//!
//! Each record is framed once into a `bytes::Bytes`. Every subscriber writes
//! from the same buffer, and the buffer is released once the fan-out pass is
//! over.

pub mod entry;
pub mod error;
pub mod store;

pub use entry::{Subscriber, SubscriberId, SubscriberState};
pub use error::{DeliveryError, RegistryError};
pub use store::{FanOut, SubscriberRegistry};
