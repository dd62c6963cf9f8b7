//! Registry error types

use std::io;
use std::time::Duration;

use super::entry::SubscriberId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Subscriber has not been sent the stream header yet
    #[error("subscriber {0} has not received the stream header")]
    HeaderNotSent(SubscriberId),
    /// Subscriber id is already registered
    #[error("subscriber {0} is already registered")]
    AlreadyRegistered(SubscriberId),
}

/// Failure writing to a single subscriber
///
/// Only ever affects the subscriber it happened on.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Socket write failed
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
    /// Socket did not accept the data in time
    #[error("write timed out after {0:?}")]
    TimedOut(Duration),
}
