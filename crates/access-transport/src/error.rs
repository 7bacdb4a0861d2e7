//! Error types for transports.

use proven_access_api::Address;
use thiserror::Error;

/// Errors a transport can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Nothing is listening at the address.
    #[error("Unknown destination: {0}")]
    UnknownDestination(Address),

    /// The address is already taken.
    #[error("Address already in use: {0}")]
    AddressInUse(Address),

    /// The payload exceeds the configured maximum.
    #[error("Message of {size} bytes exceeds limit of {max}")]
    MessageTooLarge {
        /// Payload size.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// No leader is known for the shard.
    #[error("No leader known for shard {0}")]
    NoLeader(String),

    /// The transport was shut down.
    #[error("Transport is shut down")]
    Shutdown,

    /// Anything else.
    #[error("Transport error: {0}")]
    Other(String),
}
