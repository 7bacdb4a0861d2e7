//! Transport abstraction for frontend/backend access traffic.
//!
//! The access protocol assumes nothing from the network beyond best-effort
//! datagram delivery: messages may be lost, duplicated or reordered, and the
//! protocol recovers through its own sequencing and retries. Implementations
//! live in separate crates.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod error;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use proven_access_api::Address;
use serde::{Deserialize, Serialize};

pub use error::TransportError;
pub use error::TransportError as Error;

/// An encoded frame together with its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Where the frame came from.
    pub from: Address,
    /// The encoded frame.
    pub payload: Bytes,
}

/// Best-effort, unordered delivery of encoded frames.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// This endpoint's own address, used as the reply destination.
    fn local_address(&self) -> &Address;

    /// Hand a frame to the network.
    ///
    /// Success means the frame was accepted for delivery, not that it arrived.
    async fn send(&self, to: &Address, payload: Bytes) -> Result<(), TransportError>;

    /// Stream of frames addressed to this endpoint.
    ///
    /// Intended for a single consumer; concurrent streams compete for frames.
    fn incoming(&self) -> Pin<Box<dyn Stream<Item = Datagram> + Send>>;

    /// Stop accepting and delivering frames.
    async fn shutdown(&self) -> Result<(), TransportError>;
}

/// Name of a shard.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardName(String);

impl ShardName {
    /// Create a shard name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Finds the current leader backend of a shard.
#[async_trait]
pub trait LeaderResolver: Send + Sync + 'static {
    /// The address of the shard's leader.
    async fn resolve(&self, shard: &ShardName) -> Result<Address, TransportError>;

    /// Note that `stale` turned out not to be the leader.
    fn invalidate(&self, _shard: &ShardName, _stale: &Address) {}
}

/// Transport settings shared by implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Largest frame accepted for sending, in bytes.
    pub max_message_size: usize,
    /// Frames buffered per endpoint before new ones are dropped.
    pub inbox_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_message_size: 4 * 1024 * 1024, // 4MB
            inbox_capacity: 1024,
        }
    }
}
