//! In-memory transport for tests and single-process deployments.
//!
//! Endpoints registered on the same [`MemoryNetwork`] exchange frames through
//! bounded channels. The network can be told to drop, duplicate and delay
//! frames so that protocol recovery paths can be exercised deterministically.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::Stream;
use parking_lot::{Mutex, RwLock};
use proven_access_api::Address;
use proven_access_transport::{
    Config, Datagram, LeaderResolver, ShardName, Transport, TransportError,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, trace};

/// Misbehaviour injected into every send.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultConfig {
    /// Probability that a frame is lost.
    pub drop_probability: f64,
    /// Probability that a delivered frame arrives twice.
    pub duplicate_probability: f64,
    /// Probability that a delivered frame is held back.
    pub delay_probability: f64,
    /// Upper bound for how long a frame is held back.
    pub max_delay: Duration,
}

impl FaultConfig {
    /// A network that delivers everything exactly once, in order.
    #[must_use]
    pub const fn reliable() -> Self {
        Self {
            drop_probability: 0.0,
            duplicate_probability: 0.0,
            delay_probability: 0.0,
            max_delay: Duration::ZERO,
        }
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::reliable()
    }
}

struct Faults {
    config: FaultConfig,
    rng: StdRng,
}

enum Fate {
    Lost,
    Delivered { copies: usize, delay: Option<Duration> },
}

/// A set of endpoints that can reach each other.
pub struct MemoryNetwork {
    endpoints: DashMap<Address, flume::Sender<Datagram>>,
    faults: Mutex<Faults>,
    config: Config,
}

impl MemoryNetwork {
    /// Create a reliable network with default settings.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_config(Config::default())
    }

    /// Create a reliable network with the given settings.
    #[must_use]
    pub fn with_config(config: Config) -> Arc<Self> {
        Arc::new(Self {
            endpoints: DashMap::new(),
            faults: Mutex::new(Faults {
                config: FaultConfig::reliable(),
                rng: StdRng::seed_from_u64(0),
            }),
            config,
        })
    }

    /// Start injecting faults, drawing decisions from a generator seeded with `seed`.
    pub fn set_faults(&self, config: FaultConfig, seed: u64) {
        info!("memory network faults set to {:?} (seed {})", config, seed);
        *self.faults.lock() = Faults {
            config,
            rng: StdRng::seed_from_u64(seed),
        };
    }

    /// Stop injecting faults.
    pub fn clear_faults(&self) {
        self.faults.lock().config = FaultConfig::reliable();
    }

    /// Register an endpoint.
    ///
    /// # Errors
    ///
    /// Fails if the address is already registered.
    pub fn endpoint(
        self: &Arc<Self>,
        address: impl Into<Address>,
    ) -> Result<MemoryTransport, TransportError> {
        let address = address.into();
        let (tx, rx) = flume::bounded(self.config.inbox_capacity);

        match self.endpoints.entry(address.clone()) {
            Entry::Occupied(_) => return Err(TransportError::AddressInUse(address)),
            Entry::Vacant(entry) => {
                entry.insert(tx);
            }
        }

        debug!("memory endpoint {} registered", address);

        Ok(MemoryTransport {
            address,
            network: Arc::clone(self),
            inbox: rx,
        })
    }

    fn decide(&self) -> Fate {
        let mut faults = self.faults.lock();
        let FaultConfig {
            drop_probability,
            duplicate_probability,
            delay_probability,
            max_delay,
        } = faults.config;

        if faults.rng.gen_bool(drop_probability.clamp(0.0, 1.0)) {
            return Fate::Lost;
        }
        let copies = if faults.rng.gen_bool(duplicate_probability.clamp(0.0, 1.0)) {
            2
        } else {
            1
        };
        let delay = faults
            .rng
            .gen_bool(delay_probability.clamp(0.0, 1.0))
            .then(|| {
                let max = u64::try_from(max_delay.as_micros()).unwrap_or(u64::MAX);
                Duration::from_micros(faults.rng.gen_range(0..=max))
            });

        Fate::Delivered { copies, delay }
    }

    fn deliver(&self, to: &Address, datagram: Datagram) {
        let Some(sender) = self.endpoints.get(to).map(|s| s.clone()) else {
            trace!("dropping frame for vanished endpoint {}", to);
            return;
        };
        if let Err(e) = sender.try_send(datagram) {
            debug!("dropping frame for {}: {}", to, e);
        }
    }
}

/// One endpoint of a [`MemoryNetwork`].
pub struct MemoryTransport {
    address: Address,
    network: Arc<MemoryNetwork>,
    inbox: flume::Receiver<Datagram>,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_address(&self) -> &Address {
        &self.address
    }

    async fn send(&self, to: &Address, payload: Bytes) -> Result<(), TransportError> {
        let max = self.network.config.max_message_size;
        if payload.len() > max {
            return Err(TransportError::MessageTooLarge {
                size: payload.len(),
                max,
            });
        }
        if !self.network.endpoints.contains_key(to) {
            return Err(TransportError::UnknownDestination(to.clone()));
        }

        let datagram = Datagram {
            from: self.address.clone(),
            payload,
        };

        match self.network.decide() {
            Fate::Lost => {
                trace!("frame {} -> {} lost", self.address, to);
            }
            Fate::Delivered {
                copies,
                delay: None,
            } => {
                for _ in 0..copies {
                    self.network.deliver(to, datagram.clone());
                }
            }
            Fate::Delivered {
                copies,
                delay: Some(delay),
            } => {
                trace!("frame {} -> {} delayed by {:?}", self.address, to, delay);
                let network = Arc::clone(&self.network);
                let to = to.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for _ in 0..copies {
                        network.deliver(&to, datagram.clone());
                    }
                });
            }
        }
        Ok(())
    }

    fn incoming(&self) -> Pin<Box<dyn Stream<Item = Datagram> + Send>> {
        Box::pin(self.inbox.clone().into_stream())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.network.endpoints.remove(&self.address);
        debug!("memory endpoint {} shut down", self.address);
        Ok(())
    }
}

/// Leader lookup backed by a table the caller updates.
#[derive(Debug, Default)]
pub struct StaticLeaderResolver {
    leaders: RwLock<HashMap<ShardName, Address>>,
}

impl StaticLeaderResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `leader` as the leader of `shard`.
    pub fn set_leader(&self, shard: ShardName, leader: Address) {
        info!("leader of {} is now {}", shard, leader);
        self.leaders.write().insert(shard, leader);
    }
}

#[async_trait]
impl LeaderResolver for StaticLeaderResolver {
    async fn resolve(&self, shard: &ShardName) -> Result<Address, TransportError> {
        self.leaders
            .read()
            .get(shard)
            .cloned()
            .ok_or_else(|| TransportError::NoLeader(shard.to_string()))
    }
}
