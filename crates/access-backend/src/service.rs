//! Backend service: receives envelopes from the transport and answers them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use proven_access_api::{FrontendIdentifier, RequestEnvelope, codec};
use proven_access_transport::Transport;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::BackendConfig;
use crate::data_tree::DataTree;
use crate::error::{Error, Result};
use crate::frontend::{FrontendState, Role, ShardContext};

/// Queue feeding one frontend's worker.
struct Mailbox {
    tx: mpsc::Sender<RequestEnvelope>,
    last_used: Instant,
    /// Set by the worker whenever its state holds nothing worth keeping.
    quiescent: Arc<AtomicBool>,
}

impl Mailbox {
    fn is_idle(&self, timeout: Duration) -> bool {
        self.last_used.elapsed() >= timeout
            && self.quiescent.load(Ordering::Acquire)
            && self.tx.capacity() == self.tx.max_capacity()
    }
}

/// Serves one shard's backend over a transport.
///
/// Envelopes from the same frontend are handled one at a time and in arrival
/// order; different frontends are served concurrently. A frontend that has
/// been silent for the configured idle timeout and holds no chained
/// histories or live transactions is forgotten and its worker stopped.
pub struct BackendService<T: Transport> {
    transport: Arc<T>,
    context: Arc<ShardContext>,
    /// Background task handle
    handle: Option<JoinHandle<()>>,
    /// Shutdown channel
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl<T: Transport> BackendService<T> {
    /// Create a service answering on `transport`.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid.
    pub fn new(transport: Arc<T>, tree: Arc<dyn DataTree>, config: BackendConfig) -> Result<Self> {
        config.validate()?;
        let context = Arc::new(ShardContext::new(
            transport.local_address().clone(),
            config,
            tree,
        ));

        Ok(Self {
            transport,
            context,
            handle: None,
            shutdown_tx: None,
        })
    }

    /// Shard state shared with the request handlers.
    #[must_use]
    pub fn context(&self) -> Arc<ShardContext> {
        Arc::clone(&self.context)
    }

    /// Switch between leader and follower.
    pub fn set_role(&self, role: Role) {
        self.context.set_role(role);
    }

    /// Start serving.
    ///
    /// # Errors
    ///
    /// Fails if the service is already running.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::AlreadyStarted);
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let transport = Arc::clone(&self.transport);
        let context = Arc::clone(&self.context);

        let handle = tokio::spawn(async move {
            Self::run_dispatch_loop(transport, context, shutdown_rx).await;
        });

        self.handle = Some(handle);
        Ok(())
    }

    /// Stop serving and wait for in-flight envelopes to be answered.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        if let Err(e) = self.transport.shutdown().await {
            warn!("Failed to shut down transport: {}", e);
        }
    }

    async fn run_dispatch_loop(
        transport: Arc<T>,
        context: Arc<ShardContext>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        info!("Backend {} serving", context.address());

        let mut incoming = transport.incoming();
        let mut mailboxes: HashMap<FrontendIdentifier, Mailbox> = HashMap::new();
        let mut workers = JoinSet::new();
        let capacity = context.config().frontend_mailbox_capacity;
        let idle_timeout = context.config().frontend_idle_timeout;
        let mut sweep = tokio::time::interval(idle_timeout);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Backend {} shutting down", context.address());
                    break;
                }
                _ = sweep.tick() => {
                    mailboxes.retain(|frontend, mailbox| {
                        let idle = mailbox.is_idle(idle_timeout);
                        if idle {
                            debug!("Forgetting idle frontend {}", frontend);
                        }
                        !idle
                    });
                    while let Some(result) = workers.try_join_next() {
                        if let Err(e) = result {
                            error!("Frontend worker failed: {}", e);
                        }
                    }
                }
                datagram = incoming.next() => {
                    let Some(datagram) = datagram else {
                        info!("Transport of backend {} closed", context.address());
                        break;
                    };

                    let envelope = match codec::decode_request(&datagram.payload) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            warn!("Dropping undecodable frame from {}: {}", datagram.from, e);
                            continue;
                        }
                    };

                    let frontend = envelope.message.client().frontend().clone();
                    let mailbox = mailboxes.entry(frontend).or_insert_with_key(|frontend| {
                        let (tx, rx) = mpsc::channel(capacity);
                        let quiescent = Arc::new(AtomicBool::new(true));
                        debug!("Starting worker for frontend {}", frontend);
                        workers.spawn(Self::run_frontend_worker(
                            Arc::clone(&transport),
                            Arc::clone(&context),
                            rx,
                            Arc::clone(&quiescent),
                        ));
                        Mailbox {
                            tx,
                            last_used: Instant::now(),
                            quiescent,
                        }
                    });

                    mailbox.last_used = Instant::now();
                    if let Err(e) = mailbox.tx.try_send(envelope) {
                        warn!("Frontend mailbox full, dropping envelope: {}", e);
                    }
                }
            }
        }

        drop(mailboxes);
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("Frontend worker failed: {}", e);
            }
        }
    }

    async fn run_frontend_worker(
        transport: Arc<T>,
        context: Arc<ShardContext>,
        mut mailbox: mpsc::Receiver<RequestEnvelope>,
        quiescent: Arc<AtomicBool>,
    ) {
        let mut state: Option<FrontendState> = None;

        while let Some(envelope) = mailbox.recv().await {
            quiescent.store(false, Ordering::Release);
            let reply_to = envelope.message.reply_to().clone();
            let state = state.get_or_insert_with(|| {
                FrontendState::new(envelope.message.client(), context.config())
            });

            let response = state.handle(envelope, &context);
            quiescent.store(state.is_quiescent(), Ordering::Release);
            let frame = match codec::encode_response(&response) {
                Ok(frame) => frame,
                Err(e) => {
                    error!("Failed to encode response: {}", e);
                    continue;
                }
            };

            if let Err(e) = transport.send(&reply_to, frame).await {
                debug!("Failed to send response to {}: {}", reply_to, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_tree::MemoryDataTree;
    use proven_access_transport_memory::MemoryNetwork;

    #[tokio::test]
    async fn test_start_twice_fails() {
        let network = MemoryNetwork::new();
        let transport = Arc::new(network.endpoint("backend").unwrap());
        let mut service = BackendService::new(
            transport,
            Arc::new(MemoryDataTree::new()),
            BackendConfig::default(),
        )
        .unwrap();

        service.start().unwrap();
        assert!(matches!(service.start(), Err(Error::AlreadyStarted)));
        service.stop().await;
    }

    #[test]
    fn test_invalid_config_rejected() {
        let network = MemoryNetwork::new();
        let transport = Arc::new(network.endpoint("backend").unwrap());
        let config = BackendConfig {
            frontend_mailbox_capacity: 0,
            ..BackendConfig::default()
        };
        assert!(matches!(
            BackendService::new(transport, Arc::new(MemoryDataTree::new()), config),
            Err(Error::Configuration { .. })
        ));
    }
}
