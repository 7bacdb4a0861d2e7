//! A frontend's connection to the leader backend of one shard.
//!
//! The connection owns the session: it connects, numbers every envelope it
//! sends and reconnects when the backend reports the session out of sync or
//! redirects to a new leader. Requests are resent until they are answered,
//! relying on the backend to replay the answer of anything it already handled.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use proven_access_api::{
    AbiVersion, Address, ClientIdentifier, ClientRequestKind, ClientSuccess,
    LocalHistoryIdentifier, LocalHistoryRequest, LocalHistorySuccess, LocalTransactionRequest,
    MessageHeader, Request, RequestEnvelope, RequestException, RequestMessage, ResponseEnvelope,
    ResponseMessage, TargetIdentifier, TransactionRequest, TransactionSuccess, codec,
};
use proven_access_transport::{LeaderResolver, ShardName, Transport};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::FrontendConfig;
use crate::error::{Error, Result};
use crate::history::ClientHistory;
use crate::limit::{InFlightLimit, InFlightPermit};
use crate::local::translate;

type PendingKey = (TargetIdentifier, u64);

/// Consecutive unanswered attempts after which the backend is presumed gone.
const STALL_TIMEOUTS: u32 = 3;

#[derive(Debug)]
struct ConnState {
    backend: Option<Address>,
    alternates: Vec<Address>,
    session_id: u64,
    next_tx_sequence: u64,
    version: AbiVersion,
    connected: bool,
}

struct Inner<T: Transport> {
    transport: Arc<T>,
    resolver: Arc<dyn LeaderResolver>,
    shard: ShardName,
    client: ClientIdentifier,
    config: FrontendConfig,
    state: Mutex<ConnState>,
    pending: DashMap<PendingKey, oneshot::Sender<ResponseEnvelope>>,
    in_flight: InFlightLimit,
    reconnect: tokio::sync::Mutex<()>,
    next_history_id: AtomicU64,
    standalone_transaction_ids: Arc<AtomicU64>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.receiver.get_mut().take() {
            handle.abort();
        }
    }
}

/// Connection to one shard, shared by all histories and transactions using it.
pub struct ClientConnection<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for ClientConnection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// What the retry loop does after a failed attempt.
enum Recovery {
    Resync { observed_session: u64 },
    Redirect { observed_session: u64, leader: Option<Address> },
    Backoff,
}

impl<T: Transport> ClientConnection<T> {
    /// Connect `client` to the leader of `shard`.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, no leader can be found or the
    /// backend refuses the connection.
    pub async fn connect(
        transport: Arc<T>,
        resolver: Arc<dyn LeaderResolver>,
        shard: ShardName,
        client: ClientIdentifier,
        config: FrontendConfig,
    ) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new(Inner {
            transport,
            resolver,
            shard,
            client,
            state: Mutex::new(ConnState {
                backend: None,
                alternates: Vec::new(),
                session_id: 0,
                next_tx_sequence: 0,
                version: config.versions.min,
                connected: false,
            }),
            config,
            pending: DashMap::new(),
            in_flight: InFlightLimit::new(1),
            reconnect: tokio::sync::Mutex::new(()),
            next_history_id: AtomicU64::new(LocalHistoryIdentifier::STANDALONE_HISTORY_ID + 1),
            standalone_transaction_ids: Arc::new(AtomicU64::new(0)),
            receiver: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::run_receive_loop(Arc::downgrade(&inner)));
        *inner.receiver.lock() = Some(handle);

        let connection = Self { inner };
        connection.resync(None).await?;
        Ok(connection)
    }

    /// The client generation this connection speaks for.
    #[must_use]
    pub fn client(&self) -> &ClientIdentifier {
        &self.inner.client
    }

    /// The shard this connection serves.
    #[must_use]
    pub fn shard(&self) -> &ShardName {
        &self.inner.shard
    }

    /// The address responses are sent to.
    #[must_use]
    pub fn local_address(&self) -> &Address {
        self.inner.transport.local_address()
    }

    /// The version negotiated on the current session.
    #[must_use]
    pub fn version(&self) -> AbiVersion {
        self.inner.state.lock().version
    }

    /// The backend currently connected to.
    #[must_use]
    pub fn backend(&self) -> Option<Address> {
        self.inner.state.lock().backend.clone()
    }

    /// The current session id.
    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.inner.state.lock().session_id
    }

    /// The standalone history, which always exists.
    #[must_use]
    pub fn standalone(&self) -> ClientHistory<T> {
        ClientHistory::standalone(self.clone())
    }

    /// Transaction id allocator shared by every handle on the standalone history.
    pub(crate) fn standalone_transaction_ids(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.inner.standalone_transaction_ids)
    }

    /// Create a new chained local history on the backend.
    ///
    /// # Errors
    ///
    /// Fails if the backend does not acknowledge the creation.
    pub async fn create_history(&self) -> Result<ClientHistory<T>> {
        let history_id = self.inner.next_history_id.fetch_add(1, Ordering::Relaxed);
        let id = LocalHistoryIdentifier::new(self.inner.client.clone(), history_id);
        ClientHistory::create(self.clone(), id).await
    }

    /// Send a history request and wait for its success.
    ///
    /// # Errors
    ///
    /// Fails with the backend's exception if it is not retriable, or when the
    /// retry budget runs out.
    pub async fn history_request(
        &self,
        request: LocalHistoryRequest,
    ) -> Result<LocalHistorySuccess> {
        match self.request(RequestMessage::History(request)).await? {
            ResponseMessage::History(response) => Ok(response.outcome?),
            other => Err(Error::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Send a transaction request and wait for its success.
    ///
    /// # Errors
    ///
    /// As [`ClientConnection::history_request`].
    pub async fn transaction_request(
        &self,
        request: TransactionRequest,
    ) -> Result<TransactionSuccess> {
        match self.request(RequestMessage::Transaction(request)).await? {
            ResponseMessage::Transaction(response) => Ok(response.outcome?),
            other => Err(Error::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Finish a locally recorded transaction.
    ///
    /// # Errors
    ///
    /// As [`ClientConnection::history_request`].
    pub async fn submit_local(
        &self,
        request: LocalTransactionRequest,
    ) -> Result<TransactionSuccess> {
        let request = translate(request, self.version());
        self.transaction_request(request).await
    }

    /// Send `message` until it is answered.
    ///
    /// Returns the successful response. Failures that retrying cannot fix are
    /// returned as [`Error::Request`]. The connect handshake belongs to the
    /// connection and is refused here.
    ///
    /// # Errors
    ///
    /// Fails on a non-retriable exception, when the retry or redirect budget
    /// runs out, or when the connection is closed.
    #[instrument(skip_all, fields(target = %message.target(), seq = message.sequence()))]
    pub async fn request(&self, message: RequestMessage) -> Result<ResponseMessage> {
        if matches!(message, RequestMessage::Client(_)) {
            return Err(Error::Request(RequestException::unsupported(
                "connect is driven by the connection itself",
            )));
        }
        let _permit = self.acquire().await?;
        let key = (message.target(), message.sequence());
        let config = &self.inner.config;
        let mut attempts = 0u32;
        let mut redirects = 0u32;
        let mut timeouts = 0u32;

        loop {
            if attempts > config.max_retries {
                return Err(Error::RetriesExhausted { attempts });
            }
            attempts += 1;

            let session = self.session_id();
            let recovery = match self.attempt(&key, &message).await? {
                Some(response) => {
                    timeouts = 0;
                    match classify(&response) {
                        Ok(()) => match response.message.exception() {
                            None => return Ok(response.message),
                            Some(e) => return Err(Error::Request(e.clone())),
                        },
                        Err(recovery) => recovery,
                    }
                }
                None => {
                    timeouts += 1;
                    if timeouts % STALL_TIMEOUTS == 0 {
                        self.abandon(session).await?;
                    }
                    continue;
                }
            };

            match recovery {
                Recovery::Resync { observed_session } => {
                    self.resync(Some(observed_session)).await?;
                }
                Recovery::Redirect {
                    observed_session,
                    leader,
                } => {
                    redirects += 1;
                    if redirects > config.max_redirects {
                        return Err(Error::RedirectsExhausted { redirects });
                    }
                    self.redirect(observed_session, leader).await?;
                }
                Recovery::Backoff => sleep(config.retry_backoff).await,
            }
        }
    }

    /// Stop receiving responses and shut the transport down.
    ///
    /// # Errors
    ///
    /// Fails if the transport fails to shut down.
    pub async fn close(&self) -> Result<()> {
        if let Some(handle) = self.inner.receiver.lock().take() {
            handle.abort();
        }
        self.inner.pending.clear();
        self.inner.in_flight.close();
        self.inner.transport.shutdown().await?;
        Ok(())
    }

    async fn acquire(&self) -> Result<InFlightPermit> {
        self.inner.in_flight.acquire().await
    }

    /// One transmission of `message`. `None` means no answer in time.
    async fn attempt(
        &self,
        key: &PendingKey,
        message: &RequestMessage,
    ) -> Result<Option<ResponseEnvelope>> {
        let (envelope, backend) = {
            let mut state = self.inner.state.lock();
            let Some(backend) = state.backend.clone() else {
                return Err(Error::Closed);
            };
            let tx_sequence = state.next_tx_sequence;
            state.next_tx_sequence += 1;
            let envelope = RequestEnvelope::new(
                state.session_id,
                tx_sequence,
                message.clone().to_version(state.version),
            );
            (envelope, backend)
        };

        let frame = codec::encode_request(&envelope)?;
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(key.clone(), tx);

        trace!(
            "sending {} seq {} as tx {} on session {}",
            message.kind_name(),
            message.sequence(),
            envelope.tx_sequence,
            envelope.session_id
        );
        if let Err(e) = self.inner.transport.send(&backend, frame).await {
            warn!("Failed to send to {}: {}", backend, e);
        }

        match timeout(self.inner.config.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(Some(response)),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                self.inner.pending.remove(key);
                debug!(
                    "{} seq {} timed out after {:?}",
                    message.kind_name(),
                    message.sequence(),
                    self.inner.config.request_timeout
                );
                Ok(None)
            }
        }
    }

    /// Reconnect unless someone already replaced `observed_session`.
    async fn resync(&self, observed_session: Option<u64>) -> Result<()> {
        let _guard = self.inner.reconnect.lock().await;
        if let Some(observed) = observed_session {
            let state = self.inner.state.lock();
            if state.connected && state.session_id != observed {
                return Ok(());
            }
        }
        self.connect_locked().await
    }

    /// Leave a backend that stopped answering on `observed_session`.
    async fn abandon(&self, observed_session: u64) -> Result<()> {
        let _guard = self.inner.reconnect.lock().await;
        let backend = {
            let state = self.inner.state.lock();
            if state.connected && state.session_id != observed_session {
                return Ok(());
            }
            state.backend.clone()
        };
        if let Some(backend) = backend {
            self.fail_over(&backend);
        }
        self.connect_locked().await
    }

    /// Move to `leader`, or to whatever the resolver says next.
    async fn redirect(&self, observed_session: u64, leader: Option<Address>) -> Result<()> {
        let _guard = self.inner.reconnect.lock().await;
        {
            let mut state = self.inner.state.lock();
            if state.connected && state.session_id != observed_session {
                return Ok(());
            }
            if let Some(stale) = state.backend.take() {
                self.inner.resolver.invalidate(&self.inner.shard, &stale);
            }
            state.backend = leader;
            state.connected = false;
        }
        self.connect_locked().await
    }

    /// Open a new session. The caller holds the reconnect lock.
    async fn connect_locked(&self) -> Result<()> {
        let config = &self.inner.config;
        let target = TargetIdentifier::Client(self.inner.client.clone());
        let mut attempts = 0u32;
        let mut redirects = 0u32;

        loop {
            if attempts > config.max_retries {
                return Err(Error::RetriesExhausted { attempts });
            }
            attempts += 1;

            let backend = self.current_backend().await?;
            let session_id = {
                let mut state = self.inner.state.lock();
                state.session_id += 1;
                state.connected = false;
                state.session_id
            };
            let connect = Request::new(
                MessageHeader::new(self.inner.client.clone(), 0, config.versions.min),
                self.local_address().clone(),
                ClientRequestKind::Connect {
                    versions: config.versions,
                },
            );
            let envelope = RequestEnvelope::new(session_id, 0, RequestMessage::Client(connect));
            let frame = codec::encode_request(&envelope)?;

            // Every connect uses sequence 0; the session tells attempts apart.
            let key = (target.clone(), session_id);
            let (tx, rx) = oneshot::channel();
            self.inner.pending.insert(key.clone(), tx);

            debug!("connecting {} to {} on session {}", self.inner.client, backend, session_id);
            if let Err(e) = self.inner.transport.send(&backend, frame).await {
                warn!("Failed to send connect to {}: {}", backend, e);
            }

            let response = match timeout(config.request_timeout, rx).await {
                Ok(Ok(response)) => response,
                Ok(Err(_)) => return Err(Error::Closed),
                Err(_) => {
                    self.inner.pending.remove(&key);
                    self.fail_over(&backend);
                    continue;
                }
            };

            let ResponseMessage::Client(response) = response.message else {
                return Err(Error::UnexpectedResponse(format!("{:?}", response.message)));
            };
            match response.outcome {
                Ok(ClientSuccess::Connect {
                    version,
                    max_messages,
                    alternates,
                    ..
                }) => {
                    let mut state = self.inner.state.lock();
                    state.backend = Some(backend.clone());
                    state.alternates = alternates;
                    state.version = version;
                    state.next_tx_sequence = 1;
                    state.connected = true;
                    let limit = usize::try_from(max_messages.get()).unwrap_or(usize::MAX);
                    self.inner.in_flight.resize(limit);
                    info!(
                        "{} connected to {} at version {}, session {}",
                        self.inner.client, backend, version, session_id
                    );
                    return Ok(());
                }
                Err(RequestException::NotLeader { leader }) => {
                    redirects += 1;
                    if redirects > config.max_redirects {
                        return Err(Error::RedirectsExhausted { redirects });
                    }
                    info!("{} is not the leader, redirected to {:?}", backend, leader);
                    self.inner.resolver.invalidate(&self.inner.shard, &backend);
                    self.inner.state.lock().backend = leader;
                }
                Err(e) if e.is_retriable() => sleep(config.retry_backoff).await,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Give up on an unresponsive backend for the next alternate it
    /// advertised, or for the resolver once they are used up.
    fn fail_over(&self, backend: &Address) {
        let mut state = self.inner.state.lock();
        let next = state
            .alternates
            .iter()
            .position(|a| a == backend)
            .map_or(0, |i| i + 1);
        state.backend = state.alternates.get(next).cloned();
        debug!("{} not answering, trying {:?} next", backend, state.backend);
    }

    async fn current_backend(&self) -> Result<Address> {
        if let Some(backend) = self.inner.state.lock().backend.clone() {
            return Ok(backend);
        }
        let backend = self.inner.resolver.resolve(&self.inner.shard).await?;
        self.inner.state.lock().backend = Some(backend.clone());
        Ok(backend)
    }

    async fn run_receive_loop(inner: std::sync::Weak<Inner<T>>) {
        let Some(mut incoming) = inner.upgrade().map(|i| i.transport.incoming()) else {
            return;
        };

        while let Some(datagram) = incoming.next().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };

            let response = match codec::decode_response(&datagram.payload) {
                Ok(response) => response,
                Err(e) => {
                    warn!("Dropping undecodable frame from {}: {}", datagram.from, e);
                    continue;
                }
            };

            let key = pending_key(&response);
            match inner.pending.remove(&key) {
                Some((_, waiter)) => {
                    let _ = waiter.send(response);
                }
                None => trace!(
                    "no waiter for {} seq {}, dropping duplicate answer",
                    key.0, key.1
                ),
            }
        }
    }
}

/// Handshake answers are matched by session, everything else by sequence.
fn pending_key(response: &ResponseEnvelope) -> PendingKey {
    match &response.message {
        ResponseMessage::Client(_) => (response.message.target(), response.session_id),
        message => (message.target(), message.sequence()),
    }
}

/// Decide whether a response settles the request or how to recover from it.
fn classify(response: &ResponseEnvelope) -> std::result::Result<(), Recovery> {
    let observed_session = response.session_id;
    match response.message.exception() {
        None => Ok(()),
        Some(RequestException::OutOfSequenceEnvelope { .. }) => {
            Err(Recovery::Resync { observed_session })
        }
        Some(RequestException::NotLeader { leader }) => Err(Recovery::Redirect {
            observed_session,
            leader: leader.clone(),
        }),
        Some(e) if e.is_retriable() => Err(Recovery::Backoff),
        Some(_) => Ok(()),
    }
}
