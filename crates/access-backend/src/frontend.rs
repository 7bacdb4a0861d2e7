//! State a backend keeps for one frontend.
//!
//! Every frontend talks to the backend through a single [`FrontendState`]. It
//! enforces the generation and session rules, then routes each request to the
//! history or transaction it addresses. Each envelope is answered with exactly
//! one response envelope.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;
use parking_lot::RwLock;
use proven_access_api::{
    AbiVersion, Address, ClientIdentifier, ClientRequest, ClientRequestKind, ClientSuccess,
    LocalHistoryIdentifier, LocalHistoryRequest, LocalHistoryRequestKind, LocalHistorySuccess,
    MessageHeader, RangeSet, Request, RequestEnvelope, RequestException, RequestMessage, Response,
    ResponseEnvelope, ResponseMessage, TransactionRequest, TransactionSuccess,
};
use tracing::{debug, info, instrument, warn};

use crate::config::BackendConfig;
use crate::data_tree::DataTree;
use crate::history::LocalHistory;
use crate::replay::Outcome;

/// Whether this backend currently leads its shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Requests are served.
    Leader,
    /// Requests are refused with a redirect.
    Follower {
        /// The leader, if known.
        leader: Option<Address>,
    },
}

/// Shard-wide state shared by all frontends of a backend.
pub struct ShardContext {
    address: Address,
    config: BackendConfig,
    tree: Arc<dyn DataTree>,
    role: RwLock<Role>,
}

impl ShardContext {
    /// Create a context for a backend that starts out as leader.
    pub fn new(address: Address, config: BackendConfig, tree: Arc<dyn DataTree>) -> Self {
        Self {
            address,
            config,
            tree,
            role: RwLock::new(Role::Leader),
        }
    }

    /// The backend's own address.
    #[must_use]
    pub const fn address(&self) -> &Address {
        &self.address
    }

    /// The backend's configuration.
    #[must_use]
    pub const fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// The shard's data tree.
    #[must_use]
    pub fn tree(&self) -> &dyn DataTree {
        self.tree.as_ref()
    }

    /// The current role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role.read().clone()
    }

    /// Change the role.
    pub fn set_role(&self, role: Role) {
        info!("backend {} is now {:?}", self.address, role);
        *self.role.write() = role;
    }
}

#[derive(Debug, Clone, Copy)]
struct Session {
    id: u64,
    next_tx_sequence: u64,
    version: AbiVersion,
}

/// Session and history state for one frontend.
pub struct FrontendState {
    client: ClientIdentifier,
    session: Option<Session>,
    histories: BTreeMap<u64, LocalHistory>,
    purged_histories: RangeSet,
    purge_acks: LruCache<u64, u64>,
    closed_retention: usize,
}

impl FrontendState {
    /// Create the state for the first generation seen from a frontend.
    #[must_use]
    pub fn new(client: &ClientIdentifier, config: &BackendConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.purged_history_retention).unwrap_or(NonZeroUsize::MIN);
        let mut state = Self {
            client: client.clone(),
            session: None,
            histories: BTreeMap::new(),
            purged_histories: RangeSet::new(),
            purge_acks: LruCache::new(capacity),
            closed_retention: config.closed_transaction_retention,
        };
        state.reset(client.clone());
        state
    }

    /// The generation currently served.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.client.generation()
    }

    /// The current session id, once connected.
    #[must_use]
    pub fn session_id(&self) -> Option<u64> {
        self.session.map(|s| s.id)
    }

    /// Whether the frontend has a live history with `history_id`.
    #[must_use]
    pub fn has_history(&self, history_id: u64) -> bool {
        self.histories.contains_key(&history_id)
    }

    /// Whether dropping this state loses nothing but the session: only the
    /// standalone history is left and it holds no transactions.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.histories.len() == 1
            && self
                .histories
                .values()
                .all(|h| h.id().is_standalone() && h.live_transactions() == 0)
    }

    /// Handle one envelope and produce its answer.
    #[instrument(skip_all, fields(client = %envelope.message.client(), session = envelope.session_id))]
    pub fn handle(&mut self, envelope: RequestEnvelope, ctx: &ShardContext) -> ResponseEnvelope {
        let started = Instant::now();
        let RequestEnvelope {
            session_id,
            tx_sequence,
            message,
        } = envelope;

        debug!(
            "{} session {} tx {}: {} seq {}",
            message.target(),
            session_id,
            tx_sequence,
            message.kind_name(),
            message.sequence()
        );

        let response = match self.admit(session_id, tx_sequence, &message, ctx) {
            Ok(()) => self.dispatch(session_id, tx_sequence, &message, ctx),
            Err(e) => {
                debug!("{} rejected: {}", message.kind_name(), e);
                failure(&message, self.reply_version(&message), e)
            }
        };

        let elapsed = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        ResponseEnvelope::new(session_id, tx_sequence, elapsed, response)
    }

    /// Role, generation and session checks.
    fn admit(
        &mut self,
        session_id: u64,
        tx_sequence: u64,
        message: &RequestMessage,
        ctx: &ShardContext,
    ) -> Result<(), RequestException> {
        if let Role::Follower { leader } = ctx.role() {
            return Err(RequestException::NotLeader { leader });
        }

        let generation = message.client().generation();
        let existing = self.generation();
        if generation < existing {
            warn!(
                "{} from retired generation {} (current {})",
                message.kind_name(),
                generation,
                existing
            );
            return Err(RequestException::RetiredGeneration { existing });
        }

        let is_connect = matches!(message, RequestMessage::Client(_));
        if generation > existing {
            if !is_connect {
                return Err(RequestException::OutOfSequenceEnvelope { expected: 0 });
            }
            info!(
                "{} replaces generation {}",
                message.client(),
                existing
            );
            self.reset(message.client().clone());
        }

        if is_connect {
            return match self.session {
                Some(session) if session_id < session.id => {
                    Err(RequestException::OutOfSequenceEnvelope { expected: 0 })
                }
                _ => Ok(()),
            };
        }

        let Some(session) = self.session.as_mut() else {
            return Err(RequestException::OutOfSequenceEnvelope { expected: 0 });
        };
        if session.id != session_id {
            return Err(RequestException::OutOfSequenceEnvelope { expected: 0 });
        }
        if tx_sequence > session.next_tx_sequence {
            return Err(RequestException::OutOfSequenceEnvelope {
                expected: session.next_tx_sequence,
            });
        }
        if tx_sequence == session.next_tx_sequence {
            session.next_tx_sequence += 1;
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        session_id: u64,
        tx_sequence: u64,
        message: &RequestMessage,
        ctx: &ShardContext,
    ) -> ResponseMessage {
        match message {
            RequestMessage::Client(request) => self.connect(request, session_id, tx_sequence, ctx),
            RequestMessage::History(request) => {
                let outcome = self.handle_history(request);
                ResponseMessage::History(reply(request, self.reply_version(message), outcome))
            }
            RequestMessage::Transaction(request) => {
                let outcome = self.handle_transaction(request, ctx);
                ResponseMessage::Transaction(reply(
                    request,
                    self.reply_version(message),
                    outcome,
                ))
            }
        }
    }

    fn connect(
        &mut self,
        request: &ClientRequest,
        session_id: u64,
        tx_sequence: u64,
        ctx: &ShardContext,
    ) -> ResponseMessage {
        let ClientRequestKind::Connect { versions } = &request.kind;
        let Some(version) = ctx.config().versions.negotiate(versions) else {
            warn!(
                "{} offers versions {}, backend accepts {}",
                request.target(),
                versions,
                ctx.config().versions
            );
            let e = RequestException::unsupported(format!(
                "no common version in {versions} and {}",
                ctx.config().versions
            ));
            return ResponseMessage::Client(reply(request, request.header.version, Err(e)));
        };

        // The connect envelope is the first of the session.
        self.session = Some(Session {
            id: session_id,
            next_tx_sequence: tx_sequence + 1,
            version,
        });
        info!("{} connected at version {}", request.target(), version);

        ResponseMessage::Client(reply(
            request,
            version,
            Ok(ClientSuccess::Connect {
                backend: ctx.address().clone(),
                version,
                max_messages: ctx.config().max_messages,
                alternates: ctx.config().alternates.clone(),
            }),
        ))
    }

    fn handle_history(&mut self, request: &LocalHistoryRequest) -> Outcome<LocalHistorySuccess> {
        let id = request.target();
        let history_id = id.history_id();
        let sequence = request.sequence();

        if id.is_standalone() {
            return Err(RequestException::unsupported(
                "the standalone history cannot be created, destroyed or purged",
            ));
        }

        if !self.histories.contains_key(&history_id) {
            if self.purged_histories.contains(history_id) {
                if matches!(request.kind, LocalHistoryRequestKind::Purge)
                    && self.purge_acks.peek(&history_id) == Some(&sequence)
                {
                    return Ok(LocalHistorySuccess::Acknowledged);
                }
                return Err(RequestException::DeadHistory {
                    purged: self.purged_histories.clone(),
                });
            }

            match request.kind {
                LocalHistoryRequestKind::Create if sequence == 0 => {
                    debug!("creating history {}", id);
                    self.histories.insert(
                        history_id,
                        LocalHistory::new(id.clone(), self.closed_retention),
                    );
                }
                LocalHistoryRequestKind::Create => {
                    return Err(RequestException::out_of_order(0));
                }
                _ => return Err(RequestException::UnknownHistory { history_id }),
            }
        }

        let Some(history) = self.histories.get_mut(&history_id) else {
            return Err(RequestException::UnknownHistory { history_id });
        };
        let live = history.live_transactions();
        let outcome = history.handle_history(sequence, &request.kind);

        if matches!(request.kind, LocalHistoryRequestKind::Purge) && outcome.is_ok() {
            info!(
                "history {} purged with {} live transactions, purged transactions {}",
                history.id(),
                live,
                history.purged()
            );
            self.histories.remove(&history_id);
            self.purged_histories.insert(history_id);
            self.purge_acks.put(history_id, sequence);
        }
        outcome
    }

    fn handle_transaction(
        &mut self,
        request: &TransactionRequest,
        ctx: &ShardContext,
    ) -> Outcome<TransactionSuccess> {
        let history_id = request.target().history().history_id();
        match self.histories.get_mut(&history_id) {
            Some(history) => history.handle_transaction(request, ctx.tree()),
            None if self.purged_histories.contains(history_id) => {
                Err(RequestException::DeadHistory {
                    purged: self.purged_histories.clone(),
                })
            }
            None => Err(RequestException::UnknownHistory { history_id }),
        }
    }

    /// Forget everything about the previous generation.
    fn reset(&mut self, client: ClientIdentifier) {
        let standalone = LocalHistoryIdentifier::standalone(client.clone());
        self.client = client;
        self.session = None;
        self.histories.clear();
        self.histories.insert(
            standalone.history_id(),
            LocalHistory::new(standalone, self.closed_retention),
        );
        self.purged_histories = RangeSet::new();
        self.purge_acks.clear();
    }

    fn reply_version(&self, message: &RequestMessage) -> AbiVersion {
        self.session.map_or_else(|| message.version(), |s| s.version)
    }
}

fn reply<T: Clone, K, S>(
    request: &Request<T, K>,
    version: AbiVersion,
    outcome: Outcome<S>,
) -> Response<T, S> {
    Response::new(
        MessageHeader::new(request.target().clone(), request.sequence(), version),
        outcome,
    )
}

fn failure(message: &RequestMessage, version: AbiVersion, e: RequestException) -> ResponseMessage {
    match message {
        RequestMessage::Client(r) => ResponseMessage::Client(reply(r, version, Err(e))),
        RequestMessage::History(r) => ResponseMessage::History(reply(r, version, Err(e))),
        RequestMessage::Transaction(r) => ResponseMessage::Transaction(reply(r, version, Err(e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_tree::MemoryDataTree;
    use bytes::Bytes;
    use proven_access_api::{
        DataPath, FrontendIdentifier, FrontendType, MemberName, PersistenceProtocol,
        TransactionIdentifier, TransactionModification, TransactionRequestKind, VersionRange,
    };

    const SESSION: u64 = 7;

    fn client(generation: u64) -> ClientIdentifier {
        ClientIdentifier::new(
            FrontendIdentifier::new(MemberName::new("member-1"), FrontendType::new("config")),
            generation,
        )
    }

    fn context(versions: VersionRange) -> ShardContext {
        let config = BackendConfig {
            versions,
            ..BackendConfig::default()
        };
        ShardContext::new(
            Address::new("backend-1"),
            config,
            Arc::new(MemoryDataTree::new()),
        )
    }

    fn connect(generation: u64, session_id: u64, versions: VersionRange) -> RequestEnvelope {
        let request = Request::new(
            MessageHeader::new(client(generation), 0, AbiVersion::MIN),
            Address::new("frontend-1"),
            ClientRequestKind::Connect { versions },
        );
        RequestEnvelope::new(session_id, 0, RequestMessage::Client(request))
    }

    fn history_request(
        generation: u64,
        tx_sequence: u64,
        history_id: u64,
        sequence: u64,
        kind: LocalHistoryRequestKind,
    ) -> RequestEnvelope {
        let request = Request::new(
            MessageHeader::new(
                LocalHistoryIdentifier::new(client(generation), history_id),
                sequence,
                AbiVersion::MAX,
            ),
            Address::new("frontend-1"),
            kind,
        );
        RequestEnvelope::new(SESSION, tx_sequence, RequestMessage::History(request))
    }

    fn write_request(
        tx_sequence: u64,
        history_id: u64,
        transaction_id: u64,
        sequence: u64,
    ) -> RequestEnvelope {
        let target = TransactionIdentifier::new(
            LocalHistoryIdentifier::new(client(0), history_id),
            transaction_id,
        );
        let request = Request::new(
            MessageHeader::new(target, sequence, AbiVersion::MAX),
            Address::new("frontend-1"),
            TransactionRequestKind::Modify {
                modifications: vec![TransactionModification::Write {
                    path: "/x".parse::<DataPath>().unwrap(),
                    data: Bytes::from_static(b"1"),
                }],
                protocol: Some(PersistenceProtocol::Simple),
            },
        );
        RequestEnvelope::new(SESSION, tx_sequence, RequestMessage::Transaction(request))
    }

    fn connected(ctx: &ShardContext) -> FrontendState {
        let mut state = FrontendState::new(&client(0), ctx.config());
        let response = state.handle(connect(0, SESSION, VersionRange::all()), ctx);
        assert_eq!(response.message.exception(), None);
        state
    }

    #[test]
    fn test_connect_negotiates_highest_common_version() {
        let ctx = context(VersionRange::new(AbiVersion::V1, AbiVersion::V2).unwrap());
        let mut state = FrontendState::new(&client(0), ctx.config());

        let response = state.handle(connect(0, SESSION, VersionRange::all()), &ctx);
        match response.message {
            ResponseMessage::Client(r) => {
                assert_eq!(r.header.version, AbiVersion::V2);
                let ClientSuccess::Connect {
                    backend, version, ..
                } = r.outcome.unwrap();
                assert_eq!(backend, Address::new("backend-1"));
                assert_eq!(version, AbiVersion::V2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(state.session_id(), Some(SESSION));
    }

    #[test]
    fn test_connect_without_common_version() {
        let ctx = context(VersionRange::new(AbiVersion::V3, AbiVersion::V3).unwrap());
        let mut state = FrontendState::new(&client(0), ctx.config());

        let offered = VersionRange::new(AbiVersion::V1, AbiVersion::V2).unwrap();
        let response = state.handle(connect(0, SESSION, offered), &ctx);
        assert!(matches!(
            response.message.exception(),
            Some(RequestException::UnsupportedRequest { .. })
        ));
        assert_eq!(state.session_id(), None);
    }

    #[test]
    fn test_requests_before_connect_are_out_of_sequence() {
        let ctx = context(VersionRange::all());
        let mut state = FrontendState::new(&client(0), ctx.config());
        let response = state.handle(write_request(1, 0, 1, 0), &ctx);
        assert_eq!(
            response.message.exception(),
            Some(&RequestException::OutOfSequenceEnvelope { expected: 0 })
        );
    }

    #[test]
    fn test_envelope_gap_reports_expected() {
        let ctx = context(VersionRange::all());
        let mut state = connected(&ctx);

        let response = state.handle(write_request(3, 0, 1, 0), &ctx);
        assert_eq!(
            response.message.exception(),
            Some(&RequestException::OutOfSequenceEnvelope { expected: 1 })
        );
        assert_eq!(response.tx_sequence, 3);

        let response = state.handle(write_request(1, 0, 1, 0), &ctx);
        assert_eq!(response.message.exception(), None);
        assert_eq!(
            ctx.tree().read_committed(&"/x".parse().unwrap()),
            Some(Bytes::from_static(b"1"))
        );
    }

    #[test]
    fn test_retired_generation() {
        let ctx = context(VersionRange::all());
        let mut state = FrontendState::new(&client(1), ctx.config());
        state.handle(connect(1, SESSION, VersionRange::all()), &ctx);

        let response = state.handle(connect(0, SESSION + 1, VersionRange::all()), &ctx);
        assert_eq!(
            response.message.exception(),
            Some(&RequestException::RetiredGeneration { existing: 1 })
        );
        assert_eq!(state.generation(), 1);
    }

    #[test]
    fn test_new_generation_resets_state() {
        let ctx = context(VersionRange::all());
        let mut state = connected(&ctx);
        state.handle(
            history_request(0, 1, 5, 0, LocalHistoryRequestKind::Create),
            &ctx,
        );
        assert!(state.has_history(5));

        // Only a connect may introduce a new generation.
        let response = state.handle(
            history_request(1, 2, 6, 0, LocalHistoryRequestKind::Create),
            &ctx,
        );
        assert_eq!(
            response.message.exception(),
            Some(&RequestException::OutOfSequenceEnvelope { expected: 0 })
        );

        let response = state.handle(connect(1, SESSION + 1, VersionRange::all()), &ctx);
        assert_eq!(response.message.exception(), None);
        assert_eq!(state.generation(), 1);
        assert!(!state.has_history(5));
        assert!(state.has_history(0));
    }

    #[test]
    fn test_follower_redirects() {
        let ctx = context(VersionRange::all());
        ctx.set_role(Role::Follower {
            leader: Some(Address::new("backend-2")),
        });
        let mut state = FrontendState::new(&client(0), ctx.config());

        let response = state.handle(connect(0, SESSION, VersionRange::all()), &ctx);
        let e = response.message.exception().unwrap();
        assert!(e.is_redirect());
        assert_eq!(
            e,
            &RequestException::NotLeader {
                leader: Some(Address::new("backend-2"))
            }
        );
    }

    #[test]
    fn test_unknown_history_is_retriable() {
        let ctx = context(VersionRange::all());
        let mut state = connected(&ctx);

        let response = state.handle(write_request(1, 3, 1, 0), &ctx);
        let e = response.message.exception().unwrap();
        assert_eq!(e, &RequestException::UnknownHistory { history_id: 3 });
        assert!(e.is_retriable());
    }

    #[test]
    fn test_purged_history_is_dead_and_purge_replays() {
        let ctx = context(VersionRange::all());
        let mut state = connected(&ctx);

        for (tx, seq, kind) in [
            (1, 0, LocalHistoryRequestKind::Create),
            (2, 1, LocalHistoryRequestKind::Destroy),
            (3, 2, LocalHistoryRequestKind::Purge),
        ] {
            let response = state.handle(history_request(0, tx, 2, seq, kind), &ctx);
            assert_eq!(response.message.exception(), None);
        }
        assert!(!state.has_history(2));

        let response = state.handle(
            history_request(0, 4, 2, 2, LocalHistoryRequestKind::Purge),
            &ctx,
        );
        assert_eq!(response.message.exception(), None);

        let response = state.handle(write_request(5, 2, 1, 0), &ctx);
        match response.message.exception() {
            Some(RequestException::DeadHistory { purged }) => assert!(purged.contains(2)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_purge_with_next_sequence_is_dead() {
        let ctx = context(VersionRange::all());
        let mut state = connected(&ctx);

        for (tx, seq, kind) in [
            (1, 0, LocalHistoryRequestKind::Create),
            (2, 1, LocalHistoryRequestKind::Destroy),
            (3, 2, LocalHistoryRequestKind::Purge),
        ] {
            let response = state.handle(history_request(0, tx, 2, seq, kind), &ctx);
            assert_eq!(response.message.exception(), None);
        }

        let response = state.handle(
            history_request(0, 4, 2, 3, LocalHistoryRequestKind::Purge),
            &ctx,
        );
        match response.message.exception() {
            Some(RequestException::DeadHistory { purged }) => assert!(purged.contains(2)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_standalone_history_has_no_lifecycle() {
        let ctx = context(VersionRange::all());
        let mut state = connected(&ctx);
        let response = state.handle(
            history_request(0, 1, 0, 0, LocalHistoryRequestKind::Destroy),
            &ctx,
        );
        assert!(matches!(
            response.message.exception(),
            Some(RequestException::UnsupportedRequest { .. })
        ));
    }

    #[test]
    fn test_duplicate_envelope_gets_same_answer() {
        let ctx = context(VersionRange::all());
        let mut state = connected(&ctx);

        let first = state.handle(write_request(1, 0, 1, 0), &ctx);
        let second = state.handle(write_request(1, 0, 1, 0), &ctx);
        assert_eq!(first.message, second.message);
    }

    #[test]
    fn test_quiescent_only_without_histories_or_transactions() {
        let ctx = context(VersionRange::all());
        let mut state = connected(&ctx);
        assert!(state.is_quiescent());

        state.handle(write_request(1, 0, 1, 0), &ctx);
        assert!(!state.is_quiescent());

        let mut state = connected(&ctx);
        let response = state.handle(
            history_request(0, 1, 1, 0, LocalHistoryRequestKind::Create),
            &ctx,
        );
        assert_eq!(response.message.exception(), None);
        assert!(!state.is_quiescent());
    }
}
