//! Backend side of a single transaction.

use std::fmt;

use proven_access_api::{
    CommitPhase, OutOfOrder, PersistenceProtocol, RequestException, TransactionIdentifier,
    TransactionModification, TransactionRequestKind, TransactionSuccess,
};
use tracing::{debug, warn};

use crate::data_tree::{Candidate, DataTree, DataTreeView};
use crate::replay::{Admission, Outcome, ReplayLog};

/// Where a sealed transaction is in its commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Sealed by READY; the commit shape is still open.
    Ready,
    /// Sealed by THREE_PHASE.
    AwaitingCanCommit,
    CanCommitted,
    PreCommitted,
}

impl Phase {
    const fn next(self) -> CommitPhase {
        match self {
            Self::Ready | Self::AwaitingCanCommit => CommitPhase::CanCommit,
            Self::CanCommitted => CommitPhase::PreCommit,
            Self::PreCommitted => CommitPhase::DoCommit,
        }
    }
}

enum State {
    Open(Box<dyn DataTreeView>),
    Snapshot(Box<dyn DataTreeView>),
    Sealed { candidate: Candidate, phase: Phase },
    Committed,
    Aborted,
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(_) => f.write_str("Open"),
            Self::Snapshot(_) => f.write_str("Snapshot"),
            Self::Sealed { phase, .. } => write!(f, "Sealed({phase:?})"),
            Self::Committed => f.write_str("Committed"),
            Self::Aborted => f.write_str("Aborted"),
        }
    }
}

/// The request that sealed a transaction.
#[derive(Debug, Clone, Copy)]
struct ClosedBy {
    sequence: u64,
    request: &'static str,
}

/// A transaction as seen by its backend.
///
/// Requests are applied strictly in sequence order. Once sealed, by a
/// persistence protocol or by being opened as a snapshot, the transaction only
/// accepts the requests that can finish it.
pub struct FrontendTransaction {
    id: TransactionIdentifier,
    state: State,
    replay: ReplayLog<TransactionSuccess>,
    closed_by: Option<ClosedBy>,
}

impl FrontendTransaction {
    /// Create the transaction for its first request.
    pub fn new(id: TransactionIdentifier, first: &TransactionRequestKind, tree: &dyn DataTree) -> Self {
        let view = tree.open();
        let (state, closed_by) = if first.opens_snapshot() {
            (
                State::Snapshot(view),
                Some(ClosedBy {
                    sequence: 0,
                    request: first.name(),
                }),
            )
        } else {
            (State::Open(view), None)
        };
        debug!("transaction {} created as {:?}", id, state);
        Self {
            id,
            state,
            replay: ReplayLog::new(),
            closed_by,
        }
    }

    /// Whether the transaction still accepts modifications.
    pub const fn is_open(&self) -> bool {
        matches!(self.state, State::Open(_))
    }

    /// Whether the transaction reached a final state.
    pub const fn is_finished(&self) -> bool {
        matches!(self.state, State::Committed | State::Aborted)
    }

    /// Whether the transaction committed.
    pub const fn is_committed(&self) -> bool {
        matches!(self.state, State::Committed)
    }

    /// Handle one request, replaying the recorded outcome for duplicates.
    pub fn handle(
        &mut self,
        sequence: u64,
        kind: &TransactionRequestKind,
        tree: &dyn DataTree,
    ) -> Outcome<TransactionSuccess> {
        match self.replay.admit(sequence)? {
            Admission::Process => {}
            Admission::Replay(outcome) => {
                debug!("replaying {} outcome for sequence {}", self.id, sequence);
                return outcome;
            }
            Admission::Skipped => {
                return Err(RequestException::unsupported(format!(
                    "sequence {sequence} was skipped, next is {}",
                    self.replay.expected()
                )));
            }
        }

        let outcome = self.apply(sequence, kind, tree);
        self.replay.record(sequence, &outcome);
        if let (
            Ok(TransactionSuccess::IncrementSequence),
            TransactionRequestKind::IncrementSequence { increment, .. },
        ) = (&outcome, kind)
        {
            self.replay.skip(*increment);
        }
        outcome
    }

    /// Abort unless already finished.
    pub fn abort_if_live(&mut self) {
        if !self.is_finished() {
            debug!("aborting {}", self.id);
            self.state = State::Aborted;
        }
    }

    fn apply(
        &mut self,
        sequence: u64,
        kind: &TransactionRequestKind,
        tree: &dyn DataTree,
    ) -> Outcome<TransactionSuccess> {
        match kind {
            TransactionRequestKind::Modify {
                modifications,
                protocol,
            } => self.modify(sequence, modifications, *protocol, tree),
            TransactionRequestKind::Read { path, .. } => {
                let view = self.readable()?;
                Ok(TransactionSuccess::Read {
                    data: view.read(path),
                })
            }
            TransactionRequestKind::Exists { path, .. } => {
                let view = self.readable()?;
                Ok(TransactionSuccess::Exists {
                    exists: view.exists(path),
                })
            }
            TransactionRequestKind::IncrementSequence { .. } => {
                Ok(TransactionSuccess::IncrementSequence)
            }
            TransactionRequestKind::Abort => self.abort(),
            TransactionRequestKind::CanCommit => self.advance(CommitPhase::CanCommit, tree),
            TransactionRequestKind::PreCommit => self.advance(CommitPhase::PreCommit, tree),
            TransactionRequestKind::DoCommit => self.advance(CommitPhase::DoCommit, tree),
            TransactionRequestKind::Purge => {
                self.abort_if_live();
                Ok(TransactionSuccess::Purge)
            }
            TransactionRequestKind::SkipTransactions { .. } => {
                self.abort_if_live();
                Ok(TransactionSuccess::SkipTransactions)
            }
            TransactionRequestKind::CreateSnapshot => match self.state {
                State::Snapshot(_) => Ok(TransactionSuccess::CreateSnapshot),
                _ => Err(self.finished_error().unwrap_or_else(|| {
                    RequestException::unsupported("transaction is already open for writing")
                })),
            },
        }
    }

    fn modify(
        &mut self,
        sequence: u64,
        modifications: &[TransactionModification],
        protocol: Option<PersistenceProtocol>,
        tree: &dyn DataTree,
    ) -> Outcome<TransactionSuccess> {
        match std::mem::replace(&mut self.state, State::Aborted) {
            State::Open(mut view) => {
                for modification in modifications {
                    if let Err(e) = view.apply(modification) {
                        warn!("{} rejected modification: {}", self.id, e);
                        return Err(RequestException::runtime(e.to_string()));
                    }
                }
                match protocol {
                    None => {
                        self.state = State::Open(view);
                        Ok(TransactionSuccess::Modify)
                    }
                    Some(protocol) => {
                        self.closed_by = Some(ClosedBy {
                            sequence,
                            request: "ModifyTransactionRequest",
                        });
                        self.finish_with(protocol, view.seal(), tree)
                    }
                }
            }
            State::Sealed {
                candidate,
                phase: Phase::Ready,
            } if modifications.is_empty() => match protocol {
                Some(
                    protocol @ (PersistenceProtocol::Simple
                    | PersistenceProtocol::ThreePhase
                    | PersistenceProtocol::Abort),
                ) => self.finish_with(protocol, candidate, tree),
                Some(PersistenceProtocol::Ready) | None => {
                    self.state = State::Sealed {
                        candidate,
                        phase: Phase::Ready,
                    };
                    Ok(TransactionSuccess::Modify)
                }
            },
            state => {
                self.state = state;
                Err(self
                    .finished_error()
                    .unwrap_or_else(|| self.pending_error()))
            }
        }
    }

    /// Apply a persistence protocol to a freshly sealed candidate.
    fn finish_with(
        &mut self,
        protocol: PersistenceProtocol,
        candidate: Candidate,
        tree: &dyn DataTree,
    ) -> Outcome<TransactionSuccess> {
        match protocol {
            PersistenceProtocol::Abort => {
                self.state = State::Aborted;
                Ok(TransactionSuccess::Abort)
            }
            PersistenceProtocol::Ready => {
                self.state = State::Sealed {
                    candidate,
                    phase: Phase::Ready,
                };
                Ok(TransactionSuccess::Modify)
            }
            PersistenceProtocol::ThreePhase => {
                self.state = State::Sealed {
                    candidate,
                    phase: Phase::AwaitingCanCommit,
                };
                Ok(TransactionSuccess::Modify)
            }
            PersistenceProtocol::Simple => {
                let result = tree
                    .can_commit(&candidate)
                    .and_then(|()| tree.pre_commit(&candidate))
                    .and_then(|()| tree.commit(candidate));
                match result {
                    Ok(version) => {
                        debug!("{} committed at version {}", self.id, version);
                        self.state = State::Committed;
                        Ok(TransactionSuccess::Modify)
                    }
                    Err(e) => {
                        self.state = State::Aborted;
                        Err(RequestException::runtime(e.to_string()))
                    }
                }
            }
        }
    }

    fn abort(&mut self) -> Outcome<TransactionSuccess> {
        match self.state {
            State::Committed => Err(RequestException::ClosedTransaction { successful: true }),
            _ => {
                self.state = State::Aborted;
                Ok(TransactionSuccess::Abort)
            }
        }
    }

    fn advance(&mut self, requested: CommitPhase, tree: &dyn DataTree) -> Outcome<TransactionSuccess> {
        if let Some(e) = self.finished_error() {
            return Err(e);
        }

        match std::mem::replace(&mut self.state, State::Aborted) {
            State::Sealed { candidate, phase } if phase.next() == requested => {
                let (result, next) = match requested {
                    CommitPhase::CanCommit => (
                        tree.can_commit(&candidate).map(|()| TransactionSuccess::CanCommit),
                        Some(Phase::CanCommitted),
                    ),
                    CommitPhase::PreCommit => (
                        tree.pre_commit(&candidate).map(|()| TransactionSuccess::PreCommit),
                        Some(Phase::PreCommitted),
                    ),
                    CommitPhase::DoCommit => (
                        tree.commit(candidate.clone())
                            .map(|_| TransactionSuccess::Commit),
                        None,
                    ),
                };
                match (result, next) {
                    (Ok(success), Some(phase)) => {
                        self.state = State::Sealed { candidate, phase };
                        Ok(success)
                    }
                    (Ok(success), None) => {
                        self.state = State::Committed;
                        Ok(success)
                    }
                    (Err(e), _) => {
                        warn!("{} failed {}: {}", self.id, requested, e);
                        Err(RequestException::runtime(e.to_string()))
                    }
                }
            }
            state => {
                let expected = match &state {
                    State::Sealed { phase, .. } => Some(phase.next()),
                    _ => None,
                };
                warn!(
                    "{} received {} in state {:?}, aborting",
                    self.id, requested, state
                );
                Err(RequestException::OutOfOrderRequest(
                    OutOfOrder::CommitPhase {
                        requested,
                        expected,
                    },
                ))
            }
        }
    }

    fn readable(&self) -> Result<&dyn DataTreeView, RequestException> {
        match &self.state {
            State::Open(view) | State::Snapshot(view) => Ok(view.as_ref()),
            _ => Err(self
                .finished_error()
                .unwrap_or_else(|| self.pending_error())),
        }
    }

    fn finished_error(&self) -> Option<RequestException> {
        match self.state {
            State::Committed => Some(RequestException::ClosedTransaction { successful: true }),
            State::Aborted => Some(RequestException::AbortedTransaction {
                transaction_id: self.id.transaction_id(),
            }),
            _ => None,
        }
    }

    fn pending_error(&self) -> RequestException {
        let closed_by = self.closed_by.unwrap_or(ClosedBy {
            sequence: 0,
            request: "unknown",
        });
        RequestException::PendingTransaction {
            sequence: closed_by.sequence,
            closed_by: closed_by.request.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_tree::MemoryDataTree;
    use bytes::Bytes;
    use proven_access_api::{
        ClientIdentifier, DataPath, FrontendIdentifier, FrontendType, LocalHistoryIdentifier,
        MemberName,
    };

    fn id() -> TransactionIdentifier {
        let client = ClientIdentifier::new(
            FrontendIdentifier::new(MemberName::new("m"), FrontendType::new("t")),
            0,
        );
        TransactionIdentifier::new(LocalHistoryIdentifier::standalone(client), 1)
    }

    fn path(s: &str) -> DataPath {
        s.parse().unwrap()
    }

    fn modify(protocol: Option<PersistenceProtocol>) -> TransactionRequestKind {
        TransactionRequestKind::Modify {
            modifications: vec![TransactionModification::Write {
                path: path("/a"),
                data: Bytes::from_static(b"1"),
            }],
            protocol,
        }
    }

    fn seal_only(protocol: PersistenceProtocol) -> TransactionRequestKind {
        TransactionRequestKind::Modify {
            modifications: Vec::new(),
            protocol: Some(protocol),
        }
    }

    fn read(p: &str) -> TransactionRequestKind {
        TransactionRequestKind::Read {
            path: path(p),
            snapshot_only: false,
        }
    }

    #[test]
    fn test_simple_commit() {
        let tree = MemoryDataTree::new();
        let first = modify(Some(PersistenceProtocol::Simple));
        let mut tx = FrontendTransaction::new(id(), &first, &tree);

        assert_eq!(tx.handle(0, &first, &tree), Ok(TransactionSuccess::Modify));
        assert!(tx.is_committed());
        assert_eq!(tree.read_committed(&path("/a")), Some(Bytes::from_static(b"1")));
    }

    #[test]
    fn test_reads_see_own_writes() {
        let tree = MemoryDataTree::new();
        let first = modify(None);
        let mut tx = FrontendTransaction::new(id(), &first, &tree);
        tx.handle(0, &first, &tree).unwrap();

        assert_eq!(
            tx.handle(1, &read("/a"), &tree),
            Ok(TransactionSuccess::Read {
                data: Some(Bytes::from_static(b"1"))
            })
        );
        assert_eq!(tree.read_committed(&path("/a")), None);
    }

    #[test]
    fn test_three_phase_in_order() {
        let tree = MemoryDataTree::new();
        let first = modify(Some(PersistenceProtocol::ThreePhase));
        let mut tx = FrontendTransaction::new(id(), &first, &tree);

        assert_eq!(tx.handle(0, &first, &tree), Ok(TransactionSuccess::Modify));
        assert_eq!(
            tx.handle(1, &TransactionRequestKind::CanCommit, &tree),
            Ok(TransactionSuccess::CanCommit)
        );
        assert_eq!(
            tx.handle(2, &TransactionRequestKind::PreCommit, &tree),
            Ok(TransactionSuccess::PreCommit)
        );
        assert_eq!(
            tx.handle(3, &TransactionRequestKind::DoCommit, &tree),
            Ok(TransactionSuccess::Commit)
        );
        assert!(tx.is_committed());
    }

    #[test]
    fn test_do_commit_out_of_turn_aborts() {
        let tree = MemoryDataTree::new();
        let first = modify(Some(PersistenceProtocol::ThreePhase));
        let mut tx = FrontendTransaction::new(id(), &first, &tree);
        tx.handle(0, &first, &tree).unwrap();

        let err = tx
            .handle(1, &TransactionRequestKind::DoCommit, &tree)
            .unwrap_err();
        assert_eq!(
            err,
            RequestException::OutOfOrderRequest(OutOfOrder::CommitPhase {
                requested: CommitPhase::DoCommit,
                expected: Some(CommitPhase::CanCommit),
            })
        );
        assert!(!err.is_retriable());
        assert!(tx.is_finished());
        assert_eq!(tree.read_committed(&path("/a")), None);
    }

    #[test]
    fn test_ready_then_simple() {
        let tree = MemoryDataTree::new();
        let first = modify(Some(PersistenceProtocol::Ready));
        let mut tx = FrontendTransaction::new(id(), &first, &tree);
        tx.handle(0, &first, &tree).unwrap();

        // Sealed: reads and further writes are refused with the closing request.
        assert_eq!(
            tx.handle(1, &read("/a"), &tree),
            Err(RequestException::PendingTransaction {
                sequence: 0,
                closed_by: "ModifyTransactionRequest".into(),
            })
        );

        assert_eq!(
            tx.handle(2, &seal_only(PersistenceProtocol::Simple), &tree),
            Ok(TransactionSuccess::Modify)
        );
        assert!(tx.is_committed());
    }

    #[test]
    fn test_ready_then_abort() {
        let tree = MemoryDataTree::new();
        let first = modify(Some(PersistenceProtocol::Ready));
        let mut tx = FrontendTransaction::new(id(), &first, &tree);
        tx.handle(0, &first, &tree).unwrap();

        assert_eq!(
            tx.handle(1, &seal_only(PersistenceProtocol::Abort), &tree),
            Ok(TransactionSuccess::Abort)
        );
        assert!(tx.is_finished());
        assert!(!tx.is_committed());
    }

    #[test]
    fn test_duplicate_gets_identical_reply() {
        let tree = MemoryDataTree::new();
        let first = modify(Some(PersistenceProtocol::Simple));
        let mut tx = FrontendTransaction::new(id(), &first, &tree);
        let original = tx.handle(0, &first, &tree);
        let version = tree_version(&tree);

        assert_eq!(tx.handle(0, &first, &tree), original);
        assert_eq!(tree_version(&tree), version);
    }

    fn tree_version(tree: &MemoryDataTree) -> u64 {
        tree.version()
    }

    #[test]
    fn test_future_sequence_rejected() {
        let tree = MemoryDataTree::new();
        let first = modify(None);
        let mut tx = FrontendTransaction::new(id(), &first, &tree);
        assert_eq!(
            tx.handle(2, &first, &tree),
            Err(RequestException::out_of_order(0))
        );
        assert!(tx.is_open());
    }

    #[test]
    fn test_increment_sequence_skips() {
        let tree = MemoryDataTree::new();
        let first = TransactionRequestKind::IncrementSequence {
            increment: 2,
            snapshot_only: false,
        };
        let mut tx = FrontendTransaction::new(id(), &first, &tree);
        assert_eq!(
            tx.handle(0, &first, &tree),
            Ok(TransactionSuccess::IncrementSequence)
        );
        assert!(tx.handle(1, &read("/a"), &tree).is_err());
        assert_eq!(
            tx.handle(3, &read("/a"), &tree),
            Ok(TransactionSuccess::Read { data: None })
        );
    }

    #[test]
    fn test_snapshot_rejects_modifications() {
        let tree = MemoryDataTree::new();
        let first = TransactionRequestKind::CreateSnapshot;
        let mut tx = FrontendTransaction::new(id(), &first, &tree);
        assert_eq!(
            tx.handle(0, &first, &tree),
            Ok(TransactionSuccess::CreateSnapshot)
        );
        assert!(matches!(
            tx.handle(1, &modify(None), &tree),
            Err(RequestException::PendingTransaction { .. })
        ));
        assert_eq!(
            tx.handle(2, &read("/a"), &tree),
            Ok(TransactionSuccess::Read { data: None })
        );
    }

    #[test]
    fn test_aborted_transaction_answers() {
        let tree = MemoryDataTree::new();
        let first = modify(None);
        let mut tx = FrontendTransaction::new(id(), &first, &tree);
        tx.handle(0, &first, &tree).unwrap();
        assert_eq!(
            tx.handle(1, &TransactionRequestKind::Abort, &tree),
            Ok(TransactionSuccess::Abort)
        );
        assert_eq!(
            tx.handle(2, &TransactionRequestKind::Abort, &tree),
            Ok(TransactionSuccess::Abort)
        );
        assert_eq!(
            tx.handle(3, &read("/a"), &tree),
            Err(RequestException::AbortedTransaction { transaction_id: 1 })
        );
    }

    #[test]
    fn test_conflicting_simple_commit_fails() {
        let tree = MemoryDataTree::new();
        let first = modify(None);
        let mut slow = FrontendTransaction::new(id(), &first, &tree);
        slow.handle(0, &first, &tree).unwrap();

        let mut view = tree.open();
        view.apply(&TransactionModification::Delete { path: path("/a") })
            .unwrap();
        tree.commit(view.seal()).unwrap();

        let outcome = slow.handle(1, &seal_only(PersistenceProtocol::Simple), &tree);
        assert!(matches!(
            outcome,
            Err(RequestException::RuntimeRequest { .. })
        ));
        assert!(slow.is_finished());
        assert!(!slow.is_committed());
    }
}
