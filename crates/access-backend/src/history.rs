//! Backend side of a local history.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use lru::LruCache;
use proven_access_api::{
    LocalHistoryIdentifier, LocalHistoryRequestKind, LocalHistorySuccess, RangeSet,
    RequestException, TransactionRequest, TransactionRequestKind, TransactionSuccess,
};
use tracing::{debug, info};

use crate::data_tree::DataTree;
use crate::replay::{Admission, Outcome, ReplayLog};
use crate::transaction::FrontendTransaction;

/// How a transaction left the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closure {
    Purged { successful: bool },
    Skipped,
}

#[derive(Debug, Clone, Copy)]
struct ClosedRecord {
    closure: Closure,
    sequence: u64,
}

/// A local history and the transactions it owns.
///
/// Transactions of a chained history are strictly serialized: a new one may
/// only start once the previous one is no longer open for modification. The
/// standalone history has no such restriction.
pub struct LocalHistory {
    id: LocalHistoryIdentifier,
    destroyed: bool,
    replay: ReplayLog<LocalHistorySuccess>,
    transactions: BTreeMap<u64, FrontendTransaction>,
    closed: LruCache<u64, ClosedRecord>,
    purged: RangeSet,
}

impl LocalHistory {
    /// Create an empty history remembering up to `closed_retention` purged
    /// transactions.
    pub fn new(id: LocalHistoryIdentifier, closed_retention: usize) -> Self {
        let capacity = NonZeroUsize::new(closed_retention).unwrap_or(NonZeroUsize::MIN);
        Self {
            id,
            destroyed: false,
            replay: ReplayLog::new(),
            transactions: BTreeMap::new(),
            closed: LruCache::new(capacity),
            purged: RangeSet::new(),
        }
    }

    /// The history's identifier.
    pub const fn id(&self) -> &LocalHistoryIdentifier {
        &self.id
    }

    /// Number of transactions still held.
    pub fn live_transactions(&self) -> usize {
        self.transactions.len()
    }

    /// Purged transaction ids.
    pub const fn purged(&self) -> &RangeSet {
        &self.purged
    }

    /// Handle a request addressed to the history itself.
    pub fn handle_history(
        &mut self,
        sequence: u64,
        kind: &LocalHistoryRequestKind,
    ) -> Outcome<LocalHistorySuccess> {
        match self.replay.admit(sequence)? {
            Admission::Process => {}
            Admission::Replay(outcome) => return outcome,
            Admission::Skipped => {
                return Err(RequestException::unsupported(format!(
                    "sequence {sequence} was skipped"
                )));
            }
        }

        let outcome = match kind {
            LocalHistoryRequestKind::Create => Ok(LocalHistorySuccess::Created),
            LocalHistoryRequestKind::Destroy => {
                info!("history {} destroyed", self.id);
                self.destroyed = true;
                Ok(LocalHistorySuccess::Destroyed)
            }
            LocalHistoryRequestKind::Purge if !self.destroyed => Err(
                RequestException::unsupported("history must be destroyed before it is purged"),
            ),
            LocalHistoryRequestKind::Purge => {
                for tx in self.transactions.values_mut() {
                    tx.abort_if_live();
                }
                self.transactions.clear();
                Ok(LocalHistorySuccess::Acknowledged)
            }
            LocalHistoryRequestKind::SkipTransactions { transaction_ids } => {
                for id in transaction_ids {
                    self.forget(*id);
                }
                Ok(LocalHistorySuccess::Acknowledged)
            }
        };
        self.replay.record(sequence, &outcome);
        outcome
    }

    /// Handle a request addressed to one of the history's transactions.
    pub fn handle_transaction(
        &mut self,
        request: &TransactionRequest,
        tree: &dyn DataTree,
    ) -> Outcome<TransactionSuccess> {
        let tx_id = request.target().transaction_id();
        let sequence = request.sequence();
        let kind = &request.kind;

        if !self.transactions.contains_key(&tx_id) {
            if let Some(record) = self.closed.peek(&tx_id).copied() {
                return self.closed_outcome(record, sequence, kind);
            }
            if self.purged.contains(tx_id) {
                return Err(RequestException::DeadTransaction {
                    purged: self.purged.clone(),
                });
            }
            self.open_transaction(request, tree)?;
        }

        let Some(tx) = self.transactions.get_mut(&tx_id) else {
            return Err(RequestException::runtime("transaction vanished"));
        };
        let outcome = tx.handle(sequence, kind, tree);

        match (kind, &outcome) {
            (TransactionRequestKind::Purge, Ok(_)) => {
                let successful = tx.is_committed();
                self.transactions.remove(&tx_id);
                self.close(tx_id, Closure::Purged { successful }, sequence);
            }
            (TransactionRequestKind::SkipTransactions { others }, Ok(_)) => {
                self.transactions.remove(&tx_id);
                self.close(tx_id, Closure::Skipped, sequence);
                for other in others {
                    self.forget(*other);
                }
            }
            _ => {}
        }
        outcome
    }

    fn open_transaction(
        &mut self,
        request: &TransactionRequest,
        tree: &dyn DataTree,
    ) -> Result<(), RequestException> {
        let kind = &request.kind;
        let releases = matches!(
            kind,
            TransactionRequestKind::Purge | TransactionRequestKind::SkipTransactions { .. }
        );

        if self.destroyed && !releases {
            return Err(RequestException::unsupported(format!(
                "history {} is destroyed",
                self.id
            )));
        }
        if request.sequence() != 0 {
            return Err(RequestException::out_of_order(0));
        }
        if !self.id.is_standalone() && !releases {
            if let Some((open, _)) = self.transactions.iter().find(|(_, tx)| tx.is_open()) {
                return Err(RequestException::unsupported(format!(
                    "transaction {open} of history {} is still open",
                    self.id
                )));
            }
        }

        let target = request.target().clone();
        debug!("opening transaction {}", target);
        self.transactions.insert(
            target.transaction_id(),
            FrontendTransaction::new(target, kind, tree),
        );
        Ok(())
    }

    fn closed_outcome(
        &self,
        record: ClosedRecord,
        sequence: u64,
        kind: &TransactionRequestKind,
    ) -> Outcome<TransactionSuccess> {
        match (record.closure, kind) {
            (Closure::Purged { .. }, TransactionRequestKind::Purge)
                if sequence == record.sequence =>
            {
                Ok(TransactionSuccess::Purge)
            }
            (Closure::Skipped, TransactionRequestKind::SkipTransactions { .. })
                if sequence == record.sequence =>
            {
                Ok(TransactionSuccess::SkipTransactions)
            }
            (Closure::Purged { successful }, _) => {
                Err(RequestException::ClosedTransaction { successful })
            }
            (Closure::Skipped, _) => Err(RequestException::DeadTransaction {
                purged: self.purged.clone(),
            }),
        }
    }

    fn close(&mut self, tx_id: u64, closure: Closure, sequence: u64) {
        debug!("transaction {} of {} closed: {:?}", tx_id, self.id, closure);
        self.closed.put(tx_id, ClosedRecord { closure, sequence });
        self.purged.insert(tx_id);
    }

    /// Drop a transaction without a closing request of its own.
    fn forget(&mut self, tx_id: u64) {
        if let Some(mut tx) = self.transactions.remove(&tx_id) {
            tx.abort_if_live();
        }
        self.purged.insert(tx_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_tree::MemoryDataTree;
    use bytes::Bytes;
    use proven_access_api::{
        AbiVersion, Address, ClientIdentifier, DataPath, FrontendIdentifier, FrontendType,
        MemberName, MessageHeader, PersistenceProtocol, Request, TransactionIdentifier,
        TransactionModification,
    };

    fn history(history_id: u64) -> LocalHistory {
        let client = ClientIdentifier::new(
            FrontendIdentifier::new(MemberName::new("m"), FrontendType::new("t")),
            0,
        );
        LocalHistory::new(LocalHistoryIdentifier::new(client, history_id), 16)
    }

    fn request(
        h: &LocalHistory,
        tx: u64,
        sequence: u64,
        kind: TransactionRequestKind,
    ) -> TransactionRequest {
        Request::new(
            MessageHeader::new(
                TransactionIdentifier::new(h.id().clone(), tx),
                sequence,
                AbiVersion::V3,
            ),
            Address::new("frontend"),
            kind,
        )
    }

    fn write(protocol: Option<PersistenceProtocol>) -> TransactionRequestKind {
        TransactionRequestKind::Modify {
            modifications: vec![TransactionModification::Write {
                path: "/a".parse::<DataPath>().unwrap(),
                data: Bytes::from_static(b"x"),
            }],
            protocol,
        }
    }

    #[test]
    fn test_purge_then_late_request_is_closed() {
        let tree = MemoryDataTree::new();
        let mut h = history(1);

        let commit = request(&h, 1, 0, write(Some(PersistenceProtocol::Simple)));
        assert_eq!(
            h.handle_transaction(&commit, &tree),
            Ok(TransactionSuccess::Modify)
        );
        let purge = request(&h, 1, 1, TransactionRequestKind::Purge);
        assert_eq!(
            h.handle_transaction(&purge, &tree),
            Ok(TransactionSuccess::Purge)
        );
        assert_eq!(h.live_transactions(), 0);

        // A duplicate purge is acknowledged again.
        assert_eq!(
            h.handle_transaction(&purge, &tree),
            Ok(TransactionSuccess::Purge)
        );
        let late = request(&h, 1, 2, TransactionRequestKind::Abort);
        assert_eq!(
            h.handle_transaction(&late, &tree),
            Err(RequestException::ClosedTransaction { successful: true })
        );
    }

    #[test]
    fn test_forgotten_closure_reports_dead() {
        let tree = MemoryDataTree::new();
        let mut h = LocalHistory::new(history(1).id().clone(), 1);

        for tx in [1, 2] {
            let purge = request(&h, tx, 0, TransactionRequestKind::Purge);
            h.handle_transaction(&purge, &tree).unwrap();
        }

        let late = request(&h, 1, 1, TransactionRequestKind::Abort);
        match h.handle_transaction(&late, &tree) {
            Err(RequestException::DeadTransaction { purged }) => assert!(purged.contains(1)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_chained_history_serializes_transactions() {
        let tree = MemoryDataTree::new();
        let mut h = history(1);

        h.handle_transaction(&request(&h, 1, 0, write(None)), &tree)
            .unwrap();
        assert!(matches!(
            h.handle_transaction(&request(&h, 2, 0, write(None)), &tree),
            Err(RequestException::UnsupportedRequest { .. })
        ));

        h.handle_transaction(
            &request(&h, 1, 1, write(Some(PersistenceProtocol::Ready))),
            &tree,
        )
        .unwrap();
        assert_eq!(
            h.handle_transaction(&request(&h, 2, 0, write(None)), &tree),
            Ok(TransactionSuccess::Modify)
        );
    }

    #[test]
    fn test_standalone_history_allows_concurrent_transactions() {
        let tree = MemoryDataTree::new();
        let mut h = history(0);

        h.handle_transaction(&request(&h, 1, 0, write(None)), &tree)
            .unwrap();
        h.handle_transaction(&request(&h, 2, 0, write(None)), &tree)
            .unwrap();
        assert_eq!(h.live_transactions(), 2);
    }

    #[test]
    fn test_new_transaction_must_start_at_zero() {
        let tree = MemoryDataTree::new();
        let mut h = history(0);
        assert_eq!(
            h.handle_transaction(&request(&h, 1, 3, write(None)), &tree),
            Err(RequestException::out_of_order(0))
        );
        assert_eq!(h.live_transactions(), 0);
    }

    #[test]
    fn test_skip_transactions() {
        let tree = MemoryDataTree::new();
        let mut h = history(0);
        h.handle_transaction(&request(&h, 2, 0, write(None)), &tree)
            .unwrap();

        let skip = request(
            &h,
            1,
            0,
            TransactionRequestKind::SkipTransactions { others: vec![2, 3] },
        );
        assert_eq!(
            h.handle_transaction(&skip, &tree),
            Ok(TransactionSuccess::SkipTransactions)
        );
        assert_eq!(h.live_transactions(), 0);
        assert_eq!(h.purged().to_string(), "[1..=3]");

        assert!(matches!(
            h.handle_transaction(&request(&h, 2, 1, write(None)), &tree),
            Err(RequestException::DeadTransaction { .. })
        ));
    }

    #[test]
    fn test_history_lifecycle() {
        let tree = MemoryDataTree::new();
        let mut h = history(4);

        assert_eq!(
            h.handle_history(0, &LocalHistoryRequestKind::Create),
            Ok(LocalHistorySuccess::Created)
        );
        assert!(matches!(
            h.handle_history(1, &LocalHistoryRequestKind::Purge),
            Err(RequestException::UnsupportedRequest { .. })
        ));
        assert_eq!(
            h.handle_history(2, &LocalHistoryRequestKind::Destroy),
            Ok(LocalHistorySuccess::Destroyed)
        );
        assert!(matches!(
            h.handle_transaction(&request(&h, 1, 0, write(None)), &tree),
            Err(RequestException::UnsupportedRequest { .. })
        ));
        assert_eq!(
            h.handle_history(3, &LocalHistoryRequestKind::Purge),
            Ok(LocalHistorySuccess::Acknowledged)
        );
        assert_eq!(
            h.handle_history(0, &LocalHistoryRequestKind::Create),
            Ok(LocalHistorySuccess::Created)
        );
    }
}
