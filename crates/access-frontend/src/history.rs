//! Frontend side of a local history.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use proven_access_api::{
    LocalHistoryIdentifier, LocalHistoryRequestKind, LocalHistorySuccess, MessageHeader, Request,
    TransactionIdentifier, TransactionRequestKind,
};
use proven_access_transport::Transport;
use tokio::sync::Mutex;
use tracing::debug;

use crate::connection::ClientConnection;
use crate::error::{Error, Result};
use crate::local::LocalTransaction;
use crate::transaction::ClientTransaction;

/// A local history: the scope transactions are allocated in.
///
/// Transactions of a chained history run one after another; the backend
/// rejects a new one while the previous one still accepts modifications.
/// Transactions of the standalone history are independent.
pub struct ClientHistory<T: Transport> {
    connection: ClientConnection<T>,
    id: LocalHistoryIdentifier,
    /// Held for the whole exchange so history requests never overtake
    /// each other.
    next_sequence: Mutex<u64>,
    next_transaction_id: Arc<AtomicU64>,
}

impl<T: Transport> ClientHistory<T> {
    pub(crate) fn standalone(connection: ClientConnection<T>) -> Self {
        let id = LocalHistoryIdentifier::standalone(connection.client().clone());
        let transaction_ids = connection.standalone_transaction_ids();
        Self::with_id(connection, id, transaction_ids)
    }

    pub(crate) async fn create(
        connection: ClientConnection<T>,
        id: LocalHistoryIdentifier,
    ) -> Result<Self> {
        let history = Self::with_id(connection, id, Arc::new(AtomicU64::new(0)));
        match history.send(LocalHistoryRequestKind::Create).await? {
            LocalHistorySuccess::Created => {
                debug!("history {} created", history.id);
                Ok(history)
            }
            other => Err(Error::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    fn with_id(
        connection: ClientConnection<T>,
        id: LocalHistoryIdentifier,
        next_transaction_id: Arc<AtomicU64>,
    ) -> Self {
        Self {
            connection,
            id,
            next_sequence: Mutex::new(0),
            next_transaction_id,
        }
    }

    /// The history's identifier.
    #[must_use]
    pub const fn id(&self) -> &LocalHistoryIdentifier {
        &self.id
    }

    /// Start a read-write transaction. Nothing is sent until it is used.
    #[must_use]
    pub fn new_transaction(&self) -> ClientTransaction<T> {
        ClientTransaction::new(self.connection.clone(), self.allocate())
    }

    /// Open a read-only snapshot transaction.
    ///
    /// # Errors
    ///
    /// Fails if the backend refuses the snapshot.
    pub async fn new_snapshot(&self) -> Result<ClientTransaction<T>> {
        let mut tx = self.new_transaction();
        tx.send(TransactionRequestKind::CreateSnapshot).await?;
        Ok(tx)
    }

    /// Start a transaction whose modifications are recorded locally and sent
    /// in one request when it finishes.
    #[must_use]
    pub fn new_local_transaction(&self) -> LocalTransaction<T> {
        LocalTransaction::new(self.connection.clone(), self.allocate())
    }

    /// Tell the backend the given transaction ids will never be used.
    ///
    /// # Errors
    ///
    /// Fails if the backend does not acknowledge.
    pub async fn skip_transactions(&self, transaction_ids: Vec<u64>) -> Result<()> {
        self.send(LocalHistoryRequestKind::SkipTransactions { transaction_ids })
            .await
            .map(drop)
    }

    /// Stop the history from accepting new transactions.
    ///
    /// # Errors
    ///
    /// Fails if the backend refuses, for example for the standalone history.
    pub async fn destroy(&self) -> Result<()> {
        self.send(LocalHistoryRequestKind::Destroy).await.map(drop)
    }

    /// Release all backend state of a destroyed history.
    ///
    /// # Errors
    ///
    /// Fails if the history was not destroyed first.
    pub async fn purge(self) -> Result<()> {
        self.send(LocalHistoryRequestKind::Purge).await.map(drop)
    }

    fn allocate(&self) -> TransactionIdentifier {
        let transaction_id = self.next_transaction_id.fetch_add(1, Ordering::Relaxed);
        TransactionIdentifier::new(self.id.clone(), transaction_id)
    }

    async fn send(&self, kind: LocalHistoryRequestKind) -> Result<LocalHistorySuccess> {
        let mut next_sequence = self.next_sequence.lock().await;
        let request = Request::new(
            MessageHeader::new(self.id.clone(), *next_sequence, self.connection.version()),
            self.connection.local_address().clone(),
            kind,
        );
        *next_sequence += 1;
        self.connection.history_request(request).await
    }
}
