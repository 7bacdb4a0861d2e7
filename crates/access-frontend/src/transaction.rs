//! Frontend side of a transaction.

use bytes::Bytes;
use proven_access_api::{
    DataPath, MessageHeader, ModifyTransactionRequestBuilder, PersistenceProtocol, Request,
    TransactionIdentifier, TransactionModification, TransactionRequestKind, TransactionSuccess,
};
use proven_access_transport::Transport;
use tracing::debug;

use crate::connection::ClientConnection;
use crate::error::{Error, Result};

/// A transaction driven from the frontend.
///
/// Modifications are buffered and shipped with the next request that needs
/// them: a read, an explicit [`flush`](Self::flush) or the request that
/// finishes the transaction.
pub struct ClientTransaction<T: Transport> {
    connection: ClientConnection<T>,
    id: TransactionIdentifier,
    next_sequence: u64,
    buffered: Vec<TransactionModification>,
}

impl<T: Transport> ClientTransaction<T> {
    pub(crate) fn new(connection: ClientConnection<T>, id: TransactionIdentifier) -> Self {
        Self {
            connection,
            id,
            next_sequence: 0,
            buffered: Vec::new(),
        }
    }

    /// The transaction's identifier.
    #[must_use]
    pub const fn id(&self) -> &TransactionIdentifier {
        &self.id
    }

    /// Replace the subtree at `path` with `data`.
    pub fn write(&mut self, path: DataPath, data: impl Into<Bytes>) {
        self.buffered.push(TransactionModification::Write {
            path,
            data: data.into(),
        });
    }

    /// Merge `data` into the node at `path`.
    pub fn merge(&mut self, path: DataPath, data: impl Into<Bytes>) {
        self.buffered.push(TransactionModification::Merge {
            path,
            data: data.into(),
        });
    }

    /// Remove the subtree at `path`.
    pub fn delete(&mut self, path: DataPath) {
        self.buffered.push(TransactionModification::Delete { path });
    }

    /// Send buffered modifications without finishing the transaction.
    ///
    /// # Errors
    ///
    /// Fails if the backend rejects the modifications.
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffered.is_empty() {
            return Ok(());
        }
        self.modify(None).await.map(drop)
    }

    /// Read the payload at `path`, including this transaction's own writes.
    ///
    /// # Errors
    ///
    /// Fails if the transaction can no longer be read.
    pub async fn read(&mut self, path: DataPath) -> Result<Option<Bytes>> {
        self.flush().await?;
        match self
            .send(TransactionRequestKind::Read {
                path,
                snapshot_only: false,
            })
            .await?
        {
            TransactionSuccess::Read { data } => Ok(data),
            other => Err(unexpected(&other)),
        }
    }

    /// Whether `path` exists, including this transaction's own writes.
    ///
    /// # Errors
    ///
    /// Fails if the transaction can no longer be read.
    pub async fn exists(&mut self, path: DataPath) -> Result<bool> {
        self.flush().await?;
        match self
            .send(TransactionRequestKind::Exists {
                path,
                snapshot_only: false,
            })
            .await?
        {
            TransactionSuccess::Exists { exists } => Ok(exists),
            other => Err(unexpected(&other)),
        }
    }

    /// Commit in a single step.
    ///
    /// # Errors
    ///
    /// Fails if the commit does not go through; the transaction is then
    /// aborted on the backend.
    pub async fn commit(&mut self) -> Result<()> {
        self.modify(Some(PersistenceProtocol::Simple)).await.map(drop)
    }

    /// Seal the transaction and leave the choice of commit protocol for later.
    ///
    /// # Errors
    ///
    /// Fails if the backend rejects the modifications.
    pub async fn ready(&mut self) -> Result<()> {
        self.modify(Some(PersistenceProtocol::Ready)).await.map(drop)
    }

    /// Seal the transaction for a three-phase commit.
    ///
    /// # Errors
    ///
    /// Fails if the backend rejects the modifications.
    pub async fn prepare(&mut self) -> Result<()> {
        self.modify(Some(PersistenceProtocol::ThreePhase)).await.map(drop)
    }

    /// First commit phase.
    ///
    /// # Errors
    ///
    /// Fails if the backend votes no or the phase is out of turn.
    pub async fn can_commit(&mut self) -> Result<()> {
        self.expect(TransactionRequestKind::CanCommit, &TransactionSuccess::CanCommit)
            .await
    }

    /// Second commit phase.
    ///
    /// # Errors
    ///
    /// As [`ClientTransaction::can_commit`].
    pub async fn pre_commit(&mut self) -> Result<()> {
        self.expect(TransactionRequestKind::PreCommit, &TransactionSuccess::PreCommit)
            .await
    }

    /// Final commit phase.
    ///
    /// # Errors
    ///
    /// As [`ClientTransaction::can_commit`].
    pub async fn do_commit(&mut self) -> Result<()> {
        self.expect(TransactionRequestKind::DoCommit, &TransactionSuccess::Commit)
            .await
    }

    /// Abort, discarding anything still buffered.
    ///
    /// # Errors
    ///
    /// Fails if the transaction already committed.
    pub async fn abort(&mut self) -> Result<()> {
        self.buffered.clear();
        self.expect(TransactionRequestKind::Abort, &TransactionSuccess::Abort)
            .await
    }

    /// Release the transaction's backend state once it is finished.
    ///
    /// # Errors
    ///
    /// Fails if the backend does not acknowledge.
    pub async fn purge(mut self) -> Result<()> {
        self.expect(TransactionRequestKind::Purge, &TransactionSuccess::Purge)
            .await
    }

    async fn modify(&mut self, protocol: Option<PersistenceProtocol>) -> Result<TransactionSuccess> {
        let sequence = self.take_sequence();
        let mut builder =
            ModifyTransactionRequestBuilder::new(self.id.clone(), self.connection.local_address().clone())
                .sequence(sequence)
                .version(self.connection.version())
                .modifications(std::mem::take(&mut self.buffered));
        if let Some(protocol) = protocol {
            builder = builder.protocol(protocol);
        }

        debug!(
            "{} modify seq {} with {} modifications, protocol {:?}",
            self.id,
            sequence,
            builder.len(),
            protocol
        );
        self.connection.transaction_request(builder.build()?).await
    }

    async fn expect(
        &mut self,
        kind: TransactionRequestKind,
        expected: &TransactionSuccess,
    ) -> Result<()> {
        let success = self.send(kind).await?;
        if &success == expected {
            Ok(())
        } else {
            Err(unexpected(&success))
        }
    }

    pub(crate) async fn send(&mut self, kind: TransactionRequestKind) -> Result<TransactionSuccess> {
        let sequence = self.take_sequence();
        let request = Request::new(
            MessageHeader::new(self.id.clone(), sequence, self.connection.version()),
            self.connection.local_address().clone(),
            kind,
        );
        self.connection.transaction_request(request).await
    }

    const fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}

fn unexpected(success: &TransactionSuccess) -> Error {
    Error::UnexpectedResponse(success.name().to_string())
}
