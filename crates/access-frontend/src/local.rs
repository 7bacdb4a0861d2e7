//! Transactions recorded on the frontend and shipped in one piece.

use bytes::Bytes;
use proven_access_api::{
    AbiVersion, DataPath, LocalTransactionRequest, MessageHeader, PersistenceProtocol, Request,
    TransactionIdentifier, TransactionModification, TransactionRequest, TransactionRequestKind,
};
use proven_access_transport::Transport;

use crate::connection::ClientConnection;
use crate::error::Result;

/// A write-only transaction kept on the frontend until it is finished.
///
/// The backend hears about it once, from the request that commits or aborts
/// it.
pub struct LocalTransaction<T: Transport> {
    connection: ClientConnection<T>,
    id: TransactionIdentifier,
    modifications: Vec<TransactionModification>,
}

impl<T: Transport> LocalTransaction<T> {
    pub(crate) fn new(connection: ClientConnection<T>, id: TransactionIdentifier) -> Self {
        Self {
            connection,
            id,
            modifications: Vec::new(),
        }
    }

    /// The transaction's identifier.
    #[must_use]
    pub const fn id(&self) -> &TransactionIdentifier {
        &self.id
    }

    /// Record a write.
    pub fn write(&mut self, path: DataPath, data: impl Into<Bytes>) {
        self.modifications.push(TransactionModification::Write {
            path,
            data: data.into(),
        });
    }

    /// Record a merge.
    pub fn merge(&mut self, path: DataPath, data: impl Into<Bytes>) {
        self.modifications.push(TransactionModification::Merge {
            path,
            data: data.into(),
        });
    }

    /// Record a delete.
    pub fn delete(&mut self, path: DataPath) {
        self.modifications.push(TransactionModification::Delete { path });
    }

    /// The request that commits the recorded modifications.
    ///
    /// A coordinated commit leaves the transaction waiting for the three
    /// commit phases.
    #[must_use]
    pub fn into_commit_request(self, coordinated: bool) -> LocalTransactionRequest {
        LocalTransactionRequest::Commit {
            reply_to: self.connection.local_address().clone(),
            target: self.id,
            sequence: 0,
            modifications: self.modifications,
            coordinated,
        }
    }

    /// Commit in a single step.
    ///
    /// # Errors
    ///
    /// Fails if the backend rejects the commit.
    pub async fn commit(self) -> Result<()> {
        let connection = self.connection.clone();
        connection
            .submit_local(self.into_commit_request(false))
            .await
            .map(drop)
    }

    /// Drop the recorded modifications and tell the backend.
    ///
    /// # Errors
    ///
    /// Fails if the backend does not acknowledge.
    pub async fn abort(self) -> Result<()> {
        let request = LocalTransactionRequest::Abort {
            reply_to: self.connection.local_address().clone(),
            target: self.id,
            sequence: 0,
        };
        self.connection.submit_local(request).await.map(drop)
    }
}

/// Rewrite a local request into the transaction request the backend
/// understands.
#[must_use]
pub fn translate(request: LocalTransactionRequest, version: AbiVersion) -> TransactionRequest {
    match request {
        LocalTransactionRequest::Commit {
            target,
            sequence,
            reply_to,
            modifications,
            coordinated,
        } => {
            let protocol = if coordinated {
                PersistenceProtocol::ThreePhase
            } else {
                PersistenceProtocol::Simple
            };
            Request::new(
                MessageHeader::new(target, sequence, version),
                reply_to,
                TransactionRequestKind::Modify {
                    modifications,
                    protocol: Some(protocol),
                },
            )
        }
        LocalTransactionRequest::Abort {
            target,
            sequence,
            reply_to,
        } => Request::new(
            MessageHeader::new(target, sequence, version),
            reply_to,
            TransactionRequestKind::Abort,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proven_access_api::{
        Address, ClientIdentifier, FrontendIdentifier, FrontendType, LocalHistoryIdentifier,
        MemberName,
    };

    fn target() -> TransactionIdentifier {
        let client = ClientIdentifier::new(
            FrontendIdentifier::new(MemberName::new("m"), FrontendType::new("t")),
            0,
        );
        TransactionIdentifier::new(LocalHistoryIdentifier::standalone(client), 4)
    }

    #[test]
    fn test_coordinated_commit_becomes_three_phase() {
        let modifications = vec![TransactionModification::Delete {
            path: "/a".parse().unwrap(),
        }];
        let request = translate(
            LocalTransactionRequest::Commit {
                target: target(),
                sequence: 0,
                reply_to: Address::new("f"),
                modifications: modifications.clone(),
                coordinated: true,
            },
            AbiVersion::V2,
        );

        assert_eq!(request.header.version, AbiVersion::V2);
        assert_eq!(
            request.kind,
            TransactionRequestKind::Modify {
                modifications,
                protocol: Some(PersistenceProtocol::ThreePhase),
            }
        );
    }

    #[test]
    fn test_uncoordinated_commit_is_simple() {
        let request = translate(
            LocalTransactionRequest::Commit {
                target: target(),
                sequence: 0,
                reply_to: Address::new("f"),
                modifications: Vec::new(),
                coordinated: false,
            },
            AbiVersion::V1,
        );
        assert!(matches!(
            request.kind,
            TransactionRequestKind::Modify {
                protocol: Some(PersistenceProtocol::Simple),
                ..
            }
        ));
    }

    #[test]
    fn test_abort_translation() {
        let request = translate(
            LocalTransactionRequest::Abort {
                target: target(),
                sequence: 0,
                reply_to: Address::new("f"),
            },
            AbiVersion::V3,
        );
        assert_eq!(request.kind, TransactionRequestKind::Abort);
        assert_eq!(request.target(), &target());
    }
}
