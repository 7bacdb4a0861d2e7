//! Responses sent from a backend to a frontend.

use std::num::NonZeroU32;

use bytes::Bytes;

use crate::address::Address;
use crate::exception::RequestException;
use crate::identifiers::{
    ClientIdentifier, LocalHistoryIdentifier, TargetIdentifier, TransactionIdentifier,
};
use crate::request::MessageHeader;
use crate::version::AbiVersion;

/// A response: the request's header echoed back plus an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<T, S> {
    /// Target and sequence of the request being answered.
    pub header: MessageHeader<T>,
    /// Success payload or failure.
    pub outcome: Result<S, RequestException>,
}

impl<T, S> Response<T, S> {
    /// Create a response.
    pub const fn new(header: MessageHeader<T>, outcome: Result<S, RequestException>) -> Self {
        Self { header, outcome }
    }

    /// The failure, if this is a failure response.
    pub const fn exception(&self) -> Option<&RequestException> {
        match &self.outcome {
            Ok(_) => None,
            Err(e) => Some(e),
        }
    }
}

/// Successful outcomes of client-level requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientSuccess {
    /// Session established.
    Connect {
        /// The backend that accepted the connection.
        backend: Address,
        /// The negotiated version; all further traffic uses it.
        version: AbiVersion,
        /// How many requests may be outstanding at once.
        max_messages: NonZeroU32,
        /// Other backends of the shard, for failover.
        alternates: Vec<Address>,
    },
}

/// Successful outcomes of history-level requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalHistorySuccess {
    /// History created.
    Created,
    /// History destroyed; no new transactions accepted.
    Destroyed,
    /// Purge or skip acknowledged.
    Acknowledged,
}

/// Successful outcomes of transaction-level requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionSuccess {
    /// Modifications applied.
    Modify,
    /// Read result.
    Read {
        /// The payload, or `None` if the node does not exist.
        data: Option<Bytes>,
    },
    /// Existence check result.
    Exists {
        /// Whether the node exists.
        exists: bool,
    },
    /// Sequences skipped.
    IncrementSequence,
    /// Transaction aborted.
    Abort,
    /// Can-commit vote granted.
    CanCommit,
    /// Pre-commit done.
    PreCommit,
    /// Transaction committed.
    Commit,
    /// Transaction state released.
    Purge,
    /// Transactions skipped.
    SkipTransactions,
    /// Snapshot opened.
    CreateSnapshot,
}

impl TransactionSuccess {
    /// Response class name, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Modify => "ModifyTransactionSuccess",
            Self::Read { .. } => "ReadTransactionSuccess",
            Self::Exists { .. } => "ExistsTransactionSuccess",
            Self::IncrementSequence => "IncrementTransactionSequenceSuccess",
            Self::Abort => "TransactionAbortSuccess",
            Self::CanCommit => "TransactionCanCommitSuccess",
            Self::PreCommit => "TransactionPreCommitSuccess",
            Self::Commit => "TransactionCommitSuccess",
            Self::Purge => "TransactionPurgeResponse",
            Self::SkipTransactions => "SkipTransactionsResponse",
            Self::CreateSnapshot => "CreateSnapshotSuccess",
        }
    }
}

/// Response to a client-level request.
pub type ClientResponse = Response<ClientIdentifier, ClientSuccess>;

/// Response to a history-level request.
pub type LocalHistoryResponse = Response<LocalHistoryIdentifier, LocalHistorySuccess>;

/// Response to a transaction-level request.
pub type TransactionResponse = Response<TransactionIdentifier, TransactionSuccess>;

/// Any response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseMessage {
    /// Client-level response.
    Client(ClientResponse),
    /// History-level response.
    History(LocalHistoryResponse),
    /// Transaction-level response.
    Transaction(TransactionResponse),
}

impl ResponseMessage {
    /// The target, as a uniform key.
    #[must_use]
    pub fn target(&self) -> TargetIdentifier {
        match self {
            Self::Client(r) => TargetIdentifier::Client(r.header.target.clone()),
            Self::History(r) => TargetIdentifier::History(r.header.target.clone()),
            Self::Transaction(r) => TargetIdentifier::Transaction(r.header.target.clone()),
        }
    }

    /// The sequence of the request being answered.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        match self {
            Self::Client(r) => r.header.sequence,
            Self::History(r) => r.header.sequence,
            Self::Transaction(r) => r.header.sequence,
        }
    }

    /// The version the message is encoded with.
    #[must_use]
    pub const fn version(&self) -> AbiVersion {
        match self {
            Self::Client(r) => r.header.version,
            Self::History(r) => r.header.version,
            Self::Transaction(r) => r.header.version,
        }
    }

    /// The failure, if this is a failure response.
    #[must_use]
    pub const fn exception(&self) -> Option<&RequestException> {
        match self {
            Self::Client(r) => r.exception(),
            Self::History(r) => r.exception(),
            Self::Transaction(r) => r.exception(),
        }
    }

    /// The same response re-labelled for a different version.
    #[must_use]
    pub fn to_version(mut self, version: AbiVersion) -> Self {
        match &mut self {
            Self::Client(r) => r.header.version = version,
            Self::History(r) => r.header.version = version,
            Self::Transaction(r) => r.header.version = version,
        }
        self
    }
}

impl From<ClientResponse> for ResponseMessage {
    fn from(value: ClientResponse) -> Self {
        Self::Client(value)
    }
}

impl From<LocalHistoryResponse> for ResponseMessage {
    fn from(value: LocalHistoryResponse) -> Self {
        Self::History(value)
    }
}

impl From<TransactionResponse> for ResponseMessage {
    fn from(value: TransactionResponse) -> Self {
        Self::Transaction(value)
    }
}
