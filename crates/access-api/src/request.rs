//! Requests sent from a frontend to a backend.

use crate::address::Address;
use crate::identifiers::{
    ClientIdentifier, LocalHistoryIdentifier, TargetIdentifier, TransactionIdentifier,
};
use crate::modification::{PersistenceProtocol, TransactionModification};
use crate::path::DataPath;
use crate::version::{AbiVersion, VersionRange};

/// Fields shared by every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader<T> {
    /// The entity the message is about.
    pub target: T,
    /// Per-target sequence number.
    pub sequence: u64,
    /// Version the message is encoded with.
    pub version: AbiVersion,
}

impl<T> MessageHeader<T> {
    /// Create a header.
    pub const fn new(target: T, sequence: u64, version: AbiVersion) -> Self {
        Self {
            target,
            sequence,
            version,
        }
    }
}

/// A request: header, reply destination and kind-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<T, K> {
    /// Target, sequence and version.
    pub header: MessageHeader<T>,
    /// Where the response should go.
    pub reply_to: Address,
    /// What is being asked.
    pub kind: K,
}

impl<T, K> Request<T, K> {
    /// Create a request.
    pub const fn new(header: MessageHeader<T>, reply_to: Address, kind: K) -> Self {
        Self {
            header,
            reply_to,
            kind,
        }
    }

    /// The target.
    pub const fn target(&self) -> &T {
        &self.header.target
    }

    /// The sequence.
    pub const fn sequence(&self) -> u64 {
        self.header.sequence
    }
}

/// Requests addressed to a client generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequestKind {
    /// Open a session and negotiate the ABI version.
    Connect {
        /// Versions the frontend can speak.
        versions: VersionRange,
    },
}

/// Requests addressed to a local history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalHistoryRequestKind {
    /// Create the history.
    Create,
    /// Stop accepting new transactions.
    Destroy,
    /// Forget the history entirely. Only valid after destroy.
    Purge,
    /// Declare transaction ids that will never be used.
    SkipTransactions {
        /// The skipped ids.
        transaction_ids: Vec<u64>,
    },
}

/// Requests addressed to a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionRequestKind {
    /// Apply modifications and optionally seal with a protocol.
    Modify {
        /// Ordered modifications.
        modifications: Vec<TransactionModification>,
        /// How to end the transaction, if at all.
        protocol: Option<PersistenceProtocol>,
    },
    /// Read the node at a path.
    Read {
        /// The path to read.
        path: DataPath,
        /// Open the transaction as a read-only snapshot.
        snapshot_only: bool,
    },
    /// Check whether a node exists.
    Exists {
        /// The path to check.
        path: DataPath,
        /// Open the transaction as a read-only snapshot.
        snapshot_only: bool,
    },
    /// Skip request sequence numbers the frontend gave up on.
    IncrementSequence {
        /// How many sequences to skip after this one.
        increment: u64,
        /// Open the transaction as a read-only snapshot.
        snapshot_only: bool,
    },
    /// Abort the transaction.
    Abort,
    /// First phase of three-phase commit.
    CanCommit,
    /// Second phase of three-phase commit.
    PreCommit,
    /// Final phase of three-phase commit.
    DoCommit,
    /// Release backend state for a finished transaction.
    Purge,
    /// Declare the target and the listed transaction ids as never used.
    SkipTransactions {
        /// Other ids to skip alongside the target.
        others: Vec<u64>,
    },
    /// Open a read-only snapshot transaction.
    CreateSnapshot,
}

impl TransactionRequestKind {
    /// Request class name, used when a request closes a transaction.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Modify { .. } => "ModifyTransactionRequest",
            Self::Read { .. } => "ReadTransactionRequest",
            Self::Exists { .. } => "ExistsTransactionRequest",
            Self::IncrementSequence { .. } => "IncrementTransactionSequenceRequest",
            Self::Abort => "TransactionAbortRequest",
            Self::CanCommit => "TransactionCanCommitRequest",
            Self::PreCommit => "TransactionPreCommitRequest",
            Self::DoCommit => "TransactionDoCommitRequest",
            Self::Purge => "TransactionPurgeRequest",
            Self::SkipTransactions { .. } => "SkipTransactionsRequest",
            Self::CreateSnapshot => "CreateSnapshotRequest",
        }
    }

    /// Whether the request opens a read-only snapshot when it creates a transaction.
    #[must_use]
    pub const fn opens_snapshot(&self) -> bool {
        match self {
            Self::Read { snapshot_only, .. }
            | Self::Exists { snapshot_only, .. }
            | Self::IncrementSequence { snapshot_only, .. } => *snapshot_only,
            Self::CreateSnapshot => true,
            _ => false,
        }
    }
}

/// A request to a client generation.
pub type ClientRequest = Request<ClientIdentifier, ClientRequestKind>;

/// A request to a local history.
pub type LocalHistoryRequest = Request<LocalHistoryIdentifier, LocalHistoryRequestKind>;

/// A request to a transaction.
pub type TransactionRequest = Request<TransactionIdentifier, TransactionRequestKind>;

/// Any request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMessage {
    /// Client-level request.
    Client(ClientRequest),
    /// History-level request.
    History(LocalHistoryRequest),
    /// Transaction-level request.
    Transaction(TransactionRequest),
}

impl RequestMessage {
    /// The target, as a uniform key.
    #[must_use]
    pub fn target(&self) -> TargetIdentifier {
        match self {
            Self::Client(r) => TargetIdentifier::Client(r.header.target.clone()),
            Self::History(r) => TargetIdentifier::History(r.header.target.clone()),
            Self::Transaction(r) => TargetIdentifier::Transaction(r.header.target.clone()),
        }
    }

    /// The client generation that sent the request.
    #[must_use]
    pub const fn client(&self) -> &ClientIdentifier {
        match self {
            Self::Client(r) => &r.header.target,
            Self::History(r) => r.header.target.client(),
            Self::Transaction(r) => r.header.target.client(),
        }
    }

    /// The per-target sequence.
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

    /// Where the response should go.
    #[must_use]
    pub const fn reply_to(&self) -> &Address {
        match self {
            Self::Client(r) => &r.reply_to,
            Self::History(r) => &r.reply_to,
            Self::Transaction(r) => &r.reply_to,
        }
    }

    /// The same request re-labelled for a different version.
    #[must_use]
    pub fn to_version(mut self, version: AbiVersion) -> Self {
        match &mut self {
            Self::Client(r) => r.header.version = version,
            Self::History(r) => r.header.version = version,
            Self::Transaction(r) => r.header.version = version,
        }
        self
    }

    /// Human-readable request kind, for logging.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Client(_) => "ConnectClientRequest",
            Self::History(r) => match r.kind {
                LocalHistoryRequestKind::Create => "CreateLocalHistoryRequest",
                LocalHistoryRequestKind::Destroy => "DestroyLocalHistoryRequest",
                LocalHistoryRequestKind::Purge => "PurgeLocalHistoryRequest",
                LocalHistoryRequestKind::SkipTransactions { .. } => {
                    "SkipLocalHistoryTransactionsRequest"
                }
            },
            Self::Transaction(r) => r.kind.name(),
        }
    }
}

impl From<ClientRequest> for RequestMessage {
    fn from(value: ClientRequest) -> Self {
        Self::Client(value)
    }
}

impl From<LocalHistoryRequest> for RequestMessage {
    fn from(value: LocalHistoryRequest) -> Self {
        Self::History(value)
    }
}

impl From<TransactionRequest> for RequestMessage {
    fn from(value: TransactionRequest) -> Self {
        Self::Transaction(value)
    }
}
