//! Identifiers for frontends, client generations, local histories and transactions.
//!
//! Every identifier is an immutable value with structural equality and a total
//! ordering, so it can key ordered maps on both sides of the protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of the cluster member hosting a frontend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberName(String);

impl MemberName {
    /// Create a member name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of frontend running on a member, e.g. `datastore-config`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrontendType(String);

impl FrontendType {
    /// Create a frontend type.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the type as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrontendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A frontend instance: the member it runs on plus its type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrontendIdentifier {
    member: MemberName,
    frontend_type: FrontendType,
}

impl FrontendIdentifier {
    /// Create a frontend identifier.
    #[must_use]
    pub const fn new(member: MemberName, frontend_type: FrontendType) -> Self {
        Self {
            member,
            frontend_type,
        }
    }

    /// The hosting member.
    #[must_use]
    pub const fn member(&self) -> &MemberName {
        &self.member
    }

    /// The frontend type.
    #[must_use]
    pub const fn frontend_type(&self) -> &FrontendType {
        &self.frontend_type
    }
}

impl fmt::Display for FrontendIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-frontend-{}", self.member, self.frontend_type)
    }
}

/// One incarnation of a frontend.
///
/// A frontend that restarts comes back with a higher generation. Backends
/// retire all state belonging to lower generations once a higher one connects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientIdentifier {
    frontend: FrontendIdentifier,
    generation: u64,
}

impl ClientIdentifier {
    /// Create a client identifier.
    #[must_use]
    pub const fn new(frontend: FrontendIdentifier, generation: u64) -> Self {
        Self {
            frontend,
            generation,
        }
    }

    /// The frontend this client belongs to.
    #[must_use]
    pub const fn frontend(&self) -> &FrontendIdentifier {
        &self.frontend
    }

    /// The generation number.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// The identifier of the next incarnation of the same frontend.
    #[must_use]
    pub fn next_generation(&self) -> Self {
        Self {
            frontend: self.frontend.clone(),
            generation: self.generation + 1,
        }
    }
}

impl fmt::Display for ClientIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-gen-{}", self.frontend, self.generation)
    }
}

/// A local history: an ordered chain of transactions owned by one client.
///
/// History id 0 is the standalone history, which always exists and imposes no
/// ordering between its transactions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalHistoryIdentifier {
    client: ClientIdentifier,
    history_id: u64,
}

impl LocalHistoryIdentifier {
    /// Id reserved for the standalone history.
    pub const STANDALONE_HISTORY_ID: u64 = 0;

    /// Create a history identifier.
    #[must_use]
    pub const fn new(client: ClientIdentifier, history_id: u64) -> Self {
        Self { client, history_id }
    }

    /// The standalone history of a client.
    #[must_use]
    pub const fn standalone(client: ClientIdentifier) -> Self {
        Self::new(client, Self::STANDALONE_HISTORY_ID)
    }

    /// The owning client.
    #[must_use]
    pub const fn client(&self) -> &ClientIdentifier {
        &self.client
    }

    /// The history id, unique within the client.
    #[must_use]
    pub const fn history_id(&self) -> u64 {
        self.history_id
    }

    /// Whether this is the standalone history.
    #[must_use]
    pub const fn is_standalone(&self) -> bool {
        self.history_id == Self::STANDALONE_HISTORY_ID
    }
}

impl fmt::Display for LocalHistoryIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-chn-{}", self.client, self.history_id)
    }
}

/// A transaction within a local history.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionIdentifier {
    history: LocalHistoryIdentifier,
    transaction_id: u64,
}

impl TransactionIdentifier {
    /// Create a transaction identifier.
    #[must_use]
    pub const fn new(history: LocalHistoryIdentifier, transaction_id: u64) -> Self {
        Self {
            history,
            transaction_id,
        }
    }

    /// The owning history.
    #[must_use]
    pub const fn history(&self) -> &LocalHistoryIdentifier {
        &self.history
    }

    /// The transaction id, unique within the history.
    #[must_use]
    pub const fn transaction_id(&self) -> u64 {
        self.transaction_id
    }

    /// The owning client.
    #[must_use]
    pub const fn client(&self) -> &ClientIdentifier {
        self.history.client()
    }
}

impl fmt::Display for TransactionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-txn-{}", self.history, self.transaction_id)
    }
}

/// The entity a request is addressed to.
///
/// Sequence numbers are allocated per target, so this is also the key under
/// which outstanding requests are tracked.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TargetIdentifier {
    /// A client generation.
    Client(ClientIdentifier),
    /// A local history.
    History(LocalHistoryIdentifier),
    /// A transaction.
    Transaction(TransactionIdentifier),
}

impl TargetIdentifier {
    /// The client generation the target belongs to.
    #[must_use]
    pub const fn client(&self) -> &ClientIdentifier {
        match self {
            Self::Client(client) => client,
            Self::History(history) => history.client(),
            Self::Transaction(transaction) => transaction.client(),
        }
    }
}

impl fmt::Display for TargetIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(client) => client.fmt(f),
            Self::History(history) => history.fmt(f),
            Self::Transaction(transaction) => transaction.fmt(f),
        }
    }
}

impl From<ClientIdentifier> for TargetIdentifier {
    fn from(value: ClientIdentifier) -> Self {
        Self::Client(value)
    }
}

impl From<LocalHistoryIdentifier> for TargetIdentifier {
    fn from(value: LocalHistoryIdentifier) -> Self {
        Self::History(value)
    }
}

impl From<TransactionIdentifier> for TargetIdentifier {
    fn from(value: TransactionIdentifier) -> Self {
        Self::Transaction(value)
    }
}
