//! Requests that only exist inside the frontend's node.
//!
//! A transaction whose modifications were recorded locally is finished with
//! one of these. They have no wire encoding: before crossing a node boundary
//! they must be rewritten into ordinary transaction requests.

use crate::address::Address;
use crate::identifiers::TransactionIdentifier;
use crate::modification::TransactionModification;

/// A locally recorded transaction being committed or aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalTransactionRequest {
    /// Commit the recorded modifications.
    Commit {
        /// The transaction.
        target: TransactionIdentifier,
        /// Sequence the rewritten request will carry.
        sequence: u64,
        /// Where the response should go.
        reply_to: Address,
        /// Modifications in the order they were recorded.
        modifications: Vec<TransactionModification>,
        /// Whether commit is coordinated across several backends.
        coordinated: bool,
    },
    /// Abort the transaction.
    Abort {
        /// The transaction.
        target: TransactionIdentifier,
        /// Sequence the rewritten request will carry.
        sequence: u64,
        /// Where the response should go.
        reply_to: Address,
    },
}

impl LocalTransactionRequest {
    /// The transaction.
    #[must_use]
    pub const fn target(&self) -> &TransactionIdentifier {
        match self {
            Self::Commit { target, .. } | Self::Abort { target, .. } => target,
        }
    }
}
