//! Failures a backend reports back to a frontend.
//!
//! These travel inside failure responses and are part of the wire format.
//! Local problems (codec, transport, timeouts) are separate error types.

use std::fmt;

use thiserror::Error;

use crate::address::Address;
use crate::error::CodecError;
use crate::range_set::RangeSet;

/// A step of the three-phase commit protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitPhase {
    /// Validate the sealed transaction.
    CanCommit,
    /// Prepare to apply.
    PreCommit,
    /// Apply.
    DoCommit,
}

impl CommitPhase {
    /// The wire tag.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::CanCommit => 1,
            Self::PreCommit => 2,
            Self::DoCommit => 3,
        }
    }
}

impl TryFrom<u8> for CommitPhase {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::CanCommit),
            2 => Ok(Self::PreCommit),
            3 => Ok(Self::DoCommit),
            tag => Err(CodecError::UnknownTag {
                what: "commit phase",
                tag,
            }),
        }
    }
}

impl fmt::Display for CommitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CanCommit => "can-commit",
            Self::PreCommit => "pre-commit",
            Self::DoCommit => "do-commit",
        };
        f.write_str(name)
    }
}

/// Which ordering rule a request broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutOfOrder {
    /// The request sequence is ahead of what the target expects.
    Sequence {
        /// The next sequence the target will accept.
        expected: u64,
    },
    /// A commit phase arrived while the transaction was not ready for it.
    CommitPhase {
        /// The phase that was requested.
        requested: CommitPhase,
        /// The phase the transaction was waiting for, if any.
        expected: Option<CommitPhase>,
    },
}

impl fmt::Display for OutOfOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequence { expected } => write!(f, "expecting request sequence {expected}"),
            Self::CommitPhase {
                requested,
                expected: Some(expected),
            } => write!(f, "{requested} requested while expecting {expected}"),
            Self::CommitPhase {
                requested,
                expected: None,
            } => write!(f, "{requested} requested before the transaction was sealed"),
        }
    }
}

/// Failure carried by a failure response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestException {
    /// The request arrived ahead of the target's expected sequence, or a
    /// commit phase was requested out of turn.
    #[error("out of order request: {0}")]
    OutOfOrderRequest(OutOfOrder),

    /// The envelope does not match the backend's session state.
    #[error("out of sequence envelope, expecting {expected}")]
    OutOfSequenceEnvelope {
        /// Next envelope sequence the backend expects on the current session.
        expected: u64,
    },

    /// The backend is not the shard leader.
    #[error("backend is not the leader{}", .leader.as_ref().map(|l| format!(", try {l}")).unwrap_or_default())]
    NotLeader {
        /// Last known leader, if the backend knows one.
        leader: Option<Address>,
    },

    /// The request came from a generation older than one already connected.
    #[error("client generation retired by generation {existing}")]
    RetiredGeneration {
        /// The generation the backend has seen.
        existing: u64,
    },

    /// The transaction was already completed and purged.
    #[error("transaction is closed (successful: {successful})")]
    ClosedTransaction {
        /// Whether it had committed.
        successful: bool,
    },

    /// The transaction was purged and nothing more is known about it.
    #[error("transaction is dead, purged {purged}")]
    DeadTransaction {
        /// Purged transaction ids in the history; always contains the target.
        purged: RangeSet,
    },

    /// The local history was purged.
    #[error("history is dead, purged {purged}")]
    DeadHistory {
        /// Purged history ids of the client; always contains the target.
        purged: RangeSet,
    },

    /// The transaction was aborted.
    #[error("transaction {transaction_id} was aborted")]
    AbortedTransaction {
        /// The aborted transaction.
        transaction_id: u64,
    },

    /// The transaction was sealed by an earlier request and cannot take this one.
    #[error("transaction was closed by {closed_by} at sequence {sequence}")]
    PendingTransaction {
        /// Sequence of the closing request.
        sequence: u64,
        /// Kind of the closing request.
        closed_by: String,
    },

    /// The backend does not know the history yet.
    #[error("history {history_id} is not known to the backend")]
    UnknownHistory {
        /// The history id.
        history_id: u64,
    },

    /// The backend cannot handle this request.
    #[error("unsupported request: {description}")]
    UnsupportedRequest {
        /// What was wrong.
        description: String,
    },

    /// The backend failed while handling the request.
    #[error("request failed: {message}")]
    RuntimeRequest {
        /// What went wrong.
        message: String,
    },
}

impl RequestException {
    /// Whether resending the same request may succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::OutOfSequenceEnvelope { .. } | Self::UnknownHistory { .. }
        )
    }

    /// Whether the frontend should redirect to a different backend.
    #[must_use]
    pub const fn is_redirect(&self) -> bool {
        matches!(self, Self::NotLeader { .. })
    }

    /// Short name of the failure class, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OutOfOrderRequest(_) => "OutOfOrderRequest",
            Self::OutOfSequenceEnvelope { .. } => "OutOfSequenceEnvelope",
            Self::NotLeader { .. } => "NotLeader",
            Self::RetiredGeneration { .. } => "RetiredGeneration",
            Self::ClosedTransaction { .. } => "ClosedTransaction",
            Self::DeadTransaction { .. } => "DeadTransaction",
            Self::DeadHistory { .. } => "DeadHistory",
            Self::AbortedTransaction { .. } => "AbortedTransaction",
            Self::PendingTransaction { .. } => "PendingTransaction",
            Self::UnknownHistory { .. } => "UnknownHistory",
            Self::UnsupportedRequest { .. } => "UnsupportedRequest",
            Self::RuntimeRequest { .. } => "RuntimeRequest",
        }
    }

    /// Shorthand for an out-of-order sequence failure.
    #[must_use]
    pub const fn out_of_order(expected: u64) -> Self {
        Self::OutOfOrderRequest(OutOfOrder::Sequence { expected })
    }

    /// Shorthand for an unsupported request.
    pub fn unsupported(description: impl Into<String>) -> Self {
        Self::UnsupportedRequest {
            description: description.into(),
        }
    }

    /// Shorthand for a runtime failure.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::RuntimeRequest {
            message: message.into(),
        }
    }
}
