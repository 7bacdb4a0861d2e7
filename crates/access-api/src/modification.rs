//! Data modifications and commit protocols.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::path::DataPath;

/// A single change to the data tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionModification {
    /// Replace the node at `path`, discarding its subtree.
    Write {
        /// Target node.
        path: DataPath,
        /// New payload.
        data: Bytes,
    },
    /// Set the payload at `path`, keeping any existing descendants.
    Merge {
        /// Target node.
        path: DataPath,
        /// New payload.
        data: Bytes,
    },
    /// Remove the node at `path` and its subtree.
    Delete {
        /// Target node.
        path: DataPath,
    },
}

impl TransactionModification {
    /// The affected path.
    #[must_use]
    pub const fn path(&self) -> &DataPath {
        match self {
            Self::Write { path, .. } | Self::Merge { path, .. } | Self::Delete { path } => path,
        }
    }

    /// The payload, if the modification carries one.
    #[must_use]
    pub const fn data(&self) -> Option<&Bytes> {
        match self {
            Self::Write { data, .. } | Self::Merge { data, .. } => Some(data),
            Self::Delete { .. } => None,
        }
    }
}

/// How a transaction ends once its modifications are submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PersistenceProtocol {
    /// Discard the transaction.
    Abort,
    /// Commit immediately; the backend is the only participant.
    Simple,
    /// Seal and wait for can-commit, pre-commit and do-commit.
    ThreePhase,
    /// Seal without choosing a commit shape yet.
    Ready,
}

impl PersistenceProtocol {
    /// The wire tag.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Abort => 1,
            Self::Simple => 2,
            Self::ThreePhase => 3,
            Self::Ready => 4,
        }
    }
}

impl TryFrom<u8> for PersistenceProtocol {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Abort),
            2 => Ok(Self::Simple),
            3 => Ok(Self::ThreePhase),
            4 => Ok(Self::Ready),
            tag => Err(CodecError::UnknownTag {
                what: "persistence protocol",
                tag,
            }),
        }
    }
}

impl fmt::Display for PersistenceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Abort => "ABORT",
            Self::Simple => "SIMPLE",
            Self::ThreePhase => "THREE_PHASE",
            Self::Ready => "READY",
        };
        f.write_str(name)
    }
}
