//! The data tree a shard backend applies transactions to.
//!
//! Transactions read and write through an isolated [`DataTreeView`]. Sealing
//! a view yields a [`Candidate`], which then goes through the commit steps on
//! the tree itself. Conflicts are detected at commit time.

mod memory;

pub use memory::MemoryDataTree;

use bytes::Bytes;
use proven_access_api::{DataPath, TransactionModification};
use thiserror::Error;

/// Errors raised by a data tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataTreeError {
    /// Another transaction committed an overlapping change first.
    #[error("Conflicting modification at {path}")]
    Conflict {
        /// The contended path.
        path: DataPath,
    },

    /// The candidate's base is older than the tree can validate against.
    #[error("Snapshot at version {base_version} is too old")]
    SnapshotTooOld {
        /// The version the transaction started from.
        base_version: u64,
    },

    /// A modification was rejected.
    #[error("Invalid modification at {path}: {reason}")]
    InvalidModification {
        /// The path.
        path: DataPath,
        /// Why it was rejected.
        reason: String,
    },
}

/// Modifications sealed for commit, with the version they were made against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Tree version the transaction's view started from.
    pub base_version: u64,
    /// Modifications in submission order.
    pub modifications: Vec<TransactionModification>,
}

impl Candidate {
    /// Whether the candidate changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modifications.is_empty()
    }
}

/// A transaction's private view: the tree as of its start plus its own writes.
pub trait DataTreeView: Send {
    /// Apply a modification to the view.
    ///
    /// # Errors
    ///
    /// Fails if the tree cannot accept the modification.
    fn apply(&mut self, modification: &TransactionModification) -> Result<(), DataTreeError>;

    /// The payload at `path`, if any.
    fn read(&self, path: &DataPath) -> Option<Bytes>;

    /// Whether `path` holds a payload or has descendants that do.
    fn exists(&self, path: &DataPath) -> bool;

    /// Freeze the view into a commit candidate.
    fn seal(self: Box<Self>) -> Candidate;
}

/// Storage shared by all transactions of a shard.
pub trait DataTree: Send + Sync + 'static {
    /// Open an isolated view on the current committed state.
    fn open(&self) -> Box<dyn DataTreeView>;

    /// Check that `candidate` can still be applied.
    ///
    /// # Errors
    ///
    /// Fails on a conflict with a change committed since the candidate's base.
    fn can_commit(&self, candidate: &Candidate) -> Result<(), DataTreeError>;

    /// Final validation before commit.
    ///
    /// # Errors
    ///
    /// As [`DataTree::can_commit`].
    fn pre_commit(&self, candidate: &Candidate) -> Result<(), DataTreeError>;

    /// Apply `candidate` and return the new tree version.
    ///
    /// # Errors
    ///
    /// As [`DataTree::can_commit`]; nothing is applied on failure.
    fn commit(&self, candidate: Candidate) -> Result<u64, DataTreeError>;

    /// The committed payload at `path`.
    fn read_committed(&self, path: &DataPath) -> Option<Bytes>;
}
