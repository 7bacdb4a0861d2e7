//! In-memory data tree with optimistic write-write conflict detection.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use proven_access_api::{DataPath, TransactionModification};
use tracing::debug;

use super::{Candidate, DataTree, DataTreeError, DataTreeView};

type Nodes = BTreeMap<DataPath, Bytes>;

/// Paths changed by one commit.
struct CommitRecord {
    version: u64,
    paths: Vec<DataPath>,
}

struct TreeState {
    version: u64,
    nodes: Arc<Nodes>,
    log: VecDeque<CommitRecord>,
}

/// Data tree held entirely in memory.
///
/// Views share the committed map and copy it on their first write. Commit
/// rejects a candidate if any change committed after its base version touched
/// an overlapping path.
pub struct MemoryDataTree {
    state: RwLock<TreeState>,
    log_capacity: usize,
    max_value_size: usize,
}

impl MemoryDataTree {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(4096, 1024 * 1024)
    }

    /// Create an empty tree that validates candidates against the last
    /// `log_capacity` commits and rejects payloads above `max_value_size`.
    #[must_use]
    pub fn with_limits(log_capacity: usize, max_value_size: usize) -> Self {
        Self {
            state: RwLock::new(TreeState {
                version: 0,
                nodes: Arc::new(Nodes::new()),
                log: VecDeque::new(),
            }),
            log_capacity,
            max_value_size,
        }
    }

    /// The current committed version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    fn validate(state: &TreeState, candidate: &Candidate) -> Result<(), DataTreeError> {
        if candidate.base_version >= state.version {
            return Ok(());
        }

        let oldest_logged = state.log.front().map_or(state.version + 1, |r| r.version);
        if candidate.base_version + 1 < oldest_logged {
            return Err(DataTreeError::SnapshotTooOld {
                base_version: candidate.base_version,
            });
        }

        for record in state
            .log
            .iter()
            .filter(|r| r.version > candidate.base_version)
        {
            for modification in &candidate.modifications {
                let path = modification.path();
                if record.paths.iter().any(|p| p.overlaps(path)) {
                    return Err(DataTreeError::Conflict { path: path.clone() });
                }
            }
        }
        Ok(())
    }
}

impl Default for MemoryDataTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DataTree for MemoryDataTree {
    fn open(&self) -> Box<dyn DataTreeView> {
        let state = self.state.read();
        Box::new(MemoryView {
            base_version: state.version,
            nodes: Arc::clone(&state.nodes),
            modifications: Vec::new(),
            max_value_size: self.max_value_size,
        })
    }

    fn can_commit(&self, candidate: &Candidate) -> Result<(), DataTreeError> {
        Self::validate(&self.state.read(), candidate)
    }

    fn pre_commit(&self, candidate: &Candidate) -> Result<(), DataTreeError> {
        Self::validate(&self.state.read(), candidate)
    }

    fn commit(&self, candidate: Candidate) -> Result<u64, DataTreeError> {
        let mut state = self.state.write();
        Self::validate(&state, &candidate)?;

        let nodes = Arc::make_mut(&mut state.nodes);
        for modification in &candidate.modifications {
            apply(nodes, modification);
        }

        state.version += 1;
        let version = state.version;
        state.log.push_back(CommitRecord {
            version,
            paths: candidate
                .modifications
                .iter()
                .map(|m| m.path().clone())
                .collect(),
        });
        while state.log.len() > self.log_capacity {
            state.log.pop_front();
        }

        debug!(
            "committed {} modifications at version {}",
            candidate.modifications.len(),
            version
        );
        Ok(version)
    }

    fn read_committed(&self, path: &DataPath) -> Option<Bytes> {
        self.state.read().nodes.get(path).cloned()
    }
}

struct MemoryView {
    base_version: u64,
    nodes: Arc<Nodes>,
    modifications: Vec<TransactionModification>,
    max_value_size: usize,
}

impl DataTreeView for MemoryView {
    fn apply(&mut self, modification: &TransactionModification) -> Result<(), DataTreeError> {
        if let Some(data) = modification.data() {
            if data.len() > self.max_value_size {
                return Err(DataTreeError::InvalidModification {
                    path: modification.path().clone(),
                    reason: format!(
                        "payload of {} bytes exceeds {}",
                        data.len(),
                        self.max_value_size
                    ),
                });
            }
        }
        apply(Arc::make_mut(&mut self.nodes), modification);
        self.modifications.push(modification.clone());
        Ok(())
    }

    fn read(&self, path: &DataPath) -> Option<Bytes> {
        self.nodes.get(path).cloned()
    }

    fn exists(&self, path: &DataPath) -> bool {
        self.nodes
            .range(path.clone()..)
            .next()
            .is_some_and(|(key, _)| path.contains(key))
    }

    fn seal(self: Box<Self>) -> Candidate {
        Candidate {
            base_version: self.base_version,
            modifications: self.modifications,
        }
    }
}

fn apply(nodes: &mut Nodes, modification: &TransactionModification) {
    match modification {
        TransactionModification::Write { path, data } => {
            remove_subtree(nodes, path);
            nodes.insert(path.clone(), data.clone());
        }
        TransactionModification::Merge { path, data } => {
            nodes.insert(path.clone(), data.clone());
        }
        TransactionModification::Delete { path } => remove_subtree(nodes, path),
    }
}

// Descendants sort directly after their ancestor, so a subtree is one range.
fn remove_subtree(nodes: &mut Nodes, path: &DataPath) {
    let doomed: Vec<DataPath> = nodes
        .range(path.clone()..)
        .take_while(|(key, _)| path.contains(key))
        .map(|(key, _)| key.clone())
        .collect();
    for key in doomed {
        nodes.remove(&key);
    }
}
