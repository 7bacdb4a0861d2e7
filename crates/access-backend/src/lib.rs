//! Shard backend for frontend/backend data store access.
//!
//! The backend is the leader-side endpoint frontends talk to. It tracks one
//! [`FrontendState`] per frontend: the connected generation, the current
//! session and every local history with its transactions. Requests are
//! applied to a [`DataTree`] and answered exactly once per envelope; duplicate
//! requests get the recorded answer again instead of being re-executed.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
pub mod data_tree;
mod error;
mod frontend;
mod history;
mod replay;
mod service;
mod transaction;

pub use config::BackendConfig;
pub use data_tree::{Candidate, DataTree, DataTreeError, DataTreeView, MemoryDataTree};
pub use error::{Error, Result};
pub use frontend::{FrontendState, Role, ShardContext};
pub use service::BackendService;
