//! Frontend (client) side of data store access.
//!
//! A [`ClientConnection`] connects one client generation to the leader
//! backend of a shard and keeps the session alive across lost frames,
//! session resets and leader changes. Work is organized in local histories
//! ([`ClientHistory`]) that hand out transactions:
//!
//! - [`ClientTransaction`] sends its requests as it goes and supports every
//!   persistence protocol
//! - [`LocalTransaction`] records modifications and ships them in one request
//!
//! [`commit_coordinated`] commits several transactions atomically with the
//! three-phase protocol.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod connection;
mod coordinator;
mod error;
mod history;
mod limit;
mod local;
mod transaction;

pub use config::FrontendConfig;
pub use connection::ClientConnection;
pub use coordinator::commit_coordinated;
pub use error::{Error, Result};
pub use history::ClientHistory;
pub use local::{LocalTransaction, translate};
pub use transaction::ClientTransaction;
