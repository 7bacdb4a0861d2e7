//! Error types for the backend.

use proven_access_api::CodecError;
use proven_access_transport::TransportError;
use thiserror::Error;

use crate::data_tree::DataTreeError;

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the backend.
#[derive(Debug, Error)]
pub enum Error {
    /// Encoding or decoding a frame failed.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The transport refused a frame.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The data tree rejected an operation.
    #[error("Data tree error: {0}")]
    DataTree(#[from] DataTreeError),

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is wrong.
        message: String,
    },

    /// Reading configuration from disk failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The service was started twice.
    #[error("Service already started")]
    AlreadyStarted,
}
