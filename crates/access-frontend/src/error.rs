//! Error types for the frontend.

use proven_access_api::{BuildError, CodecError, RequestException};
use proven_access_transport::TransportError;
use thiserror::Error;

/// Result type alias for frontend operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the frontend.
#[derive(Debug, Error)]
pub enum Error {
    /// The backend answered with a failure that retrying cannot fix.
    #[error("Request failed: {0}")]
    Request(#[from] RequestException),

    /// No usable answer arrived within the retry budget.
    #[error("No response after {attempts} attempts")]
    RetriesExhausted {
        /// Transmissions made.
        attempts: u32,
    },

    /// Too many leader redirects.
    #[error("Gave up after {redirects} leader redirects")]
    RedirectsExhausted {
        /// Redirects followed.
        redirects: u32,
    },

    /// The transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Encoding or decoding a frame failed.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A request could not be built.
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// The connection was closed.
    #[error("Connection closed")]
    Closed,

    /// The backend answered with a response of the wrong kind.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is wrong.
        message: String,
    },

    /// Reading configuration from disk failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
