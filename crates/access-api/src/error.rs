//! Error types for the access API.

use thiserror::Error;

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors while encoding or decoding wire frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The frame names a version this build does not speak.
    #[error("Unsupported ABI version: {0}")]
    UnsupportedVersion(u16),

    /// A discriminant byte did not name a known variant.
    #[error("Unknown {what} tag: {tag:#04x}")]
    UnknownTag {
        /// What was being decoded.
        what: &'static str,
        /// The offending byte.
        tag: u8,
    },

    /// The frame ended early.
    #[error("Frame truncated: needed {needed} more bytes")]
    Truncated {
        /// Bytes missing.
        needed: usize,
    },

    /// Bytes were left after the message.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    /// A variable-length integer did not fit in 64 bits.
    #[error("Varint overflow")]
    VarintOverflow,

    /// A string field was not UTF-8.
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// The CRC trailer did not match.
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum in the frame.
        expected: u32,
        /// Checksum computed over the frame.
        actual: u32,
    },

    /// A field held a value its type does not allow.
    #[error("Invalid {0}")]
    InvalidValue(&'static str),

    /// A request was found where a response was expected, or vice versa.
    #[error("Expected a {expected} envelope")]
    UnexpectedEnvelope {
        /// What the caller asked for.
        expected: &'static str,
    },
}

/// Errors while building a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// No sequence was set.
    #[error("Request sequence not set")]
    MissingSequence,

    /// The persistence protocol was set more than once.
    #[error("Persistence protocol already set to {0}")]
    ProtocolAlreadySet(crate::modification::PersistenceProtocol),
}
