//! Message catalogue and wire codec for frontend/backend data store access.
//!
//! A frontend talks to the leader backend of each shard it uses. This crate
//! defines everything the two sides exchange:
//!
//! - **Identifiers** naming frontends, client generations, local histories
//!   and transactions
//! - **Requests and responses** for each of those targets, with per-target
//!   sequence numbers
//! - **Envelopes** binding messages to a session and its send order
//! - **Exceptions** a backend reports, classified as retriable or not
//! - **Codec** for the versioned binary wire format
//!
//! # Example
//!
//! ```
//! use proven_access_api::{
//!     AbiVersion, Address, ClientIdentifier, FrontendIdentifier, FrontendType, MemberName,
//!     ClientRequestKind, MessageHeader, Request, RequestEnvelope, RequestMessage, VersionRange,
//!     codec,
//! };
//!
//! let client = ClientIdentifier::new(
//!     FrontendIdentifier::new(MemberName::new("member-1"), FrontendType::new("config")),
//!     0,
//! );
//! let connect = Request::new(
//!     MessageHeader::new(client, 0, AbiVersion::V1),
//!     Address::new("frontend-1"),
//!     ClientRequestKind::Connect { versions: VersionRange::all() },
//! );
//! let envelope = RequestEnvelope::new(1, 0, RequestMessage::Client(connect));
//!
//! let frame = codec::encode_request(&envelope).unwrap();
//! assert_eq!(codec::decode_request(&frame).unwrap(), envelope);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod address;
mod builder;
pub mod codec;
mod envelope;
mod error;
mod exception;
mod identifiers;
mod local;
mod modification;
mod path;
mod range_set;
mod request;
mod response;
mod version;

pub use address::Address;
pub use builder::ModifyTransactionRequestBuilder;
pub use envelope::{Envelope, RequestEnvelope, ResponseEnvelope};
pub use error::{BuildError, CodecError, Result};
pub use exception::{CommitPhase, OutOfOrder, RequestException};
pub use identifiers::{
    ClientIdentifier, FrontendIdentifier, FrontendType, LocalHistoryIdentifier, MemberName,
    TargetIdentifier, TransactionIdentifier,
};
pub use local::LocalTransactionRequest;
pub use modification::{PersistenceProtocol, TransactionModification};
pub use path::DataPath;
pub use range_set::RangeSet;
pub use request::{
    ClientRequest, ClientRequestKind, LocalHistoryRequest, LocalHistoryRequestKind,
    MessageHeader, Request, RequestMessage, TransactionRequest, TransactionRequestKind,
};
pub use response::{
    ClientResponse, ClientSuccess, LocalHistoryResponse, LocalHistorySuccess, Response,
    ResponseMessage, TransactionResponse, TransactionSuccess,
};
pub use version::{AbiVersion, VersionRange};
