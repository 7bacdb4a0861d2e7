//! Envelopes: the unit a transport actually carries.
//!
//! An envelope wraps one message with the session it belongs to and the
//! position of that message in the session's send order.

use crate::request::RequestMessage;
use crate::response::ResponseMessage;
use crate::version::AbiVersion;

/// A request on its way to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    /// Session the frontend believes it is on.
    pub session_id: u64,
    /// Position of this envelope in the session.
    pub tx_sequence: u64,
    /// The request.
    pub message: RequestMessage,
}

impl RequestEnvelope {
    /// Create an envelope.
    #[must_use]
    pub const fn new(session_id: u64, tx_sequence: u64, message: RequestMessage) -> Self {
        Self {
            session_id,
            tx_sequence,
            message,
        }
    }
}

/// A response on its way back to a frontend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    /// Session of the request being answered.
    pub session_id: u64,
    /// Envelope sequence of the request being answered.
    pub tx_sequence: u64,
    /// Time the backend spent handling the request, in nanoseconds.
    pub execution_time_nanos: u64,
    /// The response.
    pub message: ResponseMessage,
}

impl ResponseEnvelope {
    /// Create an envelope.
    #[must_use]
    pub const fn new(
        session_id: u64,
        tx_sequence: u64,
        execution_time_nanos: u64,
        message: ResponseMessage,
    ) -> Self {
        Self {
            session_id,
            tx_sequence,
            execution_time_nanos,
            message,
        }
    }
}

/// Either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Frontend to backend.
    Request(RequestEnvelope),
    /// Backend to frontend.
    Response(ResponseEnvelope),
}

impl Envelope {
    /// The version the enclosed message is encoded with.
    #[must_use]
    pub const fn version(&self) -> AbiVersion {
        match self {
            Self::Request(e) => e.message.version(),
            Self::Response(e) => e.message.version(),
        }
    }
}

impl From<RequestEnvelope> for Envelope {
    fn from(value: RequestEnvelope) -> Self {
        Self::Request(value)
    }
}

impl From<ResponseEnvelope> for Envelope {
    fn from(value: ResponseEnvelope) -> Self {
        Self::Response(value)
    }
}
