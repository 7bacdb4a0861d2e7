//! Versioned binary codec for envelopes.
//!
//! Every frame starts with the big-endian `u16` ABI version, followed by a
//! one-byte message tag and the envelope fields. The version selects how
//! integers are written:
//!
//! | Version | Integers            | Trailer          |
//! |---------|---------------------|------------------|
//! | V1      | fixed-width, BE     | none             |
//! | V2      | LEB128 varint       | none             |
//! | V3      | LEB128 varint       | CRC32 over frame |
//!
//! Request tags have the high bit clear, response tags have it set.

mod messages;
mod wire;

use bytes::Bytes;
use tracing::trace;

use crate::envelope::{Envelope, RequestEnvelope, ResponseEnvelope};
use crate::error::{CodecError, Result};
use crate::version::AbiVersion;

use wire::{WireReader, WireWriter};

/// Encode an envelope using the version carried by its message.
///
/// # Errors
///
/// Fails if a length does not fit the version's integer width.
pub fn encode(envelope: &Envelope) -> Result<Bytes> {
    match envelope {
        Envelope::Request(request) => encode_request(request),
        Envelope::Response(response) => encode_response(response),
    }
}

/// Encode a request envelope.
///
/// # Errors
///
/// Fails if a length does not fit the version's integer width.
pub fn encode_request(envelope: &RequestEnvelope) -> Result<Bytes> {
    let mut writer = WireWriter::new(envelope.message.version());
    messages::put_request_envelope(&mut writer, envelope)?;
    let frame = writer.finish();
    trace!(
        "encoded {} ({} bytes)",
        envelope.message.kind_name(),
        frame.len()
    );
    Ok(frame)
}

/// Encode a response envelope.
///
/// # Errors
///
/// Fails if a length does not fit the version's integer width.
pub fn encode_response(envelope: &ResponseEnvelope) -> Result<Bytes> {
    let mut writer = WireWriter::new(envelope.message.version());
    messages::put_response_envelope(&mut writer, envelope)?;
    Ok(writer.finish())
}

/// Decode a frame of either direction.
///
/// # Errors
///
/// Fails on unknown versions, unknown tags, truncation, trailing bytes and
/// checksum mismatches. A failed decode never yields a partial message.
pub fn decode(frame: &[u8]) -> Result<Envelope> {
    let mut reader = WireReader::open(frame)?;
    let envelope = messages::get_envelope(&mut reader)?;
    reader.finish()?;
    Ok(envelope)
}

/// Decode a frame that must hold a request.
///
/// # Errors
///
/// As [`decode`], plus [`CodecError::UnexpectedEnvelope`] for responses.
pub fn decode_request(frame: &[u8]) -> Result<RequestEnvelope> {
    match decode(frame)? {
        Envelope::Request(request) => Ok(request),
        Envelope::Response(_) => Err(CodecError::UnexpectedEnvelope {
            expected: "request",
        }),
    }
}

/// Decode a frame that must hold a response.
///
/// # Errors
///
/// As [`decode`], plus [`CodecError::UnexpectedEnvelope`] for requests.
pub fn decode_response(frame: &[u8]) -> Result<ResponseEnvelope> {
    match decode(frame)? {
        Envelope::Response(response) => Ok(response),
        Envelope::Request(_) => Err(CodecError::UnexpectedEnvelope {
            expected: "response",
        }),
    }
}

/// Read the version tag of a frame without decoding it.
///
/// # Errors
///
/// Fails if the frame is shorter than the tag or names an unknown version.
pub fn peek_version(frame: &[u8]) -> Result<AbiVersion> {
    match frame {
        [hi, lo, ..] => AbiVersion::try_from(u16::from_be_bytes([*hi, *lo])),
        _ => Err(CodecError::Truncated {
            needed: 2 - frame.len(),
        }),
    }
}
