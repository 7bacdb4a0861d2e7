//! Field layout of every message.

use std::num::NonZeroU32;

use crate::address::Address;
use crate::envelope::{Envelope, RequestEnvelope, ResponseEnvelope};
use crate::error::{CodecError, Result};
use crate::exception::{CommitPhase, OutOfOrder, RequestException};
use crate::identifiers::{
    ClientIdentifier, FrontendIdentifier, FrontendType, LocalHistoryIdentifier, MemberName,
    TransactionIdentifier,
};
use crate::modification::{PersistenceProtocol, TransactionModification};
use crate::path::DataPath;
use crate::range_set::RangeSet;
use crate::request::{
    ClientRequestKind, LocalHistoryRequestKind, MessageHeader, Request, RequestMessage,
    TransactionRequestKind,
};
use crate::response::{
    ClientSuccess, LocalHistorySuccess, Response, ResponseMessage, TransactionSuccess,
};
use crate::version::{AbiVersion, VersionRange};

use super::wire::{WireReader, WireWriter};

mod tags {
    pub const CONNECT: u8 = 0x01;

    pub const HISTORY_CREATE: u8 = 0x10;
    pub const HISTORY_DESTROY: u8 = 0x11;
    pub const HISTORY_PURGE: u8 = 0x12;
    pub const HISTORY_SKIP: u8 = 0x13;

    pub const TX_MODIFY: u8 = 0x20;
    pub const TX_READ: u8 = 0x21;
    pub const TX_EXISTS: u8 = 0x22;
    pub const TX_INCREMENT: u8 = 0x23;
    pub const TX_ABORT: u8 = 0x24;
    pub const TX_CAN_COMMIT: u8 = 0x25;
    pub const TX_PRE_COMMIT: u8 = 0x26;
    pub const TX_DO_COMMIT: u8 = 0x27;
    pub const TX_PURGE: u8 = 0x28;
    pub const TX_SKIP: u8 = 0x29;
    pub const TX_CREATE_SNAPSHOT: u8 = 0x2a;

    pub const CONNECT_SUCCESS: u8 = 0x81;
    pub const CLIENT_FAILURE: u8 = 0x8f;

    pub const HISTORY_CREATED: u8 = 0x90;
    pub const HISTORY_DESTROYED: u8 = 0x91;
    pub const HISTORY_ACKNOWLEDGED: u8 = 0x92;
    pub const HISTORY_FAILURE: u8 = 0x9f;

    pub const TX_MODIFY_SUCCESS: u8 = 0xa0;
    pub const TX_READ_SUCCESS: u8 = 0xa1;
    pub const TX_EXISTS_SUCCESS: u8 = 0xa2;
    pub const TX_INCREMENT_SUCCESS: u8 = 0xa3;
    pub const TX_ABORT_SUCCESS: u8 = 0xa4;
    pub const TX_CAN_COMMIT_SUCCESS: u8 = 0xa5;
    pub const TX_PRE_COMMIT_SUCCESS: u8 = 0xa6;
    pub const TX_COMMIT_SUCCESS: u8 = 0xa7;
    pub const TX_PURGE_SUCCESS: u8 = 0xa8;
    pub const TX_SKIP_SUCCESS: u8 = 0xa9;
    pub const TX_CREATE_SNAPSHOT_SUCCESS: u8 = 0xaa;
    pub const TX_FAILURE: u8 = 0xaf;

    pub const RESPONSE_BIT: u8 = 0x80;
}

// Identifiers

fn put_client(w: &mut WireWriter, client: &ClientIdentifier) -> Result<()> {
    w.put_str(client.frontend().member().as_str())?;
    w.put_str(client.frontend().frontend_type().as_str())?;
    w.put_u64(client.generation());
    Ok(())
}

fn get_client(r: &mut WireReader) -> Result<ClientIdentifier> {
    let member = MemberName::new(r.get_string("member name")?);
    let frontend_type = FrontendType::new(r.get_string("frontend type")?);
    let generation = r.get_u64()?;
    Ok(ClientIdentifier::new(
        FrontendIdentifier::new(member, frontend_type),
        generation,
    ))
}

fn put_history(w: &mut WireWriter, history: &LocalHistoryIdentifier) -> Result<()> {
    put_client(w, history.client())?;
    w.put_u64(history.history_id());
    Ok(())
}

fn get_history(r: &mut WireReader) -> Result<LocalHistoryIdentifier> {
    let client = get_client(r)?;
    Ok(LocalHistoryIdentifier::new(client, r.get_u64()?))
}

fn put_transaction(w: &mut WireWriter, transaction: &TransactionIdentifier) -> Result<()> {
    put_history(w, transaction.history())?;
    w.put_u64(transaction.transaction_id());
    Ok(())
}

fn get_transaction(r: &mut WireReader) -> Result<TransactionIdentifier> {
    let history = get_history(r)?;
    Ok(TransactionIdentifier::new(history, r.get_u64()?))
}

// Payload building blocks

fn put_path(w: &mut WireWriter, path: &DataPath) -> Result<()> {
    w.put_len(path.segments().len())?;
    for segment in path.segments() {
        w.put_str(segment)?;
    }
    Ok(())
}

fn get_path(r: &mut WireReader) -> Result<DataPath> {
    let count = r.get_count()?;
    let mut segments = Vec::with_capacity(count);
    for _ in 0..count {
        segments.push(r.get_string("path segment")?);
    }
    Ok(DataPath::from_segments(segments))
}

fn put_ids(w: &mut WireWriter, ids: &[u64]) -> Result<()> {
    w.put_len(ids.len())?;
    for id in ids {
        w.put_u64(*id);
    }
    Ok(())
}

fn get_ids(r: &mut WireReader) -> Result<Vec<u64>> {
    let count = r.get_count()?;
    (0..count).map(|_| r.get_u64()).collect()
}

fn put_range_set(w: &mut WireWriter, set: &RangeSet) -> Result<()> {
    w.put_len(set.range_count())?;
    for range in set.iter() {
        w.put_u64(*range.start());
        w.put_u64(*range.end());
    }
    Ok(())
}

fn get_range_set(r: &mut WireReader) -> Result<RangeSet> {
    let count = r.get_count()?;
    let mut set = RangeSet::new();
    for _ in 0..count {
        let start = r.get_u64()?;
        let end = r.get_u64()?;
        if start > end {
            return Err(CodecError::InvalidValue("range"));
        }
        set.insert_range(start..=end);
    }
    Ok(set)
}

fn put_address(w: &mut WireWriter, address: &Address) -> Result<()> {
    w.put_str(address.as_str())
}

fn get_address(r: &mut WireReader) -> Result<Address> {
    Ok(Address::new(r.get_string("address")?))
}

fn put_modification(w: &mut WireWriter, modification: &TransactionModification) -> Result<()> {
    match modification {
        TransactionModification::Write { path, data } => {
            w.put_u8(1);
            put_path(w, path)?;
            w.put_bytes(data)
        }
        TransactionModification::Merge { path, data } => {
            w.put_u8(2);
            put_path(w, path)?;
            w.put_bytes(data)
        }
        TransactionModification::Delete { path } => {
            w.put_u8(3);
            put_path(w, path)
        }
    }
}

fn get_modification(r: &mut WireReader) -> Result<TransactionModification> {
    match r.get_u8()? {
        1 => Ok(TransactionModification::Write {
            path: get_path(r)?,
            data: r.get_bytes()?,
        }),
        2 => Ok(TransactionModification::Merge {
            path: get_path(r)?,
            data: r.get_bytes()?,
        }),
        3 => Ok(TransactionModification::Delete { path: get_path(r)? }),
        tag => Err(CodecError::UnknownTag {
            what: "modification",
            tag,
        }),
    }
}

// Connect carries the proposed range as raw numbers, so that a newer
// frontend can offer versions this build has never heard of.
fn put_version_range(w: &mut WireWriter, range: &VersionRange) {
    w.put_u64(u64::from(range.min.as_u16()));
    w.put_u64(u64::from(range.max.as_u16()));
}

fn get_version_range(r: &mut WireReader) -> Result<VersionRange> {
    let min = r.get_u64()?;
    let max = r.get_u64()?;
    if min > max {
        return Err(CodecError::InvalidValue("version range"));
    }
    let min = u16::try_from(min).map_err(|_| CodecError::InvalidValue("version"))?;
    let max = u16::try_from(max).map_err(|_| CodecError::InvalidValue("version"))?;
    let min = AbiVersion::try_from(min)?;
    let max = AbiVersion::try_from(max.min(AbiVersion::MAX.as_u16()))?;
    VersionRange::new(min, max).ok_or(CodecError::InvalidValue("version range"))
}

fn put_exception(w: &mut WireWriter, exception: &RequestException) -> Result<()> {
    match exception {
        RequestException::OutOfOrderRequest(OutOfOrder::Sequence { expected }) => {
            w.put_u8(1);
            w.put_u64(*expected);
        }
        RequestException::OutOfOrderRequest(OutOfOrder::CommitPhase {
            requested,
            expected,
        }) => {
            w.put_u8(2);
            w.put_u8(requested.as_u8());
            w.put_u8(expected.map_or(0, CommitPhase::as_u8));
        }
        RequestException::OutOfSequenceEnvelope { expected } => {
            w.put_u8(3);
            w.put_u64(*expected);
        }
        RequestException::NotLeader { leader } => {
            w.put_u8(4);
            w.put_option(leader.as_ref(), put_address)?;
        }
        RequestException::RetiredGeneration { existing } => {
            w.put_u8(5);
            w.put_u64(*existing);
        }
        RequestException::ClosedTransaction { successful } => {
            w.put_u8(6);
            w.put_bool(*successful);
        }
        RequestException::DeadTransaction { purged } => {
            w.put_u8(7);
            put_range_set(w, purged)?;
        }
        RequestException::DeadHistory { purged } => {
            w.put_u8(8);
            put_range_set(w, purged)?;
        }
        RequestException::AbortedTransaction { transaction_id } => {
            w.put_u8(9);
            w.put_u64(*transaction_id);
        }
        RequestException::PendingTransaction {
            sequence,
            closed_by,
        } => {
            w.put_u8(10);
            w.put_u64(*sequence);
            w.put_str(closed_by)?;
        }
        RequestException::UnknownHistory { history_id } => {
            w.put_u8(11);
            w.put_u64(*history_id);
        }
        RequestException::UnsupportedRequest { description } => {
            w.put_u8(12);
            w.put_str(description)?;
        }
        RequestException::RuntimeRequest { message } => {
            w.put_u8(13);
            w.put_str(message)?;
        }
    }
    Ok(())
}

fn get_exception(r: &mut WireReader) -> Result<RequestException> {
    let exception = match r.get_u8()? {
        1 => RequestException::out_of_order(r.get_u64()?),
        2 => {
            let requested = CommitPhase::try_from(r.get_u8()?)?;
            let expected = match r.get_u8()? {
                0 => None,
                tag => Some(CommitPhase::try_from(tag)?),
            };
            RequestException::OutOfOrderRequest(OutOfOrder::CommitPhase {
                requested,
                expected,
            })
        }
        3 => RequestException::OutOfSequenceEnvelope {
            expected: r.get_u64()?,
        },
        4 => RequestException::NotLeader {
            leader: r.get_option(get_address)?,
        },
        5 => RequestException::RetiredGeneration {
            existing: r.get_u64()?,
        },
        6 => RequestException::ClosedTransaction {
            successful: r.get_bool()?,
        },
        7 => RequestException::DeadTransaction {
            purged: get_range_set(r)?,
        },
        8 => RequestException::DeadHistory {
            purged: get_range_set(r)?,
        },
        9 => RequestException::AbortedTransaction {
            transaction_id: r.get_u64()?,
        },
        10 => RequestException::PendingTransaction {
            sequence: r.get_u64()?,
            closed_by: r.get_string("request name")?,
        },
        11 => RequestException::UnknownHistory {
            history_id: r.get_u64()?,
        },
        12 => RequestException::UnsupportedRequest {
            description: r.get_string("description")?,
        },
        13 => RequestException::RuntimeRequest {
            message: r.get_string("message")?,
        },
        tag => {
            return Err(CodecError::UnknownTag {
                what: "exception",
                tag,
            });
        }
    };
    Ok(exception)
}

// Envelopes

pub fn put_request_envelope(w: &mut WireWriter, envelope: &RequestEnvelope) -> Result<()> {
    let tag = request_tag(&envelope.message);
    w.put_u8(tag);
    w.put_u64(envelope.session_id);
    w.put_u64(envelope.tx_sequence);

    match &envelope.message {
        RequestMessage::Client(request) => {
            put_request_header(w, &request.header, &request.reply_to, put_client)?;
            match &request.kind {
                ClientRequestKind::Connect { versions } => put_version_range(w, versions),
            }
        }
        RequestMessage::History(request) => {
            put_request_header(w, &request.header, &request.reply_to, put_history)?;
            if let LocalHistoryRequestKind::SkipTransactions { transaction_ids } = &request.kind {
                put_ids(w, transaction_ids)?;
            }
        }
        RequestMessage::Transaction(request) => {
            put_request_header(w, &request.header, &request.reply_to, put_transaction)?;
            put_transaction_request(w, &request.kind)?;
        }
    }
    Ok(())
}

fn put_request_header<T>(
    w: &mut WireWriter,
    header: &MessageHeader<T>,
    reply_to: &Address,
    put_target: fn(&mut WireWriter, &T) -> Result<()>,
) -> Result<()> {
    put_target(w, &header.target)?;
    w.put_u64(header.sequence);
    put_address(w, reply_to)
}

fn put_transaction_request(w: &mut WireWriter, kind: &TransactionRequestKind) -> Result<()> {
    match kind {
        TransactionRequestKind::Modify {
            modifications,
            protocol,
        } => {
            w.put_len(modifications.len())?;
            for modification in modifications {
                put_modification(w, modification)?;
            }
            w.put_u8(protocol.map_or(0, PersistenceProtocol::as_u8));
        }
        TransactionRequestKind::Read {
            path,
            snapshot_only,
        }
        | TransactionRequestKind::Exists {
            path,
            snapshot_only,
        } => {
            put_path(w, path)?;
            w.put_bool(*snapshot_only);
        }
        TransactionRequestKind::IncrementSequence {
            increment,
            snapshot_only,
        } => {
            w.put_u64(*increment);
            w.put_bool(*snapshot_only);
        }
        TransactionRequestKind::SkipTransactions { others } => put_ids(w, others)?,
        TransactionRequestKind::Abort
        | TransactionRequestKind::CanCommit
        | TransactionRequestKind::PreCommit
        | TransactionRequestKind::DoCommit
        | TransactionRequestKind::Purge
        | TransactionRequestKind::CreateSnapshot => {}
    }
    Ok(())
}

const fn request_tag(message: &RequestMessage) -> u8 {
    match message {
        RequestMessage::Client(_) => tags::CONNECT,
        RequestMessage::History(request) => match request.kind {
            LocalHistoryRequestKind::Create => tags::HISTORY_CREATE,
            LocalHistoryRequestKind::Destroy => tags::HISTORY_DESTROY,
            LocalHistoryRequestKind::Purge => tags::HISTORY_PURGE,
            LocalHistoryRequestKind::SkipTransactions { .. } => tags::HISTORY_SKIP,
        },
        RequestMessage::Transaction(request) => match request.kind {
            TransactionRequestKind::Modify { .. } => tags::TX_MODIFY,
            TransactionRequestKind::Read { .. } => tags::TX_READ,
            TransactionRequestKind::Exists { .. } => tags::TX_EXISTS,
            TransactionRequestKind::IncrementSequence { .. } => tags::TX_INCREMENT,
            TransactionRequestKind::Abort => tags::TX_ABORT,
            TransactionRequestKind::CanCommit => tags::TX_CAN_COMMIT,
            TransactionRequestKind::PreCommit => tags::TX_PRE_COMMIT,
            TransactionRequestKind::DoCommit => tags::TX_DO_COMMIT,
            TransactionRequestKind::Purge => tags::TX_PURGE,
            TransactionRequestKind::SkipTransactions { .. } => tags::TX_SKIP,
            TransactionRequestKind::CreateSnapshot => tags::TX_CREATE_SNAPSHOT,
        },
    }
}

pub fn put_response_envelope(w: &mut WireWriter, envelope: &ResponseEnvelope) -> Result<()> {
    w.put_u8(response_tag(&envelope.message));
    w.put_u64(envelope.session_id);
    w.put_u64(envelope.tx_sequence);
    w.put_u64(envelope.execution_time_nanos);

    match &envelope.message {
        ResponseMessage::Client(response) => {
            put_client(w, &response.header.target)?;
            w.put_u64(response.header.sequence);
            match &response.outcome {
                Ok(ClientSuccess::Connect {
                    backend,
                    version,
                    max_messages,
                    alternates,
                }) => {
                    put_address(w, backend)?;
                    w.put_u64(u64::from(version.as_u16()));
                    w.put_u64(u64::from(max_messages.get()));
                    w.put_len(alternates.len())?;
                    for alternate in alternates {
                        put_address(w, alternate)?;
                    }
                }
                Err(exception) => put_exception(w, exception)?,
            }
        }
        ResponseMessage::History(response) => {
            put_history(w, &response.header.target)?;
            w.put_u64(response.header.sequence);
            if let Err(exception) = &response.outcome {
                put_exception(w, exception)?;
            }
        }
        ResponseMessage::Transaction(response) => {
            put_transaction(w, &response.header.target)?;
            w.put_u64(response.header.sequence);
            match &response.outcome {
                Ok(TransactionSuccess::Read { data }) => {
                    w.put_option(data.as_ref(), |w, data| w.put_bytes(data))?;
                }
                Ok(TransactionSuccess::Exists { exists }) => w.put_bool(*exists),
                Ok(_) => {}
                Err(exception) => put_exception(w, exception)?,
            }
        }
    }
    Ok(())
}

const fn response_tag(message: &ResponseMessage) -> u8 {
    match message {
        ResponseMessage::Client(response) => match response.outcome {
            Ok(ClientSuccess::Connect { .. }) => tags::CONNECT_SUCCESS,
            Err(_) => tags::CLIENT_FAILURE,
        },
        ResponseMessage::History(response) => match response.outcome {
            Ok(LocalHistorySuccess::Created) => tags::HISTORY_CREATED,
            Ok(LocalHistorySuccess::Destroyed) => tags::HISTORY_DESTROYED,
            Ok(LocalHistorySuccess::Acknowledged) => tags::HISTORY_ACKNOWLEDGED,
            Err(_) => tags::HISTORY_FAILURE,
        },
        ResponseMessage::Transaction(response) => match response.outcome {
            Ok(TransactionSuccess::Modify) => tags::TX_MODIFY_SUCCESS,
            Ok(TransactionSuccess::Read { .. }) => tags::TX_READ_SUCCESS,
            Ok(TransactionSuccess::Exists { .. }) => tags::TX_EXISTS_SUCCESS,
            Ok(TransactionSuccess::IncrementSequence) => tags::TX_INCREMENT_SUCCESS,
            Ok(TransactionSuccess::Abort) => tags::TX_ABORT_SUCCESS,
            Ok(TransactionSuccess::CanCommit) => tags::TX_CAN_COMMIT_SUCCESS,
            Ok(TransactionSuccess::PreCommit) => tags::TX_PRE_COMMIT_SUCCESS,
            Ok(TransactionSuccess::Commit) => tags::TX_COMMIT_SUCCESS,
            Ok(TransactionSuccess::Purge) => tags::TX_PURGE_SUCCESS,
            Ok(TransactionSuccess::SkipTransactions) => tags::TX_SKIP_SUCCESS,
            Ok(TransactionSuccess::CreateSnapshot) => tags::TX_CREATE_SNAPSHOT_SUCCESS,
            Err(_) => tags::TX_FAILURE,
        },
    }
}

pub fn get_envelope(r: &mut WireReader) -> Result<Envelope> {
    let tag = r.get_u8()?;
    if tag & tags::RESPONSE_BIT == 0 {
        get_request_envelope(r, tag).map(Envelope::Request)
    } else {
        get_response_envelope(r, tag).map(Envelope::Response)
    }
}

fn get_request_envelope(r: &mut WireReader, tag: u8) -> Result<RequestEnvelope> {
    let version = r.version();
    let session_id = r.get_u64()?;
    let tx_sequence = r.get_u64()?;

    let message = match tag {
        tags::CONNECT => {
            let (header, reply_to) = get_request_header(r, version, get_client)?;
            let versions = get_version_range(r)?;
            RequestMessage::Client(Request::new(
                header,
                reply_to,
                ClientRequestKind::Connect { versions },
            ))
        }
        tags::HISTORY_CREATE | tags::HISTORY_DESTROY | tags::HISTORY_PURGE | tags::HISTORY_SKIP => {
            let (header, reply_to) = get_request_header(r, version, get_history)?;
            let kind = match tag {
                tags::HISTORY_CREATE => LocalHistoryRequestKind::Create,
                tags::HISTORY_DESTROY => LocalHistoryRequestKind::Destroy,
                tags::HISTORY_PURGE => LocalHistoryRequestKind::Purge,
                _ => LocalHistoryRequestKind::SkipTransactions {
                    transaction_ids: get_ids(r)?,
                },
            };
            RequestMessage::History(Request::new(header, reply_to, kind))
        }
        tags::TX_MODIFY..=tags::TX_CREATE_SNAPSHOT => {
            let (header, reply_to) = get_request_header(r, version, get_transaction)?;
            let kind = get_transaction_request(r, tag)?;
            RequestMessage::Transaction(Request::new(header, reply_to, kind))
        }
        tag => {
            return Err(CodecError::UnknownTag {
                what: "request",
                tag,
            });
        }
    };

    Ok(RequestEnvelope::new(session_id, tx_sequence, message))
}

fn get_request_header<T>(
    r: &mut WireReader,
    version: AbiVersion,
    get_target: fn(&mut WireReader) -> Result<T>,
) -> Result<(MessageHeader<T>, Address)> {
    let target = get_target(r)?;
    let sequence = r.get_u64()?;
    let reply_to = get_address(r)?;
    Ok((MessageHeader::new(target, sequence, version), reply_to))
}

fn get_transaction_request(r: &mut WireReader, tag: u8) -> Result<TransactionRequestKind> {
    let kind = match tag {
        tags::TX_MODIFY => {
            let count = r.get_count()?;
            let mut modifications = Vec::with_capacity(count);
            for _ in 0..count {
                modifications.push(get_modification(r)?);
            }
            let protocol = match r.get_u8()? {
                0 => None,
                tag => Some(PersistenceProtocol::try_from(tag)?),
            };
            TransactionRequestKind::Modify {
                modifications,
                protocol,
            }
        }
        tags::TX_READ => TransactionRequestKind::Read {
            path: get_path(r)?,
            snapshot_only: r.get_bool()?,
        },
        tags::TX_EXISTS => TransactionRequestKind::Exists {
            path: get_path(r)?,
            snapshot_only: r.get_bool()?,
        },
        tags::TX_INCREMENT => TransactionRequestKind::IncrementSequence {
            increment: r.get_u64()?,
            snapshot_only: r.get_bool()?,
        },
        tags::TX_ABORT => TransactionRequestKind::Abort,
        tags::TX_CAN_COMMIT => TransactionRequestKind::CanCommit,
        tags::TX_PRE_COMMIT => TransactionRequestKind::PreCommit,
        tags::TX_DO_COMMIT => TransactionRequestKind::DoCommit,
        tags::TX_PURGE => TransactionRequestKind::Purge,
        tags::TX_SKIP => TransactionRequestKind::SkipTransactions {
            others: get_ids(r)?,
        },
        tags::TX_CREATE_SNAPSHOT => TransactionRequestKind::CreateSnapshot,
        tag => {
            return Err(CodecError::UnknownTag {
                what: "transaction request",
                tag,
            });
        }
    };
    Ok(kind)
}

fn get_response_envelope(r: &mut WireReader, tag: u8) -> Result<ResponseEnvelope> {
    let version = r.version();
    let session_id = r.get_u64()?;
    let tx_sequence = r.get_u64()?;
    let execution_time_nanos = r.get_u64()?;

    let message = match tag {
        tags::CONNECT_SUCCESS | tags::CLIENT_FAILURE => {
            let header = MessageHeader::new(get_client(r)?, r.get_u64()?, version);
            let outcome = if tag == tags::CLIENT_FAILURE {
                Err(get_exception(r)?)
            } else {
                Ok(get_connect_success(r)?)
            };
            ResponseMessage::Client(Response::new(header, outcome))
        }
        tags::HISTORY_CREATED..=tags::HISTORY_ACKNOWLEDGED | tags::HISTORY_FAILURE => {
            let header = MessageHeader::new(get_history(r)?, r.get_u64()?, version);
            let outcome = match tag {
                tags::HISTORY_CREATED => Ok(LocalHistorySuccess::Created),
                tags::HISTORY_DESTROYED => Ok(LocalHistorySuccess::Destroyed),
                tags::HISTORY_ACKNOWLEDGED => Ok(LocalHistorySuccess::Acknowledged),
                _ => Err(get_exception(r)?),
            };
            ResponseMessage::History(Response::new(header, outcome))
        }
        tags::TX_MODIFY_SUCCESS..=tags::TX_CREATE_SNAPSHOT_SUCCESS | tags::TX_FAILURE => {
            let header = MessageHeader::new(get_transaction(r)?, r.get_u64()?, version);
            let outcome = match tag {
                tags::TX_MODIFY_SUCCESS => Ok(TransactionSuccess::Modify),
                tags::TX_READ_SUCCESS => Ok(TransactionSuccess::Read {
                    data: r.get_option(WireReader::get_bytes)?,
                }),
                tags::TX_EXISTS_SUCCESS => Ok(TransactionSuccess::Exists {
                    exists: r.get_bool()?,
                }),
                tags::TX_INCREMENT_SUCCESS => Ok(TransactionSuccess::IncrementSequence),
                tags::TX_ABORT_SUCCESS => Ok(TransactionSuccess::Abort),
                tags::TX_CAN_COMMIT_SUCCESS => Ok(TransactionSuccess::CanCommit),
                tags::TX_PRE_COMMIT_SUCCESS => Ok(TransactionSuccess::PreCommit),
                tags::TX_COMMIT_SUCCESS => Ok(TransactionSuccess::Commit),
                tags::TX_PURGE_SUCCESS => Ok(TransactionSuccess::Purge),
                tags::TX_SKIP_SUCCESS => Ok(TransactionSuccess::SkipTransactions),
                tags::TX_CREATE_SNAPSHOT_SUCCESS => Ok(TransactionSuccess::CreateSnapshot),
                _ => Err(get_exception(r)?),
            };
            ResponseMessage::Transaction(Response::new(header, outcome))
        }
        tag => {
            return Err(CodecError::UnknownTag {
                what: "response",
                tag,
            });
        }
    };

    Ok(ResponseEnvelope::new(
        session_id,
        tx_sequence,
        execution_time_nanos,
        message,
    ))
}

fn get_connect_success(r: &mut WireReader) -> Result<ClientSuccess> {
    let backend = get_address(r)?;
    let version = u16::try_from(r.get_u64()?).map_err(|_| CodecError::InvalidValue("version"))?;
    let version = AbiVersion::try_from(version)?;
    let max_messages = u32::try_from(r.get_u64()?)
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or(CodecError::InvalidValue("max messages"))?;
    let count = r.get_count()?;
    let mut alternates = Vec::with_capacity(count);
    for _ in 0..count {
        alternates.push(get_address(r)?);
    }
    Ok(ClientSuccess::Connect {
        backend,
        version,
        max_messages,
        alternates,
    })
}
