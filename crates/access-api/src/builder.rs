//! Builder for batched modify requests.

use bytes::Bytes;

use crate::address::Address;
use crate::error::BuildError;
use crate::identifiers::TransactionIdentifier;
use crate::modification::{PersistenceProtocol, TransactionModification};
use crate::path::DataPath;
use crate::request::{MessageHeader, Request, TransactionRequest, TransactionRequestKind};
use crate::version::AbiVersion;

/// Accumulates modifications into a single [`TransactionRequestKind::Modify`] request.
///
/// Setters consume and return the builder. The finished request is immutable.
#[derive(Debug, Clone)]
#[must_use]
pub struct ModifyTransactionRequestBuilder {
    target: TransactionIdentifier,
    reply_to: Address,
    version: AbiVersion,
    sequence: Option<u64>,
    modifications: Vec<TransactionModification>,
    protocol: Option<PersistenceProtocol>,
    error: Option<BuildError>,
}

impl ModifyTransactionRequestBuilder {
    /// Start a request for `target`, replying to `reply_to`.
    pub const fn new(target: TransactionIdentifier, reply_to: Address) -> Self {
        Self {
            target,
            reply_to,
            version: AbiVersion::MAX,
            sequence: None,
            modifications: Vec::new(),
            protocol: None,
            error: None,
        }
    }

    /// Set the request sequence.
    pub const fn sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Set the encoding version.
    pub const fn version(mut self, version: AbiVersion) -> Self {
        self.version = version;
        self
    }

    /// Append a modification.
    pub fn modification(mut self, modification: TransactionModification) -> Self {
        self.modifications.push(modification);
        self
    }

    /// Append several modifications.
    pub fn modifications(
        mut self,
        modifications: impl IntoIterator<Item = TransactionModification>,
    ) -> Self {
        self.modifications.extend(modifications);
        self
    }

    /// Append a write.
    pub fn write(self, path: DataPath, data: Bytes) -> Self {
        self.modification(TransactionModification::Write { path, data })
    }

    /// Append a merge.
    pub fn merge(self, path: DataPath, data: Bytes) -> Self {
        self.modification(TransactionModification::Merge { path, data })
    }

    /// Append a delete.
    pub fn delete(self, path: DataPath) -> Self {
        self.modification(TransactionModification::Delete { path })
    }

    /// Seal the request with a persistence protocol. May be set only once.
    pub fn protocol(mut self, protocol: PersistenceProtocol) -> Self {
        match self.protocol {
            Some(existing) if self.error.is_none() => {
                self.error = Some(BuildError::ProtocolAlreadySet(existing));
            }
            Some(_) => {}
            None => self.protocol = Some(protocol),
        }
        self
    }

    /// Number of modifications collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modifications.len()
    }

    /// Whether no modifications have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modifications.is_empty()
    }

    /// Finish the request.
    ///
    /// # Errors
    ///
    /// Fails if no sequence was set or the protocol was set twice.
    pub fn build(self) -> Result<TransactionRequest, BuildError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let sequence = self.sequence.ok_or(BuildError::MissingSequence)?;
        Ok(Request::new(
            MessageHeader::new(self.target, sequence, self.version),
            self.reply_to,
            TransactionRequestKind::Modify {
                modifications: self.modifications,
                protocol: self.protocol,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::{
        ClientIdentifier, FrontendIdentifier, FrontendType, LocalHistoryIdentifier, MemberName,
    };

    fn target() -> TransactionIdentifier {
        let client = ClientIdentifier::new(
            FrontendIdentifier::new(MemberName::new("m"), FrontendType::new("t")),
            0,
        );
        TransactionIdentifier::new(LocalHistoryIdentifier::standalone(client), 1)
    }

    #[test]
    fn test_build_collects_in_order() {
        let request = ModifyTransactionRequestBuilder::new(target(), Address::new("frontend"))
            .sequence(3)
            .write("/a".parse().unwrap(), Bytes::from_static(b"1"))
            .delete("/b".parse().unwrap())
            .protocol(PersistenceProtocol::Simple)
            .build()
            .unwrap();

        assert_eq!(request.header.sequence, 3);
        let TransactionRequestKind::Modify {
            modifications,
            protocol,
        } = request.kind
        else {
            panic!("expected modify");
        };
        assert_eq!(protocol, Some(PersistenceProtocol::Simple));
        assert_eq!(modifications.len(), 2);
        assert_eq!(modifications[1].path().to_string(), "/b");
    }

    #[test]
    fn test_missing_sequence() {
        let result = ModifyTransactionRequestBuilder::new(target(), Address::new("f")).build();
        assert_eq!(result.unwrap_err(), BuildError::MissingSequence);
    }

    #[test]
    fn test_protocol_set_twice() {
        let result = ModifyTransactionRequestBuilder::new(target(), Address::new("f"))
            .sequence(0)
            .protocol(PersistenceProtocol::Ready)
            .protocol(PersistenceProtocol::Simple)
            .build();
        assert_eq!(
            result.unwrap_err(),
            BuildError::ProtocolAlreadySet(PersistenceProtocol::Ready)
        );
    }
}
