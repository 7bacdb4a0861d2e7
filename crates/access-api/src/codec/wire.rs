//! Primitive readers and writers whose integer encoding depends on the version.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CodecError, Result};
use crate::version::AbiVersion;

/// Size of the CRC32 trailer carried by checksummed versions.
pub const CHECKSUM_LEN: usize = 4;

/// Maximum length of a LEB128-encoded `u64`.
const MAX_VARINT_LEN: usize = 10;

pub struct WireWriter {
    buf: BytesMut,
    version: AbiVersion,
}

impl WireWriter {
    pub fn new(version: AbiVersion) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u16(version.as_u16());
        Self { buf, version }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Write an unsigned integer: fixed 8 bytes on V1, varint afterwards.
    pub fn put_u64(&mut self, value: u64) {
        if self.version.uses_varint() {
            put_varint(&mut self.buf, value);
        } else {
            self.buf.put_u64(value);
        }
    }

    /// Write a length prefix: fixed 4 bytes on V1, varint afterwards.
    pub fn put_len(&mut self, len: usize) -> Result<()> {
        if self.version.uses_varint() {
            put_varint(&mut self.buf, len as u64);
        } else {
            let len = u32::try_from(len).map_err(|_| CodecError::InvalidValue("length"))?;
            self.buf.put_u32(len);
        }
        Ok(())
    }

    pub fn put_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.put_len(value.len())?;
        self.buf.put_slice(value);
        Ok(())
    }

    pub fn put_str(&mut self, value: &str) -> Result<()> {
        self.put_bytes(value.as_bytes())
    }

    pub fn put_option<T>(
        &mut self,
        value: Option<&T>,
        put: impl FnOnce(&mut Self, &T) -> Result<()>,
    ) -> Result<()> {
        match value {
            Some(value) => {
                self.put_bool(true);
                put(self, value)
            }
            None => {
                self.put_bool(false);
                Ok(())
            }
        }
    }

    /// Close the frame, appending the CRC trailer where the version has one.
    pub fn finish(mut self) -> Bytes {
        if self.version.has_checksum() {
            let checksum = crc32fast::hash(&self.buf);
            self.buf.put_u32(checksum);
        }
        self.buf.freeze()
    }
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        #[allow(clippy::cast_possible_truncation)]
        buf.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u8(value as u8);
}

pub struct WireReader {
    buf: Bytes,
    version: AbiVersion,
}

impl WireReader {
    /// Open a frame: read the version tag and verify the checksum trailer.
    pub fn open(frame: &[u8]) -> Result<Self> {
        if frame.len() < 2 {
            return Err(CodecError::Truncated {
                needed: 2 - frame.len(),
            });
        }
        let version = AbiVersion::try_from(u16::from_be_bytes([frame[0], frame[1]]))?;

        let body = if version.has_checksum() {
            if frame.len() < 2 + CHECKSUM_LEN {
                return Err(CodecError::Truncated {
                    needed: 2 + CHECKSUM_LEN - frame.len(),
                });
            }
            let (covered, trailer) = frame.split_at(frame.len() - CHECKSUM_LEN);
            let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
            let actual = crc32fast::hash(covered);
            if expected != actual {
                return Err(CodecError::ChecksumMismatch { expected, actual });
            }
            &covered[2..]
        } else {
            &frame[2..]
        };

        Ok(Self {
            buf: Bytes::copy_from_slice(body),
            version,
        })
    }

    pub const fn version(&self) -> AbiVersion {
        self.version
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(CodecError::Truncated {
                needed: needed - self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(CodecError::UnknownTag { what: "bool", tag }),
        }
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        if self.version.uses_varint() {
            self.get_varint()
        } else {
            self.ensure(8)?;
            Ok(self.buf.get_u64())
        }
    }

    pub fn get_len(&mut self) -> Result<usize> {
        let len = if self.version.uses_varint() {
            usize::try_from(self.get_varint()?).map_err(|_| CodecError::InvalidValue("length"))?
        } else {
            self.ensure(4)?;
            self.buf.get_u32() as usize
        };
        // A length can never exceed what is left of the frame.
        self.ensure(len)?;
        Ok(len)
    }

    /// Read a count of items each at least one byte long.
    pub fn get_count(&mut self) -> Result<usize> {
        let count = if self.version.uses_varint() {
            usize::try_from(self.get_varint()?).map_err(|_| CodecError::InvalidValue("count"))?
        } else {
            self.ensure(4)?;
            self.buf.get_u32() as usize
        };
        self.ensure(count)?;
        Ok(count)
    }

    pub fn get_bytes(&mut self) -> Result<Bytes> {
        let len = self.get_len()?;
        Ok(self.buf.copy_to_bytes(len))
    }

    pub fn get_string(&mut self, what: &'static str) -> Result<String> {
        let bytes = self.get_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8(what))
    }

    pub fn get_option<T>(&mut self, get: impl FnOnce(&mut Self) -> Result<T>) -> Result<Option<T>> {
        if self.get_bool()? {
            get(self).map(Some)
        } else {
            Ok(None)
        }
    }

    fn get_varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.get_u8()?;
            if i == MAX_VARINT_LEN - 1 && byte > 1 {
                return Err(CodecError::VarintOverflow);
            }
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::VarintOverflow)
    }

    /// Fail if anything is left unread.
    pub fn finish(self) -> Result<()> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(version: AbiVersion, value: u64) -> (usize, u64) {
        let mut writer = WireWriter::new(version);
        writer.put_u64(value);
        let frame = writer.finish();
        let mut reader = WireReader::open(&frame).unwrap();
        let decoded = reader.get_u64().unwrap();
        reader.finish().unwrap();
        (frame.len(), decoded)
    }

    #[test]
    fn test_integer_width_per_version() {
        assert_eq!(round_trip(AbiVersion::V1, 5), (2 + 8, 5));
        assert_eq!(round_trip(AbiVersion::V2, 5), (2 + 1, 5));
        assert_eq!(round_trip(AbiVersion::V3, 300), (2 + 2 + CHECKSUM_LEN, 300));
        assert_eq!(round_trip(AbiVersion::V2, u64::MAX), (2 + 10, u64::MAX));
    }

    #[test]
    fn test_varint_overflow() {
        let mut frame = vec![0, 2];
        frame.extend([0xff; 9]);
        frame.push(0x02);
        let mut reader = WireReader::open(&frame).unwrap();
        assert_eq!(reader.get_u64(), Err(CodecError::VarintOverflow));
    }

    #[test]
    fn test_length_bounded_by_frame() {
        let mut writer = WireWriter::new(AbiVersion::V1);
        writer.put_u64(u64::from(u32::MAX));
        let frame = writer.finish();
        // Reinterpret the first half of the u64 as a huge length prefix.
        let mut reader = WireReader::open(&frame[..6]).unwrap();
        assert!(reader.get_len().is_ok());
        let mut reader = WireReader::open(&[0, 1, 0xff, 0xff, 0xff, 0xff]).unwrap();
        assert!(matches!(reader.get_len(), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut writer = WireWriter::new(AbiVersion::V3);
        writer.put_str("hello").unwrap();
        let mut frame = writer.finish().to_vec();
        frame[4] ^= 0x01;
        assert!(matches!(
            WireReader::open(&frame),
            Err(CodecError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        assert!(matches!(
            WireReader::open(&[0, 42, 1, 2, 3]),
            Err(CodecError::UnsupportedVersion(42))
        ));
    }
}
