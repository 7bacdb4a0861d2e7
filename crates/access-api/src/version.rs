//! ABI versions and version negotiation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Wire format version spoken between a frontend and a backend.
///
/// Versions are totally ordered; newer versions only ever add to what older
/// ones can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
#[repr(u16)]
pub enum AbiVersion {
    /// Fixed-width big-endian integers.
    V1 = 1,
    /// Variable-length integers.
    V2 = 2,
    /// Variable-length integers with a CRC32 frame trailer.
    V3 = 3,
}

impl AbiVersion {
    /// Oldest version this build understands.
    pub const MIN: Self = Self::V1;

    /// Newest version this build understands.
    pub const MAX: Self = Self::V3;

    /// Every supported version, oldest first.
    pub const ALL: [Self; 3] = [Self::V1, Self::V2, Self::V3];

    /// The numeric wire value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether integers are written as LEB128 varints.
    #[must_use]
    pub const fn uses_varint(self) -> bool {
        matches!(self, Self::V2 | Self::V3)
    }

    /// Whether frames carry a CRC32 trailer.
    #[must_use]
    pub const fn has_checksum(self) -> bool {
        matches!(self, Self::V3)
    }
}

impl TryFrom<u16> for AbiVersion {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            other => Err(CodecError::UnsupportedVersion(other)),
        }
    }
}

impl From<AbiVersion> for u16 {
    fn from(value: AbiVersion) -> Self {
        value.as_u16()
    }
}

impl fmt::Display for AbiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.as_u16())
    }
}

/// An inclusive range of ABI versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionRange {
    /// Lowest acceptable version.
    pub min: AbiVersion,
    /// Highest acceptable version.
    pub max: AbiVersion,
}

impl VersionRange {
    /// Create a range. Returns `None` when `min > max`.
    #[must_use]
    pub fn new(min: AbiVersion, max: AbiVersion) -> Option<Self> {
        (min <= max).then_some(Self { min, max })
    }

    /// Every version this build understands.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            min: AbiVersion::MIN,
            max: AbiVersion::MAX,
        }
    }

    /// Whether the range contains `version`.
    #[must_use]
    pub fn contains(&self, version: AbiVersion) -> bool {
        self.min <= version && version <= self.max
    }

    /// The highest version common to both ranges.
    #[must_use]
    pub fn negotiate(&self, other: &Self) -> Option<AbiVersion> {
        let high = self.max.min(other.max);
        let low = self.min.max(other.min);
        (low <= high).then_some(high)
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.min, self.max)
    }
}
