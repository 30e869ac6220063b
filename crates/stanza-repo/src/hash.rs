//! Content-addressed identifiers
//!
//! [`ContentId`] is the Blake3 hash of a stored blob. [`ObjectId`] names a
//! structured object (file or directory) and is the content id of its
//! serialized form.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A 32-byte content hash (Blake3)
///
/// Immutable and cheap to clone (Copy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentId([u8; 32]);

impl ContentId {
    /// Create a new id from raw bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get reference to the underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create id from byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HashError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| HashError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Compute Blake3 hash of arbitrary data
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Two-character shard prefix used for on-disk layout
    #[inline]
    #[must_use]
    pub fn shard(&self) -> String {
        hex::encode(&self.0[..1])
    }
}

impl Display for ContentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ContentId {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl serde::Serialize for ContentId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ContentId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifier of a structured repository object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ObjectId(ContentId);

impl ObjectId {
    /// Wrap the content id of a serialized object
    #[inline]
    #[must_use]
    pub const fn new(id: ContentId) -> Self {
        Self(id)
    }

    /// Content id of the serialized object
    #[inline]
    #[must_use]
    pub const fn content_id(&self) -> ContentId {
        self.0
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for ObjectId {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Errors that can occur when parsing identifiers
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// Invalid hash length
    #[error("invalid hash length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected byte count
        expected: usize,
        /// Actual byte count
        actual: usize,
    },

    /// Hex encoding error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_deterministic() {
        assert_eq!(ContentId::compute(b"hello"), ContentId::compute(b"hello"));
        assert_ne!(ContentId::compute(b"data1"), ContentId::compute(b"data2"));
    }

    #[test]
    fn display_and_parse() {
        let id = ContentId::compute(b"test");
        let parsed: ContentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);

        let oid = ObjectId::new(id);
        assert_eq!(oid.to_string(), id.to_string());
        assert_eq!(oid.to_string().parse::<ObjectId>().unwrap(), oid);
    }

    #[test]
    fn from_slice_invalid_length() {
        let result = ContentId::from_slice(&[1u8; 31]);
        assert!(matches!(
            result,
            Err(HashError::InvalidLength {
                expected: 32,
                actual: 31
            })
        ));
    }

    #[test]
    fn parse_rejects_non_hex() {
        assert!(matches!(
            "zz".parse::<ContentId>(),
            Err(HashError::HexDecode(_))
        ));
    }

    #[test]
    fn shard_is_prefix() {
        let id = ContentId::compute(b"test");
        assert_eq!(id.shard().len(), 2);
        assert!(id.to_string().starts_with(&id.shard()));
    }

    #[test]
    fn serde_hex_roundtrip() {
        let id = ContentId::compute(b"serde");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: ContentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
