//! Fixed-width, hash-derived object identifiers (spec §3.1).
//!
//! An `ObjectId` is opaque bytes; its width is a per-repository invariant
//! fixed by the [`HashAlgorithm`] chosen at `init` time (spec §9 open
//! question, resolved: the algorithm never changes after init).

use std::fmt;

use crate::hex_util;

/// A content-addressed object identifier: the hash of an object's canonical
/// bytes (header + payload). Width depends on the repository's configured
/// [`HashAlgorithm`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(Vec<u8>);

impl ObjectId {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex_util::encode_hex(&self.0)
    }

    pub fn from_hex(hex: impl AsRef<[u8]>) -> Option<Self> {
        hex_util::decode_hex(hex).map(Self)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectId").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl serde::Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_hex().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).ok_or_else(|| serde::de::Error::custom("invalid object id hex"))
    }
}

/// Hash algorithm used to derive object ids. Chosen once at `init` time and
/// immutable for the lifetime of the repository (spec §3.1, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum HashAlgorithm {
    /// 256-bit cryptographic hash; the canonical choice.
    Sha256,
    /// Legacy, Git-interoperable 160-bit hash. Only for repos that declare
    /// `[wit] hashAlgorithm=sha1` and need to interoperate with Git tooling.
    Sha1,
}

impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha1 => "sha1",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sha256" => Some(Self::Sha256),
            "sha1" => Some(Self::Sha1),
            _ => None,
        }
    }

    /// Digest width in bytes.
    pub fn id_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha1 => 20,
        }
    }

    /// Hashes `bytes` (the canonical header+payload encoding of an object)
    /// and returns the resulting [`ObjectId`].
    pub fn hash(self, bytes: &[u8]) -> ObjectId {
        match self {
            Self::Sha256 => {
                use sha2::Digest as _;
                let digest = sha2::Sha256::digest(bytes);
                ObjectId::from_bytes(digest.to_vec())
            }
            Self::Sha1 => {
                use sha1::Digest as _;
                let digest = sha1::Sha1::digest(bytes);
                ObjectId::from_bytes(digest.to_vec())
            }
        }
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        Self::Sha256
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let id = ObjectId::from_bytes(vec![0xde, 0xad, 0xbe, 0xef]);
        let hex = id.to_hex();
        assert_eq!(hex, "deadbeef");
        assert_eq!(ObjectId::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn sha256_id_len() {
        let id = HashAlgorithm::Sha256.hash(b"hello");
        assert_eq!(id.len(), 32);
    }

    #[test]
    fn sha1_id_len() {
        let id = HashAlgorithm::Sha1.hash(b"hello");
        assert_eq!(id.len(), 20);
    }

    #[test]
    fn hash_is_deterministic() {
        let a = HashAlgorithm::Sha256.hash(b"same bytes");
        let b = HashAlgorithm::Sha256.hash(b"same bytes");
        assert_eq!(a, b);
    }
}
