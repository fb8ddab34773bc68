use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// Length in bytes of a [`ContentHash`].
pub const HASH_LEN: usize = 20;

/// Content hash of a byte payload.
///
/// The first 20 bytes of the BLAKE3 digest of the raw bytes. Identical
/// payloads always produce the same hash, which makes every id built on top
/// of it deduplicatable and verifiable. Serialized as 40 lowercase hex chars.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; HASH_LEN]);

impl ContentHash {
    /// Compute the hash of raw bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self::from_digest(blake3::hash(data).as_bytes())
    }

    /// Truncate a full 32-byte BLAKE3 digest.
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(&digest[..HASH_LEN]);
        Self(arr)
    }

    /// Wrap a pre-computed hash.
    pub const fn from_raw(hash: [u8; HASH_LEN]) -> Self {
        Self(hash)
    }

    /// The raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != HASH_LEN {
            return Err(TypeError::InvalidLength {
                expected: HASH_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

macro_rules! hash_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(ContentHash);

        impl $name {
            /// Wrap an existing content hash.
            pub const fn new(hash: ContentHash) -> Self {
                Self(hash)
            }

            /// The underlying content hash.
            pub fn hash(&self) -> ContentHash {
                self.0
            }

            /// Parse from a hex string.
            pub fn from_hex(s: &str) -> Result<Self, TypeError> {
                ContentHash::from_hex(s).map(Self)
            }

            /// Hex-encoded string representation.
            pub fn to_hex(&self) -> String {
                self.0.to_hex()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.0.short_hex())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl From<ContentHash> for $name {
            fn from(hash: ContentHash) -> Self {
                Self(hash)
            }
        }
    };
}

hash_id!(
    /// Identifier of an immutable blob: the hash of exactly the bytes stored.
    BlobId,
    "BlobId"
);

hash_id!(
    /// Logical identifier for content that may be stored compressed and/or
    /// split into several blobs. It is the hash of the *uncompressed* content.
    ContentId,
    "ContentId"
);

impl BlobId {
    /// Compute the blob id of raw bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(ContentHash::from_bytes(data))
    }
}

impl ContentId {
    /// Compute the content id of uncompressed bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(ContentHash::from_bytes(data))
    }
}

/// A blob is a degenerate single-chunk content id.
impl From<BlobId> for ContentId {
    fn from(id: BlobId) -> Self {
        Self(id.0)
    }
}
