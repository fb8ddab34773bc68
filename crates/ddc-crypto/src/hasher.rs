use ddc_types::{BlobId, ContentHash};

/// Incremental content hasher.
///
/// Feeds bytes as they arrive (request body chunks, decompressed blocks) and
/// produces the same [`ContentHash`] that [`ContentHash::from_bytes`] would
/// compute over the concatenation.
#[derive(Clone, Default)]
pub struct ContentHasher {
    inner: blake3::Hasher,
    len: u64,
}

impl ContentHasher {
    /// Create an empty hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self.len += data.len() as u64;
        self
    }

    /// Number of bytes hashed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if nothing has been hashed yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Produce the hash of everything fed so far.
    pub fn finalize(&self) -> ContentHash {
        ContentHash::from_digest(self.inner.finalize().as_bytes())
    }

    /// One-shot hash of raw bytes.
    pub fn hash(data: &[u8]) -> ContentHash {
        ContentHash::from_bytes(data)
    }

    /// Verify that `data` hashes to `expected`.
    pub fn verify(data: &[u8], expected: &ContentHash) -> Result<(), HashMismatch> {
        let computed = Self::hash(data);
        if computed == *expected {
            Ok(())
        } else {
            Err(HashMismatch {
                expected: *expected,
                computed,
            })
        }
    }

    /// Verify bytes destined to be stored as a blob.
    pub fn verify_blob(data: &[u8], expected: &BlobId) -> Result<(), HashMismatch> {
        Self::verify(data, &expected.hash())
    }
}

/// The bytes received do not hash to the declared value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("hash mismatch: expected {expected}, computed {computed}")]
pub struct HashMismatch {
    pub expected: ContentHash,
    pub computed: ContentHash,
}
