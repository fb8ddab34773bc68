use ddc_crypto::HashMismatch;
use ddc_types::{BlobId, ContentHash, ContentId, NamespaceId};

/// Errors from blob and content storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested blob does not exist in the namespace.
    #[error("blob {id} not found in namespace {namespace}")]
    BlobNotFound { namespace: NamespaceId, id: BlobId },

    /// The content id is entirely unknown.
    #[error("content {id} not found in namespace {namespace}")]
    ContentNotFound { namespace: NamespaceId, id: ContentId },

    /// The content id resolves, but some of its chunks are absent.
    #[error("content {id} in namespace {namespace} is missing {} chunk(s)", missing.len())]
    PartialContent {
        namespace: NamespaceId,
        id: ContentId,
        missing: Vec<BlobId>,
    },

    /// Uploaded bytes do not hash to the declared id. Nothing was stored.
    #[error("hash mismatch: declared {expected}, computed {computed}")]
    HashMismatch {
        expected: ContentHash,
        computed: ContentHash,
    },

    /// A range read starts past the end of the blob.
    #[error("range offset {offset} is past the end of a {size}-byte blob")]
    InvalidRange { offset: u64, size: u64 },

    /// No backend is registered under this scheme.
    #[error("unknown storage backend: {0}")]
    UnknownBackend(String),

    /// Compressed buffer could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<HashMismatch> for StoreError {
    fn from(e: HashMismatch) -> Self {
        Self::HashMismatch {
            expected: e.expected,
            computed: e.computed,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the compressed-object codec.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid compressed buffer magic")]
    InvalidMagic,

    #[error("unsupported compressed buffer version: {0}")]
    UnsupportedVersion(u8),

    #[error("compressed buffer truncated at offset {0}")]
    Truncated(usize),

    #[error("invalid compressed buffer header: {0}")]
    InvalidHeader(String),

    #[error("block {block} claims {raw_len} bytes, block size is {block_size}")]
    InvalidBlock {
        block: usize,
        raw_len: u32,
        block_size: u32,
    },

    #[error("CRC32 mismatch in block {block}")]
    CrcMismatch { block: usize },

    #[error("decompressed length {actual} does not match header length {expected}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("decompressed content hashes to {computed}, header declares {expected}")]
    HashMismatch {
        expected: ContentHash,
        computed: ContentHash,
    },

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),
}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
