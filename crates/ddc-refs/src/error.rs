//! Error types for ref operations.

use thiserror::Error;

use ddc_log::LogError;
use ddc_object::ObjectError;
use ddc_store::StoreError;
use ddc_types::{BlobId, BucketId, ContentHash, ContentId, NamespaceId, RefId};

/// Errors that can occur during ref operations.
#[derive(Debug, Error)]
pub enum RefError {
    /// No record exists for the ref.
    #[error("ref {namespace}/{bucket}/{key} not found")]
    RefNotFound {
        namespace: NamespaceId,
        bucket: BucketId,
        key: RefId,
    },

    /// The root object itself could not be fetched.
    #[error("root object {id} not found in namespace {namespace}")]
    BlobNotFound { namespace: NamespaceId, id: BlobId },

    /// Uploaded root bytes do not hash to the declared root hash.
    #[error("hash mismatch: declared {expected}, computed {computed}")]
    HashMismatch {
        expected: ContentHash,
        computed: ContentHash,
    },

    /// FINALIZE named a root other than the one stored for the ref.
    #[error("object hash mismatch: finalize named {declared}, ref holds {stored}")]
    ObjectHashMismatch { declared: BlobId, stored: BlobId },

    /// A referenced blob is absent.
    #[error("reference is missing {} blob(s) in namespace {namespace}", blobs.len())]
    MissingBlobs {
        namespace: NamespaceId,
        blobs: Vec<BlobId>,
    },

    /// A referenced content id is unknown or some of its chunks are absent.
    #[error("content {id} in namespace {namespace} resolved partially ({} chunk(s) missing)", missing.len())]
    PartialContentId {
        namespace: NamespaceId,
        id: ContentId,
        missing: Vec<BlobId>,
    },

    /// Root object bytes are not a valid object.
    #[error("invalid object: {0}")]
    InvalidObject(#[from] ObjectError),

    /// The batch request itself is malformed.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RefError {
    /// HTTP-style status code, used for per-op batch results.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::RefNotFound { .. }
            | Self::BlobNotFound { .. }
            | Self::MissingBlobs { .. }
            | Self::PartialContentId { .. } => 404,
            Self::HashMismatch { .. }
            | Self::ObjectHashMismatch { .. }
            | Self::InvalidObject(_)
            | Self::InvalidBatch(_) => 400,
            Self::Store(e) => match e {
                StoreError::BlobNotFound { .. }
                | StoreError::ContentNotFound { .. }
                | StoreError::PartialContent { .. } => 404,
                StoreError::HashMismatch { .. } | StoreError::Codec(_) => 400,
                StoreError::InvalidRange { .. } => 416,
                _ => 500,
            },
            Self::Log(LogError::IncrementalLogNotAvailable { .. }) => 400,
            Self::Log(_) | Self::Serialization(_) | Self::Io(_) => 500,
        }
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RefNotFound { .. } => "RefNotFound",
            Self::BlobNotFound { .. } => "BlobNotFound",
            Self::HashMismatch { .. } => "HashMismatch",
            Self::ObjectHashMismatch { .. } => "ObjectHashMismatch",
            Self::MissingBlobs { .. } => "ReferenceIsMissingBlobs",
            Self::PartialContentId { .. } => "PartialReferenceResolve",
            Self::InvalidObject(_) => "InvalidObject",
            Self::InvalidBatch(_) => "InvalidBatch",
            Self::Store(StoreError::BlobNotFound { .. }) => "BlobNotFound",
            Self::Store(StoreError::ContentNotFound { .. }) => "ContentNotFound",
            Self::Store(StoreError::PartialContent { .. }) => "PartialReferenceResolve",
            Self::Store(StoreError::HashMismatch { .. }) => "HashMismatch",
            Self::Store(_) => "StorageError",
            Self::Log(LogError::IncrementalLogNotAvailable { .. }) => "IncrementalLogNotAvailable",
            Self::Log(_) | Self::Serialization(_) | Self::Io(_) => "InternalError",
        }
    }
}

/// Convenience type alias for ref operations.
pub type RefResult<T> = std::result::Result<T, RefError>;
