//! Content-addressed blob storage for the derived-data cache.
//!
//! The blob store is the single source of truth for byte content. Every blob
//! is immutable and identified by the hash of exactly the bytes stored, scoped
//! to a namespace.
//!
//! # Components
//!
//! - [`BlobStore`] -- the backend contract (put/get/exists/filter/delete)
//! - [`InMemoryBlobStore`], [`FileSystemBlobStore`] -- backends
//! - [`BlobStoreRegistry`] -- explicit scheme → backend factory map
//! - [`CompressedCodec`] -- zstd block codec for compressed objects
//! - [`ContentService`] -- content ids: chunking, compressed put/get, resolution
//! - [`Payload`] -- request body buffer that spills to disk
//!
//! # Design Rules
//!
//! 1. A blob is never addressable under an id its bytes do not hash to.
//! 2. Writes verify before linking: a failed verify leaves nothing behind.
//! 3. Storing the same bytes twice is a no-op.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod codec;
pub mod content;
pub mod error;
pub mod filesystem;
pub mod memory;
pub mod payload;
pub mod registry;
pub mod traits;

pub use codec::{CodecConfig, CompressedCodec, CompressedHeader, MAX_BLOCK_SIZE};
pub use content::{ContentIdStore, ContentPresence, ContentService, InMemoryContentIdStore};
pub use error::{CodecError, StoreError, StoreResult};
pub use filesystem::FileSystemBlobStore;
pub use memory::InMemoryBlobStore;
pub use payload::{Payload, PayloadConfig, PayloadError};
pub use registry::{BackendSettings, BlobStoreFactory, BlobStoreRegistry};
pub use traits::{BlobBody, BlobStore, ByteRange};
