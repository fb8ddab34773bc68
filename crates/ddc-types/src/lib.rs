//! Foundation types for the derived-data cache (DDC).
//!
//! Every other DDC crate depends on `ddc-types`. It defines how content is
//! addressed and how the storage hierarchy is named.
//!
//! # Key Types
//!
//! - [`ContentHash`] -- 20-byte BLAKE3 prefix of some bytes
//! - [`BlobId`] -- hash of an immutable physical blob
//! - [`ContentId`] -- logical identifier of possibly chunked content
//! - [`NamespaceId`], [`BucketId`], [`RefId`] -- the `ns / bucket / key` hierarchy

pub mod error;
pub mod hash;
pub mod names;

pub use error::TypeError;
pub use hash::{BlobId, ContentHash, ContentId, HASH_LEN};
pub use names::{BucketId, NamespaceId, RefId};
