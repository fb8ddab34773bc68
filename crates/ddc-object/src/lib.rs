//! Binary object format for the derived-data cache.
//!
//! A [`DdcObject`] is an immutable, hash-addressed document of named, typed
//! fields. Some fields are *attachments* that reference other content by
//! hash:
//!
//! - [`FieldValue::BinaryAttachment`] -- a raw blob ([`BlobId`](ddc_types::BlobId))
//! - [`FieldValue::ObjectAttachment`] -- another encoded object, enabling nesting
//! - [`FieldValue::ContentIdAttachment`] -- possibly compressed/chunked content
//!
//! The transitive attachment graph of a ref's root object is everything that
//! must be present for the ref to be complete.
//!
//! # Encoding
//!
//! `"DDCO" | version (u8) | bincode(fields)`. The object's id is the hash of
//! those bytes, so equal objects always encode to equal ids.

pub mod error;
pub mod json;
pub mod object;
pub mod package;

pub use error::{ObjectError, ObjectResult};
pub use object::{
    Attachment, AttachmentKind, DdcObject, Field, FieldValue, ObjectBuilder, PayloadShape,
    MAX_NESTING, RAW_HASH_FIELD, RAW_SIZE_FIELD,
};
pub use package::{ObjectPackage, PackagePart};

/// MIME type of an encoded [`DdcObject`].
pub const OBJECT_CONTENT_TYPE: &str = "application/x-ddc-object";

/// MIME type of an encoded [`ObjectPackage`].
pub const PACKAGE_CONTENT_TYPE: &str = "application/x-ddc-package";
