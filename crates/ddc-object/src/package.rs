use serde::{Deserialize, Serialize};

use ddc_types::ContentHash;

use crate::error::{ObjectError, ObjectResult};
use crate::object::{decode_framed, encode_framed, AttachmentKind, DdcObject};

const PACKAGE_MAGIC: &[u8; 4] = b"DDCP";

/// One attachment carried inside a package.
///
/// For binary and object attachments `data` is the blob; for content-id
/// attachments it is the full uncompressed content. Either way `data` hashes
/// to `hash`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagePart {
    pub hash: ContentHash,
    pub kind: AttachmentKind,
    pub data: Vec<u8>,
}

/// A root object bundled with the bytes of every attachment it reaches.
///
/// This is the structured response format for roots that cannot be unwrapped
/// into a single octet stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPackage {
    pub root: Vec<u8>,
    pub parts: Vec<PackagePart>,
}

impl ObjectPackage {
    pub fn new(root: Vec<u8>) -> Self {
        Self {
            root,
            parts: Vec::new(),
        }
    }

    /// Add a part. Parts with a hash already present are skipped.
    pub fn push(&mut self, kind: AttachmentKind, data: Vec<u8>) {
        let hash = ContentHash::from_bytes(&data);
        if self.get(&hash).is_none() {
            self.parts.push(PackagePart { hash, kind, data });
        }
    }

    pub fn get(&self, hash: &ContentHash) -> Option<&PackagePart> {
        self.parts.iter().find(|p| p.hash == *hash)
    }

    /// Decode the root object.
    pub fn root_object(&self) -> ObjectResult<DdcObject> {
        DdcObject::from_bytes(&self.root)
    }

    /// Check every part's bytes against its declared hash.
    pub fn verify(&self) -> ObjectResult<()> {
        for part in &self.parts {
            if ContentHash::from_bytes(&part.data) != part.hash {
                return Err(ObjectError::Decode(format!(
                    "package part {} does not match its hash",
                    part.hash
                )));
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> ObjectResult<Vec<u8>> {
        encode_framed(PACKAGE_MAGIC, self)
    }

    pub fn from_bytes(data: &[u8]) -> ObjectResult<Self> {
        decode_framed(PACKAGE_MAGIC, data)
    }
}
