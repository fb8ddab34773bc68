use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ddc_types::{BlobId, BucketId, NamespaceId, RefId};

/// Full address of a ref.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefKey {
    pub namespace: NamespaceId,
    pub bucket: BucketId,
    pub key: RefId,
}

impl RefKey {
    pub fn new(namespace: NamespaceId, bucket: BucketId, key: RefId) -> Self {
        Self {
            namespace,
            bucket,
            key,
        }
    }
}

impl fmt::Display for RefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.bucket, self.key)
    }
}

/// Stored metadata for one ref.
///
/// A record is only a valid read target once `is_finalized` is set.
/// `inline_payload`, when present, is byte-identical to the blob `root`
/// addresses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefRecord {
    pub namespace: NamespaceId,
    pub bucket: BucketId,
    pub key: RefId,
    pub root: BlobId,
    pub is_finalized: bool,
    pub last_access_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_payload")]
    pub inline_payload: Option<Vec<u8>>,
}

impl RefRecord {
    pub fn ref_key(&self) -> RefKey {
        RefKey::new(self.namespace.clone(), self.bucket.clone(), self.key.clone())
    }
}

mod hex_payload {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_some(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
