//! Compacting a namespace's ref state into a snapshot blob.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use ddc_log::{LogCursor, SnapshotInfo, SnapshotRegistry};
use ddc_refs::RefService;
use ddc_types::{BlobId, BucketId, NamespaceId, RefId};

use crate::error::{ReplicationError, ReplicationResult};

/// One finalized ref captured by a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub bucket: BucketId,
    pub key: RefId,
    pub root: BlobId,
}

/// The JSON body of a snapshot blob.
///
/// `cursor` is the newest log cursor observed before the refs were listed,
/// so replaying the log after it converges on the source's state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub namespace: NamespaceId,
    pub created_at: DateTime<Utc>,
    pub cursor: Option<LogCursor>,
    pub refs: Vec<SnapshotEntry>,
}

impl SnapshotDocument {
    pub fn to_bytes(&self) -> ReplicationResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ReplicationError::Serialization(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> ReplicationResult<Self> {
        serde_json::from_slice(data).map_err(|e| ReplicationError::Serialization(e.to_string()))
    }
}

/// Builds snapshots and records them in a [`SnapshotRegistry`].
pub struct SnapshotBuilder {
    refs: Arc<RefService>,
    registry: Arc<SnapshotRegistry>,
}

impl SnapshotBuilder {
    pub fn new(refs: Arc<RefService>, registry: Arc<SnapshotRegistry>) -> Self {
        Self { refs, registry }
    }

    pub fn registry(&self) -> &Arc<SnapshotRegistry> {
        &self.registry
    }

    /// Write every finalized ref of `namespace` into a snapshot blob stored
    /// under `storage_namespace`, and register it as the latest snapshot.
    pub async fn build(
        &self,
        namespace: &NamespaceId,
        storage_namespace: &NamespaceId,
    ) -> ReplicationResult<SnapshotInfo> {
        let cursor = self.refs.log().head(namespace);
        let refs = self
            .refs
            .records(namespace)
            .await?
            .into_iter()
            .filter(|r| r.is_finalized)
            .map(|r| SnapshotEntry {
                bucket: r.bucket,
                key: r.key,
                root: r.root,
            })
            .collect::<Vec<_>>();
        let document = SnapshotDocument {
            namespace: namespace.clone(),
            created_at: Utc::now(),
            cursor,
            refs,
        };

        let blob = self
            .refs
            .blobs()
            .put_bytes(storage_namespace, Bytes::from(document.to_bytes()?))
            .await?;
        let snapshot = SnapshotInfo {
            namespace: namespace.clone(),
            snapshot_blob_id: blob,
            blob_namespace: storage_namespace.clone(),
            created_at: document.created_at,
            cursor: document.cursor.clone(),
        };
        self.registry.register(snapshot.clone());
        info!(
            %namespace,
            snapshot = %blob,
            storage = %storage_namespace,
            refs = document.refs.len(),
            "snapshot created"
        );
        Ok(snapshot)
    }

    /// Read back the document behind a snapshot.
    pub async fn load(&self, snapshot: &SnapshotInfo) -> ReplicationResult<SnapshotDocument> {
        let data = self
            .refs
            .blobs()
            .get(&snapshot.blob_namespace, &snapshot.snapshot_blob_id, None)
            .await?;
        SnapshotDocument::from_bytes(&data)
    }
}
