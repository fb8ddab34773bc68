use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use ddc_log::{LogError, LogPage, SnapshotInfo, SnapshotRegistry, TailFrom};
use ddc_refs::{RefError, RefService};
use ddc_types::{BlobId, BucketId, ContentId, NamespaceId, RefId};

use crate::error::{ReplicationError, ReplicationResult};

/// What a replicator needs from the node it follows.
#[async_trait]
pub trait ReplicationSource: Send + Sync {
    /// Read the log. When the cursor cannot be served and a snapshot
    /// exists, fails with [`ReplicationError::UseSnapshot`].
    async fn tail(&self, namespace: &NamespaceId, from: TailFrom, limit: usize) -> ReplicationResult<LogPage>;

    async fn latest_snapshot(&self, namespace: &NamespaceId) -> ReplicationResult<Option<SnapshotInfo>>;

    /// Root hash and bytes of a finalized ref, or `None` if the ref is
    /// absent or not finalized.
    async fn get_ref(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefId,
    ) -> ReplicationResult<Option<(BlobId, Bytes)>>;

    async fn get_blob(&self, namespace: &NamespaceId, id: &BlobId) -> ReplicationResult<Bytes>;

    /// Full uncompressed content behind a content id.
    async fn get_content(&self, namespace: &NamespaceId, id: &ContentId) -> ReplicationResult<Bytes>;
}

/// A source backed by an in-process node.
pub struct LocalSource {
    refs: Arc<RefService>,
    snapshots: Arc<SnapshotRegistry>,
}

impl LocalSource {
    pub fn new(refs: Arc<RefService>, snapshots: Arc<SnapshotRegistry>) -> Self {
        Self { refs, snapshots }
    }
}

#[async_trait]
impl ReplicationSource for LocalSource {
    async fn tail(&self, namespace: &NamespaceId, from: TailFrom, limit: usize) -> ReplicationResult<LogPage> {
        match self.refs.log().tail(namespace, from, limit) {
            Ok(page) => Ok(page),
            Err(e @ LogError::IncrementalLogNotAvailable { .. }) => match self.snapshots.latest(namespace) {
                Some(snapshot) => Err(ReplicationError::UseSnapshot {
                    namespace: namespace.clone(),
                    snapshot: Box::new(snapshot),
                }),
                None => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn latest_snapshot(&self, namespace: &NamespaceId) -> ReplicationResult<Option<SnapshotInfo>> {
        Ok(self.snapshots.latest(namespace))
    }

    async fn get_ref(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefId,
    ) -> ReplicationResult<Option<(BlobId, Bytes)>> {
        match self.refs.get_finalized(namespace, bucket, key).await {
            Ok((record, root)) => Ok(Some((record.root, root))),
            Err(RefError::RefNotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_blob(&self, namespace: &NamespaceId, id: &BlobId) -> ReplicationResult<Bytes> {
        Ok(self.refs.blobs().get(namespace, id, None).await?)
    }

    async fn get_content(&self, namespace: &NamespaceId, id: &ContentId) -> ReplicationResult<Bytes> {
        Ok(self.refs.content().get_content(namespace, id).await?)
    }
}
