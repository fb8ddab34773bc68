use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ddc_types::{BucketId, NamespaceId, RefId};

use crate::error::RefResult;
use crate::record::RefRecord;

/// Metadata storage for ref records.
///
/// The store holds records only; blob bytes live in the blob store.
/// Implementations must be safe to call concurrently. Per-key ordering is
/// the caller's responsibility.
#[async_trait]
pub trait RefStore: Send + Sync {
    async fn get(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefId,
    ) -> RefResult<Option<RefRecord>>;

    /// Insert or replace a record.
    async fn put(&self, record: RefRecord) -> RefResult<()>;

    /// Update the last access time. Returns `false` if the ref is absent.
    async fn touch(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefId,
        at: DateTime<Utc>,
    ) -> RefResult<bool>;

    /// Remove one record. Returns `true` if it existed.
    async fn delete(&self, namespace: &NamespaceId, bucket: &BucketId, key: &RefId)
        -> RefResult<bool>;

    /// Remove every record in a bucket, returning the removed keys.
    async fn delete_bucket(&self, namespace: &NamespaceId, bucket: &BucketId)
        -> RefResult<Vec<RefId>>;

    /// Remove every record in a namespace, returning the removed addresses.
    async fn delete_namespace(&self, namespace: &NamespaceId)
        -> RefResult<Vec<(BucketId, RefId)>>;

    /// Namespaces holding at least one record, sorted.
    async fn namespaces(&self) -> RefResult<Vec<NamespaceId>>;

    /// Buckets in a namespace, sorted.
    async fn buckets(&self, namespace: &NamespaceId) -> RefResult<Vec<BucketId>>;

    /// Every record in a namespace, sorted by bucket then key.
    async fn records(&self, namespace: &NamespaceId) -> RefResult<Vec<RefRecord>>;
}
