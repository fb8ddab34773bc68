use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};

use ddc_types::{BlobId, NamespaceId};

use crate::error::{StoreError, StoreResult};
use crate::payload::Payload;

/// Concurrency used by the default [`BlobStore::filter_unknown`].
const FILTER_CONCURRENCY: usize = 16;

/// A half-open byte range `[offset, offset + length)` within a blob.
///
/// `length: None` reads to the end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    /// Resolve against a blob of `size` bytes, returning `start..end`.
    ///
    /// The end is clamped to the blob size. An offset past the end is an
    /// error; an offset exactly at the end yields an empty range.
    pub fn resolve(&self, size: u64) -> StoreResult<std::ops::Range<u64>> {
        if self.offset > size {
            return Err(StoreError::InvalidRange {
                offset: self.offset,
                size,
            });
        }
        let end = match self.length {
            Some(len) => self.offset.saturating_add(len).min(size),
            None => size,
        };
        Ok(self.offset..end)
    }

    /// Slice an in-memory blob.
    pub fn slice(&self, data: &Bytes) -> StoreResult<Bytes> {
        let range = self.resolve(data.len() as u64)?;
        Ok(data.slice(range.start as usize..range.end as usize))
    }
}

/// Result of a blob read that may be served out of band.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlobBody {
    Bytes(Bytes),
    /// The caller should fetch the blob from this URI instead.
    Redirect(String),
}

/// Backend contract for namespace-scoped, content-addressed blob storage.
///
/// Implementations must guarantee:
/// - `put` verifies the payload hash before the blob becomes visible, and a
///   failed verify leaves nothing behind
/// - storing bytes that already exist is a no-op
/// - reads of a blob return exactly the bytes whose hash is its id
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a payload, returning its id.
    ///
    /// When `expected` is given and the payload does not hash to it, returns
    /// [`StoreError::HashMismatch`] without storing anything.
    async fn put(
        &self,
        namespace: &NamespaceId,
        payload: Payload,
        expected: Option<BlobId>,
    ) -> StoreResult<BlobId>;

    /// Read a blob, or a byte range of it.
    async fn get(
        &self,
        namespace: &NamespaceId,
        id: &BlobId,
        range: Option<ByteRange>,
    ) -> StoreResult<Bytes>;

    /// Check whether a blob exists.
    async fn exists(&self, namespace: &NamespaceId, id: &BlobId) -> StoreResult<bool>;

    /// Remove a blob. Returns `true` if it existed.
    async fn delete(&self, namespace: &NamespaceId, id: &BlobId) -> StoreResult<bool>;

    /// All blob ids in a namespace, sorted.
    async fn list(&self, namespace: &NamespaceId) -> StoreResult<Vec<BlobId>>;

    /// Remove every blob in a namespace. Returns the number removed.
    async fn delete_namespace(&self, namespace: &NamespaceId) -> StoreResult<u64>;

    /// Namespaces known to the store, sorted.
    async fn namespaces(&self) -> StoreResult<Vec<NamespaceId>>;

    /// A URI the client may download the blob from directly.
    async fn presigned_get_uri(
        &self,
        _namespace: &NamespaceId,
        _id: &BlobId,
    ) -> StoreResult<Option<String>> {
        Ok(None)
    }

    /// A URI the client may upload the blob to directly.
    async fn presigned_put_uri(
        &self,
        _namespace: &NamespaceId,
        _id: &BlobId,
    ) -> StoreResult<Option<String>> {
        Ok(None)
    }

    /// Store raw bytes without a declared id.
    async fn put_bytes(&self, namespace: &NamespaceId, data: Bytes) -> StoreResult<BlobId> {
        self.put(namespace, Payload::from_bytes(data), None).await
    }

    /// Return the subset of `ids` not present, preserving input order.
    async fn filter_unknown(
        &self,
        namespace: &NamespaceId,
        ids: &[BlobId],
    ) -> StoreResult<Vec<BlobId>> {
        let checks: Vec<(BlobId, bool)> = stream::iter(ids.iter().copied())
            .map(|id| async move { self.exists(namespace, &id).await.map(|found| (id, found)) })
            .buffered(FILTER_CONCURRENCY)
            .try_collect()
            .await?;
        Ok(checks
            .into_iter()
            .filter_map(|(id, found)| (!found).then_some(id))
            .collect())
    }

    /// Read a blob, preferring a redirect when the caller accepts one and
    /// the backend can produce it. Ranged reads are always served inline.
    async fn fetch(
        &self,
        namespace: &NamespaceId,
        id: &BlobId,
        range: Option<ByteRange>,
        accept_redirect: bool,
    ) -> StoreResult<BlobBody> {
        if accept_redirect && range.is_none() {
            if let Some(uri) = self.presigned_get_uri(namespace, id).await? {
                if !self.exists(namespace, id).await? {
                    return Err(StoreError::BlobNotFound {
                        namespace: namespace.clone(),
                        id: *id,
                    });
                }
                return Ok(BlobBody::Redirect(uri));
            }
        }
        self.get(namespace, id, range).await.map(BlobBody::Bytes)
    }
}
