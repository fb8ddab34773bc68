use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use ddc_types::{BlobId, NamespaceId};

use crate::error::{StoreError, StoreResult};
use crate::payload::Payload;
use crate::traits::{BlobStore, ByteRange};

type Namespaces = HashMap<NamespaceId, BTreeMap<BlobId, Bytes>>;

/// In-memory blob store.
///
/// Intended for tests and embedding. Blobs are held behind a `RwLock` and
/// shared as reference-counted [`Bytes`], so reads are cheap clones.
pub struct InMemoryBlobStore {
    blobs: RwLock<Namespaces>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of blobs across all namespaces.
    pub fn len(&self) -> usize {
        self.blobs
            .read()
            .expect("lock poisoned")
            .values()
            .map(BTreeMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total stored bytes across all namespaces.
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .read()
            .expect("lock poisoned")
            .values()
            .flat_map(BTreeMap::values)
            .map(|b| b.len() as u64)
            .sum()
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(
        &self,
        namespace: &NamespaceId,
        payload: Payload,
        expected: Option<BlobId>,
    ) -> StoreResult<BlobId> {
        let id = payload.blob_id();
        if let Some(expected) = expected {
            if expected != id {
                return Err(StoreError::HashMismatch {
                    expected: expected.hash(),
                    computed: id.hash(),
                });
            }
        }
        let data = payload.to_bytes().await?;
        let mut map = self.blobs.write().expect("lock poisoned");
        map.entry(namespace.clone())
            .or_default()
            .entry(id)
            .or_insert(data);
        Ok(id)
    }

    async fn get(
        &self,
        namespace: &NamespaceId,
        id: &BlobId,
        range: Option<ByteRange>,
    ) -> StoreResult<Bytes> {
        let data = self
            .blobs
            .read()
            .expect("lock poisoned")
            .get(namespace)
            .and_then(|ns| ns.get(id))
            .cloned()
            .ok_or_else(|| StoreError::BlobNotFound {
                namespace: namespace.clone(),
                id: *id,
            })?;
        match range {
            Some(range) => range.slice(&data),
            None => Ok(data),
        }
    }

    async fn exists(&self, namespace: &NamespaceId, id: &BlobId) -> StoreResult<bool> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map.get(namespace).is_some_and(|ns| ns.contains_key(id)))
    }

    async fn filter_unknown(
        &self,
        namespace: &NamespaceId,
        ids: &[BlobId],
    ) -> StoreResult<Vec<BlobId>> {
        let map = self.blobs.read().expect("lock poisoned");
        let ns = map.get(namespace);
        Ok(ids
            .iter()
            .filter(|id| !ns.is_some_and(|ns| ns.contains_key(*id)))
            .copied()
            .collect())
    }

    async fn delete(&self, namespace: &NamespaceId, id: &BlobId) -> StoreResult<bool> {
        let mut map = self.blobs.write().expect("lock poisoned");
        let Some(ns) = map.get_mut(namespace) else {
            return Ok(false);
        };
        let removed = ns.remove(id).is_some();
        if ns.is_empty() {
            map.remove(namespace);
        }
        Ok(removed)
    }

    async fn list(&self, namespace: &NamespaceId) -> StoreResult<Vec<BlobId>> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map
            .get(namespace)
            .map(|ns| ns.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn delete_namespace(&self, namespace: &NamespaceId) -> StoreResult<u64> {
        let mut map = self.blobs.write().expect("lock poisoned");
        Ok(map.remove(namespace).map_or(0, |ns| ns.len() as u64))
    }

    async fn namespaces(&self) -> StoreResult<Vec<NamespaceId>> {
        let map = self.blobs.read().expect("lock poisoned");
        let mut names: Vec<NamespaceId> = map.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(name: &str) -> NamespaceId {
        NamespaceId::new(name).unwrap()
    }

    // --- put / get ---

    #[tokio::test]
    async fn put_then_get() {
        let store = InMemoryBlobStore::new();
        let id = store
            .put_bytes(&ns("a"), Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(id, BlobId::from_bytes(b"hello"));
        assert_eq!(store.get(&ns("a"), &id, None).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let store = InMemoryBlobStore::new();
        let id1 = store.put_bytes(&ns("a"), Bytes::from_static(b"same")).await.unwrap();
        let id2 = store.put_bytes(&ns("a"), Bytes::from_static(b"same")).await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn put_with_wrong_expected_stores_nothing() {
        let store = InMemoryBlobStore::new();
        let wrong = BlobId::from_bytes(b"something else");
        let err = store
            .put(&ns("a"), Payload::from_bytes(&b"actual"[..]), Some(wrong))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn put_with_matching_expected() {
        let store = InMemoryBlobStore::new();
        let id = BlobId::from_bytes(b"data");
        let stored = store
            .put(&ns("a"), Payload::from_bytes(&b"data"[..]), Some(id))
            .await
            .unwrap();
        assert_eq!(stored, id);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = InMemoryBlobStore::new();
        let err = store
            .get(&ns("a"), &BlobId::from_bytes(b"nope"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BlobNotFound { .. }));
    }

    #[tokio::test]
    async fn get_range() {
        let store = InMemoryBlobStore::new();
        let id = store
            .put_bytes(&ns("a"), Bytes::from_static(b"0123456789"))
            .await
            .unwrap();
        let part = store
            .get(&ns("a"), &id, Some(ByteRange::new(5, Some(3))))
            .await
            .unwrap();
        assert_eq!(part, "567");
    }

    // --- namespaces ---

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let store = InMemoryBlobStore::new();
        let id = store.put_bytes(&ns("a"), Bytes::from_static(b"x")).await.unwrap();
        assert!(store.exists(&ns("a"), &id).await.unwrap());
        assert!(!store.exists(&ns("b"), &id).await.unwrap());
    }

    #[tokio::test]
    async fn delete_namespace_removes_all() {
        let store = InMemoryBlobStore::new();
        store.put_bytes(&ns("a"), Bytes::from_static(b"1")).await.unwrap();
        store.put_bytes(&ns("a"), Bytes::from_static(b"2")).await.unwrap();
        store.put_bytes(&ns("b"), Bytes::from_static(b"3")).await.unwrap();
        assert_eq!(store.delete_namespace(&ns("a")).await.unwrap(), 2);
        assert_eq!(store.namespaces().await.unwrap(), vec![ns("b")]);
    }

    #[tokio::test]
    async fn delete_single_blob() {
        let store = InMemoryBlobStore::new();
        let id = store.put_bytes(&ns("a"), Bytes::from_static(b"1")).await.unwrap();
        assert!(store.delete(&ns("a"), &id).await.unwrap());
        assert!(!store.delete(&ns("a"), &id).await.unwrap());
        assert!(store.namespaces().await.unwrap().is_empty());
    }

    // --- bulk ---

    #[tokio::test]
    async fn filter_unknown_preserves_order() {
        let store = InMemoryBlobStore::new();
        let known = store.put_bytes(&ns("a"), Bytes::from_static(b"k")).await.unwrap();
        let u1 = BlobId::from_bytes(b"u1");
        let u2 = BlobId::from_bytes(b"u2");
        let missing = store
            .filter_unknown(&ns("a"), &[u2, known, u1])
            .await
            .unwrap();
        assert_eq!(missing, vec![u2, u1]);
    }

    #[tokio::test]
    async fn list_is_sorted() {
        let store = InMemoryBlobStore::new();
        for data in [&b"c"[..], b"a", b"b"] {
            store.put_bytes(&ns("a"), Bytes::copy_from_slice(data)).await.unwrap();
        }
        let ids = store.list(&ns("a")).await.unwrap();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 3);
        assert_eq!(store.total_bytes(), 3);
    }

    #[tokio::test]
    async fn fetch_without_presign_is_inline() {
        let store = InMemoryBlobStore::new();
        let id = store.put_bytes(&ns("a"), Bytes::from_static(b"x")).await.unwrap();
        let body = store.fetch(&ns("a"), &id, None, true).await.unwrap();
        assert_eq!(body, crate::traits::BlobBody::Bytes(Bytes::from_static(b"x")));
    }
}
