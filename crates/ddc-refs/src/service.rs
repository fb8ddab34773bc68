//! The ref state machine: absent → unfinalized → finalized.
//!
//! A PUT stores the root object and an unfinalized record, then reports the
//! needs list. When nothing is missing the ref finalizes on the spot.
//! FINALIZE re-checks the full attachment graph and flips the record once it
//! is complete. A new PUT over a finalized ref returns it to unfinalized
//! until re-finalized. Every commit and delete is appended to the
//! replication log.
//!
//! Operations on one `(namespace, bucket, key)` are serialized through a
//! per-key async mutex; different keys proceed independently. Key operations
//! also hold shared locks on their bucket and namespace, which bucket and
//! namespace drops take exclusively, so a drop waits for in-flight writes
//! and no write lands halfway through one.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex as StdMutex, Weak};

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info, warn};

use ddc_crypto::ContentHasher;
use ddc_log::{LogOp, ReplicationLog};
use ddc_object::{Attachment, AttachmentKind, DdcObject, ObjectPackage};
use ddc_store::{BlobStore, ContentService, Payload, StoreError};
use ddc_types::{BlobId, BucketId, NamespaceId, RefId};

use crate::error::{RefError, RefResult};
use crate::record::{RefKey, RefRecord};
use crate::resolver::{NeedsList, ReferenceResolver, WalkDepth};
use crate::traits::RefStore;

/// Stale entries in a lock table are swept past this size.
const LOCK_TABLE_SWEEP: usize = 1024;

#[derive(Clone, Debug)]
pub struct RefServiceConfig {
    /// Root objects up to this size are also kept inline in the record.
    pub inline_max_bytes: usize,
}

impl Default for RefServiceConfig {
    fn default() -> Self {
        Self {
            inline_max_bytes: 64 * 1024,
        }
    }
}

/// Result of a PUT or FINALIZE.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PutOutcome {
    /// Content still missing. Empty exactly when `finalized` is set.
    pub needs: NeedsList,
    pub finalized: bool,
}

impl PutOutcome {
    fn finalized() -> Self {
        Self {
            needs: NeedsList::default(),
            finalized: true,
        }
    }

    fn pending(needs: NeedsList) -> Self {
        Self {
            needs,
            finalized: false,
        }
    }
}

/// Lazily created locks keyed by name, dropped once nobody holds them.
struct LockTable<K, L> {
    table: StdMutex<HashMap<K, Weak<L>>>,
}

impl<K, L> Default for LockTable<K, L> {
    fn default() -> Self {
        Self {
            table: StdMutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, L: Default> LockTable<K, L> {
    fn get(&self, key: K) -> Arc<L> {
        let mut table = self.table.lock().expect("lock poisoned");
        if table.len() >= LOCK_TABLE_SWEEP {
            table.retain(|_, weak| weak.strong_count() > 0);
        }
        match table.get(&key).and_then(Weak::upgrade) {
            Some(lock) => lock,
            None => {
                let lock = Arc::new(L::default());
                table.insert(key, Arc::downgrade(&lock));
                lock
            }
        }
    }
}

/// Held for the duration of one key operation.
struct KeyGuard {
    _namespace: OwnedRwLockReadGuard<()>,
    _bucket: OwnedRwLockReadGuard<()>,
    _key: OwnedMutexGuard<()>,
}

/// Namespace, bucket and key locks, always taken in that order.
#[derive(Default)]
struct RefLocks {
    namespaces: LockTable<NamespaceId, RwLock<()>>,
    buckets: LockTable<(NamespaceId, BucketId), RwLock<()>>,
    keys: LockTable<RefKey, Mutex<()>>,
}

impl RefLocks {
    async fn key(&self, namespace: &NamespaceId, bucket: &BucketId, key: &RefId) -> KeyGuard {
        let ns_lock = self.namespaces.get(namespace.clone());
        let bucket_lock = self.buckets.get((namespace.clone(), bucket.clone()));
        let key_lock = self
            .keys
            .get(RefKey::new(namespace.clone(), bucket.clone(), key.clone()));
        KeyGuard {
            _namespace: ns_lock.read_owned().await,
            _bucket: bucket_lock.read_owned().await,
            _key: key_lock.lock_owned().await,
        }
    }

    async fn bucket(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
    ) -> (OwnedRwLockReadGuard<()>, OwnedRwLockWriteGuard<()>) {
        let ns_lock = self.namespaces.get(namespace.clone());
        let bucket_lock = self.buckets.get((namespace.clone(), bucket.clone()));
        let ns_guard = ns_lock.read_owned().await;
        (ns_guard, bucket_lock.write_owned().await)
    }

    async fn namespace(&self, namespace: &NamespaceId) -> OwnedRwLockWriteGuard<()> {
        self.namespaces.get(namespace.clone()).write_owned().await
    }
}

/// Put/finalize/get/delete over refs, backed by a ref store, the blob
/// store, and the replication log.
pub struct RefService {
    refs: Arc<dyn RefStore>,
    content: ContentService,
    resolver: ReferenceResolver,
    log: Arc<ReplicationLog>,
    config: RefServiceConfig,
    locks: RefLocks,
}

impl RefService {
    pub fn new(
        refs: Arc<dyn RefStore>,
        content: ContentService,
        log: Arc<ReplicationLog>,
        config: RefServiceConfig,
    ) -> Self {
        Self {
            refs,
            resolver: ReferenceResolver::new(content.clone()),
            content,
            log,
            config,
            locks: RefLocks::default(),
        }
    }

    pub fn ref_store(&self) -> &Arc<dyn RefStore> {
        &self.refs
    }

    pub fn content(&self) -> &ContentService {
        &self.content
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        self.content.blobs()
    }

    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    pub fn log(&self) -> &Arc<ReplicationLog> {
        &self.log
    }

    /// Store a root object under a ref and report what it still needs.
    ///
    /// `root_hash` must be the hash of `root`; otherwise nothing changes.
    /// The needs list covers the root's direct attachments. When those are
    /// all present the full graph is checked, and a complete ref is
    /// finalized immediately.
    pub async fn put(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefId,
        root_hash: BlobId,
        root: Bytes,
    ) -> RefResult<PutOutcome> {
        ContentHasher::verify_blob(&root, &root_hash).map_err(|e| RefError::HashMismatch {
            expected: e.expected,
            computed: e.computed,
        })?;
        let object = DdcObject::from_bytes(&root)?;

        let _guard = self.locks.key(namespace, bucket, key).await;

        if let Some(existing) = self.refs.get(namespace, bucket, key).await? {
            if existing.is_finalized && existing.root == root_hash {
                let needs = self
                    .resolver
                    .missing_references(namespace, &object, WalkDepth::Transitive)
                    .await?;
                if needs.is_empty() && self.blobs().exists(namespace, &root_hash).await? {
                    debug!(%namespace, %bucket, %key, "repeat put of finalized ref");
                    return Ok(PutOutcome::finalized());
                }
            }
        }

        let size = root.len();
        self.blobs()
            .put(namespace, Payload::from_bytes(root.clone()), Some(root_hash))
            .await?;
        let mut record = RefRecord {
            namespace: namespace.clone(),
            bucket: bucket.clone(),
            key: key.clone(),
            root: root_hash,
            is_finalized: false,
            last_access_time: Utc::now(),
            inline_payload: (size <= self.config.inline_max_bytes).then(|| root.to_vec()),
        };
        self.refs.put(record.clone()).await?;

        let mut needs = self
            .resolver
            .missing_references(namespace, &object, WalkDepth::Direct)
            .await?;
        if needs.is_empty() {
            needs = self
                .resolver
                .missing_references(namespace, &object, WalkDepth::Transitive)
                .await?;
        }
        debug!(%namespace, %bucket, %key, root = %root_hash, needs = needs.len(), "ref put");
        if !needs.is_empty() {
            return Ok(PutOutcome::pending(needs));
        }

        record.is_finalized = true;
        self.commit(record, LogOp::Put).await?;
        Ok(PutOutcome::finalized())
    }

    /// Finalize a ref once everything it references is present.
    ///
    /// Finalizing an already finalized ref with the same root is a no-op.
    pub async fn finalize(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefId,
        declared_root: BlobId,
    ) -> RefResult<PutOutcome> {
        let _guard = self.locks.key(namespace, bucket, key).await;

        let mut record = self
            .refs
            .get(namespace, bucket, key)
            .await?
            .ok_or_else(|| not_found(namespace, bucket, key))?;
        if record.root != declared_root {
            return Err(RefError::ObjectHashMismatch {
                declared: declared_root,
                stored: record.root,
            });
        }
        if record.is_finalized {
            return Ok(PutOutcome::finalized());
        }

        let root = self.root_bytes(&record).await?;
        let object = DdcObject::from_bytes(&root)?;
        let needs = self
            .resolver
            .missing_references(namespace, &object, WalkDepth::Transitive)
            .await?;
        if !needs.is_empty() {
            warn!(%namespace, %bucket, %key, missing = needs.len(), "finalize with missing references");
            return Ok(PutOutcome::pending(needs));
        }

        record.is_finalized = true;
        self.commit(record, LogOp::Finalize).await?;
        Ok(PutOutcome::finalized())
    }

    /// Persist a finalized record, then log it. A failed append rolls the
    /// record back to unfinalized.
    async fn commit(&self, record: RefRecord, op: LogOp) -> RefResult<()> {
        self.refs.put(record.clone()).await?;
        if let Err(e) = self.log.append(&record.namespace, op, &record.bucket, &record.key) {
            let mut rollback = record;
            rollback.is_finalized = false;
            self.refs.put(rollback).await?;
            return Err(e.into());
        }
        info!(
            namespace = %record.namespace,
            bucket = %record.bucket,
            key = %record.key,
            root = %record.root,
            op = %op,
            "ref finalized"
        );
        Ok(())
    }

    /// The record for a ref, finalized or not. Updates its access time.
    pub async fn get(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefId,
    ) -> RefResult<RefRecord> {
        let mut record = self
            .refs
            .get(namespace, bucket, key)
            .await?
            .ok_or_else(|| not_found(namespace, bucket, key))?;
        let now = Utc::now();
        self.refs.touch(namespace, bucket, key, now).await?;
        record.last_access_time = now;
        Ok(record)
    }

    /// A finalized ref and its root bytes. Unfinalized refs are not found.
    pub async fn get_finalized(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefId,
    ) -> RefResult<(RefRecord, Bytes)> {
        let record = self.get(namespace, bucket, key).await?;
        if !record.is_finalized {
            return Err(not_found(namespace, bucket, key));
        }
        let root = self.root_bytes(&record).await?;
        Ok((record, root))
    }

    /// Root object bytes, from the inline copy or the blob store.
    pub async fn root_bytes(&self, record: &RefRecord) -> RefResult<Bytes> {
        if let Some(inline) = &record.inline_payload {
            return Ok(Bytes::copy_from_slice(inline));
        }
        match self.blobs().get(&record.namespace, &record.root, None).await {
            Ok(bytes) => Ok(bytes),
            Err(StoreError::BlobNotFound { .. }) => Err(RefError::BlobNotFound {
                namespace: record.namespace.clone(),
                id: record.root,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a ref is finalized and its whole graph is present locally.
    pub async fn is_complete(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefId,
    ) -> RefResult<bool> {
        let Some(record) = self.refs.get(namespace, bucket, key).await? else {
            return Ok(false);
        };
        if !record.is_finalized || !self.blobs().exists(namespace, &record.root).await? {
            return Ok(false);
        }
        let mut walker = match self.resolver.walk_root(namespace, &record.root).await {
            Ok(walker) => walker,
            Err(RefError::BlobNotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        loop {
            match walker.next().await {
                Ok(Some(_)) => continue,
                Ok(None) => return Ok(true),
                Err(RefError::MissingBlobs { .. } | RefError::PartialContentId { .. }) => {
                    return Ok(false)
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The subset of `names` that is absent or not finalized.
    pub async fn exists_many(
        &self,
        namespace: &NamespaceId,
        names: &[(BucketId, RefId)],
    ) -> RefResult<Vec<(BucketId, RefId)>> {
        let mut missing = Vec::new();
        for (bucket, key) in names {
            let finalized = self
                .refs
                .get(namespace, bucket, key)
                .await?
                .is_some_and(|r| r.is_finalized);
            if !finalized {
                missing.push((bucket.clone(), key.clone()));
            }
        }
        Ok(missing)
    }

    /// Bundle a root with every attachment it reaches.
    pub async fn package(&self, namespace: &NamespaceId, root: Bytes) -> RefResult<ObjectPackage> {
        let object = DdcObject::from_bytes(&root)?;
        let mut package = ObjectPackage::new(root.to_vec());
        let mut walker = self.resolver.walk(namespace, &object);
        while let Some(resolved) = walker.next().await? {
            let (kind, data) = match resolved.attachment {
                Attachment::Binary(id) => {
                    (AttachmentKind::Binary, self.blobs().get(namespace, &id, None).await?)
                }
                Attachment::Object(id) => {
                    (AttachmentKind::Object, self.blobs().get(namespace, &id, None).await?)
                }
                Attachment::Content(id) => (
                    AttachmentKind::ContentId,
                    self.content.get_content(namespace, &id).await?,
                ),
            };
            package.push(kind, data.to_vec());
        }
        Ok(package)
    }

    /// Delete one ref. Deleting an absent ref returns `false`.
    pub async fn delete(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefId,
    ) -> RefResult<bool> {
        let _guard = self.locks.key(namespace, bucket, key).await;
        let removed = self.refs.delete(namespace, bucket, key).await?;
        if removed {
            self.log.append(namespace, LogOp::Delete, bucket, key)?;
            info!(%namespace, %bucket, %key, "ref deleted");
        }
        Ok(removed)
    }

    /// Delete every ref in a bucket, returning how many were removed.
    pub async fn delete_bucket(&self, namespace: &NamespaceId, bucket: &BucketId) -> RefResult<u64> {
        let _guard = self.locks.bucket(namespace, bucket).await;
        let removed = self.refs.delete_bucket(namespace, bucket).await?;
        for key in &removed {
            self.log.append(namespace, LogOp::Delete, bucket, key)?;
        }
        info!(%namespace, %bucket, refs = removed.len(), "bucket dropped");
        Ok(removed.len() as u64)
    }

    /// Drop a namespace: every ref, blob, and content mapping beneath it.
    pub async fn drop_namespace(&self, namespace: &NamespaceId) -> RefResult<u64> {
        let _guard = self.locks.namespace(namespace).await;
        let removed = self.refs.delete_namespace(namespace).await?;
        for (bucket, key) in &removed {
            self.log.append(namespace, LogOp::Delete, bucket, key)?;
        }
        let blobs = self.blobs().delete_namespace(namespace).await?;
        self.content.delete_namespace(namespace).await?;
        info!(%namespace, refs = removed.len(), blobs, "namespace dropped");
        Ok(removed.len() as u64)
    }

    pub async fn namespaces(&self) -> RefResult<Vec<NamespaceId>> {
        self.refs.namespaces().await
    }

    pub async fn buckets(&self, namespace: &NamespaceId) -> RefResult<Vec<BucketId>> {
        self.refs.buckets(namespace).await
    }

    pub async fn records(&self, namespace: &NamespaceId) -> RefResult<Vec<RefRecord>> {
        self.refs.records(namespace).await
    }
}

fn not_found(namespace: &NamespaceId, bucket: &BucketId, key: &RefId) -> RefError {
    RefError::RefNotFound {
        namespace: namespace.clone(),
        bucket: bucket.clone(),
        key: key.clone(),
    }
}
