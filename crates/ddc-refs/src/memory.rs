//! In-memory ref store with an explicit load/flush lifecycle.
//!
//! [`InMemoryRefStore`] keeps every record in ordered maps behind a
//! `RwLock`. A server loads it from a JSON file at startup and flushes it
//! back on shutdown; nothing is persisted in between.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ddc_types::{BucketId, NamespaceId, RefId};

use crate::error::{RefError, RefResult};
use crate::record::RefRecord;
use crate::traits::RefStore;

type Records = BTreeMap<NamespaceId, BTreeMap<(BucketId, RefId), RefRecord>>;

#[derive(Debug, Default)]
pub struct InMemoryRefStore {
    records: RwLock<Records>,
}

impl InMemoryRefStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load records from a JSON file. A missing file yields an empty store.
    pub fn load(path: &Path) -> RefResult<Self> {
        let store = Self::new();
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(store),
            Err(e) => return Err(e.into()),
        };
        let records: Vec<RefRecord> =
            serde_json::from_slice(&data).map_err(|e| RefError::Serialization(e.to_string()))?;
        {
            let mut map = store.records.write().expect("lock poisoned");
            for record in records {
                map.entry(record.namespace.clone())
                    .or_default()
                    .insert((record.bucket.clone(), record.key.clone()), record);
            }
        }
        tracing::info!(path = %path.display(), refs = store.len(), "ref store loaded");
        Ok(store)
    }

    /// Write every record to a JSON file, replacing it atomically.
    pub fn flush(&self, path: &Path) -> RefResult<()> {
        let records: Vec<RefRecord> = {
            let map = self.records.read().expect("lock poisoned");
            map.values().flat_map(|ns| ns.values().cloned()).collect()
        };
        let json = serde_json::to_vec_pretty(&records)
            .map_err(|e| RefError::Serialization(e.to_string()))?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::fs::write(tmp.path(), json)?;
        tmp.persist(path).map_err(|e| RefError::Io(e.error))?;
        tracing::info!(path = %path.display(), refs = records.len(), "ref store flushed");
        Ok(())
    }

    /// Total records across all namespaces.
    pub fn len(&self) -> usize {
        let map = self.records.read().expect("lock poisoned");
        map.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RefStore for InMemoryRefStore {
    async fn get(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefId,
    ) -> RefResult<Option<RefRecord>> {
        let map = self.records.read().expect("lock poisoned");
        Ok(map
            .get(namespace)
            .and_then(|ns| ns.get(&(bucket.clone(), key.clone())))
            .cloned())
    }

    async fn put(&self, record: RefRecord) -> RefResult<()> {
        let mut map = self.records.write().expect("lock poisoned");
        map.entry(record.namespace.clone())
            .or_default()
            .insert((record.bucket.clone(), record.key.clone()), record);
        Ok(())
    }

    async fn touch(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefId,
        at: DateTime<Utc>,
    ) -> RefResult<bool> {
        let mut map = self.records.write().expect("lock poisoned");
        let record = map
            .get_mut(namespace)
            .and_then(|ns| ns.get_mut(&(bucket.clone(), key.clone())));
        Ok(match record {
            Some(record) => {
                record.last_access_time = at;
                true
            }
            None => false,
        })
    }

    async fn delete(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefId,
    ) -> RefResult<bool> {
        let mut map = self.records.write().expect("lock poisoned");
        let Some(ns) = map.get_mut(namespace) else {
            return Ok(false);
        };
        let removed = ns.remove(&(bucket.clone(), key.clone())).is_some();
        if ns.is_empty() {
            map.remove(namespace);
        }
        Ok(removed)
    }

    async fn delete_bucket(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
    ) -> RefResult<Vec<RefId>> {
        let mut map = self.records.write().expect("lock poisoned");
        let Some(ns) = map.get_mut(namespace) else {
            return Ok(Vec::new());
        };
        let keys: Vec<RefId> = ns
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        for key in &keys {
            ns.remove(&(bucket.clone(), key.clone()));
        }
        if ns.is_empty() {
            map.remove(namespace);
        }
        Ok(keys)
    }

    async fn delete_namespace(
        &self,
        namespace: &NamespaceId,
    ) -> RefResult<Vec<(BucketId, RefId)>> {
        let mut map = self.records.write().expect("lock poisoned");
        Ok(map
            .remove(namespace)
            .map(|ns| ns.into_keys().collect())
            .unwrap_or_default())
    }

    async fn namespaces(&self) -> RefResult<Vec<NamespaceId>> {
        let map = self.records.read().expect("lock poisoned");
        Ok(map.keys().cloned().collect())
    }

    async fn buckets(&self, namespace: &NamespaceId) -> RefResult<Vec<BucketId>> {
        let map = self.records.read().expect("lock poisoned");
        let mut buckets: Vec<BucketId> = map
            .get(namespace)
            .map(|ns| ns.keys().map(|(b, _)| b.clone()).collect())
            .unwrap_or_default();
        buckets.dedup();
        Ok(buckets)
    }

    async fn records(&self, namespace: &NamespaceId) -> RefResult<Vec<RefRecord>> {
        let map = self.records.read().expect("lock poisoned");
        Ok(map
            .get(namespace)
            .map(|ns| ns.values().cloned().collect())
            .unwrap_or_default())
    }
}
