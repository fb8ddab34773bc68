use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ddc_types::{BlobId, NamespaceId};

use crate::error::{LogError, LogResult};
use crate::event::LogCursor;

/// A compacted copy of a namespace's ref state, stored as a blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub namespace: NamespaceId,
    pub snapshot_blob_id: BlobId,
    /// Namespace of the blob store holding the snapshot blob.
    pub blob_namespace: NamespaceId,
    pub created_at: DateTime<Utc>,
    /// Newest log cursor when the snapshot was taken.
    pub cursor: Option<LogCursor>,
}

/// Known snapshots per namespace, newest last.
pub struct SnapshotRegistry {
    max_history: usize,
    snapshots: RwLock<HashMap<NamespaceId, VecDeque<SnapshotInfo>>>,
}

impl SnapshotRegistry {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history: max_history.max(1),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    /// Record a snapshot. It becomes the namespace's latest.
    pub fn register(&self, info: SnapshotInfo) {
        let mut map = self.snapshots.write().expect("lock poisoned");
        let history = map.entry(info.namespace.clone()).or_default();
        history.push_back(info);
        while history.len() > self.max_history {
            history.pop_front();
        }
    }

    pub fn latest(&self, namespace: &NamespaceId) -> Option<SnapshotInfo> {
        let map = self.snapshots.read().expect("lock poisoned");
        map.get(namespace).and_then(|h| h.back()).cloned()
    }

    /// Snapshots for a namespace, oldest first.
    pub fn history(&self, namespace: &NamespaceId) -> Vec<SnapshotInfo> {
        let map = self.snapshots.read().expect("lock poisoned");
        map.get(namespace)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Load from a JSON file written by [`flush`](Self::flush). A missing
    /// file yields an empty registry.
    pub fn load(path: &Path, max_history: usize) -> LogResult<Self> {
        let registry = Self::new(max_history);
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(registry),
            Err(e) => return Err(e.into()),
        };
        let all: Vec<SnapshotInfo> =
            serde_json::from_slice(&data).map_err(|e| LogError::Serialization(e.to_string()))?;
        for info in all {
            registry.register(info);
        }
        Ok(registry)
    }

    /// Write every known snapshot to a JSON file.
    pub fn flush(&self, path: &Path) -> LogResult<()> {
        let all: Vec<SnapshotInfo> = {
            let map = self.snapshots.read().expect("lock poisoned");
            let mut names: Vec<&NamespaceId> = map.keys().collect();
            names.sort();
            names
                .into_iter()
                .flat_map(|ns| map[ns].iter().cloned())
                .collect()
        };
        let json =
            serde_json::to_vec_pretty(&all).map_err(|e| LogError::Serialization(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl Default for SnapshotRegistry {
    fn default() -> Self {
        Self::new(8)
    }
}
