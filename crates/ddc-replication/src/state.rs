//! Persisted replicator progress.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ddc_log::{LogBucket, LogCursor, TailFrom};
use ddc_types::{BlobId, NamespaceId};

use crate::error::{ReplicationError, ReplicationResult};

/// Where a replicator resumes reading the source log.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ReplicatorCursor {
    /// Nothing replicated yet.
    #[default]
    Beginning,
    /// Skip history; pick up at the source's head on the next read.
    Now,
    /// The last applied event.
    #[serde(rename_all = "camelCase")]
    RefLog {
        last_bucket: LogBucket,
        last_event: Uuid,
    },
}

impl ReplicatorCursor {
    pub fn tail_from(&self) -> TailFrom {
        match self {
            Self::Beginning => TailFrom::Beginning,
            Self::Now => TailFrom::Now,
            Self::RefLog {
                last_bucket,
                last_event,
            } => TailFrom::After(LogCursor::new(last_bucket.clone(), *last_event)),
        }
    }
}

impl From<LogCursor> for ReplicatorCursor {
    fn from(cursor: LogCursor) -> Self {
        Self::RefLog {
            last_bucket: cursor.bucket,
            last_event: cursor.event_id,
        }
    }
}

/// Progress of one named replicator over one namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatorState {
    pub namespace: NamespaceId,
    pub name: String,
    pub cursor: ReplicatorCursor,
    /// The snapshot most recently restored, if any.
    pub last_snapshot: Option<BlobId>,
    pub events_applied: u64,
    pub updated_at: DateTime<Utc>,
}

impl ReplicatorState {
    pub fn new(namespace: NamespaceId, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
            cursor: ReplicatorCursor::Beginning,
            last_snapshot: None,
            events_applied: 0,
            updated_at: Utc::now(),
        }
    }
}

type StateKey = (NamespaceId, String);

/// Storage for replicator states, keyed by `(namespace, name)`.
#[async_trait]
pub trait ReplicatorStateStore: Send + Sync {
    async fn load(&self, namespace: &NamespaceId, name: &str) -> ReplicationResult<Option<ReplicatorState>>;

    async fn save(&self, state: &ReplicatorState) -> ReplicationResult<()>;

    /// Every stored state, ordered by namespace then name.
    async fn list(&self) -> ReplicationResult<Vec<ReplicatorState>>;
}

#[derive(Default)]
pub struct InMemoryStateStore {
    states: RwLock<BTreeMap<StateKey, ReplicatorState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplicatorStateStore for InMemoryStateStore {
    async fn load(&self, namespace: &NamespaceId, name: &str) -> ReplicationResult<Option<ReplicatorState>> {
        let states = self.states.read().expect("lock poisoned");
        Ok(states.get(&(namespace.clone(), name.to_string())).cloned())
    }

    async fn save(&self, state: &ReplicatorState) -> ReplicationResult<()> {
        let mut states = self.states.write().expect("lock poisoned");
        states.insert((state.namespace.clone(), state.name.clone()), state.clone());
        Ok(())
    }

    async fn list(&self) -> ReplicationResult<Vec<ReplicatorState>> {
        let states = self.states.read().expect("lock poisoned");
        Ok(states.values().cloned().collect())
    }
}

/// All states in one JSON file, rewritten atomically on every save.
pub struct FileStateStore {
    path: PathBuf,
    states: RwLock<BTreeMap<StateKey, ReplicatorState>>,
}

impl FileStateStore {
    /// Open the store at `path`. A missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> ReplicationResult<Self> {
        let path = path.into();
        let states = match std::fs::read(&path) {
            Ok(data) => {
                let all: Vec<ReplicatorState> = serde_json::from_slice(&data)
                    .map_err(|e| ReplicationError::Serialization(e.to_string()))?;
                all.into_iter()
                    .map(|s| ((s.namespace.clone(), s.name.clone()), s))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            states: RwLock::new(states),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_all(&self, states: &BTreeMap<StateKey, ReplicatorState>) -> ReplicationResult<()> {
        let all: Vec<&ReplicatorState> = states.values().collect();
        let json = serde_json::to_vec_pretty(&all)
            .map_err(|e| ReplicationError::Serialization(e.to_string()))?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| ReplicationError::Io(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl ReplicatorStateStore for FileStateStore {
    async fn load(&self, namespace: &NamespaceId, name: &str) -> ReplicationResult<Option<ReplicatorState>> {
        let states = self.states.read().expect("lock poisoned");
        Ok(states.get(&(namespace.clone(), name.to_string())).cloned())
    }

    async fn save(&self, state: &ReplicatorState) -> ReplicationResult<()> {
        let mut states = self.states.write().expect("lock poisoned");
        states.insert((state.namespace.clone(), state.name.clone()), state.clone());
        self.write_all(&states)
    }

    async fn list(&self) -> ReplicationResult<Vec<ReplicatorState>> {
        let states = self.states.read().expect("lock poisoned");
        Ok(states.values().cloned().collect())
    }
}
