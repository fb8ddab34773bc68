use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use ddc_types::{BucketId, NamespaceId, RefId};

use crate::error::{LogError, LogResult};
use crate::event::{LogBucket, LogCursor, LogOp, ReplicationLogEvent};
use crate::wal::{WalConfig, WalRecord, WriteAheadLog};

const WAL_EXTENSION: &str = "wal";

/// Tunables for [`ReplicationLog`].
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Length of each log partition in seconds.
    pub partition_secs: u64,
    /// Partitions kept per namespace; older ones are retired on append.
    pub retained_partitions: usize,
    /// Upper bound on events returned by one tail call.
    pub max_tail_count: usize,
    /// Directory for per-namespace WAL files. `None` keeps the log in memory.
    pub wal_dir: Option<PathBuf>,
    pub wal: WalConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            partition_secs: 3600,
            retained_partitions: 48,
            max_tail_count: 1000,
            wal_dir: None,
            wal: WalConfig::default(),
        }
    }
}

/// Where a tail starts reading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TailFrom {
    /// The first event ever written. Fails once history has been retired.
    Beginning,
    /// Nothing now; the page's `head` says where to resume.
    Now,
    /// Strictly after this event.
    After(LogCursor),
}

/// One page of a tail.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPage {
    pub events: Vec<ReplicationLogEvent>,
    /// Newest cursor in the namespace's log at read time.
    pub head: Option<LogCursor>,
}

impl LogPage {
    /// Cursor of the last event in this page.
    pub fn last_cursor(&self) -> Option<LogCursor> {
        self.events.last().map(ReplicationLogEvent::cursor)
    }
}

struct Partition {
    bucket: LogBucket,
    events: Vec<ReplicationLogEvent>,
    /// WAL offset of the partition's first record.
    wal_offset: Option<u64>,
}

#[derive(Default)]
struct NamespaceLog {
    partitions: VecDeque<Partition>,
    pruned_through: Option<LogBucket>,
    wal: Option<WriteAheadLog>,
}

impl NamespaceLog {
    fn head(&self) -> Option<LogCursor> {
        self.partitions
            .back()
            .and_then(|p| p.events.last())
            .map(ReplicationLogEvent::cursor)
    }

    fn insert(&mut self, event: ReplicationLogEvent, wal_offset: Option<u64>) {
        match self.partitions.back_mut() {
            Some(last) if last.bucket == event.bucket => last.events.push(event),
            _ => self.partitions.push_back(Partition {
                bucket: event.bucket.clone(),
                events: vec![event],
                wal_offset,
            }),
        }
    }

    fn forget_through(&mut self, bucket: &LogBucket) {
        while self
            .partitions
            .front()
            .is_some_and(|p| p.bucket <= *bucket)
        {
            self.partitions.pop_front();
        }
        if self.pruned_through.as_ref().map_or(true, |b| b < bucket) {
            self.pruned_through = Some(bucket.clone());
        }
    }

    /// Retire partitions beyond `retained`, compacting the WAL to match.
    fn prune(&mut self, namespace: &NamespaceId, retained: usize) -> LogResult<()> {
        let retained = retained.max(1);
        let mut retired = None;
        while self.partitions.len() > retained {
            if let Some(p) = self.partitions.pop_front() {
                retired = Some(p.bucket);
            }
        }
        let Some(bucket) = retired else {
            return Ok(());
        };
        info!(%namespace, through = %bucket, "retiring replication log partitions");
        self.pruned_through = Some(bucket.clone());

        if let Some(wal) = &self.wal {
            let cut = self
                .partitions
                .front()
                .and_then(|p| p.wal_offset)
                .unwrap_or_else(|| wal.offset());
            wal.checkpoint(cut)?;
            for p in self.partitions.iter_mut() {
                p.wal_offset = p.wal_offset.map(|o| o - cut);
            }
            wal.append(&WalRecord::Pruned(bucket))?;
        }
        Ok(())
    }

    fn collect(&self, partition: usize, position: usize, limit: usize) -> Vec<ReplicationLogEvent> {
        let mut out = Vec::new();
        for (i, p) in self.partitions.iter().enumerate().skip(partition) {
            let start = if i == partition { position } else { 0 };
            for event in p.events.iter().skip(start) {
                if out.len() >= limit {
                    return out;
                }
                out.push(event.clone());
            }
        }
        out
    }
}

/// Append-only, per-namespace log of committed ref mutations.
///
/// Events are totally ordered per namespace by append order, which always
/// agrees with `(bucket, event_id)` cursor order: a new event never lands in
/// a partition older than the newest one.
pub struct ReplicationLog {
    config: LogConfig,
    namespaces: RwLock<HashMap<NamespaceId, NamespaceLog>>,
}

impl ReplicationLog {
    /// Open the log, replaying any WAL files under `config.wal_dir`.
    pub fn open(config: LogConfig) -> LogResult<Self> {
        let mut namespaces = HashMap::new();
        if let Some(dir) = &config.wal_dir {
            std::fs::create_dir_all(dir)?;
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(WAL_EXTENSION) {
                    continue;
                }
                let Some(namespace) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| NamespaceId::new(s).ok())
                else {
                    continue;
                };
                let wal = WriteAheadLog::open(&path, config.wal.clone())?;
                let mut log = NamespaceLog::default();
                for (offset, record) in wal.recover()? {
                    match record {
                        WalRecord::Event(event) => log.insert(event, Some(offset)),
                        WalRecord::Pruned(bucket) => log.forget_through(&bucket),
                    }
                }
                log.wal = Some(wal);
                log.prune(&namespace, config.retained_partitions)?;
                debug!(%namespace, partitions = log.partitions.len(), "replication log recovered");
                namespaces.insert(namespace, log);
            }
        }
        Ok(Self {
            config,
            namespaces: RwLock::new(namespaces),
        })
    }

    /// A log with no persistence.
    pub fn in_memory(config: LogConfig) -> Self {
        Self {
            config: LogConfig {
                wal_dir: None,
                ..config
            },
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Append an event stamped with the current time.
    pub fn append(
        &self,
        namespace: &NamespaceId,
        op: LogOp,
        ref_bucket: &BucketId,
        ref_key: &RefId,
    ) -> LogResult<ReplicationLogEvent> {
        self.append_at(namespace, op, ref_bucket, ref_key, Utc::now())
    }

    /// Append an event stamped with `at`.
    pub fn append_at(
        &self,
        namespace: &NamespaceId,
        op: LogOp,
        ref_bucket: &BucketId,
        ref_key: &RefId,
        at: DateTime<Utc>,
    ) -> LogResult<ReplicationLogEvent> {
        let mut map = self.namespaces.write().expect("lock poisoned");
        let log = match map.entry(namespace.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut log = NamespaceLog::default();
                if let Some(dir) = &self.config.wal_dir {
                    let path = dir.join(format!("{namespace}.{WAL_EXTENSION}"));
                    log.wal = Some(WriteAheadLog::open(&path, self.config.wal.clone())?);
                }
                entry.insert(log)
            }
        };

        let mut bucket = LogBucket::containing(at, self.config.partition_secs);
        if let Some(newest) = log.partitions.back() {
            if newest.bucket > bucket {
                bucket = newest.bucket.clone();
            }
        }
        let event = ReplicationLogEvent {
            namespace: namespace.clone(),
            bucket,
            event_id: Uuid::now_v7(),
            op,
            timestamp: at,
            ref_bucket: ref_bucket.clone(),
            ref_key: ref_key.clone(),
        };

        let offset = match &log.wal {
            Some(wal) => Some(wal.append(&WalRecord::Event(event.clone()))?),
            None => None,
        };
        log.insert(event.clone(), offset);
        log.prune(namespace, self.config.retained_partitions)?;

        debug!(%namespace, op = %op, bucket = %ref_bucket, key = %ref_key, cursor = %event.cursor(), "log append");
        Ok(event)
    }

    /// Read up to `limit` events (capped by `max_tail_count`).
    ///
    /// Fails with [`LogError::IncrementalLogNotAvailable`] when the cursor's
    /// partition has been retired or the cursor names an event the log does
    /// not hold, and when reading from the beginning after any retirement.
    pub fn tail(&self, namespace: &NamespaceId, from: TailFrom, limit: usize) -> LogResult<LogPage> {
        let limit = limit.min(self.config.max_tail_count);
        let map = self.namespaces.read().expect("lock poisoned");
        let unavailable = |cursor: Option<LogCursor>| LogError::IncrementalLogNotAvailable {
            namespace: namespace.clone(),
            cursor,
        };

        let Some(log) = map.get(namespace) else {
            return match from {
                TailFrom::After(cursor) => Err(unavailable(Some(cursor))),
                TailFrom::Beginning | TailFrom::Now => Ok(LogPage::default()),
            };
        };
        let head = log.head();

        let events = match from {
            TailFrom::Now => Vec::new(),
            TailFrom::Beginning => {
                if log.pruned_through.is_some() {
                    return Err(unavailable(None));
                }
                log.collect(0, 0, limit)
            }
            TailFrom::After(cursor) => {
                let Some(partition) = log
                    .partitions
                    .iter()
                    .position(|p| p.bucket == cursor.bucket)
                else {
                    return Err(unavailable(Some(cursor)));
                };
                let Some(position) = log.partitions[partition]
                    .events
                    .iter()
                    .position(|e| e.event_id == cursor.event_id)
                else {
                    return Err(unavailable(Some(cursor)));
                };
                log.collect(partition, position + 1, limit)
            }
        };
        Ok(LogPage { events, head })
    }

    /// Newest cursor in a namespace.
    pub fn head(&self, namespace: &NamespaceId) -> Option<LogCursor> {
        let map = self.namespaces.read().expect("lock poisoned");
        map.get(namespace).and_then(NamespaceLog::head)
    }

    /// Oldest retained partition in a namespace.
    pub fn oldest_bucket(&self, namespace: &NamespaceId) -> Option<LogBucket> {
        let map = self.namespaces.read().expect("lock poisoned");
        map.get(namespace)
            .and_then(|log| log.partitions.front())
            .map(|p| p.bucket.clone())
    }

    /// Retained events in a namespace.
    pub fn len(&self, namespace: &NamespaceId) -> usize {
        let map = self.namespaces.read().expect("lock poisoned");
        map.get(namespace)
            .map(|log| log.partitions.iter().map(|p| p.events.len()).sum())
            .unwrap_or(0)
    }

    /// Namespaces with a log, sorted.
    pub fn namespaces(&self) -> Vec<NamespaceId> {
        let map = self.namespaces.read().expect("lock poisoned");
        let mut names: Vec<NamespaceId> = map.keys().cloned().collect();
        names.sort();
        names
    }
}
