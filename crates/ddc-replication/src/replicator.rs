//! Follows a source namespace and mirrors it into a local node.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, TryStreamExt};
use tracing::{debug, info, warn};

use ddc_log::{LogError, LogOp, ReplicationLogEvent, SnapshotInfo};
use ddc_refs::{NeedsList, RefService};
use ddc_store::{Payload, StoreError};
use ddc_types::{BlobId, BucketId, ContentId, NamespaceId, RefId};

use crate::error::{ReplicationError, ReplicationResult};
use crate::snapshot::SnapshotDocument;
use crate::source::ReplicationSource;
use crate::state::{ReplicatorCursor, ReplicatorState, ReplicatorStateStore};

const FETCH_CONCURRENCY: usize = 8;

#[derive(Clone, Debug)]
pub struct ReplicatorConfig {
    /// Events requested per tail call.
    pub page_size: usize,
    /// Put/finalize rounds allowed while pulling a ref's attachments.
    pub max_mirror_rounds: usize,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_mirror_rounds: 32,
        }
    }
}

/// What one replication pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    pub events_applied: usize,
    pub refs_mirrored: usize,
    pub refs_deleted: usize,
    pub snapshot_restored: Option<BlobId>,
}

impl ReplicationReport {
    fn absorb(&mut self, other: ReplicationReport) {
        self.events_applied += other.events_applied;
        self.refs_mirrored += other.refs_mirrored;
        self.refs_deleted += other.refs_deleted;
        if other.snapshot_restored.is_some() {
            self.snapshot_restored = other.snapshot_restored;
        }
    }
}

/// A named replicator for one namespace.
pub struct Replicator {
    name: String,
    namespace: NamespaceId,
    source: Arc<dyn ReplicationSource>,
    local: Arc<RefService>,
    states: Arc<dyn ReplicatorStateStore>,
    config: ReplicatorConfig,
}

impl Replicator {
    pub fn new(
        name: impl Into<String>,
        namespace: NamespaceId,
        source: Arc<dyn ReplicationSource>,
        local: Arc<RefService>,
        states: Arc<dyn ReplicatorStateStore>,
        config: ReplicatorConfig,
    ) -> Self {
        Self {
            name: name.into(),
            namespace,
            source,
            local,
            states,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current persisted state, or a fresh one.
    pub async fn state(&self) -> ReplicationResult<ReplicatorState> {
        Ok(self
            .states
            .load(&self.namespace, &self.name)
            .await?
            .unwrap_or_else(|| ReplicatorState::new(self.namespace.clone(), self.name.clone())))
    }

    /// Read one page from the source and apply it.
    ///
    /// Progress is saved after every page, and also before returning an
    /// error from a partially applied page.
    pub async fn replicate_once(&self) -> ReplicationResult<ReplicationReport> {
        let mut state = self.state().await?;
        let page = match self
            .source
            .tail(&self.namespace, state.cursor.tail_from(), self.config.page_size)
            .await
        {
            Ok(page) => page,
            Err(ReplicationError::UseSnapshot { snapshot, .. }) => {
                return self.bootstrap(&mut state, &snapshot).await;
            }
            Err(ReplicationError::Log(LogError::IncrementalLogNotAvailable { .. })) => {
                warn!(namespace = %self.namespace, replicator = %self.name, "log unavailable and no snapshot");
                return Err(ReplicationError::ResyncRequired {
                    namespace: self.namespace.clone(),
                });
            }
            Err(e) => return Err(e),
        };

        let mut report = ReplicationReport::default();
        if page.events.is_empty() && state.cursor == ReplicatorCursor::Now {
            if let Some(head) = page.head {
                state.cursor = head.into();
            }
        }
        for event in &page.events {
            match self.apply(event).await {
                Ok(applied) => report.absorb(applied),
                Err(e) => {
                    self.save(&mut state).await?;
                    return Err(e);
                }
            }
            state.cursor = event.cursor().into();
            state.events_applied += 1;
        }
        self.save(&mut state).await?;
        debug!(
            namespace = %self.namespace,
            replicator = %self.name,
            events = report.events_applied,
            "replication pass"
        );
        Ok(report)
    }

    /// Keep replicating until a page comes back short.
    pub async fn run_until_caught_up(&self) -> ReplicationResult<ReplicationReport> {
        let mut total = ReplicationReport::default();
        loop {
            let report = self.replicate_once().await?;
            let restored = report.snapshot_restored.is_some();
            let full_page = report.events_applied >= self.config.page_size;
            total.absorb(report);
            if !(restored || full_page) {
                return Ok(total);
            }
        }
    }

    async fn save(&self, state: &mut ReplicatorState) -> ReplicationResult<()> {
        state.updated_at = Utc::now();
        self.states.save(state).await
    }

    async fn apply(&self, event: &ReplicationLogEvent) -> ReplicationResult<ReplicationReport> {
        let (bucket, key) = (&event.ref_bucket, &event.ref_key);
        let mut report = ReplicationReport {
            events_applied: 1,
            ..Default::default()
        };
        match event.op {
            LogOp::Put | LogOp::Finalize => {
                match self.source.get_ref(&self.namespace, bucket, key).await? {
                    Some((root, bytes)) => {
                        self.mirror_ref(bucket, key, root, bytes).await?;
                        report.refs_mirrored = 1;
                    }
                    None => debug!(namespace = %self.namespace, %bucket, %key, "ref gone at source"),
                }
            }
            LogOp::Delete => {
                if self.local.delete(&self.namespace, bucket, key).await? {
                    report.refs_deleted = 1;
                }
            }
        }
        Ok(report)
    }

    /// Rebuild the namespace from a snapshot, then resume after its cursor.
    ///
    /// A snapshot that was already restored is not restored again; the
    /// replicator skips to the source's head instead.
    async fn bootstrap(
        &self,
        state: &mut ReplicatorState,
        snapshot: &SnapshotInfo,
    ) -> ReplicationResult<ReplicationReport> {
        if state.last_snapshot == Some(snapshot.snapshot_blob_id) {
            warn!(
                namespace = %self.namespace,
                replicator = %self.name,
                snapshot = %snapshot.snapshot_blob_id,
                "snapshot cursor no longer in log, resuming from head"
            );
            state.cursor = ReplicatorCursor::Now;
            self.save(state).await?;
            return Ok(ReplicationReport::default());
        }

        let data = self
            .source
            .get_blob(&snapshot.blob_namespace, &snapshot.snapshot_blob_id)
            .await?;
        let document = SnapshotDocument::from_bytes(&data)?;
        let mut report = ReplicationReport {
            snapshot_restored: Some(snapshot.snapshot_blob_id),
            ..Default::default()
        };

        let mut kept = HashSet::with_capacity(document.refs.len());
        for entry in &document.refs {
            let root = self.source.get_blob(&self.namespace, &entry.root).await?;
            self.mirror_ref(&entry.bucket, &entry.key, entry.root, root).await?;
            kept.insert((entry.bucket.clone(), entry.key.clone()));
            report.refs_mirrored += 1;
        }
        for record in self.local.records(&self.namespace).await? {
            if !kept.contains(&(record.bucket.clone(), record.key.clone()))
                && self.local.delete(&self.namespace, &record.bucket, &record.key).await?
            {
                report.refs_deleted += 1;
            }
        }

        state.cursor = match document.cursor {
            Some(cursor) => cursor.into(),
            None => ReplicatorCursor::Now,
        };
        state.last_snapshot = Some(snapshot.snapshot_blob_id);
        self.save(state).await?;
        info!(
            namespace = %self.namespace,
            replicator = %self.name,
            snapshot = %snapshot.snapshot_blob_id,
            refs = report.refs_mirrored,
            "restored from snapshot"
        );
        Ok(report)
    }

    /// Put the root locally, then pull whatever it still needs until the
    /// ref finalizes.
    async fn mirror_ref(&self, bucket: &BucketId, key: &RefId, root: BlobId, bytes: Bytes) -> ReplicationResult<()> {
        let mut outcome = self.local.put(&self.namespace, bucket, key, root, bytes).await?;
        let mut rounds = 0;
        while !outcome.finalized {
            if rounds == self.config.max_mirror_rounds {
                return Err(ReplicationError::IncompleteMirror {
                    namespace: self.namespace.clone(),
                    bucket: bucket.clone(),
                    key: key.clone(),
                    rounds,
                });
            }
            rounds += 1;
            self.fetch(&outcome.needs).await?;
            outcome = self.local.finalize(&self.namespace, bucket, key, root).await?;
        }
        Ok(())
    }

    async fn fetch(&self, needs: &NeedsList) -> ReplicationResult<()> {
        stream::iter(needs.blobs.iter().copied().map(Ok::<_, ReplicationError>))
            .try_for_each_concurrent(FETCH_CONCURRENCY, |id| self.fetch_blob(id))
            .await?;
        stream::iter(needs.content_ids.iter().copied().map(Ok::<_, ReplicationError>))
            .try_for_each_concurrent(FETCH_CONCURRENCY, |id| self.fetch_content(id))
            .await
    }

    async fn fetch_blob(&self, id: BlobId) -> ReplicationResult<()> {
        let data = self.source.get_blob(&self.namespace, &id).await?;
        self.local
            .blobs()
            .put(&self.namespace, Payload::from_bytes(data), Some(id))
            .await?;
        Ok(())
    }

    async fn fetch_content(&self, id: ContentId) -> ReplicationResult<()> {
        let data = self.source.get_content(&self.namespace, &id).await?;
        let stored = self.local.content().put_content(&self.namespace, data).await?;
        if stored != id {
            return Err(StoreError::HashMismatch {
                expected: id.hash(),
                computed: stored.hash(),
            }
            .into());
        }
        Ok(())
    }
}
