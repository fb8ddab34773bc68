use std::sync::Arc;

use tracing::info;

use ddc_log::{ReplicationLog, SnapshotRegistry};
use ddc_refs::{BatchExecutor, InMemoryRefStore, RefService};
use ddc_replication::{LocalSource, SnapshotBuilder};
use ddc_store::{
    BackendSettings, BlobStoreRegistry, CompressedCodec, ContentService, InMemoryContentIdStore,
    PayloadConfig,
};
use ddc_types::NamespaceId;

use crate::auth::{Action, AllowAll, Identity, NamespaceAccess};
use crate::config::ServerConfig;
use crate::error::{ApiError, ServerResult};

const SNAPSHOT_HISTORY: usize = 8;

/// Shared handles for every request handler.
#[derive(Clone)]
pub struct AppState {
    pub refs: Arc<RefService>,
    pub batch: Arc<BatchExecutor>,
    pub snapshots: Arc<SnapshotBuilder>,
    pub source: Arc<LocalSource>,
    pub access: Arc<dyn NamespaceAccess>,
    pub payload: PayloadConfig,
    pub snapshot_namespace: NamespaceId,
    persistence: Option<Arc<Persistence>>,
}

/// On-disk metadata owned by a persistent server.
struct Persistence {
    refs: Arc<InMemoryRefStore>,
    registry: Arc<SnapshotRegistry>,
    config: ServerConfig,
}

impl AppState {
    /// Build every component from configuration, loading persisted metadata
    /// when the backend is not `memory`.
    pub async fn open(config: &ServerConfig) -> ServerResult<Self> {
        let persistent = config.is_persistent();
        if persistent {
            std::fs::create_dir_all(config.data_root.join("tmp"))?;
        }

        let blobs = BlobStoreRegistry::with_builtin()
            .build(
                &config.storage.backend,
                BackendSettings {
                    root: config.blob_root(),
                },
            )
            .await?;
        let content = ContentService::new(
            blobs,
            Arc::new(InMemoryContentIdStore::new()),
            CompressedCodec::new(config.codec_config()),
            config.storage.chunk_size,
        );

        let ref_store = Arc::new(if persistent {
            InMemoryRefStore::load(&config.refs_path())?
        } else {
            InMemoryRefStore::new()
        });
        let registry = Arc::new(if persistent {
            SnapshotRegistry::load(&config.snapshots_path(), SNAPSHOT_HISTORY)?
        } else {
            SnapshotRegistry::new(SNAPSHOT_HISTORY)
        });
        let log = Arc::new(ReplicationLog::open(config.log_config())?);

        let refs = Arc::new(RefService::new(
            ref_store.clone(),
            content,
            log,
            config.ref_service_config(),
        ));
        info!(
            backend = %config.storage.backend,
            refs = ref_store.len(),
            persistent,
            "storage opened"
        );

        Ok(Self {
            batch: Arc::new(BatchExecutor::new(refs.clone(), config.batch_config())),
            snapshots: Arc::new(SnapshotBuilder::new(refs.clone(), registry.clone())),
            source: Arc::new(LocalSource::new(refs.clone(), registry.clone())),
            refs,
            access: Arc::new(AllowAll),
            payload: config.payload_config(),
            snapshot_namespace: config.snapshot_namespace()?,
            persistence: persistent.then(|| {
                Arc::new(Persistence {
                    refs: ref_store,
                    registry,
                    config: config.clone(),
                })
            }),
        })
    }

    pub fn with_access(mut self, access: Arc<dyn NamespaceAccess>) -> Self {
        self.access = access;
        self
    }

    pub async fn authorize(
        &self,
        identity: &Identity,
        namespace: &NamespaceId,
        actions: &[Action],
    ) -> Result<(), ApiError> {
        if self.access.has_access(identity, namespace, actions).await {
            Ok(())
        } else {
            let wanted = actions.iter().map(Action::to_string).collect::<Vec<_>>().join(",");
            Err(ApiError::forbidden(format!(
                "{} may not {wanted} in {namespace}",
                identity.name
            )))
        }
    }

    /// Write ref metadata and the snapshot registry back to disk.
    pub fn flush(&self) -> ServerResult<()> {
        if let Some(p) = &self.persistence {
            p.refs.flush(&p.config.refs_path())?;
            p.registry.flush(&p.config.snapshots_path())?;
            info!(refs = p.refs.len(), "metadata flushed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ddc_object::DdcObject;
    use ddc_types::{BlobId, BucketId, RefId};

    #[tokio::test]
    async fn memory_state_needs_no_disk() {
        let state = AppState::open(&ServerConfig::default()).await.unwrap();
        assert!(state.persistence.is_none());
        state.flush().unwrap();
    }

    #[tokio::test]
    async fn file_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            data_root: dir.path().to_path_buf(),
            storage: crate::config::StorageConfig {
                backend: "file".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let ns = NamespaceId::new("ns").unwrap();
        let bucket = BucketId::new("b").unwrap();
        let key = RefId::new("k").unwrap();
        let root = DdcObject::builder().string("v", "1").build().to_bytes().unwrap();
        let hash = BlobId::from_bytes(&root);

        {
            let state = AppState::open(&config).await.unwrap();
            let outcome = state
                .refs
                .put(&ns, &bucket, &key, hash, Bytes::from(root.clone()))
                .await
                .unwrap();
            assert!(outcome.finalized);
            state.flush().unwrap();
        }

        let state = AppState::open(&config).await.unwrap();
        let (record, bytes) = state.refs.get_finalized(&ns, &bucket, &key).await.unwrap();
        assert_eq!(record.root, hash);
        assert_eq!(bytes, Bytes::from(root));
    }

    #[tokio::test]
    async fn unknown_backend_fails_to_open() {
        let mut config = ServerConfig::default();
        config.storage.backend = "s3".into();
        assert!(AppState::open(&config).await.is_err());
    }
}
