use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ddc_log::{LogConfig, SyncMode, WalConfig};
use ddc_refs::{BatchConfig, RefServiceConfig};
use ddc_replication::{HttpSourceConfig, ReplicatorConfig};
use ddc_store::{CodecConfig, PayloadConfig};
use ddc_types::NamespaceId;

use crate::error::{ServerError, ServerResult};

/// Server configuration, usually read from a TOML file.
///
/// Every section and field is optional; anything left out takes its
/// default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Root for blobs, ref metadata, WAL files, and spilled uploads.
    pub data_root: PathBuf,
    pub storage: StorageConfig,
    pub payload: PayloadSettings,
    pub batch: BatchSettings,
    pub replication: ReplicationSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 57001)),
            data_root: PathBuf::from("./ddc-data"),
            storage: StorageConfig::default(),
            payload: PayloadSettings::default(),
            batch: BatchSettings::default(),
            replication: ReplicationSettings::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Blob store backend scheme: `memory` or `file`.
    pub backend: String,
    /// Chunk size for content stored under a content id.
    pub chunk_size: usize,
    pub inline_max_bytes: usize,
    pub compression_level: i32,
    /// Largest uncompressed length a compressed upload may declare.
    pub max_content_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "memory".into(),
            chunk_size: 4 * 1024 * 1024,
            inline_max_bytes: RefServiceConfig::default().inline_max_bytes,
            compression_level: CodecConfig::default().level,
            max_content_bytes: CodecConfig::default().max_content_len,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadSettings {
    pub spill_threshold_bytes: usize,
    pub slow_client_timeout_secs: u64,
    pub max_body_bytes: u64,
}

impl Default for PayloadSettings {
    fn default() -> Self {
        let defaults = PayloadConfig::default();
        Self {
            spill_threshold_bytes: defaults.spill_threshold,
            slow_client_timeout_secs: defaults.chunk_timeout.as_secs(),
            max_body_bytes: defaults.max_size,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub max_parallelism: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_parallelism: BatchConfig::default().max_parallelism,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationSettings {
    pub partition_secs: u64,
    pub retained_partitions: usize,
    /// Namespace that holds snapshot blobs.
    pub snapshot_namespace: String,
    /// Persist the log to per-namespace WAL files under `data_root/wal`.
    pub wal_enabled: bool,
    /// fsync every WAL append.
    pub wal_sync: bool,
    pub max_tail_count: usize,
    /// Remote namespaces this node follows, one `[[replication.replicators]]`
    /// table each.
    pub replicators: Vec<ReplicatorSettings>,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        let log = LogConfig::default();
        Self {
            partition_secs: log.partition_secs,
            retained_partitions: log.retained_partitions,
            snapshot_namespace: "ddc-snapshots".into(),
            wal_enabled: false,
            wal_sync: false,
            max_tail_count: log.max_tail_count,
            replicators: Vec::new(),
        }
    }
}

/// One replicator: follow `namespace` on the node at `source_url`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicatorSettings {
    /// Names the replicator's saved progress.
    pub name: String,
    pub namespace: String,
    pub source_url: String,
    /// Bearer token presented to the source.
    pub token: Option<String>,
    pub interval_secs: u64,
    pub request_timeout_secs: u64,
    pub page_size: usize,
    pub max_mirror_rounds: usize,
}

impl Default for ReplicatorSettings {
    fn default() -> Self {
        let replicator = ReplicatorConfig::default();
        Self {
            name: String::new(),
            namespace: String::new(),
            source_url: String::new(),
            token: None,
            interval_secs: 15,
            request_timeout_secs: 30,
            page_size: replicator.page_size,
            max_mirror_rounds: replicator.max_mirror_rounds,
        }
    }
}

impl ReplicatorSettings {
    pub fn namespace_id(&self) -> ServerResult<NamespaceId> {
        NamespaceId::new(self.namespace.as_str()).map_err(|e| {
            ServerError::Config(format!("replicator {:?}: namespace: {e}", self.name))
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn source_config(&self) -> ServerResult<HttpSourceConfig> {
        if self.source_url.is_empty() {
            return Err(ServerError::Config(format!(
                "replicator {:?}: source_url is required",
                self.name
            )));
        }
        Ok(HttpSourceConfig {
            base_url: self.source_url.clone(),
            token: self.token.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
        })
    }

    pub fn replicator_config(&self) -> ReplicatorConfig {
        ReplicatorConfig {
            page_size: self.page_size.max(1),
            max_mirror_rounds: self.max_mirror_rounds,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(s: &str) -> ServerResult<Self> {
        toml::from_str(s).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Whether ref metadata and the snapshot registry live on disk.
    pub fn is_persistent(&self) -> bool {
        self.storage.backend != "memory"
    }

    pub fn blob_root(&self) -> PathBuf {
        self.data_root.join("blobs")
    }

    pub fn refs_path(&self) -> PathBuf {
        self.data_root.join("refs.json")
    }

    pub fn snapshots_path(&self) -> PathBuf {
        self.data_root.join("snapshots.json")
    }

    /// Saved progress of every configured replicator.
    pub fn replicators_path(&self) -> PathBuf {
        self.data_root.join("replicators.json")
    }

    pub fn snapshot_namespace(&self) -> ServerResult<NamespaceId> {
        NamespaceId::new(self.replication.snapshot_namespace.as_str())
            .map_err(|e| ServerError::Config(format!("replication.snapshot_namespace: {e}")))
    }

    pub fn codec_config(&self) -> CodecConfig {
        CodecConfig {
            level: self.storage.compression_level,
            max_content_len: self.storage.max_content_bytes,
            ..CodecConfig::default()
        }
    }

    pub fn ref_service_config(&self) -> RefServiceConfig {
        RefServiceConfig {
            inline_max_bytes: self.storage.inline_max_bytes,
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_parallelism: self.batch.max_parallelism,
        }
    }

    pub fn payload_config(&self) -> PayloadConfig {
        PayloadConfig {
            spill_threshold: self.payload.spill_threshold_bytes,
            spill_dir: self.is_persistent().then(|| self.data_root.join("tmp")),
            chunk_timeout: Duration::from_secs(self.payload.slow_client_timeout_secs.max(1)),
            max_size: self.payload.max_body_bytes,
        }
    }

    pub fn log_config(&self) -> LogConfig {
        let r = &self.replication;
        LogConfig {
            partition_secs: r.partition_secs,
            retained_partitions: r.retained_partitions,
            max_tail_count: r.max_tail_count,
            wal_dir: r.wal_enabled.then(|| self.data_root.join("wal")),
            wal: WalConfig {
                sync_mode: if r.wal_sync {
                    SyncMode::EveryWrite
                } else {
                    SyncMode::OsDefault
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = ServerConfig::default();
        assert_eq!(c.bind_addr, "127.0.0.1:57001".parse::<SocketAddr>().unwrap());
        assert_eq!(c.storage.backend, "memory");
        assert!(!c.is_persistent());
        assert!(c.log_config().wal_dir.is_none());
        assert!(c.payload_config().spill_dir.is_none());
        assert_eq!(c.snapshot_namespace().unwrap().as_str(), "ddc-snapshots");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = ServerConfig::from_toml_str(
            r#"
            bind_addr = "0.0.0.0:8080"
            data_root = "/var/lib/ddc"

            [storage]
            backend = "file"
            chunk_size = 1024

            [replication]
            wal_enabled = true
            retained_partitions = 4
            "#,
        )
        .unwrap();
        assert_eq!(c.bind_addr.port(), 8080);
        assert_eq!(c.storage.chunk_size, 1024);
        assert_eq!(c.storage.compression_level, CodecConfig::default().level);
        assert_eq!(c.batch, BatchSettings::default());

        let log = c.log_config();
        assert_eq!(log.retained_partitions, 4);
        assert_eq!(log.wal_dir, Some(PathBuf::from("/var/lib/ddc/wal")));
        assert_eq!(
            c.payload_config().spill_dir,
            Some(PathBuf::from("/var/lib/ddc/tmp"))
        );
        assert_eq!(c.blob_root(), PathBuf::from("/var/lib/ddc/blobs"));
    }

    #[test]
    fn replicator_tables_parse() {
        let c = ServerConfig::from_toml_str(
            r#"
            [[replication.replicators]]
            name = "from-a"
            namespace = "shaders"
            source_url = "http://cache-a:57001"
            token = "secret"

            [[replication.replicators]]
            name = "from-b"
            namespace = "textures"
            source_url = "http://cache-b:57001"
            interval_secs = 60
            "#,
        )
        .unwrap();
        let [a, b] = c.replication.replicators.as_slice() else {
            panic!("expected two replicators");
        };
        assert_eq!(a.namespace_id().unwrap().as_str(), "shaders");
        assert_eq!(a.source_config().unwrap().token.as_deref(), Some("secret"));
        assert_eq!(a.interval(), Duration::from_secs(15));
        assert_eq!(b.interval(), Duration::from_secs(60));
        assert_eq!(b.replicator_config().page_size, ReplicatorConfig::default().page_size);
        assert_eq!(c.replicators_path(), PathBuf::from("./ddc-data/replicators.json"));
    }

    #[test]
    fn replicator_without_source_is_config_error() {
        let settings = ReplicatorSettings {
            name: "r".into(),
            namespace: "ns".into(),
            ..ReplicatorSettings::default()
        };
        assert!(matches!(settings.source_config(), Err(ServerError::Config(_))));
        let settings = ReplicatorSettings {
            namespace: "not a name".into(),
            ..settings
        };
        assert!(matches!(settings.namespace_id(), Err(ServerError::Config(_))));
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = ServerConfig::from_toml_str("bind_addr = 12").unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn invalid_snapshot_namespace_is_rejected() {
        let mut c = ServerConfig::default();
        c.replication.snapshot_namespace = "bad name".into();
        assert!(matches!(c.snapshot_namespace(), Err(ServerError::Config(_))));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ddc.toml");
        std::fs::write(&path, "[batch]\nmax_parallelism = 3\n").unwrap();
        assert_eq!(ServerConfig::load(&path).unwrap().batch.max_parallelism, 3);
        assert!(ServerConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
