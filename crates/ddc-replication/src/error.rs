use thiserror::Error;

use ddc_log::{LogError, SnapshotInfo};
use ddc_refs::RefError;
use ddc_store::StoreError;
use ddc_types::{BucketId, NamespaceId, RefId};

#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The source cannot serve the cursor; bootstrap from this snapshot.
    #[error("incremental log unavailable for {namespace}; use snapshot {}", .snapshot.snapshot_blob_id)]
    UseSnapshot {
        namespace: NamespaceId,
        snapshot: Box<SnapshotInfo>,
    },

    #[error("namespace {namespace} needs a full resync: log history is gone and no snapshot exists")]
    ResyncRequired { namespace: NamespaceId },

    #[error("ref {namespace}/{bucket}/{key} still incomplete after {rounds} mirror rounds")]
    IncompleteMirror {
        namespace: NamespaceId,
        bucket: BucketId,
        key: RefId,
        rounds: usize,
    },

    #[error("source error: {0}")]
    Source(String),

    /// The request to a remote source never produced a response.
    #[error("HTTP error calling {endpoint}: {source}")]
    Transport {
        endpoint: String,
        source: reqwest::Error,
    },

    /// A remote source answered with an unexpected status.
    #[error("{endpoint} returned {status} {kind}: {detail}")]
    Status {
        endpoint: String,
        status: u16,
        kind: String,
        detail: String,
    },

    #[error("ref error: {0}")]
    Refs(#[from] RefError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ReplicationResult<T> = Result<T, ReplicationError>;
