//! Replication between derived-data cache nodes.
//!
//! A replica follows a source namespace by tailing its replication log and
//! mirroring each ref the log mentions. When the source can no longer serve
//! the replica's cursor it points at its latest snapshot instead: the
//! replica rebuilds the namespace from the snapshot, then resumes tailing
//! from the snapshot's cursor. Without a snapshot the namespace needs a full
//! resync, which is left to the operator.
//!
//! [`LocalSource`] follows a node in the same process; [`HttpSource`]
//! follows a remote node through its HTTP API.

pub mod error;
pub mod http;
pub mod replicator;
pub mod snapshot;
pub mod source;
pub mod state;

pub use error::{ReplicationError, ReplicationResult};
pub use http::{HttpSource, HttpSourceConfig};
pub use replicator::{ReplicationReport, Replicator, ReplicatorConfig};
pub use snapshot::{SnapshotBuilder, SnapshotDocument, SnapshotEntry};
pub use source::{LocalSource, ReplicationSource};
pub use state::{
    FileStateStore, InMemoryStateStore, ReplicatorCursor, ReplicatorState, ReplicatorStateStore,
};
