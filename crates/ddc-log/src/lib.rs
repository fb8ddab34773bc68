//! Replication log for the derived-data cache.
//!
//! Every committed ref mutation is appended to a per-namespace log. Events
//! are grouped into fixed-length time partitions ("log buckets") and ordered
//! by the cursor `(bucket, event_id)`. Old partitions are retired, which is
//! why downstream sites may be told to bootstrap from a snapshot instead.

pub mod error;
pub mod event;
pub mod log;
pub mod snapshot;
pub mod wal;

pub use error::{LogError, LogResult};
pub use event::{LogBucket, LogCursor, LogOp, ReplicationLogEvent};
pub use log::{LogConfig, LogPage, ReplicationLog, TailFrom};
pub use snapshot::{SnapshotInfo, SnapshotRegistry};
pub use wal::{SyncMode, WalConfig, WalRecord, WriteAheadLog};
