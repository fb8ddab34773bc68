//! Named, versioned refs for the derived-data cache.
//!
//! A ref maps `(namespace, bucket, key)` to a root object. Refs are written
//! in two phases: PUT stores the root and reports which referenced blobs and
//! content ids are still missing (the "needs" list); FINALIZE succeeds once
//! the full attachment graph is present. Only finalized refs are readable.

pub mod batch;
pub mod error;
pub mod memory;
pub mod record;
pub mod resolver;
pub mod service;
pub mod traits;

pub use batch::{
    BatchConfig, BatchExecutor, BatchOp, BatchOpKind, BatchOpResult, BatchRequest, BatchResponse,
};
pub use error::{RefError, RefResult};
pub use memory::InMemoryRefStore;
pub use record::{RefKey, RefRecord};
pub use resolver::{NeedsList, ReferenceResolver, ReferenceWalker, ResolvedAttachment, WalkDepth};
pub use service::{PutOutcome, RefService, RefServiceConfig};
pub use traits::RefStore;
