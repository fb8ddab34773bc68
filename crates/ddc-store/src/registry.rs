use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{StoreError, StoreResult};
use crate::filesystem::FileSystemBlobStore;
use crate::memory::InMemoryBlobStore;
use crate::traits::BlobStore;

/// Settings handed to a backend factory.
#[derive(Clone, Debug, Default)]
pub struct BackendSettings {
    /// Root directory for backends that persist locally.
    pub root: PathBuf,
}

/// Builds a blob store from settings.
pub type BlobStoreFactory =
    Box<dyn Fn(BackendSettings) -> BoxFuture<'static, StoreResult<Arc<dyn BlobStore>>> + Send + Sync>;

/// Explicit map from backend scheme to factory.
///
/// Backends are registered by name at startup; there is no discovery.
pub struct BlobStoreRegistry {
    factories: BTreeMap<String, BlobStoreFactory>,
}

impl BlobStoreRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with the `memory` and `file` backends.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("memory", Box::new(memory_backend));
        registry.register("file", Box::new(file_backend));
        registry
    }

    /// Register or replace a backend.
    pub fn register(&mut self, scheme: impl Into<String>, factory: BlobStoreFactory) {
        self.factories.insert(scheme.into(), factory);
    }

    /// Build the backend registered under `scheme`.
    pub async fn build(
        &self,
        scheme: &str,
        settings: BackendSettings,
    ) -> StoreResult<Arc<dyn BlobStore>> {
        let factory = self
            .factories
            .get(scheme)
            .ok_or_else(|| StoreError::UnknownBackend(scheme.to_string()))?;
        tracing::info!(backend = scheme, root = %settings.root.display(), "opening blob store");
        factory(settings).await
    }

    /// Registered scheme names, sorted.
    pub fn schemes(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

fn memory_backend(_: BackendSettings) -> BoxFuture<'static, StoreResult<Arc<dyn BlobStore>>> {
    async { Ok(Arc::new(InMemoryBlobStore::new()) as Arc<dyn BlobStore>) }.boxed()
}

fn file_backend(settings: BackendSettings) -> BoxFuture<'static, StoreResult<Arc<dyn BlobStore>>> {
    async move {
        let store = FileSystemBlobStore::open(settings.root).await?;
        Ok(Arc::new(store) as Arc<dyn BlobStore>)
    }
    .boxed()
}

impl Default for BlobStoreRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
