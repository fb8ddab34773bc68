use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use ddc_types::{BlobId, NamespaceId};

use crate::error::{StoreError, StoreResult};
use crate::payload::Payload;
use crate::traits::{BlobStore, ByteRange};

/// Blob store on the local filesystem.
///
/// Layout: `<root>/<namespace>/<aa>/<bb>/<hex>` where `aa` and `bb` are the
/// first two bytes of the id in hex. Writes land in a dot-prefixed partial
/// file next to the target and are renamed into place, so a blob path only
/// ever holds complete, verified content.
pub struct FileSystemBlobStore {
    root: PathBuf,
}

impl FileSystemBlobStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &NamespaceId) -> PathBuf {
        self.root.join(namespace.as_str())
    }

    fn blob_path(&self, namespace: &NamespaceId, id: &BlobId) -> PathBuf {
        let hex = id.to_hex();
        self.namespace_dir(namespace)
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(hex)
    }

    fn not_found(namespace: &NamespaceId, id: &BlobId) -> StoreError {
        StoreError::BlobNotFound {
            namespace: namespace.clone(),
            id: *id,
        }
    }
}

async fn visible_entries(dir: &Path) -> StoreResult<Vec<(String, PathBuf)>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            out.push((name, entry.path()));
        }
    }
    Ok(out)
}

#[async_trait]
impl BlobStore for FileSystemBlobStore {
    async fn put(
        &self,
        namespace: &NamespaceId,
        payload: Payload,
        expected: Option<BlobId>,
    ) -> StoreResult<BlobId> {
        let id = payload.blob_id();
        if let Some(expected) = expected {
            if expected != id {
                return Err(StoreError::HashMismatch {
                    expected: expected.hash(),
                    computed: id.hash(),
                });
            }
        }

        let path = self.blob_path(namespace, &id);
        if tokio::fs::try_exists(&path).await? {
            return Ok(id);
        }
        let dir = path.parent().unwrap_or(&self.root);
        tokio::fs::create_dir_all(dir).await?;

        let partial = dir.join(format!(".{}.{}.partial", id.to_hex(), uuid::Uuid::now_v7()));
        let written = match payload.spilled_path() {
            Some(spilled) => tokio::fs::copy(spilled, &partial).await.map(|_| ()),
            None => {
                let data = payload.to_bytes().await?;
                write_synced(&partial, &data).await
            }
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }
        tokio::fs::rename(&partial, &path).await?;
        tracing::trace!(%namespace, blob = %id, size = payload.len(), "blob written");
        Ok(id)
    }

    async fn get(
        &self,
        namespace: &NamespaceId,
        id: &BlobId,
        range: Option<ByteRange>,
    ) -> StoreResult<Bytes> {
        let path = self.blob_path(namespace, id);
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Self::not_found(namespace, id))
            }
            Err(e) => return Err(e.into()),
        };
        let Some(range) = range else {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf).await?;
            return Ok(Bytes::from(buf));
        };
        let size = file.metadata().await?.len();
        let span = range.resolve(size)?;
        file.seek(SeekFrom::Start(span.start)).await?;
        let mut buf = vec![0u8; (span.end - span.start) as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn exists(&self, namespace: &NamespaceId, id: &BlobId) -> StoreResult<bool> {
        Ok(tokio::fs::try_exists(self.blob_path(namespace, id)).await?)
    }

    async fn delete(&self, namespace: &NamespaceId, id: &BlobId) -> StoreResult<bool> {
        match tokio::fs::remove_file(self.blob_path(namespace, id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, namespace: &NamespaceId) -> StoreResult<Vec<BlobId>> {
        let mut ids = Vec::new();
        for (_, first) in visible_entries(&self.namespace_dir(namespace)).await? {
            for (_, second) in visible_entries(&first).await? {
                for (name, _) in visible_entries(&second).await? {
                    if let Ok(id) = BlobId::from_hex(&name) {
                        ids.push(id);
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete_namespace(&self, namespace: &NamespaceId) -> StoreResult<u64> {
        let count = self.list(namespace).await?.len() as u64;
        match tokio::fs::remove_dir_all(self.namespace_dir(namespace)).await {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn namespaces(&self) -> StoreResult<Vec<NamespaceId>> {
        let mut names: Vec<NamespaceId> = visible_entries(&self.root)
            .await?
            .into_iter()
            .filter_map(|(name, _)| NamespaceId::new(name).ok())
            .collect();
        names.sort();
        Ok(names)
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}
