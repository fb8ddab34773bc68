//! Content ids: logical content that may be stored split across blobs.
//!
//! Uploaded content is cut into fixed-size chunks, each stored as an
//! ordinary blob, and the ordered chunk list is recorded under the content
//! id. Resolution turns a content id back into that chunk list. A bare blob
//! is also a valid single-chunk content id when the caller allows it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt, TryStreamExt};

use ddc_types::{BlobId, ContentId, NamespaceId};

use crate::codec::CompressedCodec;
use crate::error::{StoreError, StoreResult};
use crate::traits::BlobStore;

/// Concurrent chunk writes during a content upload.
const CHUNK_WRITE_CONCURRENCY: usize = 8;

/// Persistent map from content id to its ordered chunk list.
#[async_trait]
pub trait ContentIdStore: Send + Sync {
    /// Record (or overwrite) the chunk list for a content id.
    async fn put_mapping(
        &self,
        namespace: &NamespaceId,
        id: ContentId,
        chunks: Vec<BlobId>,
    ) -> StoreResult<()>;

    async fn get_mapping(
        &self,
        namespace: &NamespaceId,
        id: &ContentId,
    ) -> StoreResult<Option<Vec<BlobId>>>;

    /// Drop every mapping in a namespace.
    async fn delete_namespace(&self, namespace: &NamespaceId) -> StoreResult<()>;
}

/// In-memory [`ContentIdStore`].
#[derive(Default)]
pub struct InMemoryContentIdStore {
    mappings: RwLock<HashMap<NamespaceId, HashMap<ContentId, Vec<BlobId>>>>,
}

impl InMemoryContentIdStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentIdStore for InMemoryContentIdStore {
    async fn put_mapping(
        &self,
        namespace: &NamespaceId,
        id: ContentId,
        chunks: Vec<BlobId>,
    ) -> StoreResult<()> {
        self.mappings
            .write()
            .expect("lock poisoned")
            .entry(namespace.clone())
            .or_default()
            .insert(id, chunks);
        Ok(())
    }

    async fn get_mapping(
        &self,
        namespace: &NamespaceId,
        id: &ContentId,
    ) -> StoreResult<Option<Vec<BlobId>>> {
        let map = self.mappings.read().expect("lock poisoned");
        Ok(map.get(namespace).and_then(|ns| ns.get(id)).cloned())
    }

    async fn delete_namespace(&self, namespace: &NamespaceId) -> StoreResult<()> {
        self.mappings.write().expect("lock poisoned").remove(namespace);
        Ok(())
    }
}

/// Availability of a content id's chunks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentPresence {
    /// Resolves and every chunk is stored.
    Present(Vec<BlobId>),
    /// Resolves, but these chunks are missing.
    Partial {
        chunks: Vec<BlobId>,
        missing: Vec<BlobId>,
    },
    /// Does not resolve at all.
    Absent,
}

impl ContentPresence {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }
}

/// Content-id operations layered over a blob store.
#[derive(Clone)]
pub struct ContentService {
    blobs: Arc<dyn BlobStore>,
    mappings: Arc<dyn ContentIdStore>,
    codec: CompressedCodec,
    chunk_size: usize,
}

impl ContentService {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        mappings: Arc<dyn ContentIdStore>,
        codec: CompressedCodec,
        chunk_size: usize,
    ) -> Self {
        Self {
            blobs,
            mappings,
            codec,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn codec(&self) -> &CompressedCodec {
        &self.codec
    }

    /// Map a content id to its ordered chunk list.
    ///
    /// Returns `None` when the id is unknown. A recorded mapping always wins;
    /// otherwise, when `must_be_content_id` is false, a blob with the same
    /// hash is accepted as a single-chunk content id.
    pub async fn resolve(
        &self,
        namespace: &NamespaceId,
        id: &ContentId,
        must_be_content_id: bool,
    ) -> StoreResult<Option<Vec<BlobId>>> {
        if let Some(chunks) = self.mappings.get_mapping(namespace, id).await? {
            return Ok(Some(chunks));
        }
        if must_be_content_id {
            return Ok(None);
        }
        let blob = BlobId::new(id.hash());
        Ok(self
            .blobs
            .exists(namespace, &blob)
            .await?
            .then(|| vec![blob]))
    }

    /// Store uncompressed content as chunks and record its mapping.
    pub async fn put_content(&self, namespace: &NamespaceId, data: Bytes) -> StoreResult<ContentId> {
        let id = ContentId::from_bytes(&data);
        let pieces: Vec<Bytes> = if data.is_empty() {
            vec![data]
        } else {
            (0..data.len())
                .step_by(self.chunk_size)
                .map(|start| data.slice(start..(start + self.chunk_size).min(data.len())))
                .collect()
        };

        let chunks: Vec<BlobId> = stream::iter(pieces)
            .map(|piece| self.blobs.put_bytes(namespace, piece))
            .buffered(CHUNK_WRITE_CONCURRENCY)
            .try_collect()
            .await?;
        tracing::debug!(%namespace, content = %id, chunks = chunks.len(), "content stored");
        self.mappings.put_mapping(namespace, id, chunks).await?;
        Ok(id)
    }

    /// Accept a compressed buffer.
    ///
    /// The buffer is decoded and its content hash verified before anything
    /// is written. When `declared` is given it must match the content id in
    /// the buffer.
    pub async fn put_compressed(
        &self,
        namespace: &NamespaceId,
        buf: &[u8],
        declared: Option<ContentId>,
    ) -> StoreResult<ContentId> {
        let (id, data) = self.codec.decompress(buf)?;
        if let Some(declared) = declared {
            if declared != id {
                return Err(StoreError::HashMismatch {
                    expected: declared.hash(),
                    computed: id.hash(),
                });
            }
        }
        self.put_content(namespace, Bytes::from(data)).await
    }

    /// Reassemble the full uncompressed content.
    pub async fn get_content(&self, namespace: &NamespaceId, id: &ContentId) -> StoreResult<Bytes> {
        let chunks = self
            .resolve(namespace, id, false)
            .await?
            .ok_or_else(|| StoreError::ContentNotFound {
                namespace: namespace.clone(),
                id: *id,
            })?;

        let mut out = BytesMut::new();
        for chunk in &chunks {
            match self.blobs.get(namespace, chunk, None).await {
                Ok(data) => out.extend_from_slice(&data),
                Err(StoreError::BlobNotFound { .. }) => {
                    let missing = self.blobs.filter_unknown(namespace, &chunks).await?;
                    return Err(StoreError::PartialContent {
                        namespace: namespace.clone(),
                        id: *id,
                        missing,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out.freeze())
    }

    /// Reassemble and re-encode as a compressed buffer.
    pub async fn get_compressed(&self, namespace: &NamespaceId, id: &ContentId) -> StoreResult<Vec<u8>> {
        let data = self.get_content(namespace, id).await?;
        Ok(self.codec.compress(&data)?)
    }

    /// Check whether a content id resolves and all its chunks are stored.
    pub async fn presence(
        &self,
        namespace: &NamespaceId,
        id: &ContentId,
        must_be_content_id: bool,
    ) -> StoreResult<ContentPresence> {
        let Some(chunks) = self.resolve(namespace, id, must_be_content_id).await? else {
            return Ok(ContentPresence::Absent);
        };
        let missing = self.blobs.filter_unknown(namespace, &chunks).await?;
        Ok(if missing.is_empty() {
            ContentPresence::Present(chunks)
        } else {
            ContentPresence::Partial { chunks, missing }
        })
    }

    /// Return the subset of `ids` that are not fully present, in input order.
    pub async fn filter_unknown(
        &self,
        namespace: &NamespaceId,
        ids: &[ContentId],
    ) -> StoreResult<Vec<ContentId>> {
        let mut unknown = Vec::new();
        for id in ids {
            if !self.presence(namespace, id, false).await?.is_present() {
                unknown.push(*id);
            }
        }
        Ok(unknown)
    }

    /// Drop the content mappings of a namespace. Chunks are blobs and go
    /// with the blob namespace.
    pub async fn delete_namespace(&self, namespace: &NamespaceId) -> StoreResult<()> {
        self.mappings.delete_namespace(namespace).await
    }
}
