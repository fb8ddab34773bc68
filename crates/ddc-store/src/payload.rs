//! Request body buffering.
//!
//! Uploads are drained from a byte stream into a [`Payload`] before they are
//! verified and stored. Small bodies stay in memory; once a body crosses the
//! spill threshold it continues into a temporary file. The content hash is
//! computed incrementally while buffering, so verification never needs a
//! second pass over the data.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use ddc_crypto::ContentHasher;
use ddc_types::{BlobId, ContentHash};

/// Limits applied while buffering a request body.
#[derive(Clone, Debug)]
pub struct PayloadConfig {
    /// Bodies larger than this are spilled to `spill_dir`.
    pub spill_threshold: usize,
    /// Directory for spilled bodies. `None` uses the system temp dir.
    pub spill_dir: Option<PathBuf>,
    /// Maximum time to wait for the next chunk before giving up.
    pub chunk_timeout: Duration,
    /// Hard upper bound on body size.
    pub max_size: u64,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            spill_threshold: 4 * 1024 * 1024,
            spill_dir: None,
            chunk_timeout: Duration::from_secs(30),
            max_size: 4 * 1024 * 1024 * 1024,
        }
    }
}

/// Errors while buffering a request body.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The client stopped sending before the body was complete.
    #[error("client too slow: no data for {timeout:?} after {received} bytes")]
    ClientTooSlow { received: u64, timeout: Duration },

    /// The client aborted the upload.
    #[error("upload cancelled after {received} bytes: {reason}")]
    Cancelled { received: u64, reason: String },

    #[error("payload exceeds the {limit}-byte limit")]
    TooLarge { limit: u64 },

    /// Local I/O failure while spilling.
    #[error("payload I/O error: {0}")]
    Io(#[from] std::io::Error),
}

enum Body {
    Memory(Bytes),
    Spilled(TempPath),
}

/// A fully received request body with its content hash.
pub struct Payload {
    body: Body,
    len: u64,
    hash: ContentHash,
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload")
            .field("len", &self.len)
            .field("hash", &self.hash)
            .field("spilled", &self.is_spilled())
            .finish()
    }
}

impl Payload {
    /// Wrap bytes that are already in memory.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            len: data.len() as u64,
            hash: ContentHasher::hash(&data),
            body: Body::Memory(data),
        }
    }

    /// Drain a body stream, spilling to disk past the configured threshold.
    pub async fn buffer<S, E>(stream: S, config: &PayloadConfig) -> Result<Self, PayloadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let mut stream = std::pin::pin!(stream);
        let mut hasher = ContentHasher::new();
        let mut memory = BytesMut::new();
        let mut spill: Option<(tokio::fs::File, TempPath)> = None;

        loop {
            let received = hasher.len();
            let next = tokio::time::timeout(config.chunk_timeout, stream.next())
                .await
                .map_err(|_| PayloadError::ClientTooSlow {
                    received,
                    timeout: config.chunk_timeout,
                })?;
            let chunk = match next {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    return Err(PayloadError::Cancelled {
                        received,
                        reason: e.to_string(),
                    })
                }
            };
            if received + chunk.len() as u64 > config.max_size {
                return Err(PayloadError::TooLarge {
                    limit: config.max_size,
                });
            }
            hasher.update(&chunk);

            if spill.is_none() && memory.len() + chunk.len() > config.spill_threshold {
                let (mut file, path) = spill_file(config.spill_dir.as_deref())?;
                file.write_all(&memory).await?;
                memory.clear();
                tracing::debug!(path = %path.display(), "spilling payload to disk");
                spill = Some((file, path));
            }
            match spill.as_mut() {
                Some((file, _)) => file.write_all(&chunk).await?,
                None => memory.extend_from_slice(&chunk),
            }
        }

        let body = match spill {
            Some((mut file, path)) => {
                file.flush().await?;
                file.sync_all().await?;
                Body::Spilled(path)
            }
            None => Body::Memory(memory.freeze()),
        };
        Ok(Self {
            body,
            len: hasher.len(),
            hash: hasher.finalize(),
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hash of the full payload.
    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    /// The blob id this payload would be stored under.
    pub fn blob_id(&self) -> BlobId {
        BlobId::new(self.hash)
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.body, Body::Spilled(_))
    }

    /// Path of the spill file, if the payload went to disk.
    pub fn spilled_path(&self) -> Option<&Path> {
        match &self.body {
            Body::Spilled(path) => {
                let path: &Path = path;
                Some(path)
            }
            Body::Memory(_) => None,
        }
    }

    /// Load the whole payload into memory.
    pub async fn to_bytes(&self) -> std::io::Result<Bytes> {
        match &self.body {
            Body::Memory(data) => Ok(data.clone()),
            Body::Spilled(path) => tokio::fs::read(path).await.map(Bytes::from),
        }
    }
}

fn spill_file(dir: Option<&Path>) -> std::io::Result<(tokio::fs::File, TempPath)> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("ddc-payload-");
    let named = match dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    let (file, path) = named.into_parts();
    Ok((tokio::fs::File::from_std(file), path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn small_body_stays_in_memory() {
        let config = PayloadConfig::default();
        let payload = Payload::buffer(chunks(&[b"hello ", b"world"]), &config)
            .await
            .unwrap();
        assert!(!payload.is_spilled());
        assert_eq!(payload.len(), 11);
        assert_eq!(payload.blob_id(), BlobId::from_bytes(b"hello world"));
        assert_eq!(payload.to_bytes().await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn large_body_spills_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = PayloadConfig {
            spill_threshold: 4,
            spill_dir: Some(dir.path().to_path_buf()),
            ..PayloadConfig::default()
        };
        let payload = Payload::buffer(chunks(&[b"abc", b"defg", b"hij"]), &config)
            .await
            .unwrap();
        assert!(payload.is_spilled());
        let path = payload.spilled_path().unwrap().to_path_buf();
        assert!(path.starts_with(dir.path()));
        assert_eq!(payload.to_bytes().await.unwrap(), "abcdefghij");
        assert_eq!(payload.hash(), ContentHash::from_bytes(b"abcdefghij"));

        drop(payload);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn stalled_stream_is_client_too_slow() {
        let config = PayloadConfig {
            chunk_timeout: Duration::from_millis(20),
            ..PayloadConfig::default()
        };
        let stalled = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"x"))])
            .chain(stream::pending());
        let err = Payload::buffer(stalled, &config).await.unwrap_err();
        assert!(matches!(err, PayloadError::ClientTooSlow { received: 1, .. }));
    }

    #[tokio::test]
    async fn stream_error_is_cancellation() {
        let config = PayloadConfig::default();
        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"part")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let err = Payload::buffer(broken, &config).await.unwrap_err();
        assert!(matches!(err, PayloadError::Cancelled { received: 4, .. }));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let config = PayloadConfig {
            max_size: 5,
            ..PayloadConfig::default()
        };
        let err = Payload::buffer(chunks(&[b"abc", b"def"]), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, PayloadError::TooLarge { limit: 5 }));
    }

    #[tokio::test]
    async fn empty_body() {
        let payload = Payload::buffer(chunks(&[]), &PayloadConfig::default())
            .await
            .unwrap();
        assert!(payload.is_empty());
        assert_eq!(payload.blob_id(), BlobId::from_bytes(b""));
    }
}
