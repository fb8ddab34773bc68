//! A [`ReplicationSource`] that talks to another node over its HTTP API.
//!
//! Uses the public endpoints only: the incremental log, the latest
//! snapshot, ref GET in the object format, raw blobs, and compressed
//! content. Everything fetched is checked against the id it was requested
//! under before it reaches the local node.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use ddc_log::{LogError, LogPage, SnapshotInfo, TailFrom};
use ddc_object::OBJECT_CONTENT_TYPE;
use ddc_store::{CompressedCodec, StoreError};
use ddc_types::{BlobId, BucketId, ContentId, NamespaceId, RefId};

use crate::error::{ReplicationError, ReplicationResult};
use crate::source::ReplicationSource;

/// Header carrying a ref's root hash on GET.
const HASH_HEADER: &str = "x-ddc-hash";

#[derive(Clone, Debug)]
pub struct HttpSourceConfig {
    /// Base URL of the source node, e.g. `http://cache-a:57001`.
    pub base_url: String,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub token: Option<String>,
    pub timeout: Duration,
}

impl HttpSourceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Problem document returned by the source on errors.
#[derive(Debug, Default, Deserialize)]
struct Problem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    detail: String,
    #[serde(rename = "SnapshotId")]
    snapshot_id: Option<BlobId>,
    #[serde(rename = "BlobNamespace")]
    blob_namespace: Option<NamespaceId>,
}

pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
    codec: CompressedCodec,
}

impl HttpSource {
    pub fn new(config: HttpSourceConfig) -> ReplicationResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ReplicationError::Source("invalid characters in token".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ReplicationError::Source(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            codec: CompressedCodec::default(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder, endpoint: &str) -> ReplicationResult<Response> {
        request.send().await.map_err(|source| ReplicationError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    async fn bytes(&self, response: Response, endpoint: &str) -> ReplicationResult<Bytes> {
        response.bytes().await.map_err(|source| ReplicationError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    async fn json<T: serde::de::DeserializeOwned>(
        &self,
        response: Response,
        endpoint: &str,
    ) -> ReplicationResult<T> {
        let body = self.bytes(response, endpoint).await?;
        serde_json::from_slice(&body)
            .map_err(|e| ReplicationError::Serialization(format!("{endpoint}: {e}")))
    }

    /// Read a problem body off a failed response.
    async fn problem(&self, response: Response) -> (StatusCode, Problem) {
        let status = response.status();
        let problem = match response.bytes().await {
            Ok(body) => serde_json::from_slice(&body).unwrap_or_else(|_| Problem {
                detail: String::from_utf8_lossy(&body).into_owned(),
                ..Problem::default()
            }),
            Err(e) => Problem {
                detail: e.to_string(),
                ..Problem::default()
            },
        };
        (status, problem)
    }

    async fn failure(&self, response: Response, endpoint: &str) -> ReplicationError {
        let (status, problem) = self.problem(response).await;
        status_error(endpoint, status, problem)
    }

    /// GET `path` and return the body, failing on any non-success status.
    async fn get_bytes(&self, path: &str) -> ReplicationResult<Bytes> {
        let response = self.send(self.client.get(self.url(path)), path).await?;
        if !response.status().is_success() {
            return Err(self.failure(response, path).await);
        }
        self.bytes(response, path).await
    }
}

fn status_error(endpoint: &str, status: StatusCode, problem: Problem) -> ReplicationError {
    ReplicationError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        kind: problem.kind,
        detail: problem.detail,
    }
}

/// Query parameters for one tail request.
fn tail_query(from: &TailFrom, limit: usize) -> Vec<(&'static str, String)> {
    let mut query = match from {
        TailFrom::Beginning => vec![("from", "beginning".to_string())],
        TailFrom::Now => vec![("from", "now".to_string())],
        TailFrom::After(cursor) => vec![
            ("lastBucket", cursor.bucket.to_string()),
            ("lastEvent", cursor.event_id.to_string()),
        ],
    };
    query.push(("count", limit.to_string()));
    query
}

/// Turn a failed tail into the error the replicator acts on.
fn tail_error(
    namespace: &NamespaceId,
    from: &TailFrom,
    endpoint: &str,
    status: StatusCode,
    problem: Problem,
    latest: Option<SnapshotInfo>,
) -> ReplicationError {
    match problem.kind.as_str() {
        "UseSnapshot" => match (problem.snapshot_id, problem.blob_namespace.clone()) {
            (Some(id), Some(blob_namespace)) => {
                let snapshot = latest
                    .filter(|s| s.snapshot_blob_id == id)
                    .unwrap_or_else(|| SnapshotInfo {
                        namespace: namespace.clone(),
                        snapshot_blob_id: id,
                        blob_namespace,
                        created_at: Utc::now(),
                        cursor: None,
                    });
                ReplicationError::UseSnapshot {
                    namespace: namespace.clone(),
                    snapshot: Box::new(snapshot),
                }
            }
            _ => status_error(endpoint, status, problem),
        },
        "IncrementalLogNotAvailable" => LogError::IncrementalLogNotAvailable {
            namespace: namespace.clone(),
            cursor: match from {
                TailFrom::After(cursor) => Some(cursor.clone()),
                _ => None,
            },
        }
        .into(),
        _ => status_error(endpoint, status, problem),
    }
}

#[async_trait]
impl ReplicationSource for HttpSource {
    async fn tail(&self, namespace: &NamespaceId, from: TailFrom, limit: usize) -> ReplicationResult<LogPage> {
        let endpoint = format!("replication-log/incremental/{namespace}");
        let request = self
            .client
            .get(self.url(&endpoint))
            .query(&tail_query(&from, limit));
        let response = self.send(request, &endpoint).await?;
        if response.status().is_success() {
            let page: LogPage = self.json(response, &endpoint).await?;
            debug!(%namespace, source = %self.base_url, events = page.events.len(), "tailed remote log");
            return Ok(page);
        }
        let (status, problem) = self.problem(response).await;
        let latest = if problem.kind == "UseSnapshot" {
            self.latest_snapshot(namespace).await?
        } else {
            None
        };
        Err(tail_error(namespace, &from, &endpoint, status, problem, latest))
    }

    async fn latest_snapshot(&self, namespace: &NamespaceId) -> ReplicationResult<Option<SnapshotInfo>> {
        let endpoint = format!("replication-log/snapshots/{namespace}");
        let response = self.send(self.client.get(self.url(&endpoint)), &endpoint).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => self.json(response, &endpoint).await.map(Some),
            _ => Err(self.failure(response, &endpoint).await),
        }
    }

    async fn get_ref(
        &self,
        namespace: &NamespaceId,
        bucket: &BucketId,
        key: &RefId,
    ) -> ReplicationResult<Option<(BlobId, Bytes)>> {
        let endpoint = format!("refs/{namespace}/{bucket}/{key}");
        let request = self
            .client
            .get(self.url(&endpoint))
            .header(ACCEPT, OBJECT_CONTENT_TYPE);
        let response = self.send(request, &endpoint).await?;
        if !response.status().is_success() {
            let (status, problem) = self.problem(response).await;
            if status == StatusCode::NOT_FOUND && problem.kind == "RefNotFound" {
                return Ok(None);
            }
            return Err(status_error(&endpoint, status, problem));
        }
        let root = response
            .headers()
            .get(HASH_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| BlobId::from_hex(v).ok())
            .ok_or_else(|| ReplicationError::Source(format!("{endpoint}: missing {HASH_HEADER}")))?;
        let bytes = self.bytes(response, &endpoint).await?;
        Ok(Some((root, bytes)))
    }

    async fn get_blob(&self, namespace: &NamespaceId, id: &BlobId) -> ReplicationResult<Bytes> {
        let data = self.get_bytes(&format!("blobs/{namespace}/{id}")).await?;
        let computed = BlobId::from_bytes(&data);
        if computed != *id {
            return Err(StoreError::HashMismatch {
                expected: id.hash(),
                computed: computed.hash(),
            }
            .into());
        }
        Ok(data)
    }

    async fn get_content(&self, namespace: &NamespaceId, id: &ContentId) -> ReplicationResult<Bytes> {
        let buf = self
            .get_bytes(&format!("compressed-blobs/{namespace}/{id}"))
            .await?;
        let (decoded, data) = self.codec.decompress(&buf).map_err(StoreError::from)?;
        if decoded != *id {
            return Err(StoreError::HashMismatch {
                expected: id.hash(),
                computed: decoded.hash(),
            }
            .into());
        }
        Ok(Bytes::from(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddc_log::{LogBucket, LogCursor};
    use uuid::Uuid;

    fn ns() -> NamespaceId {
        NamespaceId::new("ns").unwrap()
    }

    fn problem(kind: &str) -> Problem {
        Problem {
            kind: kind.into(),
            detail: "detail".into(),
            ..Problem::default()
        }
    }

    // --- requests ---

    #[test]
    fn base_url_is_normalized() {
        let source = HttpSource::new(HttpSourceConfig::new("http://cache-a:57001/")).unwrap();
        assert_eq!(source.base_url(), "http://cache-a:57001");
        assert_eq!(
            source.url("blobs/ns/abc"),
            "http://cache-a:57001/api/v1/blobs/ns/abc"
        );
    }

    #[test]
    fn token_with_newline_is_rejected() {
        let config = HttpSourceConfig {
            token: Some("bad\ntoken".into()),
            ..HttpSourceConfig::new("http://localhost")
        };
        assert!(matches!(
            HttpSource::new(config),
            Err(ReplicationError::Source(_))
        ));
    }

    #[test]
    fn tail_query_per_cursor_kind() {
        assert_eq!(
            tail_query(&TailFrom::Beginning, 10),
            vec![("from", "beginning".to_string()), ("count", "10".to_string())]
        );
        assert_eq!(tail_query(&TailFrom::Now, 5)[0], ("from", "now".to_string()));

        let bucket = LogBucket::parse("20240101T000000").unwrap();
        let event = Uuid::now_v7();
        let query = tail_query(&TailFrom::After(LogCursor::new(bucket, event)), 1);
        assert_eq!(query[0], ("lastBucket", "20240101T000000".to_string()));
        assert_eq!(query[1], ("lastEvent", event.to_string()));
        assert_eq!(query[2], ("count", "1".to_string()));
    }

    // --- error mapping ---

    #[test]
    fn use_snapshot_problem_becomes_use_snapshot() {
        let id = BlobId::from_bytes(b"snapshot");
        let body = serde_json::json!({
            "type": "UseSnapshot",
            "status": 400,
            "detail": "gone",
            "SnapshotId": id,
            "BlobNamespace": "ddc-snapshots",
        });
        let problem: Problem = serde_json::from_value(body).unwrap();
        let err = tail_error(&ns(), &TailFrom::Beginning, "e", StatusCode::BAD_REQUEST, problem, None);
        match err {
            ReplicationError::UseSnapshot { snapshot, .. } => {
                assert_eq!(snapshot.snapshot_blob_id, id);
                assert_eq!(snapshot.blob_namespace.as_str(), "ddc-snapshots");
                assert!(snapshot.cursor.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn use_snapshot_prefers_the_full_snapshot_record() {
        let id = BlobId::from_bytes(b"snapshot");
        let cursor = LogCursor::new(LogBucket::parse("20240101T000000").unwrap(), Uuid::now_v7());
        let latest = SnapshotInfo {
            namespace: ns(),
            snapshot_blob_id: id,
            blob_namespace: NamespaceId::new("snaps").unwrap(),
            created_at: Utc::now(),
            cursor: Some(cursor.clone()),
        };
        let p = Problem {
            snapshot_id: Some(id),
            blob_namespace: Some(NamespaceId::new("snaps").unwrap()),
            ..problem("UseSnapshot")
        };
        let err = tail_error(&ns(), &TailFrom::Beginning, "e", StatusCode::BAD_REQUEST, p, Some(latest));
        match err {
            ReplicationError::UseSnapshot { snapshot, .. } => assert_eq!(snapshot.cursor, Some(cursor)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn log_unavailable_problem_becomes_log_error() {
        let err = tail_error(
            &ns(),
            &TailFrom::Beginning,
            "e",
            StatusCode::BAD_REQUEST,
            problem("IncrementalLogNotAvailable"),
            None,
        );
        assert!(matches!(
            err,
            ReplicationError::Log(LogError::IncrementalLogNotAvailable { cursor: None, .. })
        ));
    }

    #[test]
    fn other_problems_keep_status_and_kind() {
        let err = tail_error(
            &ns(),
            &TailFrom::Now,
            "replication-log/incremental/ns",
            StatusCode::FORBIDDEN,
            problem("Forbidden"),
            None,
        );
        match err {
            ReplicationError::Status { status, kind, .. } => {
                assert_eq!(status, 403);
                assert_eq!(kind, "Forbidden");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_source_is_a_transport_error() {
        let source = HttpSource::new(HttpSourceConfig {
            timeout: Duration::from_millis(200),
            ..HttpSourceConfig::new("http://127.0.0.1:1")
        })
        .unwrap();
        let err = source.latest_snapshot(&ns()).await.unwrap_err();
        assert!(matches!(err, ReplicationError::Transport { .. }));
    }
}
