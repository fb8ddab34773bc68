//! Heterogeneous GET/PUT/HEAD batches over one namespace.
//!
//! Ops run concurrently with bounded parallelism. Each op's outcome is
//! captured on its own and keyed by its caller-assigned id, so a failing op
//! never affects the others.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use ddc_types::{BlobId, BucketId, NamespaceId, RefId};

use crate::error::{RefError, RefResult};
use crate::service::RefService;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchOpKind {
    Get,
    Put,
    Head,
}

/// One operation in a batch. `payload` is the hex-encoded root object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOp {
    pub op_id: u32,
    pub op: BatchOpKind,
    pub bucket: BucketId,
    pub key: RefId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_hash: Option<BlobId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub ops: Vec<BatchOp>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOpResult {
    pub status: u16,
    pub response: Value,
}

impl BatchOpResult {
    fn ok(response: Value) -> Self {
        Self {
            status: 200,
            response,
        }
    }

    fn failed(err: &RefError) -> Self {
        Self {
            status: err.status_code(),
            response: json!({ "title": err.kind(), "detail": err.to_string() }),
        }
    }
}

/// Results keyed by op id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: BTreeMap<u32, BatchOpResult>,
}

#[derive(Clone, Debug)]
pub struct BatchConfig {
    pub max_parallelism: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_parallelism: 16 }
    }
}

pub struct BatchExecutor {
    service: Arc<RefService>,
    config: BatchConfig,
}

impl BatchExecutor {
    pub fn new(service: Arc<RefService>, config: BatchConfig) -> Self {
        Self { service, config }
    }

    /// Run every op. The whole batch is rejected up front if an op id repeats
    /// or a PUT carries no payload; otherwise every op gets a result.
    pub async fn run(&self, namespace: &NamespaceId, ops: Vec<BatchOp>) -> RefResult<BatchResponse> {
        validate(&ops)?;
        let count = ops.len();
        let results = stream::iter(ops)
            .map(|op| async move {
                let id = op.op_id;
                let result = match self.execute(namespace, op).await {
                    Ok(result) => result,
                    Err(e) => BatchOpResult::failed(&e),
                };
                (id, result)
            })
            .buffer_unordered(self.config.max_parallelism.max(1))
            .collect::<BTreeMap<_, _>>()
            .await;
        debug!(%namespace, ops = count, "batch complete");
        Ok(BatchResponse { results })
    }

    async fn execute(&self, namespace: &NamespaceId, op: BatchOp) -> RefResult<BatchOpResult> {
        match op.op {
            BatchOpKind::Get => {
                let (record, root) = self.service.get_finalized(namespace, &op.bucket, &op.key).await?;
                Ok(BatchOpResult::ok(json!({
                    "bucket": record.bucket,
                    "key": record.key,
                    "root": record.root,
                    "payload": hex::encode(&root),
                })))
            }
            BatchOpKind::Head => {
                let exists = self.service.is_complete(namespace, &op.bucket, &op.key).await?;
                Ok(BatchOpResult {
                    status: if exists { 200 } else { 404 },
                    response: json!({ "exists": exists }),
                })
            }
            BatchOpKind::Put => {
                let encoded = op.payload.unwrap_or_default();
                let payload = hex::decode(&encoded)
                    .map_err(|e| RefError::InvalidBatch(format!("op {}: payload is not hex: {e}", op.op_id)))?;
                let computed = BlobId::from_bytes(&payload);
                if let Some(declared) = op.payload_hash {
                    if declared != computed {
                        return Err(RefError::HashMismatch {
                            expected: declared.hash(),
                            computed: computed.hash(),
                        });
                    }
                }
                let outcome = self
                    .service
                    .put(namespace, &op.bucket, &op.key, computed, Bytes::from(payload))
                    .await?;
                Ok(BatchOpResult::ok(json!({
                    "needs": outcome.needs.hashes(),
                    "finalized": outcome.finalized,
                })))
            }
        }
    }
}

fn validate(ops: &[BatchOp]) -> RefResult<()> {
    let mut seen = HashSet::with_capacity(ops.len());
    for op in ops {
        if !seen.insert(op.op_id) {
            return Err(RefError::InvalidBatch(format!("duplicate op id {}", op.op_id)));
        }
        if op.op == BatchOpKind::Put && op.payload.is_none() {
            return Err(RefError::InvalidBatch(format!("op {} is a PUT without payload", op.op_id)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::{names, service};
    use ddc_object::DdcObject;

    fn executor() -> BatchExecutor {
        BatchExecutor::new(Arc::new(service()), BatchConfig::default())
    }

    fn put_op(op_id: u32, key: &str, object: &DdcObject) -> BatchOp {
        BatchOp {
            op_id,
            op: BatchOpKind::Put,
            bucket: BucketId::new("b").unwrap(),
            key: RefId::new(key).unwrap(),
            payload: Some(hex::encode(object.to_bytes().unwrap())),
            payload_hash: None,
        }
    }

    fn read_op(op_id: u32, op: BatchOpKind, key: &str) -> BatchOp {
        BatchOp {
            op_id,
            op,
            bucket: BucketId::new("b").unwrap(),
            key: RefId::new(key).unwrap(),
            payload: None,
            payload_hash: None,
        }
    }

    // --- validation ---

    #[tokio::test]
    async fn duplicate_op_id_rejects_batch() {
        let exec = executor();
        let (ns, _, _) = names();
        let obj = DdcObject::builder().string("a", "b").build();
        let err = exec
            .run(&ns, vec![put_op(1, "x", &obj), read_op(1, BatchOpKind::Get, "x")])
            .await
            .unwrap_err();
        assert!(matches!(err, RefError::InvalidBatch(_)));
        assert_eq!(err.status_code(), 400);
        assert!(exec.service.records(&ns).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn put_without_payload_rejects_batch() {
        let exec = executor();
        let (ns, _, _) = names();
        let err = exec
            .run(&ns, vec![read_op(7, BatchOpKind::Put, "x")])
            .await
            .unwrap_err();
        assert!(matches!(err, RefError::InvalidBatch(_)));
    }

    // --- execution ---

    #[tokio::test]
    async fn failing_put_does_not_taint_get() {
        let exec = executor();
        let (ns, _, _) = names();
        let obj = DdcObject::builder().string("v", "present").build();
        let first = exec.run(&ns, vec![put_op(1, "good", &obj)]).await.unwrap();
        assert_eq!(first.results[&1].status, 200);

        let mut bad = put_op(2, "bad", &obj);
        bad.payload_hash = Some(BlobId::from_bytes(b"not it"));
        let response = exec
            .run(&ns, vec![bad, read_op(3, BatchOpKind::Get, "good")])
            .await
            .unwrap();
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[&2].status, 400);
        assert_eq!(response.results[&2].response["title"], "HashMismatch");
        assert_eq!(response.results[&3].status, 200);
        assert_eq!(
            response.results[&3].response["payload"],
            json!(hex::encode(obj.to_bytes().unwrap()))
        );
    }

    #[tokio::test]
    async fn results_are_keyed_by_op_id() {
        let exec = executor();
        let (ns, _, _) = names();
        let ops = (0..20u32)
            .rev()
            .map(|i| put_op(i * 3, &format!("k{i}"), &DdcObject::builder().integer("i", i.into()).build()))
            .collect();
        let response = exec.run(&ns, ops).await.unwrap();
        let ids: Vec<u32> = response.results.keys().copied().collect();
        assert_eq!(ids, (0..20u32).map(|i| i * 3).collect::<Vec<_>>());
        assert!(response.results.values().all(|r| r.response["finalized"] == true));
    }

    #[tokio::test]
    async fn put_reports_needs_and_head_reflects_completeness() {
        let exec = executor();
        let (ns, _, _) = names();
        let missing = BlobId::from_bytes(b"leaf");
        let obj = DdcObject::builder().binary_attachment("a", missing).build();
        let response = exec
            .run(&ns, vec![put_op(1, "k", &obj), read_op(2, BatchOpKind::Head, "other")])
            .await
            .unwrap();
        assert_eq!(response.results[&1].response["needs"], json!([missing.to_hex()]));
        assert_eq!(response.results[&1].response["finalized"], false);
        assert_eq!(response.results[&2].status, 404);

        let response = exec
            .run(&ns, vec![read_op(1, BatchOpKind::Head, "k"), read_op(2, BatchOpKind::Get, "k")])
            .await
            .unwrap();
        assert_eq!(response.results[&1].response["exists"], false);
        assert_eq!(response.results[&2].status, 404);
        assert_eq!(response.results[&2].response["title"], "RefNotFound");
    }

    #[tokio::test]
    async fn bad_hex_fails_only_that_op() {
        let exec = executor();
        let (ns, _, _) = names();
        let mut bad = read_op(1, BatchOpKind::Put, "x");
        bad.payload = Some("zz".into());
        let good = put_op(2, "y", &DdcObject::builder().bool("ok", true).build());
        let response = exec.run(&ns, vec![bad, good]).await.unwrap();
        assert_eq!(response.results[&1].status, 400);
        assert_eq!(response.results[&2].status, 200);
    }

    #[test]
    fn ops_use_camel_case_and_upper_kinds() {
        let op: BatchOp = serde_json::from_value(json!({
            "opId": 4,
            "op": "HEAD",
            "bucket": "b",
            "key": "k",
        }))
        .unwrap();
        assert_eq!(op.op, BatchOpKind::Head);
        assert_eq!(op.op_id, 4);
        assert!(op.payload.is_none());
    }
}
