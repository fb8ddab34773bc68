//! # Refs API
//!
//! - `GET    /api/v1/refs` lists namespaces
//! - `GET    /api/v1/refs/:ns` lists buckets
//! - `POST   /api/v1/refs/:ns` runs a batch
//! - `DELETE /api/v1/refs/:ns` drops a namespace
//! - `DELETE /api/v1/refs/:ns/:bucket` drops a bucket
//! - `GET|HEAD|PUT|DELETE /api/v1/refs/:ns/:bucket/:key`
//! - `POST   /api/v1/refs/:ns/:bucket/:key/finalize/:hash`
//! - `GET    /api/v1/refs/:ns/exists?names=bucket.key,...`
//! - `POST   /api/v1/refs/:ns/exist`

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use ddc_object::{DdcObject, PayloadShape, OBJECT_CONTENT_TYPE, PACKAGE_CONTENT_TYPE};
use ddc_refs::{BatchRequest, BatchResponse, PutOutcome, RefError};
use ddc_types::{BlobId, BucketId, NamespaceId, RefId};

use super::{
    blob_id, content_type, declared_hash, json_body, negotiate, parse, HASH_HEADER, JSON,
    OCTET_STREAM,
};
use crate::auth::{Action, Identity};
use crate::body::{buffer_body, read_body};
use crate::error::ApiError;
use crate::state::AppState;

/// Offered GET formats; the first is the default.
const GET_FORMATS: &[&str] = &[OCTET_STREAM, OBJECT_CONTENT_TYPE, JSON, PACKAGE_CONTENT_TYPE];

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_namespaces))
        .route(
            "/:ns",
            get(list_buckets).post(run_batch).delete(drop_namespace),
        )
        .route("/:ns/exists", get(exists_query))
        .route("/:ns/exist", post(exists_body))
        .route("/:ns/:bucket", delete(drop_bucket))
        .route(
            "/:ns/:bucket/:key",
            get(get_ref).head(head_ref).put(put_ref).delete(delete_ref),
        )
        .route("/:ns/:bucket/:key/finalize/:hash", post(finalize_ref))
}

/// `{bucket, key}` pair used by the existence endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefName {
    pub bucket: BucketId,
    pub key: RefId,
}

#[derive(Debug, Deserialize)]
pub struct ExistsQuery {
    #[serde(default)]
    names: String,
}

#[derive(Debug, Deserialize)]
pub struct ExistsRequest {
    names: Vec<RefName>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExistsResponse {
    pub missing: Vec<RefName>,
}

fn ref_path(ns: &str, bucket: &str, key: &str) -> Result<(NamespaceId, BucketId, RefId), ApiError> {
    Ok((
        parse("namespace", ns)?,
        parse("bucket", bucket)?,
        parse("key", key)?,
    ))
}

fn outcome_json(outcome: &PutOutcome) -> Json<Value> {
    Json(json!({
        "needs": outcome.needs.hashes(),
        "finalized": outcome.finalized,
    }))
}

async fn list_namespaces(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<Value>, ApiError> {
    let mut visible = Vec::new();
    for ns in state.refs.namespaces().await? {
        if state.access.has_access(&identity, &ns, &[Action::Read]).await {
            visible.push(ns);
        }
    }
    Ok(Json(json!({ "namespaces": visible })))
}

async fn list_buckets(
    State(state): State<AppState>,
    identity: Identity,
    Path(ns): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let ns: NamespaceId = parse("namespace", &ns)?;
    state.authorize(&identity, &ns, &[Action::Read]).await?;
    let buckets = state.refs.buckets(&ns).await?;
    Ok(Json(json!({ "buckets": buckets })))
}

async fn run_batch(
    State(state): State<AppState>,
    identity: Identity,
    Path(ns): Path<String>,
    body: Body,
) -> Result<Json<BatchResponse>, ApiError> {
    let ns: NamespaceId = parse("namespace", &ns)?;
    state
        .authorize(&identity, &ns, &[Action::Read, Action::Write])
        .await?;
    let request: BatchRequest = json_body(&read_body(body, &state.payload).await?)?;
    Ok(Json(state.batch.run(&ns, request.ops).await?))
}

async fn drop_namespace(
    State(state): State<AppState>,
    identity: Identity,
    Path(ns): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let ns: NamespaceId = parse("namespace", &ns)?;
    state.authorize(&identity, &ns, &[Action::Delete]).await?;
    let removed = state.refs.drop_namespace(&ns).await?;
    Ok(Json(json!({ "deletedRefs": removed })))
}

async fn drop_bucket(
    State(state): State<AppState>,
    identity: Identity,
    Path((ns, bucket)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let ns: NamespaceId = parse("namespace", &ns)?;
    let bucket: BucketId = parse("bucket", &bucket)?;
    state.authorize(&identity, &ns, &[Action::Delete]).await?;
    let removed = state.refs.delete_bucket(&ns, &bucket).await?;
    Ok(Json(json!({ "deletedRefs": removed })))
}

async fn get_ref(
    State(state): State<AppState>,
    identity: Identity,
    Path((ns, bucket, key)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let (ns, bucket, key) = ref_path(&ns, &bucket, &key)?;
    state.authorize(&identity, &ns, &[Action::Read]).await?;

    let format = negotiate(&headers, GET_FORMATS).ok_or_else(|| {
        ApiError::new(
            StatusCode::NOT_ACCEPTABLE,
            "NotAcceptable",
            format!("refs are served as one of {}", GET_FORMATS.join(", ")),
        )
    })?;
    let (record, root) = state.refs.get_finalized(&ns, &bucket, &key).await?;
    let hash = record.root.to_hex();

    let (content_type, body) = match format {
        OBJECT_CONTENT_TYPE => (OBJECT_CONTENT_TYPE, root),
        JSON => {
            let object = DdcObject::from_bytes(&root)?;
            (JSON, Bytes::from(object.to_json().to_string()))
        }
        PACKAGE_CONTENT_TYPE => {
            let package = state.refs.package(&ns, root).await?;
            (PACKAGE_CONTENT_TYPE, Bytes::from(package.to_bytes()?))
        }
        _ => (OCTET_STREAM, unwrap_payload(&state, &ns, root).await?),
    };
    Ok((
        [
            (CONTENT_TYPE, content_type.to_string()),
            (HeaderName::from_static(HASH_HEADER), hash),
        ],
        body,
    )
        .into_response())
}

/// The single octet payload a root stands for, when it has one.
async fn unwrap_payload(state: &AppState, ns: &NamespaceId, root: Bytes) -> Result<Bytes, ApiError> {
    let object = DdcObject::from_bytes(&root)?;
    match object.payload_shape() {
        PayloadShape::Inline => Ok(root),
        PayloadShape::SingleBlob(id) => Ok(state.refs.blobs().get(ns, &id, None).await?),
        PayloadShape::Composite => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "NotUnwrappable",
            format!("object has several attachments; request {PACKAGE_CONTENT_TYPE}"),
        )),
    }
}

async fn head_ref(
    State(state): State<AppState>,
    identity: Identity,
    Path((ns, bucket, key)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let (ns, bucket, key) = ref_path(&ns, &bucket, &key)?;
    state.authorize(&identity, &ns, &[Action::Read]).await?;
    Ok(if state.refs.is_complete(&ns, &bucket, &key).await? {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    })
}

async fn put_ref(
    State(state): State<AppState>,
    identity: Identity,
    Path((ns, bucket, key)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<Value>, ApiError> {
    let (ns, bucket, key) = ref_path(&ns, &bucket, &key)?;
    state.authorize(&identity, &ns, &[Action::Write]).await?;
    let declared = declared_hash(&headers)?;

    let (root_hash, root) = match content_type(&headers).unwrap_or(OCTET_STREAM) {
        OCTET_STREAM => {
            let payload = buffer_body(body, &state.payload).await?;
            let size = payload.len();
            let blob = state.refs.blobs().put(&ns, payload, declared).await?;
            let root = DdcObject::wrap_blob(blob, size).to_bytes()?;
            (BlobId::from_bytes(&root), Bytes::from(root))
        }
        OBJECT_CONTENT_TYPE => {
            let root = read_body(body, &state.payload).await?;
            let hash = declared.unwrap_or_else(|| BlobId::from_bytes(&root));
            (hash, root)
        }
        JSON => {
            let value: Value = json_body(&read_body(body, &state.payload).await?)?;
            let root = DdcObject::from_json(&value)?.to_bytes()?;
            let computed = BlobId::from_bytes(&root);
            if let Some(expected) = declared.filter(|d| *d != computed) {
                return Err(RefError::HashMismatch {
                    expected: expected.hash(),
                    computed: computed.hash(),
                }
                .into());
            }
            (computed, Bytes::from(root))
        }
        other => {
            return Err(ApiError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UnsupportedMediaType",
                format!("cannot store a ref from {other}"),
            ))
        }
    };

    let outcome = state.refs.put(&ns, &bucket, &key, root_hash, root).await?;
    Ok(outcome_json(&outcome))
}

async fn finalize_ref(
    State(state): State<AppState>,
    identity: Identity,
    Path((ns, bucket, key, hash)): Path<(String, String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    let (ns, bucket, key) = ref_path(&ns, &bucket, &key)?;
    let hash = blob_id(&hash)?;
    state.authorize(&identity, &ns, &[Action::Write]).await?;
    let outcome = state.refs.finalize(&ns, &bucket, &key, hash).await?;
    Ok(outcome_json(&outcome))
}

async fn delete_ref(
    State(state): State<AppState>,
    identity: Identity,
    Path((ns, bucket, key)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    let (ns, bucket, key) = ref_path(&ns, &bucket, &key)?;
    state.authorize(&identity, &ns, &[Action::Delete]).await?;
    let deleted = state.refs.delete(&ns, &bucket, &key).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

/// Split `bucket.key` at the first `.`.
fn parse_name(raw: &str) -> Result<RefName, ApiError> {
    let (bucket, key) = raw
        .split_once('.')
        .ok_or_else(|| ApiError::bad_request(format!("{raw:?} is not of the form bucket.key")))?;
    Ok(RefName {
        bucket: parse("bucket", bucket)?,
        key: parse("key", key)?,
    })
}

async fn missing(
    state: &AppState,
    identity: &Identity,
    ns: &str,
    names: Vec<RefName>,
) -> Result<Json<ExistsResponse>, ApiError> {
    let ns: NamespaceId = parse("namespace", ns)?;
    state.authorize(identity, &ns, &[Action::Read]).await?;
    let pairs: Vec<(BucketId, RefId)> = names.into_iter().map(|n| (n.bucket, n.key)).collect();
    let missing = state
        .refs
        .exists_many(&ns, &pairs)
        .await?
        .into_iter()
        .map(|(bucket, key)| RefName { bucket, key })
        .collect();
    Ok(Json(ExistsResponse { missing }))
}

async fn exists_query(
    State(state): State<AppState>,
    identity: Identity,
    Path(ns): Path<String>,
    Query(query): Query<ExistsQuery>,
) -> Result<Json<ExistsResponse>, ApiError> {
    let names = query
        .names
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(parse_name)
        .collect::<Result<Vec<_>, _>>()?;
    missing(&state, &identity, &ns, names).await
}

async fn exists_body(
    State(state): State<AppState>,
    identity: Identity,
    Path(ns): Path<String>,
    body: Body,
) -> Result<Json<ExistsResponse>, ApiError> {
    let request: ExistsRequest = json_body(&read_body(body, &state.payload).await?)?;
    missing(&state, &identity, &ns, request.names).await
}
