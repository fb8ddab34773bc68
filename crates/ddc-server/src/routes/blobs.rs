//! # Blobs API
//!
//! - `GET|HEAD|PUT /api/v1/blobs/:ns/:id`
//! - `POST /api/v1/blobs/:ns` stores a body under its computed id
//! - `POST /api/v1/blobs/:ns/exists` filters a list of ids down to the missing ones

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use ddc_store::{BlobBody, ByteRange};
use ddc_types::{BlobId, NamespaceId};

use super::{accepts_redirect, blob_id, json_body, parse, OCTET_STREAM};
use crate::auth::{Action, Identity};
use crate::body::{buffer_body, read_body};
use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:ns", post(post_blob))
        .route("/:ns/exists", post(exists))
        .route("/:ns/:id", get(get_blob).head(head_blob).put(put_blob))
}

/// Parse `bytes=start-end` or `bytes=start-`. Suffix ranges and multiple
/// ranges are not supported.
pub(crate) fn parse_range(raw: &str) -> Result<ByteRange, ApiError> {
    let invalid = || {
        ApiError::new(
            StatusCode::RANGE_NOT_SATISFIABLE,
            "InvalidRange",
            format!("unsupported range {raw:?}"),
        )
    };
    let bounds = raw.trim().strip_prefix("bytes=").ok_or_else(invalid)?;
    let (start, end) = bounds.split_once('-').ok_or_else(invalid)?;
    let start: u64 = start.trim().parse().map_err(|_| invalid())?;
    let end = end.trim();
    if end.is_empty() {
        return Ok(ByteRange::new(start, None));
    }
    let end: u64 = end.parse().map_err(|_| invalid())?;
    if end < start {
        return Err(invalid());
    }
    Ok(ByteRange::new(start, Some(end - start + 1)))
}

fn requested_range(headers: &HeaderMap) -> Result<Option<ByteRange>, ApiError> {
    headers
        .get(RANGE)
        .map(|v| {
            v.to_str()
                .map_err(|_| ApiError::bad_request("Range header is not ASCII"))
                .and_then(parse_range)
        })
        .transpose()
}

async fn get_blob(
    State(state): State<AppState>,
    identity: Identity,
    Path((ns, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ns: NamespaceId = parse("namespace", &ns)?;
    let id = blob_id(&id)?;
    state.authorize(&identity, &ns, &[Action::Read]).await?;

    let range = requested_range(&headers)?;
    let body = state
        .refs
        .blobs()
        .fetch(&ns, &id, range, accepts_redirect(&headers))
        .await?;
    Ok(match (body, range) {
        (BlobBody::Redirect(uri), _) => (StatusCode::FOUND, [(LOCATION, uri)]).into_response(),
        (BlobBody::Bytes(data), Some(range)) => {
            let mut response = (
                StatusCode::PARTIAL_CONTENT,
                [(CONTENT_TYPE, OCTET_STREAM)],
                data.clone(),
            )
                .into_response();
            if !data.is_empty() {
                let end = range.offset + data.len() as u64 - 1;
                let value = format!("bytes {}-{end}/*", range.offset);
                if let Ok(value) = value.parse() {
                    response.headers_mut().insert(CONTENT_RANGE, value);
                }
            }
            response
        }
        (BlobBody::Bytes(data), None) => ([(CONTENT_TYPE, OCTET_STREAM)], data).into_response(),
    })
}

async fn head_blob(
    State(state): State<AppState>,
    identity: Identity,
    Path((ns, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let ns: NamespaceId = parse("namespace", &ns)?;
    let id = blob_id(&id)?;
    state.authorize(&identity, &ns, &[Action::Read]).await?;
    Ok(if state.refs.blobs().exists(&ns, &id).await? {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    })
}

async fn put_blob(
    State(state): State<AppState>,
    identity: Identity,
    Path((ns, id)): Path<(String, String)>,
    body: Body,
) -> Result<Json<Value>, ApiError> {
    let ns: NamespaceId = parse("namespace", &ns)?;
    let id = blob_id(&id)?;
    state.authorize(&identity, &ns, &[Action::Write]).await?;
    let payload = buffer_body(body, &state.payload).await?;
    let stored = state.refs.blobs().put(&ns, payload, Some(id)).await?;
    Ok(Json(json!({ "identifier": stored })))
}

async fn post_blob(
    State(state): State<AppState>,
    identity: Identity,
    Path(ns): Path<String>,
    body: Body,
) -> Result<Json<Value>, ApiError> {
    let ns: NamespaceId = parse("namespace", &ns)?;
    state.authorize(&identity, &ns, &[Action::Write]).await?;
    let payload = buffer_body(body, &state.payload).await?;
    let stored = state.refs.blobs().put(&ns, payload, None).await?;
    Ok(Json(json!({ "identifier": stored })))
}

async fn exists(
    State(state): State<AppState>,
    identity: Identity,
    Path(ns): Path<String>,
    body: Body,
) -> Result<Json<Value>, ApiError> {
    let ns: NamespaceId = parse("namespace", &ns)?;
    state.authorize(&identity, &ns, &[Action::Read]).await?;
    let ids: Vec<BlobId> = json_body(&read_body(body, &state.payload).await?)?;
    let needs = state.refs.blobs().filter_unknown(&ns, &ids).await?;
    Ok(Json(json!({ "needs": needs })))
}
