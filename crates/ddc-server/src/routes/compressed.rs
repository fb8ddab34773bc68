//! # Compressed blobs API
//!
//! Same shape as the blobs API, addressed by content id. Bodies are
//! compressed buffers; the server decodes and verifies them on write and
//! re-encodes on read.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use ddc_types::{ContentId, NamespaceId};

use super::{content_id, json_body, parse, COMPRESSED_CONTENT_TYPE};
use crate::auth::{Action, Identity};
use crate::body::read_body;
use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:ns", post(post_compressed))
        .route("/:ns/exists", post(exists))
        .route(
            "/:ns/:id",
            get(get_compressed).head(head_compressed).put(put_compressed),
        )
}

async fn get_compressed(
    State(state): State<AppState>,
    identity: Identity,
    Path((ns, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let ns: NamespaceId = parse("namespace", &ns)?;
    let id = content_id(&id)?;
    state.authorize(&identity, &ns, &[Action::Read]).await?;
    let buf = state.refs.content().get_compressed(&ns, &id).await?;
    Ok(([(CONTENT_TYPE, COMPRESSED_CONTENT_TYPE)], buf).into_response())
}

async fn head_compressed(
    State(state): State<AppState>,
    identity: Identity,
    Path((ns, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let ns: NamespaceId = parse("namespace", &ns)?;
    let id = content_id(&id)?;
    state.authorize(&identity, &ns, &[Action::Read]).await?;
    let presence = state.refs.content().presence(&ns, &id, false).await?;
    Ok(if presence.is_present() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    })
}

async fn store(
    state: &AppState,
    identity: &Identity,
    ns: &str,
    declared: Option<ContentId>,
    body: Body,
) -> Result<Json<Value>, ApiError> {
    let ns: NamespaceId = parse("namespace", ns)?;
    state.authorize(identity, &ns, &[Action::Write]).await?;
    let buf = read_body(body, &state.payload).await?;
    let stored = state.refs.content().put_compressed(&ns, &buf, declared).await?;
    Ok(Json(json!({ "identifier": stored })))
}

async fn put_compressed(
    State(state): State<AppState>,
    identity: Identity,
    Path((ns, id)): Path<(String, String)>,
    body: Body,
) -> Result<Json<Value>, ApiError> {
    let id = content_id(&id)?;
    store(&state, &identity, &ns, Some(id), body).await
}

async fn post_compressed(
    State(state): State<AppState>,
    identity: Identity,
    Path(ns): Path<String>,
    body: Body,
) -> Result<Json<Value>, ApiError> {
    store(&state, &identity, &ns, None, body).await
}

async fn exists(
    State(state): State<AppState>,
    identity: Identity,
    Path(ns): Path<String>,
    body: Body,
) -> Result<Json<Value>, ApiError> {
    let ns: NamespaceId = parse("namespace", &ns)?;
    state.authorize(&identity, &ns, &[Action::Read]).await?;
    let ids: Vec<ContentId> = json_body(&read_body(body, &state.payload).await?)?;
    let needs = state.refs.content().filter_unknown(&ns, &ids).await?;
    Ok(Json(json!({ "needs": needs })))
}
