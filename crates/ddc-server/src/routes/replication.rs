//! # Replication API
//!
//! - `GET  /api/v1/replication-log/incremental/:ns?lastBucket=&lastEvent=&count=&from=now`
//! - `GET  /api/v1/replication-log/snapshots/:ns`
//! - `POST /api/v1/replication-log/snapshots/:ns/create`
//!
//! A cursor the log can no longer serve answers `400` with
//! `type = UseSnapshot` and the snapshot to bootstrap from.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use ddc_log::{LogBucket, LogCursor, LogPage, SnapshotInfo, TailFrom};
use ddc_replication::ReplicationSource;
use ddc_types::NamespaceId;

use super::parse;
use crate::auth::{Action, Identity};
use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_COUNT: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/incremental/:ns", get(incremental))
        .route("/snapshots/:ns", get(latest_snapshot))
        .route("/snapshots/:ns/create", post(create_snapshot))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TailQuery {
    last_bucket: Option<String>,
    last_event: Option<Uuid>,
    count: Option<usize>,
    from: Option<String>,
}

impl TailQuery {
    fn tail_from(&self) -> Result<TailFrom, ApiError> {
        match (&self.last_bucket, self.last_event) {
            (Some(bucket), Some(event)) => {
                let bucket = LogBucket::parse(bucket)
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                Ok(TailFrom::After(LogCursor::new(bucket, event)))
            }
            (None, None) => match self.from.as_deref() {
                Some("now") => Ok(TailFrom::Now),
                None | Some("beginning") => Ok(TailFrom::Beginning),
                Some(other) => Err(ApiError::bad_request(format!(
                    "from must be \"now\" or \"beginning\", got {other:?}"
                ))),
            },
            _ => Err(ApiError::bad_request(
                "lastBucket and lastEvent must be given together",
            )),
        }
    }
}

async fn incremental(
    State(state): State<AppState>,
    identity: Identity,
    Path(ns): Path<String>,
    Query(query): Query<TailQuery>,
) -> Result<Json<LogPage>, ApiError> {
    let ns: NamespaceId = parse("namespace", &ns)?;
    state.authorize(&identity, &ns, &[Action::Read]).await?;
    let from = query.tail_from()?;
    let count = query.count.unwrap_or(DEFAULT_COUNT);
    Ok(Json(state.source.tail(&ns, from, count).await?))
}

async fn latest_snapshot(
    State(state): State<AppState>,
    identity: Identity,
    Path(ns): Path<String>,
) -> Result<Json<SnapshotInfo>, ApiError> {
    let ns: NamespaceId = parse("namespace", &ns)?;
    state.authorize(&identity, &ns, &[Action::Read]).await?;
    state
        .snapshots
        .registry()
        .latest(&ns)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("SnapshotNotFound", format!("no snapshot for {ns}")))
}

async fn create_snapshot(
    State(state): State<AppState>,
    identity: Identity,
    Path(ns): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let ns: NamespaceId = parse("namespace", &ns)?;
    state.authorize(&identity, &ns, &[Action::Admin]).await?;
    let info = state.snapshots.build(&ns, &state.snapshot_namespace).await?;
    Ok(Json(json!({
        "snapshotBlobId": info.snapshot_blob_id,
        "blobNamespace": info.blob_namespace,
    })))
}
