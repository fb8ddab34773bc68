//! HTTP route handlers, one module per API area.
//!
//! Every module exposes `router() -> Router<AppState>`; [`crate::router`]
//! nests them under their prefixes.

pub mod blobs;
pub mod compressed;
pub mod health;
pub mod refs;
pub mod replication;

use std::str::FromStr;

use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::HeaderMap;
use serde::de::DeserializeOwned;

use ddc_types::{BlobId, ContentId, TypeError};

use crate::error::ApiError;

/// Declared hash of a request body.
pub const HASH_HEADER: &str = "x-ddc-hash";

/// Client opts in to `302` redirects to presigned URIs.
pub const ACCEPT_REDIRECT_HEADER: &str = "x-ddc-accept-redirect";

pub const COMPRESSED_CONTENT_TYPE: &str = "application/x-ddc-compressed";
pub const OCTET_STREAM: &str = "application/octet-stream";
pub const JSON: &str = "application/json";

/// Parse a path segment into a validated name or hash.
pub(crate) fn parse<T>(kind: &str, raw: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = TypeError>,
{
    raw.parse()
        .map_err(|e: TypeError| ApiError::bad_request(format!("invalid {kind} {raw:?}: {e}")))
}

pub(crate) fn blob_id(raw: &str) -> Result<BlobId, ApiError> {
    parse("blob id", raw)
}

pub(crate) fn content_id(raw: &str) -> Result<ContentId, ApiError> {
    parse("content id", raw)
}

/// Decode a JSON request body.
pub(crate) fn json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))
}

/// The hash declared in [`HASH_HEADER`], if any.
pub(crate) fn declared_hash(headers: &HeaderMap) -> Result<Option<BlobId>, ApiError> {
    headers
        .get(HASH_HEADER)
        .map(|v| {
            let raw = v
                .to_str()
                .map_err(|_| ApiError::bad_request(format!("{HASH_HEADER} is not ASCII")))?;
            blob_id(raw.trim())
        })
        .transpose()
}

pub(crate) fn accepts_redirect(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT_REDIRECT_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// The bare media type of a header, without parameters.
fn media_type<'a>(headers: &'a HeaderMap, name: axum::http::HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim())
}

pub(crate) fn content_type(headers: &HeaderMap) -> Option<&str> {
    media_type(headers, CONTENT_TYPE)
}

/// The first acceptable media type from `offered` listed in `Accept`.
/// Missing or wildcard `Accept` picks the first offer.
pub(crate) fn negotiate<'a>(headers: &HeaderMap, offered: &[&'a str]) -> Option<&'a str> {
    let Some(accept) = headers.get(ACCEPT).and_then(|v| v.to_str().ok()) else {
        return offered.first().copied();
    };
    for item in accept.split(',') {
        let wanted = item.split(';').next().unwrap_or(item).trim();
        if wanted == "*/*" || wanted.is_empty() {
            return offered.first().copied();
        }
        if let Some(found) = offered.iter().find(|o| o.eq_ignore_ascii_case(wanted)) {
            return Some(*found);
        }
    }
    None
}
