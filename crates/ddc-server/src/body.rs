//! Request body buffering.

use axum::body::Body;
use bytes::Bytes;
use tracing::debug;

use ddc_store::{Payload, PayloadConfig};

use crate::error::ApiError;

/// Drain a request body into a [`Payload`], spilling large bodies to disk.
///
/// Slow or aborted uploads surface as 408 through [`ApiError`].
pub async fn buffer_body(body: Body, config: &PayloadConfig) -> Result<Payload, ApiError> {
    let payload = Payload::buffer(body.into_data_stream(), config).await?;
    debug!(
        bytes = payload.len(),
        spilled = payload.is_spilled(),
        "request body buffered"
    );
    Ok(payload)
}

/// Drain a request body fully into memory.
pub async fn read_body(body: Body, config: &PayloadConfig) -> Result<Bytes, ApiError> {
    Ok(buffer_body(body, config).await?.to_bytes().await?)
}
