use axum::Router;
use tower_http::trace::TraceLayer;

use crate::routes;
use crate::state::AppState;

/// Build the axum router with every DDC endpoint.
///
/// Request bodies are drained through the payload buffer, which enforces
/// its own size limit, so no [`axum::extract::DefaultBodyLimit`] is set here.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/refs", routes::refs::router())
        .nest("/api/v1/blobs", routes::blobs::router())
        .nest("/api/v1/compressed-blobs", routes::compressed::router())
        .nest("/api/v1/replication-log", routes::replication::router())
        .nest("/health", routes::health::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
