use std::sync::Arc;

use axum::{
    routing::{get, put},
    Extension, Router,
};
use tokio_util::sync::CancellationToken;

use crate::cleanup::{self, CleanUpService};

pub async fn root() -> &'static str {
    "keysteward API"
}

pub fn api_routes() -> Router {
    Router::new().route("/v1/cleanup", put(cleanup::cleanup_clean_up))
}

/// Liveness and API routes with their shared state attached.
pub fn app(cleanup: Arc<CleanUpService>, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(api_routes())
        .layer(Extension(cleanup))
        .layer(Extension(shutdown))
}
