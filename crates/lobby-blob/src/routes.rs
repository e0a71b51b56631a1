use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::storage::BlobStorage;

/// `GET /blobs/{*path}` serves stored blobs read-only.
pub fn router(storage: &BlobStorage) -> Router {
    Router::new()
        .nest_service("/blobs", ServeDir::new(storage.dir()))
        .layer(TraceLayer::new_for_http())
}
