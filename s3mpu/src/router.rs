//! HTTP router for the upload service

use axum::{
    http::StatusCode, middleware, response::IntoResponse, routing::get, Json, Router,
};
use s3mpu_uploads::storage::EphemeralStore;
use s3mpu_uploads::{assign_request_id, object_router, UploadManager};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the main application router
///
/// With a `local_store`, its presigned URLs are served here too, open to
/// cross-origin browser uploads.
pub fn create_router(manager: UploadManager, local_store: Option<Arc<EphemeralStore>>) -> Router {
    let mut router = Router::new()
        // Health check endpoint
        .route("/health", get(health_check))
        .merge(s3mpu_uploads::router(manager));

    if let Some(store) = local_store {
        router = router.merge(object_router(store).layer(CorsLayer::permissive()));
    }

    router
        .layer(middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "running",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
