//! Upload HTTP request handlers

use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use s3mpu_core::{RequestId, UploadError, REQUEST_ID_HEADER};
use std::sync::Arc;
use tracing::debug;

use crate::models::{
    AbortUploadRequest, CleanupRequest, CleanupResponse, CompleteUploadRequest, CompletedUpload,
    DownloadUrl, DownloadUrlQuery, FileListing, InitiateUploadRequest, KeyQuery, ListFilesQuery,
    PartUrl, PartUrlRequest, DEFAULT_CLEANUP_DAYS,
};
use crate::service::UploadManager;
use crate::session::UploadSession;

/// Shared state for upload handlers
pub struct UploadState {
    pub manager: UploadManager,
}

/// An [`UploadError`] rendered as the JSON error envelope
#[derive(Debug)]
pub struct ApiError {
    error: UploadError,
    request_id: RequestId,
}

impl ApiError {
    pub fn new(request_id: &RequestId, error: UploadError) -> Self {
        Self {
            error,
            request_id: request_id.clone(),
        }
    }

    /// Request body or query string that could not be decoded
    fn rejected(request_id: &RequestId, message: impl Into<String>) -> Self {
        Self::new(request_id, UploadError::validation(message))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        debug!(
            request_id = %self.request_id,
            code = self.error.code().as_str(),
            status = status.as_u16(),
            "Request failed"
        );

        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(self.error.to_json(self.request_id.as_str())))
            .unwrap_or_else(|_| status.into_response())
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Create the upload API router
pub fn router(manager: UploadManager) -> Router {
    let state = Arc::new(UploadState { manager });

    Router::new()
        .route("/uploads", post(initiate_upload))
        .route("/uploads/part-url", post(part_url))
        .route("/uploads/complete", post(complete_upload))
        .route("/uploads/abort", post(abort_upload))
        .route("/uploads/cleanup", post(cleanup_uploads))
        .route("/files", get(list_files).delete(delete_file))
        .route("/files/download-url", get(download_url))
        .layer(middleware::from_fn(assign_request_id))
        .with_state(state)
}

/// Tag the request with an id, taken from the incoming header when present,
/// and echo it on the response
pub async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let request_id = match request.extensions().get::<RequestId>() {
        Some(id) => id.clone(),
        None => request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(RequestId::with_id)
            .unwrap_or_default(),
    };
    request.extensions_mut().insert(request_id.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn initiate_upload(
    State(state): State<Arc<UploadState>>,
    Extension(request_id): Extension<RequestId>,
    body: Result<Json<InitiateUploadRequest>, JsonRejection>,
) -> ApiResult<Json<UploadSession>> {
    let Json(request) = body.map_err(|e| ApiError::rejected(&request_id, e.body_text()))?;
    let session = state
        .manager
        .initiate(request)
        .await
        .map_err(|e| ApiError::new(&request_id, e))?;
    Ok(Json(session))
}

async fn part_url(
    State(state): State<Arc<UploadState>>,
    Extension(request_id): Extension<RequestId>,
    body: Result<Json<PartUrlRequest>, JsonRejection>,
) -> ApiResult<Json<PartUrl>> {
    let Json(request) = body.map_err(|e| ApiError::rejected(&request_id, e.body_text()))?;
    let url = state
        .manager
        .generate_presigned_url(&request)
        .await
        .map_err(|e| ApiError::new(&request_id, e))?;
    Ok(Json(url))
}

async fn complete_upload(
    State(state): State<Arc<UploadState>>,
    Extension(request_id): Extension<RequestId>,
    body: Result<Json<CompleteUploadRequest>, JsonRejection>,
) -> ApiResult<Json<CompletedUpload>> {
    let Json(request) = body.map_err(|e| ApiError::rejected(&request_id, e.body_text()))?;
    let completed = state
        .manager
        .complete_upload(request)
        .await
        .map_err(|e| ApiError::new(&request_id, e))?;
    Ok(Json(completed))
}

async fn abort_upload(
    State(state): State<Arc<UploadState>>,
    Extension(request_id): Extension<RequestId>,
    body: Result<Json<AbortUploadRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(request) = body.map_err(|e| ApiError::rejected(&request_id, e.body_text()))?;
    state
        .manager
        .abort_upload(&request.upload_id, &request.key)
        .await
        .map_err(|e| ApiError::new(&request_id, e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// The body is optional here, so it is decoded by hand
async fn cleanup_uploads(
    State(state): State<Arc<UploadState>>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> ApiResult<Json<CleanupResponse>> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CleanupRequest {
            older_than_days: DEFAULT_CLEANUP_DAYS,
            prefix: None,
        }
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::rejected(&request_id, format!("invalid cleanup request: {}", e)))?
    };

    let aborted = state
        .manager
        .cleanup_incomplete_uploads(request.older_than_days, request.prefix.as_deref())
        .await
        .map_err(|e| ApiError::new(&request_id, e))?;
    Ok(Json(CleanupResponse { aborted }))
}

async fn list_files(
    State(state): State<Arc<UploadState>>,
    Extension(request_id): Extension<RequestId>,
    query: Result<Query<ListFilesQuery>, QueryRejection>,
) -> ApiResult<Json<FileListing>> {
    let Query(query) = query.map_err(|e| ApiError::rejected(&request_id, e.body_text()))?;
    let listing = state
        .manager
        .list_files(query.prefix.as_deref(), query.page, query.page_size)
        .await
        .map_err(|e| ApiError::new(&request_id, e))?;
    Ok(Json(listing))
}

async fn download_url(
    State(state): State<Arc<UploadState>>,
    Extension(request_id): Extension<RequestId>,
    query: Result<Query<DownloadUrlQuery>, QueryRejection>,
) -> ApiResult<Json<DownloadUrl>> {
    let Query(query) = query.map_err(|e| ApiError::rejected(&request_id, e.body_text()))?;
    let url = state
        .manager
        .generate_download_url(&query.key, query.expires_in)
        .await
        .map_err(|e| ApiError::new(&request_id, e))?;
    Ok(Json(url))
}

async fn delete_file(
    State(state): State<Arc<UploadState>>,
    Extension(request_id): Extension<RequestId>,
    query: Result<Query<KeyQuery>, QueryRejection>,
) -> ApiResult<StatusCode> {
    let Query(query) = query.map_err(|e| ApiError::rejected(&request_id, e.body_text()))?;
    state
        .manager
        .delete_file(&query.key)
        .await
        .map_err(|e| ApiError::new(&request_id, e))?;
    Ok(StatusCode::NO_CONTENT)
}
