//! Object endpoint for the in-memory backend
//!
//! Serves the presigned URLs an [`EphemeralStore`] hands out: `PUT` of a part
//! (`?partNumber=N&uploadId=ID`) and `GET` of a finished object. Requests are
//! checked against their query signature. Errors use the S3 XML error shape.

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::put,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::session::MAX_PARTS;
use crate::storage::{EphemeralStore, ObjectStore, StorageError};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Upload-part parameters of a presigned `PUT`
#[derive(Debug, Deserialize)]
pub struct PartQuery {
    #[serde(rename = "partNumber")]
    pub part_number: Option<i32>,
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
}

/// S3-style error response
#[derive(Debug)]
pub struct ObjectError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ObjectError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl From<StorageError> for ObjectError {
    fn from(e: StorageError) -> Self {
        let (status, code) = match &e {
            StorageError::AccessDenied(_) => (StatusCode::FORBIDDEN, "AccessDenied"),
            StorageError::UploadNotFound(_) => (StatusCode::NOT_FOUND, "NoSuchUpload"),
            StorageError::ObjectNotFound(_) => (StatusCode::NOT_FOUND, "NoSuchKey"),
            StorageError::InvalidPart(_) => (StatusCode::BAD_REQUEST, "InvalidPart"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };
        Self::new(status, code, e.to_string())
    }
}

impl IntoResponse for ObjectError {
    fn into_response(self) -> Response {
        debug!(code = self.code, status = self.status.as_u16(), "Object request failed");
        let body = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>{}</Code><Message>{}</Message></Error>",
            self.code,
            escape_xml(&self.message)
        );
        (
            self.status,
            [(header::CONTENT_TYPE, "application/xml")],
            body,
        )
            .into_response()
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Routes serving `store`'s presigned URLs at `/{bucket}/{key}`
pub fn object_router(store: Arc<EphemeralStore>) -> Router {
    Router::new()
        .route("/:bucket/*key", put(upload_part).get(get_object))
        // Parts are at least 5 MiB
        .layer(DefaultBodyLimit::disable())
        .with_state(store)
}

/// Check bucket and signature of a request for `bucket`
fn authorize(
    store: &EphemeralStore,
    bucket: &str,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<(), ObjectError> {
    if bucket != store.bucket() {
        return Err(ObjectError::new(
            StatusCode::NOT_FOUND,
            "NoSuchBucket",
            format!("bucket {} does not exist", bucket),
        ));
    }

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ObjectError::new(StatusCode::FORBIDDEN, "AccessDenied", "missing host header"))?;

    store
        .verify_presigned(method.as_str(), uri.path(), uri.query().unwrap_or_default(), host)
        .map_err(ObjectError::from)
}

async fn upload_part(
    State(store): State<Arc<EphemeralStore>>,
    Path((bucket, key)): Path<(String, String)>,
    query: Result<Query<PartQuery>, QueryRejection>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ObjectError> {
    authorize(&store, &bucket, &method, &uri, &headers)?;

    let Query(query) = query.map_err(|e| {
        ObjectError::new(StatusCode::BAD_REQUEST, "InvalidArgument", e.body_text())
    })?;
    let (Some(part_number), Some(upload_id)) = (query.part_number, query.upload_id) else {
        return Err(ObjectError::new(
            StatusCode::NOT_IMPLEMENTED,
            "NotImplemented",
            "only multipart part uploads are accepted",
        ));
    };
    if !(1..=MAX_PARTS).contains(&u64::try_from(part_number).unwrap_or_default()) {
        return Err(ObjectError::new(
            StatusCode::BAD_REQUEST,
            "InvalidArgument",
            format!("part number must be between 1 and {}", MAX_PARTS),
        ));
    }

    let part = store.upload_part(&key, &upload_id, part_number, body)?;
    info!(
        upload_id = %upload_id,
        key = %key,
        part_number,
        size = part.size,
        "Stored part"
    );

    Ok((StatusCode::OK, [(header::ETAG, part.etag)]).into_response())
}

async fn get_object(
    State(store): State<Arc<EphemeralStore>>,
    Path((bucket, key)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ObjectError> {
    authorize(&store, &bucket, &method, &uri, &headers)?;

    let object = store.get_object(&key)?;
    let content_type = object
        .content_type
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    Ok((
        StatusCode::OK,
        [
            (header::ETAG, object.summary.etag),
            (header::CONTENT_TYPE, content_type),
            (
                header::LAST_MODIFIED,
                object
                    .summary
                    .last_modified
                    .format("%a, %d %b %Y %H:%M:%S GMT")
                    .to_string(),
            ),
        ],
        object.data,
    )
        .into_response())
}
