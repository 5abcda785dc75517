//! Storage provider traits

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors from the storage provider, classified at the backend boundary
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload not found: {0}")]
    UploadNotFound(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Invalid part: {0}")]
    InvalidPart(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("{code}: {message}")]
    Service { code: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Object settings applied when a multipart upload is created
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub user_metadata: HashMap<String, String>,
}

/// Completed part for multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Result of completing a multipart upload
#[derive(Debug)]
pub struct CompleteResult {
    pub location: String,
    pub etag: String,
}

/// Summary of an object in a listing
#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub etag: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Result of a list operation
#[derive(Debug, Default)]
pub struct ListObjectsResult {
    pub objects: Vec<ObjectSummary>,
    pub next_continuation_token: Option<String>,
}

/// Information about an in-progress multipart upload
#[derive(Debug, Clone)]
pub struct MultipartUploadInfo {
    pub key: String,
    pub upload_id: String,
    pub initiated: DateTime<Utc>,
}

/// Position to resume an in-progress upload listing from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMarker {
    pub key: String,
    pub upload_id: String,
}

/// One page of in-progress multipart uploads
#[derive(Debug, Default)]
pub struct MultipartUploadPage {
    pub uploads: Vec<MultipartUploadInfo>,
    /// Set when more uploads follow this page
    pub next_marker: Option<UploadMarker>,
}

/// Object storage provider bound to a single bucket
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket this store operates on
    fn bucket(&self) -> &str;

    /// Create a multipart upload, returning the provider's upload id
    async fn create_multipart_upload(
        &self,
        key: &str,
        options: &UploadOptions,
    ) -> Result<String, StorageError>;

    /// Presign a PUT for one part of a multipart upload
    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        expires_in: Duration,
    ) -> Result<String, StorageError>;

    /// Complete a multipart upload; `parts` are in ascending part order
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteResult, StorageError>;

    /// Abort a multipart upload
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str)
        -> Result<(), StorageError>;

    /// List in-progress multipart uploads, one page at a time
    async fn list_multipart_uploads(
        &self,
        prefix: Option<&str>,
        marker: Option<&UploadMarker>,
    ) -> Result<MultipartUploadPage, StorageError>;

    /// List objects, one page at a time
    async fn list_objects(
        &self,
        prefix: Option<&str>,
        continuation_token: Option<&str>,
    ) -> Result<ListObjectsResult, StorageError>;

    /// Presign a GET for an object
    async fn presign_get_object(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError>;

    /// Fetch object metadata
    async fn head_object(&self, key: &str) -> Result<ObjectSummary, StorageError>;

    /// Delete an object
    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;
}
