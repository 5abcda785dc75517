//! Request and response bodies of the upload API

use crate::storage::CompletedPart;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Days an upload may sit unfinished before cleanup aborts it
pub const DEFAULT_CLEANUP_DAYS: u32 = 7;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct InitiateUploadRequest {
    pub filename: String,
    pub file_size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Use this object key instead of a generated one
    #[serde(default)]
    pub key: Option<String>,
}

impl InitiateUploadRequest {
    pub fn new(filename: impl Into<String>, file_size: u64) -> Self {
        Self {
            filename: filename.into(),
            file_size,
            content_type: None,
            metadata: HashMap::new(),
            key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartUrlRequest {
    pub upload_id: String,
    pub key: String,
    pub part_number: i32,
    /// Upper bound for `part_number`, when the caller knows it
    #[serde(default)]
    pub parts_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartUrl {
    pub url: String,
    pub part_number: i32,
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
}

/// One uploaded part as reported by the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartDescriptor {
    #[serde(alias = "PartNumber")]
    pub part_number: i32,
    #[serde(alias = "ETag")]
    pub etag: String,
}

impl From<PartDescriptor> for CompletedPart {
    fn from(part: PartDescriptor) -> Self {
        Self {
            part_number: part.part_number,
            etag: part.etag,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteUploadRequest {
    pub upload_id: String,
    pub key: String,
    pub parts: Vec<PartDescriptor>,
    #[serde(default)]
    pub parts_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedUpload {
    pub key: String,
    pub bucket: String,
    pub location: String,
    pub etag: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbortUploadRequest {
    pub upload_id: String,
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupRequest {
    #[serde(default = "default_cleanup_days")]
    pub older_than_days: u32,
    #[serde(default)]
    pub prefix: Option<String>,
}

fn default_cleanup_days() -> u32 {
    DEFAULT_CLEANUP_DAYS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub aborted: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListFilesQuery {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub key: String,
    pub filename: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListing {
    pub files: Vec<FileInfo>,
    pub total_count: usize,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadUrlQuery {
    pub key: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadUrl {
    pub url: String,
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyQuery {
    pub key: String,
}
