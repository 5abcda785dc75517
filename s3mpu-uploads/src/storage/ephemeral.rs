//! In-memory ephemeral storage backend

use super::traits::*;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use md5::{Digest, Md5};
use s3mpu_auth::{
    presign_url, verify_presigned, Addressing, Credentials, PresignRequest, SignedRequest,
};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Default number of entries per listing page, matching S3
const DEFAULT_PAGE_SIZE: usize = 1000;

/// In-memory stored object
struct InMemoryObject {
    data: Bytes,
    etag: String,
    content_type: Option<String>,
    last_modified: DateTime<Utc>,
}

/// In-progress multipart upload
struct MultipartUpload {
    key: String,
    parts: HashMap<i32, InMemoryPart>,
    options: UploadOptions,
    created_at: DateTime<Utc>,
}

/// Uploaded part
struct InMemoryPart {
    data: Bytes,
    etag: String,
}

/// Information about a part accepted by [`EphemeralStore::upload_part`]
#[derive(Debug, Clone)]
pub struct PartInfo {
    pub part_number: i32,
    pub etag: String,
    pub size: u64,
}

/// An object read back by [`EphemeralStore::get_object`]
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub summary: ObjectSummary,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Ephemeral (in-memory) single-bucket store
///
/// URLs are signed against `endpoint` with path-style addressing, so they
/// have the same shape as those of an S3-compatible server running there.
pub struct EphemeralStore {
    bucket: String,
    endpoint: Url,
    region: String,
    credentials: Credentials,
    page_size: usize,
    objects: DashMap<String, InMemoryObject>,
    uploads: DashMap<String, MultipartUpload>,
}

impl EphemeralStore {
    pub fn new(bucket: impl Into<String>, endpoint: Url) -> Self {
        Self {
            bucket: bucket.into(),
            endpoint,
            region: "us-east-1".to_string(),
            credentials: Credentials::new("test", "test"),
            page_size: DEFAULT_PAGE_SIZE,
            objects: DashMap::new(),
            uploads: DashMap::new(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Limit listing pages, to exercise pagination with few entries
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn compute_etag(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        format!("\"{}\"", hex::encode(hasher.finalize()))
    }

    fn presign(
        &self,
        method: &str,
        key: &str,
        query: Vec<(String, String)>,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        let request = PresignRequest {
            method,
            endpoint: &self.endpoint,
            addressing: Addressing::PathStyle,
            bucket: &self.bucket,
            key,
            query,
            region: &self.region,
            service: "s3",
            credentials: &self.credentials,
            timestamp: Utc::now(),
            expires_in: expires_in.as_secs(),
        };
        presign_url(&request).map_err(|e| StorageError::Internal(e.to_string()))
    }

    /// Store an object directly
    pub fn put_object(&self, key: &str, data: Bytes) -> String {
        self.put_object_at(key, data, Utc::now())
    }

    /// Store an object with an explicit modification time
    pub fn put_object_at(&self, key: &str, data: Bytes, last_modified: DateTime<Utc>) -> String {
        let etag = Self::compute_etag(&data);
        self.objects.insert(
            key.to_string(),
            InMemoryObject {
                data,
                etag: etag.clone(),
                content_type: None,
                last_modified,
            },
        );
        etag
    }

    /// Check a request made through one of this store's presigned URLs
    ///
    /// `path` and `query` are as received; `host` is the request's `Host`.
    pub fn verify_presigned(
        &self,
        method: &str,
        path: &str,
        query: &str,
        host: &str,
    ) -> Result<(), StorageError> {
        let request = SignedRequest {
            method,
            path,
            query,
            host,
            now: Utc::now(),
        };
        verify_presigned(&request, &self.credentials, &self.region, "s3")
            .map_err(|e| StorageError::AccessDenied(e.to_string()))
    }

    /// Fetch an object with its content type, as a presigned GET would
    pub fn get_object(&self, key: &str) -> Result<StoredObject, StorageError> {
        let obj = self
            .objects
            .get(key)
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))?;

        Ok(StoredObject {
            summary: ObjectSummary {
                key: key.to_string(),
                etag: obj.etag.clone(),
                size: obj.data.len() as u64,
                last_modified: obj.last_modified,
            },
            content_type: obj.content_type.clone(),
            data: obj.data.clone(),
        })
    }

    /// Read back a stored object's bytes
    pub fn object_data(&self, key: &str) -> Option<Bytes> {
        self.objects.get(key).map(|obj| obj.data.clone())
    }

    /// Content type an in-progress upload was created with
    pub fn upload_content_type(&self, upload_id: &str) -> Option<String> {
        self.uploads
            .get(upload_id)
            .and_then(|upload| upload.options.content_type.clone())
    }

    /// Upload a part, as a client would through a presigned URL
    pub fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<PartInfo, StorageError> {
        let mut upload = self
            .uploads
            .get_mut(upload_id)
            .filter(|upload| upload.key == key)
            .ok_or_else(|| StorageError::UploadNotFound(upload_id.to_string()))?;

        let etag = Self::compute_etag(&data);
        let size = data.len() as u64;

        upload.parts.insert(
            part_number,
            InMemoryPart {
                data,
                etag: etag.clone(),
            },
        );

        Ok(PartInfo {
            part_number,
            etag,
            size,
        })
    }

    /// Move an upload's initiation time, to simulate stale uploads
    pub fn set_upload_initiated(&self, upload_id: &str, initiated: DateTime<Utc>) -> bool {
        match self.uploads.get_mut(upload_id) {
            Some(mut upload) => {
                upload.created_at = initiated;
                true
            }
            None => false,
        }
    }

    /// Whether an upload is still in progress
    pub fn has_upload(&self, upload_id: &str) -> bool {
        self.uploads.contains_key(upload_id)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.len()
    }
}

fn normalize_etag(etag: &str) -> &str {
    etag.trim().trim_matches('"')
}

/// Check a completion request against the parts actually uploaded
fn validate_parts(upload: &MultipartUpload, parts: &[CompletedPart]) -> Result<(), StorageError> {
    let mut previous = 0;
    for completed in parts {
        if completed.part_number <= previous {
            return Err(StorageError::InvalidPart(format!(
                "part {} is out of order",
                completed.part_number
            )));
        }
        previous = completed.part_number;

        let part = upload.parts.get(&completed.part_number).ok_or_else(|| {
            StorageError::InvalidPart(format!("part {} was never uploaded", completed.part_number))
        })?;
        if normalize_etag(&part.etag) != normalize_etag(&completed.etag) {
            return Err(StorageError::InvalidPart(format!(
                "etag for part {} does not match",
                completed.part_number
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for EphemeralStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        options: &UploadOptions,
    ) -> Result<String, StorageError> {
        let upload_id = Uuid::new_v4().to_string();

        self.uploads.insert(
            upload_id.clone(),
            MultipartUpload {
                key: key.to_string(),
                parts: HashMap::new(),
                options: options.clone(),
                created_at: Utc::now(),
            },
        );

        Ok(upload_id)
    }

    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        if !self
            .uploads
            .get(upload_id)
            .is_some_and(|upload| upload.key == key)
        {
            return Err(StorageError::UploadNotFound(upload_id.to_string()));
        }

        self.presign(
            "PUT",
            key,
            vec![
                ("partNumber".to_string(), part_number.to_string()),
                ("uploadId".to_string(), upload_id.to_string()),
            ],
            expires_in,
        )
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteResult, StorageError> {
        // Parts are checked under the map's write lock; the upload is claimed
        // only when they all match, and stays in place otherwise
        let mut rejection = None;
        let (_, upload) = self
            .uploads
            .remove_if(upload_id, |_, upload| {
                if upload.key != key {
                    return false;
                }
                match validate_parts(upload, parts) {
                    Ok(()) => true,
                    Err(e) => {
                        rejection = Some(e);
                        false
                    }
                }
            })
            .ok_or_else(|| {
                rejection
                    .take()
                    .unwrap_or_else(|| StorageError::UploadNotFound(upload_id.to_string()))
            })?;

        // Assemble parts and compute the multipart ETag:
        // MD5(concat(MD5(part1), MD5(part2), ...))-N
        let mut combined = Vec::new();
        let mut etag_parts = Vec::new();
        for completed in parts {
            if let Some(part) = upload.parts.get(&completed.part_number) {
                combined.extend_from_slice(&part.data);
                etag_parts.extend_from_slice(&Md5::digest(&part.data));
            }
        }
        let etag = format!(
            "\"{}-{}\"",
            hex::encode(Md5::digest(&etag_parts)),
            parts.len()
        );

        self.objects.insert(
            key.to_string(),
            InMemoryObject {
                data: Bytes::from(combined),
                etag: etag.clone(),
                content_type: upload.options.content_type,
                last_modified: Utc::now(),
            },
        );

        Ok(CompleteResult {
            location: format!(
                "{}/{}/{}",
                self.endpoint.as_str().trim_end_matches('/'),
                self.bucket,
                key
            ),
            etag,
        })
    }

    async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.uploads
            .remove_if(upload_id, |_, upload| upload.key == key)
            .map(|_| ())
            .ok_or_else(|| StorageError::UploadNotFound(upload_id.to_string()))
    }

    async fn list_multipart_uploads(
        &self,
        prefix: Option<&str>,
        marker: Option<&UploadMarker>,
    ) -> Result<MultipartUploadPage, StorageError> {
        let prefix = prefix.unwrap_or("");

        let mut uploads: Vec<MultipartUploadInfo> = self
            .uploads
            .iter()
            .filter(|entry| entry.value().key.starts_with(prefix))
            .map(|entry| MultipartUploadInfo {
                key: entry.value().key.clone(),
                upload_id: entry.key().clone(),
                initiated: entry.value().created_at,
            })
            .collect();

        // S3 orders uploads by key, then upload id
        uploads.sort_by(|a, b| (&a.key, &a.upload_id).cmp(&(&b.key, &b.upload_id)));

        if let Some(marker) = marker {
            uploads.retain(|u| (&u.key, &u.upload_id) > (&marker.key, &marker.upload_id));
        }

        let truncated = uploads.len() > self.page_size;
        uploads.truncate(self.page_size);

        let next_marker = if truncated {
            uploads.last().map(|last| UploadMarker {
                key: last.key.clone(),
                upload_id: last.upload_id.clone(),
            })
        } else {
            None
        };

        Ok(MultipartUploadPage {
            uploads,
            next_marker,
        })
    }

    async fn list_objects(
        &self,
        prefix: Option<&str>,
        continuation_token: Option<&str>,
    ) -> Result<ListObjectsResult, StorageError> {
        let prefix = prefix.unwrap_or("");

        let mut objects: Vec<ObjectSummary> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .filter(|entry| continuation_token.map_or(true, |token| entry.key().as_str() > token))
            .map(|entry| ObjectSummary {
                key: entry.key().clone(),
                etag: entry.etag.clone(),
                size: entry.data.len() as u64,
                last_modified: entry.last_modified,
            })
            .collect();

        // Sort by key
        objects.sort_by(|a, b| a.key.cmp(&b.key));

        let truncated = objects.len() > self.page_size;
        objects.truncate(self.page_size);

        let next_continuation_token = if truncated {
            objects.last().map(|last| last.key.clone())
        } else {
            None
        };

        Ok(ListObjectsResult {
            objects,
            next_continuation_token,
        })
    }

    async fn presign_get_object(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        self.presign("GET", key, Vec::new(), expires_in)
    }

    async fn head_object(&self, key: &str) -> Result<ObjectSummary, StorageError> {
        let obj = self
            .objects
            .get(key)
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))?;

        Ok(ObjectSummary {
            key: key.to_string(),
            etag: obj.etag.clone(),
            size: obj.data.len() as u64,
            last_modified: obj.last_modified,
        })
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        // S3 returns success even for non-existent keys
        self.objects.remove(key);
        Ok(())
    }
}
