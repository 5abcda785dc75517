//! Upload session manager

use crate::config::{UploadConfig, MAX_PRESIGN_EXPIRY};
use crate::models::{
    CompleteUploadRequest, CompletedUpload, DownloadUrl, FileInfo, FileListing,
    InitiateUploadRequest, PartUrl, PartUrlRequest,
};
use crate::session::{
    file_extension, filename_of, generate_key, validate_filename, validate_key, PartList,
    UploadPlan, UploadSession, DEFAULT_CONTENT_TYPE, MAX_PARTS,
};
use crate::storage::{CompletedPart, ObjectStore, ObjectSummary, StorageError, UploadOptions};
use chrono::Utc;
use s3mpu_core::{UploadError, UploadResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Front for one bucket's multipart uploads
///
/// Holds no state of its own beyond its configuration; the provider is the
/// source of truth for every upload. Cheap to clone and share across tasks.
#[derive(Clone)]
pub struct UploadManager {
    storage: Arc<dyn ObjectStore>,
    config: Arc<UploadConfig>,
}

impl UploadManager {
    /// Validate `config` and bind it to a storage backend
    pub fn new(storage: Arc<dyn ObjectStore>, config: UploadConfig) -> UploadResult<Self> {
        Ok(Self {
            storage,
            config: Arc::new(config.validated()?),
        })
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStore> {
        &self.storage
    }

    pub fn bucket(&self) -> &str {
        self.storage.bucket()
    }

    /// Open a multipart upload and report how the file should be split
    pub async fn initiate(&self, request: InitiateUploadRequest) -> UploadResult<UploadSession> {
        validate_filename(&request.filename)?;

        if request.file_size == 0 {
            return Err(UploadError::validation("file size must be greater than zero"));
        }
        if request.file_size > self.config.max_file_size {
            return Err(UploadError::validation(format!(
                "file size {} exceeds maximum allowed size {}",
                request.file_size, self.config.max_file_size
            )));
        }

        let extension = file_extension(&request.filename);
        if !self.config.extension_allowed(extension.as_deref()) {
            return Err(UploadError::validation(format!(
                "file extension {} is not allowed",
                extension.map_or_else(|| "(none)".to_string(), |ext| format!(".{}", ext))
            )));
        }

        let plan = UploadPlan::new(request.file_size, self.config.part_size)?;

        let key = match request.key {
            Some(key) => {
                validate_key(&key)?;
                key
            }
            None => generate_key(&self.config.key_prefix, &request.filename, Utc::now()),
        };

        let content_type = request
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let options = UploadOptions {
            content_type: Some(content_type.clone()),
            user_metadata: request.metadata.clone(),
        };

        let upload_id = self
            .storage
            .create_multipart_upload(&key, &options)
            .await
            .map_err(|e| {
                error!(key = %key, error = %e, "Failed to initiate upload");
                UploadError::Initiation {
                    key: key.clone(),
                    message: e.to_string(),
                }
            })?;

        info!(
            upload_id = %upload_id,
            key = %key,
            size = plan.total_size(),
            parts = plan.parts_count(),
            "Initiated upload"
        );

        Ok(UploadSession {
            upload_id,
            key,
            bucket: self.bucket().to_string(),
            total_size: plan.total_size(),
            part_size: plan.part_size(),
            parts_count: plan.parts_count(),
            content_type,
            metadata: request.metadata,
        })
    }

    /// Presign a PUT of one part, valid for the configured expiry
    pub async fn generate_presigned_url(&self, request: &PartUrlRequest) -> UploadResult<PartUrl> {
        require_upload_id(&request.upload_id)?;
        validate_key(&request.key)?;

        let upper = request.parts_count.unwrap_or(MAX_PARTS).min(MAX_PARTS);
        if request.part_number < 1 || u64::try_from(request.part_number).unwrap_or(0) > upper {
            return Err(UploadError::validation(format!(
                "part number {} must be between 1 and {}",
                request.part_number, upper
            )));
        }

        let expires_in = self.config.presigned_url_expiry;
        let url = self
            .storage
            .presign_upload_part(
                &request.key,
                &request.upload_id,
                request.part_number,
                Duration::from_secs(expires_in),
            )
            .await
            .map_err(|e| {
                error!(
                    upload_id = %request.upload_id,
                    key = %request.key,
                    part_number = request.part_number,
                    error = %e,
                    "Failed to presign part upload"
                );
                UploadError::Presign {
                    operation: "UploadPart",
                    key: request.key.clone(),
                    message: e.to_string(),
                }
            })?;

        debug!(
            upload_id = %request.upload_id,
            part_number = request.part_number,
            "Presigned part upload"
        );

        Ok(PartUrl {
            url,
            part_number: request.part_number,
            expires_in,
            expires_at: expires_at(expires_in),
        })
    }

    /// Finish an upload from the parts the client reports
    pub async fn complete_upload(
        &self,
        request: CompleteUploadRequest,
    ) -> UploadResult<CompletedUpload> {
        require_upload_id(&request.upload_id)?;
        validate_key(&request.key)?;

        let parts = PartList::new(request.parts.into_iter().map(CompletedPart::from).collect())?;
        if let Some(parts_count) = request.parts_count {
            parts.expect_count(parts_count)?;
        }

        let result = self
            .storage
            .complete_multipart_upload(&request.key, &request.upload_id, parts.as_slice())
            .await
            .map_err(|e| {
                error!(
                    upload_id = %request.upload_id,
                    key = %request.key,
                    error = %e,
                    "Failed to complete upload"
                );
                UploadError::Completion {
                    key: request.key.clone(),
                    upload_id: request.upload_id.clone(),
                    message: e.to_string(),
                    rejected_parts: matches!(e, StorageError::InvalidPart(_)),
                }
            })?;

        info!(
            upload_id = %request.upload_id,
            key = %request.key,
            parts = parts.len(),
            "Completed upload"
        );

        Ok(CompletedUpload {
            key: request.key,
            bucket: self.bucket().to_string(),
            location: result.location,
            etag: result.etag.trim_matches('"').to_string(),
        })
    }

    /// Abort an upload; one that is already gone counts as aborted
    pub async fn abort_upload(&self, upload_id: &str, key: &str) -> UploadResult<()> {
        require_upload_id(upload_id)?;
        validate_key(key)?;

        match self.storage.abort_multipart_upload(key, upload_id).await {
            Ok(()) => {
                info!(upload_id = %upload_id, key = %key, "Aborted upload");
                Ok(())
            }
            Err(StorageError::UploadNotFound(_)) => {
                debug!(upload_id = %upload_id, key = %key, "Upload already gone");
                Ok(())
            }
            Err(e) => {
                error!(upload_id = %upload_id, key = %key, error = %e, "Failed to abort upload");
                Err(provider_error(
                    "AbortMultipartUpload",
                    Some(key),
                    Some(upload_id),
                    &e,
                ))
            }
        }
    }

    /// Abort every upload initiated more than `older_than_days` days ago,
    /// returning how many were aborted
    pub async fn cleanup_incomplete_uploads(
        &self,
        older_than_days: u32,
        prefix: Option<&str>,
    ) -> UploadResult<usize> {
        // A cutoff before the earliest representable time leaves nothing stale
        let Some(cutoff) =
            Utc::now().checked_sub_signed(chrono::Duration::days(i64::from(older_than_days)))
        else {
            debug!(older_than_days, "Cleanup cutoff out of range, nothing to abort");
            return Ok(0);
        };
        let mut marker = None;
        let mut aborted = 0;
        let mut failed = 0;

        loop {
            let page = self
                .storage
                .list_multipart_uploads(prefix, marker.as_ref())
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to list in-progress uploads");
                    provider_error("ListMultipartUploads", prefix, None, &e)
                })?;

            for upload in page.uploads.iter().filter(|u| u.initiated < cutoff) {
                match self
                    .storage
                    .abort_multipart_upload(&upload.key, &upload.upload_id)
                    .await
                {
                    Ok(()) => {
                        aborted += 1;
                        debug!(
                            upload_id = %upload.upload_id,
                            key = %upload.key,
                            initiated = %upload.initiated,
                            "Aborted stale upload"
                        );
                    }
                    Err(StorageError::UploadNotFound(_)) => {}
                    Err(e) => {
                        failed += 1;
                        warn!(
                            upload_id = %upload.upload_id,
                            key = %upload.key,
                            error = %e,
                            "Failed to abort stale upload"
                        );
                    }
                }
            }

            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        info!(older_than_days, aborted, failed, "Cleaned up incomplete uploads");
        Ok(aborted)
    }

    /// One page of objects under `prefix`, newest first
    ///
    /// Without a prefix, lists under the configured key prefix.
    pub async fn list_files(
        &self,
        prefix: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> UploadResult<FileListing> {
        if page == 0 {
            return Err(UploadError::validation("page must be at least 1"));
        }
        if page_size == 0 {
            return Err(UploadError::validation("page_size must be at least 1"));
        }

        let default_prefix;
        let prefix = match prefix {
            Some(prefix) => prefix,
            None if self.config.key_prefix.is_empty() => "",
            None => {
                default_prefix = format!("{}/", self.config.key_prefix);
                &default_prefix
            }
        };
        let listing_prefix = (!prefix.is_empty()).then_some(prefix);

        let mut objects: Vec<ObjectSummary> = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let result = self
                .storage
                .list_objects(listing_prefix, token.as_deref())
                .await
                .map_err(|e| {
                    error!(prefix = %prefix, error = %e, "Failed to list files");
                    provider_error("ListObjectsV2", listing_prefix, None, &e)
                })?;
            objects.extend(result.objects);

            match result.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        objects.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| a.key.cmp(&b.key))
        });

        let total_count = objects.len();
        let page_len = page_size as usize;
        let total_pages = total_count.div_ceil(page_len);
        let start = (page as usize - 1).saturating_mul(page_len);

        let files = objects
            .into_iter()
            .skip(start)
            .take(page_len)
            .map(|object| FileInfo {
                filename: filename_of(&object.key).to_string(),
                etag: object.etag.trim_matches('"').to_string(),
                size: object.size,
                last_modified: object.last_modified,
                key: object.key,
            })
            .collect();

        Ok(FileListing {
            files,
            total_count,
            page,
            page_size,
            total_pages,
        })
    }

    /// Presign a GET of an object
    ///
    /// The lifetime defaults to the presigned URL expiry and is clamped to the
    /// configured download maximum.
    pub async fn generate_download_url(
        &self,
        key: &str,
        expires_in: Option<u64>,
    ) -> UploadResult<DownloadUrl> {
        validate_key(key)?;

        let requested = expires_in.unwrap_or(self.config.presigned_url_expiry);
        if requested == 0 {
            return Err(UploadError::validation("expires_in must be greater than zero"));
        }
        let expires_in = requested.min(self.config.max_download_expiry);

        let url = self
            .storage
            .presign_get_object(key, Duration::from_secs(expires_in))
            .await
            .map_err(|e| {
                error!(key = %key, error = %e, "Failed to presign download");
                UploadError::Presign {
                    operation: "GetObject",
                    key: key.to_string(),
                    message: e.to_string(),
                }
            })?;

        Ok(DownloadUrl {
            url,
            expires_in,
            expires_at: expires_at(expires_in),
        })
    }

    /// Delete an object that must exist
    pub async fn delete_file(&self, key: &str) -> UploadResult<()> {
        validate_key(key)?;

        match self.storage.head_object(key).await {
            Ok(_) => {}
            Err(StorageError::ObjectNotFound(_)) => {
                return Err(UploadError::NotFound(key.to_string()));
            }
            Err(e) => {
                error!(key = %key, error = %e, "Failed to look up file");
                return Err(provider_error("HeadObject", Some(key), None, &e));
            }
        }

        self.storage.delete_object(key).await.map_err(|e| {
            error!(key = %key, error = %e, "Failed to delete file");
            provider_error("DeleteObject", Some(key), None, &e)
        })?;

        info!(key = %key, "Deleted file");
        Ok(())
    }
}

fn require_upload_id(upload_id: &str) -> UploadResult<()> {
    if upload_id.trim().is_empty() {
        return Err(UploadError::validation("upload_id must not be empty"));
    }
    Ok(())
}

fn expires_at(expires_in: u64) -> chrono::DateTime<Utc> {
    let seconds = i64::try_from(expires_in.min(MAX_PRESIGN_EXPIRY)).unwrap_or_default();
    Utc::now() + chrono::Duration::seconds(seconds)
}

fn provider_error(
    operation: &'static str,
    key: Option<&str>,
    upload_id: Option<&str>,
    err: &StorageError,
) -> UploadError {
    UploadError::Provider {
        operation,
        key: key.map(str::to_string),
        upload_id: upload_id.map(str::to_string),
        message: err.to_string(),
    }
}
