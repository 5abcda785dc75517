//! AWS S3 storage backend

use super::traits::*;
use crate::config::UploadConfig;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::DateTime as SdkDateTime;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as SdkCompletedPart};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

/// Store backed by an `aws-sdk-s3` client
pub struct AwsStore {
    client: Client,
    bucket: String,
}

impl AwsStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from the ambient AWS configuration, overridden by the
    /// region, credentials and endpoint in `config`
    pub async fn connect(config: &UploadConfig) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

        if let Some(credentials) = &config.credentials {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                credentials.access_key_id.clone(),
                credentials.secret_access_key.clone(),
                credentials.session_token.clone(),
                None,
                "s3mpu-config",
            ));
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint.as_str());
        }
        builder = builder.force_path_style(config.force_path_style);

        debug!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint,
            "Built S3 client"
        );

        Self::new(Client::from_conf(builder.build()), config.bucket.clone())
    }
}

/// Map an SDK failure onto a storage error by its service error code
fn classify<E, R>(operation: &str, err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    if let Some(service_err) = err.as_service_error() {
        let code = service_err.code().unwrap_or("Unknown").to_string();
        let message = service_err.message().unwrap_or_default().to_string();

        return match code.as_str() {
            "NoSuchUpload" => StorageError::UploadNotFound(message),
            "NoSuchKey" | "NotFound" => StorageError::ObjectNotFound(message),
            "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken" => {
                StorageError::AccessDenied(format!("{}: {}", code, message))
            }
            "InvalidPart" | "InvalidPartOrder" | "EntityTooSmall" => {
                StorageError::InvalidPart(format!("{}: {}", code, message))
            }
            _ => StorageError::Service { code, message },
        };
    }

    StorageError::Transport(format!("{}: {}", operation, DisplayErrorContext(&err)))
}

fn classify_head_object<R>(key: &str, err: SdkError<HeadObjectError, R>) -> StorageError
where
    R: std::fmt::Debug + Send + Sync + 'static,
{
    // HEAD responses have no body, so the error code may be absent
    if err
        .as_service_error()
        .is_some_and(HeadObjectError::is_not_found)
    {
        return StorageError::ObjectNotFound(key.to_string());
    }
    classify("HeadObject", err)
}

fn presigning_config(expires_in: Duration) -> Result<PresigningConfig, StorageError> {
    PresigningConfig::expires_in(expires_in).map_err(|e| StorageError::Internal(e.to_string()))
}

fn to_chrono(timestamp: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}

#[async_trait]
impl ObjectStore for AwsStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        options: &UploadOptions,
    ) -> Result<String, StorageError> {
        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(options.content_type.clone());

        for (name, value) in &options.user_metadata {
            request = request.metadata(name, value);
        }

        let output = request
            .send()
            .await
            .map_err(|e| classify("CreateMultipartUpload", e))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::Internal("response carried no upload id".to_string()))
    }

    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        let presigned = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .presigned(presigning_config(expires_in)?)
            .await
            .map_err(|e| classify("UploadPart", e))?;

        Ok(presigned.uri().to_string())
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteResult, StorageError> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|part| {
                        SdkCompletedPart::builder()
                            .part_number(part.part_number)
                            .e_tag(&part.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| classify("CompleteMultipartUpload", e))?;

        Ok(CompleteResult {
            location: output.location().unwrap_or_default().to_string(),
            etag: output.e_tag().unwrap_or_default().to_string(),
        })
    }

    async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| classify("AbortMultipartUpload", e))?;
        Ok(())
    }

    async fn list_multipart_uploads(
        &self,
        prefix: Option<&str>,
        marker: Option<&UploadMarker>,
    ) -> Result<MultipartUploadPage, StorageError> {
        let mut request = self
            .client
            .list_multipart_uploads()
            .bucket(&self.bucket)
            .set_prefix(prefix.map(str::to_string));
        if let Some(marker) = marker {
            request = request
                .key_marker(&marker.key)
                .upload_id_marker(&marker.upload_id);
        }

        let output = request
            .send()
            .await
            .map_err(|e| classify("ListMultipartUploads", e))?;

        let uploads = output
            .uploads()
            .iter()
            .filter_map(|upload| {
                Some(MultipartUploadInfo {
                    key: upload.key()?.to_string(),
                    upload_id: upload.upload_id()?.to_string(),
                    initiated: upload.initiated().and_then(to_chrono)?,
                })
            })
            .collect();

        let next_marker = if output.is_truncated().unwrap_or(false) {
            match (output.next_key_marker(), output.next_upload_id_marker()) {
                (Some(key), Some(upload_id)) => Some(UploadMarker {
                    key: key.to_string(),
                    upload_id: upload_id.to_string(),
                }),
                _ => None,
            }
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
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_prefix(prefix.map(str::to_string))
            .set_continuation_token(continuation_token.map(str::to_string))
            .send()
            .await
            .map_err(|e| classify("ListObjectsV2", e))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectSummary {
                    key: object.key()?.to_string(),
                    etag: object.e_tag().unwrap_or_default().to_string(),
                    size: object.size().unwrap_or_default().max(0) as u64,
                    last_modified: object
                        .last_modified()
                        .and_then(to_chrono)
                        .unwrap_or_default(),
                })
            })
            .collect();

        let next_continuation_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
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
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config(expires_in)?)
            .await
            .map_err(|e| classify("GetObject", e))?;

        Ok(presigned.uri().to_string())
    }

    async fn head_object(&self, key: &str) -> Result<ObjectSummary, StorageError> {
        let output = match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => return Err(classify_head_object(key, e)),
        };

        Ok(ObjectSummary {
            key: key.to_string(),
            etag: output.e_tag().unwrap_or_default().to_string(),
            size: output.content_length().unwrap_or_default().max(0) as u64,
            last_modified: output
                .last_modified()
                .and_then(to_chrono)
                .unwrap_or_default(),
        })
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify("DeleteObject", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::error::ErrorMetadata;
    use aws_sdk_s3::operation::abort_multipart_upload::AbortMultipartUploadError;
    use aws_sdk_s3::operation::complete_multipart_upload::CompleteMultipartUploadError;
    use aws_sdk_s3::operation::delete_object::DeleteObjectError;
    use aws_sdk_s3::types::error::{NoSuchUpload, NotFound};

    fn metadata(code: &str) -> ErrorMetadata {
        ErrorMetadata::builder()
            .code(code)
            .message("returned by s3")
            .build()
    }

    fn service_error<E>(err: E) -> SdkError<E, ()> {
        SdkError::service_error(err, ())
    }

    #[test]
    fn test_no_such_upload_is_upload_not_found() {
        let modeled = AbortMultipartUploadError::NoSuchUpload(
            NoSuchUpload::builder().meta(metadata("NoSuchUpload")).build(),
        );
        assert!(matches!(
            classify("AbortMultipartUpload", service_error(modeled)),
            StorageError::UploadNotFound(_)
        ));

        let unmodeled = CompleteMultipartUploadError::generic(metadata("NoSuchUpload"));
        assert!(matches!(
            classify("CompleteMultipartUpload", service_error(unmodeled)),
            StorageError::UploadNotFound(_)
        ));
    }

    #[test]
    fn test_rejected_parts_are_invalid_part() {
        for code in ["InvalidPart", "InvalidPartOrder", "EntityTooSmall"] {
            let err = CompleteMultipartUploadError::generic(metadata(code));
            match classify("CompleteMultipartUpload", service_error(err)) {
                StorageError::InvalidPart(message) => assert!(message.starts_with(code)),
                other => panic!("{code} mapped to {other:?}"),
            }
        }
    }

    #[test]
    fn test_credential_failures_are_access_denied() {
        for code in ["AccessDenied", "InvalidAccessKeyId", "SignatureDoesNotMatch", "ExpiredToken"] {
            let err = AbortMultipartUploadError::generic(metadata(code));
            assert!(
                matches!(
                    classify("AbortMultipartUpload", service_error(err)),
                    StorageError::AccessDenied(_)
                ),
                "{code}"
            );
        }
    }

    #[test]
    fn test_missing_keys_are_object_not_found() {
        let err = DeleteObjectError::generic(metadata("NoSuchKey"));
        assert!(matches!(
            classify("DeleteObject", service_error(err)),
            StorageError::ObjectNotFound(_)
        ));

        // HEAD 404s carry no error code
        let err = service_error(HeadObjectError::NotFound(NotFound::builder().build()));
        match classify_head_object("uploads/a.bin", err) {
            StorageError::ObjectNotFound(key) => assert_eq!(key, "uploads/a.bin"),
            other => panic!("expected object not found, got {other:?}"),
        }
    }

    #[test]
    fn test_other_failures() {
        let err = AbortMultipartUploadError::generic(metadata("SlowDown"));
        match classify("AbortMultipartUpload", service_error(err)) {
            StorageError::Service { code, message } => {
                assert_eq!(code, "SlowDown");
                assert_eq!(message, "returned by s3");
            }
            other => panic!("expected service error, got {other:?}"),
        }

        let err = SdkError::<AbortMultipartUploadError, ()>::timeout_error("deadline elapsed");
        match classify("AbortMultipartUpload", err) {
            StorageError::Transport(message) => assert!(message.starts_with("AbortMultipartUpload")),
            other => panic!("expected transport error, got {other:?}"),
        }

        let err = service_error(HeadObjectError::generic(metadata("AccessDenied")));
        assert!(matches!(
            classify_head_object("k", err),
            StorageError::AccessDenied(_)
        ));
    }

    #[test]
    fn test_to_chrono() {
        let timestamp = SdkDateTime::from_secs(1_700_000_000);
        let converted = to_chrono(&timestamp).unwrap();
        assert_eq!(converted.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_presigning_config_rejects_long_expiry() {
        assert!(presigning_config(Duration::from_secs(3600)).is_ok());
        assert!(matches!(
            presigning_config(Duration::from_secs(8 * 24 * 3600)),
            Err(StorageError::Internal(_))
        ));
    }
}
