//! Upload manager configuration

use s3mpu_core::{UploadError, UploadResult};
use serde::Deserialize;
use std::fmt;

pub const MIB: u64 = 1024 * 1024;

/// Smallest part size the provider accepts for any part but the last
pub const MIN_PART_SIZE: u64 = 5 * MIB;

/// Largest part size the provider accepts
pub const MAX_PART_SIZE: u64 = 5 * 1024 * MIB;

/// Longest lifetime of a presigned URL (7 days)
pub const MAX_PRESIGN_EXPIRY: u64 = 604_800;

/// Static access keys used instead of the ambient credential chain
#[derive(Clone, Deserialize)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
}

impl StaticCredentials {
    /// Credentials in the form the request signer takes
    pub fn to_signing(&self) -> s3mpu_auth::Credentials {
        let credentials =
            s3mpu_auth::Credentials::new(&self.access_key_id, &self.secret_access_key);
        match &self.session_token {
            Some(token) => credentials.with_session_token(token),
            None => credentials,
        }
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Settings for an [`UploadManager`](crate::UploadManager)
///
/// Read once when the manager is built and never mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default)]
    pub bucket: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Falls back to the ambient AWS credential chain when unset
    #[serde(default)]
    pub credentials: Option<StaticCredentials>,

    /// Endpoint of an S3-compatible provider
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub force_path_style: bool,

    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Lifetime of part upload URLs, in seconds
    #[serde(default = "default_presigned_url_expiry")]
    pub presigned_url_expiry: u64,

    /// Cap on download URL lifetime, in seconds
    #[serde(default = "default_max_download_expiry")]
    pub max_download_expiry: u64,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Permitted filename extensions; any extension when unset
    #[serde(default)]
    pub allowed_extensions: Option<Vec<String>>,

    /// Leading path segment of generated keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            credentials: None,
            endpoint: None,
            force_path_style: false,
            part_size: default_part_size(),
            presigned_url_expiry: default_presigned_url_expiry(),
            max_download_expiry: default_max_download_expiry(),
            max_file_size: default_max_file_size(),
            allowed_extensions: None,
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_part_size() -> u64 {
    MIN_PART_SIZE
}

fn default_presigned_url_expiry() -> u64 {
    3600
}

fn default_max_download_expiry() -> u64 {
    MAX_PRESIGN_EXPIRY
}

fn default_max_file_size() -> u64 {
    5 * 1024 * MIB
}

fn default_key_prefix() -> String {
    "uploads".to_string()
}

impl UploadConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Self::default()
        }
    }

    /// Check every bound and normalise the extension allowlist
    pub fn validated(mut self) -> UploadResult<Self> {
        if self.bucket.trim().is_empty() {
            return Err(UploadError::validation("bucket must not be empty"));
        }
        if self.region.trim().is_empty() {
            return Err(UploadError::validation("region must not be empty"));
        }
        if let Some(credentials) = &self.credentials {
            if credentials.access_key_id.is_empty() || credentials.secret_access_key.is_empty() {
                return Err(UploadError::validation(
                    "credentials need both an access key id and a secret access key",
                ));
            }
        }
        if !(MIN_PART_SIZE..=MAX_PART_SIZE).contains(&self.part_size) {
            return Err(UploadError::validation(format!(
                "part_size {} must be between {} and {} bytes",
                self.part_size, MIN_PART_SIZE, MAX_PART_SIZE
            )));
        }
        if !(60..=MAX_PRESIGN_EXPIRY).contains(&self.presigned_url_expiry) {
            return Err(UploadError::validation(format!(
                "presigned_url_expiry {} must be between 60 and {} seconds",
                self.presigned_url_expiry, MAX_PRESIGN_EXPIRY
            )));
        }
        if !(1..=MAX_PRESIGN_EXPIRY).contains(&self.max_download_expiry) {
            return Err(UploadError::validation(format!(
                "max_download_expiry {} must be between 1 and {} seconds",
                self.max_download_expiry, MAX_PRESIGN_EXPIRY
            )));
        }
        if self.max_file_size == 0 {
            return Err(UploadError::validation("max_file_size must be greater than zero"));
        }

        self.key_prefix = self.key_prefix.trim_matches('/').to_string();

        if let Some(extensions) = self.allowed_extensions.take() {
            let normalized: Vec<String> = extensions
                .iter()
                .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect();
            // An empty allowlist allows every extension
            self.allowed_extensions = (!normalized.is_empty()).then_some(normalized);
        }

        Ok(self)
    }

    /// Whether a (lowercase, dotless) extension passes the allowlist
    pub fn extension_allowed(&self, extension: Option<&str>) -> bool {
        match &self.allowed_extensions {
            None => true,
            Some(allowed) if allowed.is_empty() => true,
            Some(allowed) => extension.is_some_and(|ext| allowed.iter().any(|a| a == ext)),
        }
    }
}
