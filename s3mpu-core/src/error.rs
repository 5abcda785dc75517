//! Upload error taxonomy and formatting

use serde::Serialize;
use thiserror::Error;

/// Stable error codes exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationError,
    InitiationError,
    PresignError,
    CompletionError,
    NotFoundError,
    ProviderError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "ValidationError",
            Self::InitiationError => "InitiationError",
            Self::PresignError => "PresignError",
            Self::CompletionError => "CompletionError",
            Self::NotFoundError => "NotFoundError",
            Self::ProviderError => "ProviderError",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::ValidationError => 400,
            Self::NotFoundError => 404,
            Self::InitiationError
            | Self::PresignError
            | Self::CompletionError
            | Self::ProviderError => 502,
        }
    }
}

/// Errors returned by upload session operations
///
/// Provider failures carry the operation name plus whatever key and upload id
/// the call was scoped to.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("failed to initiate multipart upload for {key}: {message}")]
    Initiation { key: String, message: String },

    #[error("failed to presign {operation} for {key}: {message}")]
    Presign {
        operation: &'static str,
        key: String,
        message: String,
    },

    /// `rejected_parts` is set when the provider refused the submitted part
    /// list (unknown part, wrong etag) rather than failing on its own side
    #[error("failed to complete multipart upload {upload_id} for {key}: {message}")]
    Completion {
        key: String,
        upload_id: String,
        message: String,
        rejected_parts: bool,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{operation} failed{}: {message}", context_suffix(.key, .upload_id))]
    Provider {
        operation: &'static str,
        key: Option<String>,
        upload_id: Option<String>,
        message: String,
    },
}

fn context_suffix(key: &Option<String>, upload_id: &Option<String>) -> String {
    match (key, upload_id) {
        (Some(key), Some(upload_id)) => format!(" for {} (upload {})", key, upload_id),
        (Some(key), None) => format!(" for {}", key),
        (None, Some(upload_id)) => format!(" (upload {})", upload_id),
        (None, None) => String::new(),
    }
}

impl UploadError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::Initiation { .. } => ErrorCode::InitiationError,
            Self::Presign { .. } => ErrorCode::PresignError,
            Self::Completion { .. } => ErrorCode::CompletionError,
            Self::NotFound(_) => ErrorCode::NotFoundError,
            Self::Provider { .. } => ErrorCode::ProviderError,
        }
    }

    /// HTTP status for this error; completions refused because of the
    /// caller's part list are client errors
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Completion {
                rejected_parts: true,
                ..
            } => 400,
            other => other.code().http_status(),
        }
    }

    /// Format as the JSON error envelope returned by the HTTP API
    pub fn to_json(&self, request_id: &str) -> String {
        #[derive(Serialize)]
        struct Body<'a> {
            code: &'static str,
            message: String,
            request_id: &'a str,
        }

        #[derive(Serialize)]
        struct Envelope<'a> {
            error: Body<'a>,
        }

        let envelope = Envelope {
            error: Body {
                code: self.code().as_str(),
                message: self.to_string(),
                request_id,
            },
        };

        serde_json::to_string(&envelope).unwrap_or_else(|_| {
            format!(
                r#"{{"error":{{"code":"{}","request_id":"{}"}}}}"#,
                self.code().as_str(),
                request_id
            )
        })
    }
}

pub type UploadResult<T> = Result<T, UploadError>;
