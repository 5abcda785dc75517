//! Client for the upload API

use reqwest::{Client, Response, StatusCode};
use s3mpu_core::REQUEST_ID_HEADER;
use s3mpu_uploads::models::{
    CleanupResponse, CompletedUpload, DownloadUrl, FileListing, PartDescriptor, PartUrl,
};
use s3mpu_uploads::UploadSession;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

/// Client for the upload API
pub struct UploadClient {
    base_url: String,
    client: Client,
}

impl UploadClient {
    /// Create a new client
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { base_url, client }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // === Upload Sessions ===

    /// Open an upload with a generated key
    pub async fn initiate(&self, filename: &str, file_size: u64) -> Result<UploadSession, ClientError> {
        self.initiate_with(json!({"filename": filename, "file_size": file_size}))
            .await
    }

    /// Open an upload from a raw request body
    pub async fn initiate_with(&self, body: Value) -> Result<UploadSession, ClientError> {
        let response = self
            .client
            .post(format!("{}/uploads", self.base_url))
            .json(&body)
            .send()
            .await?;
        parse_json(response).await
    }

    pub async fn part_url(
        &self,
        upload_id: &str,
        key: &str,
        part_number: i32,
    ) -> Result<PartUrl, ClientError> {
        let response = self
            .client
            .post(format!("{}/uploads/part-url", self.base_url))
            .json(&json!({
                "upload_id": upload_id,
                "key": key,
                "part_number": part_number,
            }))
            .send()
            .await?;
        parse_json(response).await
    }

    pub async fn complete(
        &self,
        upload_id: &str,
        key: &str,
        parts: &[PartDescriptor],
    ) -> Result<CompletedUpload, ClientError> {
        let response = self
            .client
            .post(format!("{}/uploads/complete", self.base_url))
            .json(&json!({
                "upload_id": upload_id,
                "key": key,
                "parts": parts,
            }))
            .send()
            .await?;
        parse_json(response).await
    }

    pub async fn abort(&self, upload_id: &str, key: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .post(format!("{}/uploads/abort", self.base_url))
            .json(&json!({"upload_id": upload_id, "key": key}))
            .send()
            .await?;
        expect_empty(response).await
    }

    /// Abort uploads older than `older_than_days`; returns how many went
    pub async fn cleanup(&self, older_than_days: u32) -> Result<usize, ClientError> {
        let response = self
            .client
            .post(format!("{}/uploads/cleanup", self.base_url))
            .json(&json!({"older_than_days": older_than_days}))
            .send()
            .await?;
        let body: CleanupResponse = parse_json(response).await?;
        Ok(body.aborted)
    }

    // === Presigned URLs ===

    /// PUT a part to its presigned URL; returns the part's ETag
    pub async fn upload_part(&self, url: &str, data: Vec<u8>) -> Result<String, ClientError> {
        let response = self.client.put(url).body(data).send().await?;
        if !response.status().is_success() {
            return Err(object_error(response).await);
        }
        response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ClientError::ParseError("missing ETag header".to_string()))
    }

    /// GET an object through its presigned URL
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, ClientError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(object_error(response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    // === Files ===

    pub async fn list_files(
        &self,
        prefix: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<FileListing, ClientError> {
        let mut query = vec![
            ("page", page.to_string()),
            ("page_size", page_size.to_string()),
        ];
        if let Some(prefix) = prefix {
            query.push(("prefix", prefix.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/files", self.base_url))
            .query(&query)
            .send()
            .await?;
        parse_json(response).await
    }

    pub async fn download_url(
        &self,
        key: &str,
        expires_in: Option<u64>,
    ) -> Result<DownloadUrl, ClientError> {
        let mut query = vec![("key", key.to_string())];
        if let Some(expires_in) = expires_in {
            query.push(("expires_in", expires_in.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/files/download-url", self.base_url))
            .query(&query)
            .send()
            .await?;
        parse_json(response).await
    }

    pub async fn delete_file(&self, key: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .delete(format!("{}/files", self.base_url))
            .query(&[("key", key)])
            .send()
            .await?;
        expect_empty(response).await
    }
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| ClientError::ParseError(format!("{}: {}", e, text)))
}

async fn expect_empty(response: Response) -> Result<(), ClientError> {
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }
    Ok(())
}

/// Decode the error envelope of a failed response
async fn api_error(response: Response) -> ClientError {
    let status = response.status();
    let header_id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let error = &body["error"];

    ClientError::Api {
        status,
        code: error["code"].as_str().unwrap_or_default().to_string(),
        message: error["message"].as_str().unwrap_or_default().to_string(),
        request_id: error["request_id"]
            .as_str()
            .map(str::to_string)
            .or(header_id),
    }
}

/// Decode an S3-style XML error from the object endpoint
async fn object_error(response: Response) -> ClientError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let code = body
        .split_once("<Code>")
        .and_then(|(_, rest)| rest.split_once("</Code>"))
        .map(|(code, _)| code.to_string())
        .unwrap_or_default();

    ClientError::Object { status, code, body }
}

/// Client errors
#[derive(Debug)]
pub enum ClientError {
    RequestError(reqwest::Error),
    ParseError(String),
    Api {
        status: StatusCode,
        code: String,
        message: String,
        request_id: Option<String>,
    },
    Object {
        status: StatusCode,
        code: String,
        body: String,
    },
}

impl ClientError {
    /// Error code from the response envelope, if the server answered
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { code, .. } | ClientError::Object { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } | ClientError::Object { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::RequestError(e) => write!(f, "Request error: {}", e),
            ClientError::ParseError(e) => write!(f, "Parse error: {}", e),
            ClientError::Api {
                status,
                code,
                message,
                ..
            } => write!(f, "API error {} {}: {}", status, code, message),
            ClientError::Object { status, code, .. } => {
                write!(f, "Object request failed {} {}", status, code)
            }
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::RequestError(e)
    }
}
