//! Test server management

use s3mpu_uploads::storage::EphemeralStore;
use s3mpu_uploads::{object_router, router, UploadConfig, UploadManager};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;
use url::Url;

use crate::{UploadClient, TEST_BUCKET};

/// An upload API served in-process on a random port
pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    store: Arc<EphemeralStore>,
    manager: UploadManager,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a server with default settings for [`TEST_BUCKET`]
    pub async fn start() -> Result<Self, TestError> {
        Self::start_with(UploadConfig::new(TEST_BUCKET)).await
    }

    /// Start a server with custom upload settings
    pub async fn start_with(config: UploadConfig) -> Result<Self, TestError> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| TestError::StartFailed(e.to_string()))?;
        let addr = listener
            .local_addr()
            .map_err(|e| TestError::StartFailed(e.to_string()))?;
        let base_url = format!("http://{}", addr);

        // Presigned URLs point at this server, which also serves them
        let endpoint = Url::parse(&base_url).map_err(|e| TestError::StartFailed(e.to_string()))?;
        let store = Arc::new(EphemeralStore::new(config.bucket.clone(), endpoint));
        let manager = UploadManager::new(store.clone(), config)
            .map_err(|e| TestError::InvalidConfig(e.to_string()))?;

        let app = router(manager.clone()).merge(object_router(store.clone()));
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Test server stopped: {}", e);
            }
        });

        info!(addr = %addr, "Started s3mpu test server");

        Ok(Self {
            addr,
            base_url,
            store,
            manager,
            handle,
        })
    }

    /// Get the base URL
    pub fn url(&self) -> &str {
        &self.base_url
    }

    /// Get the port
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The in-memory bucket behind the server
    pub fn store(&self) -> &EphemeralStore {
        &self.store
    }

    pub fn manager(&self) -> &UploadManager {
        &self.manager
    }

    /// Get a client for the upload API
    pub fn client(&self) -> UploadClient {
        UploadClient::new(self.base_url.clone())
    }

    /// Stop the server
    pub fn stop(&self) {
        info!("Stopping s3mpu test server");
        self.handle.abort();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Errors that can occur with test server
#[derive(Debug)]
pub enum TestError {
    StartFailed(String),
    InvalidConfig(String),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::StartFailed(msg) => write!(f, "Failed to start server: {}", msg),
            TestError::InvalidConfig(msg) => write!(f, "Invalid upload config: {}", msg),
        }
    }
}

impl std::error::Error for TestError {}
