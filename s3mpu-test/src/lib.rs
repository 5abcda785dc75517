//! Test utilities for s3mpu
//!
//! Provides utilities for integration testing of the upload API:
//! - Serve the API in-process on a random port, backed by an in-memory bucket
//! - Simulate clients uploading parts through the store
//! - Typed client for the JSON endpoints
//!
//! ## Usage
//!
//! ```rust,no_run
//! use s3mpu_test::TestServer;
//!
//! #[tokio::test]
//! async fn test_uploads() {
//!     let server = TestServer::start().await.unwrap();
//!     let session = server.client().initiate("a.bin", 1024).await.unwrap();
//!     assert_eq!(session.parts_count, 1);
//! }
//! ```

pub mod client;
pub mod server;

pub use client::{ClientError, UploadClient};
pub use server::{TestError, TestServer};

/// Bucket served by the test server
pub const TEST_BUCKET: &str = "test-bucket";
