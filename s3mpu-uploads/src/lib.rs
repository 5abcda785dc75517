//! Multipart upload sessions over S3-compatible object storage
//!
//! [`UploadManager`] validates requests, plans part sizes and hands out
//! presigned URLs so clients upload parts straight to storage. The provider
//! is reached through the [`storage::ObjectStore`] trait. With the in-memory
//! backend, [`object_router`] serves the presigned URLs themselves.

pub mod config;
pub mod handlers;
pub mod models;
pub mod objects;
pub mod service;
pub mod session;
pub mod storage;


pub use config::{StaticCredentials, UploadConfig};
pub use handlers::{assign_request_id, router, ApiError};
pub use objects::object_router;
pub use service::UploadManager;
pub use session::{PartList, UploadPlan, UploadSession};
