//! Core types for s3mpu
//!
//! This crate provides the error taxonomy and request ids shared by the
//! upload manager, its HTTP surface and the binary.

pub mod error;
pub mod request_id;

pub use error::{ErrorCode, UploadError, UploadResult};
pub use request_id::{RequestId, REQUEST_ID_HEADER};
