//! AWS request signing for s3mpu
//!
//! Implements AWS Signature Version 4 query-string presigning, used by
//! storage backends that cannot delegate signing to an SDK, and verification
//! of requests made through such URLs.

pub mod sigv4;

pub use sigv4::{
    presign_url, verify_presigned, Addressing, Credentials, PresignRequest, SignedRequest, SigV4Error,
    MAX_EXPIRES_SECS,
};
