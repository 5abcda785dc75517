//! Request ID generation

use std::fmt;
use uuid::Uuid;

/// Header carrying the request id on every API response
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request correlation id, echoed in logs and error bodies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new request id
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string().to_uppercase())
    }

    /// Create a request ID with a specific value (for testing)
    pub fn with_id(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
