//! Storage provider backends

mod aws;
mod ephemeral;
mod traits;

#[cfg(test)]
mod tests;

pub use aws::AwsStore;
pub use ephemeral::{EphemeralStore, PartInfo, StoredObject};
pub use traits::{
    CompleteResult, CompletedPart, ListObjectsResult, MultipartUploadInfo, MultipartUploadPage,
    ObjectStore, ObjectSummary, StorageError, UploadMarker, UploadOptions,
};
