//! Upload sessions, part plans and object key naming

use crate::config::{MAX_PART_SIZE, MIB};
use crate::storage::CompletedPart;
use chrono::{DateTime, Utc};
use s3mpu_core::{UploadError, UploadResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Most parts a single multipart upload may have
pub const MAX_PARTS: u64 = 10_000;

pub const MAX_FILENAME_LEN: usize = 1024;

/// Longest object key the provider accepts, in bytes
pub const MAX_KEY_LEN: usize = 1024;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// How an object of `total_size` bytes is split into parts
///
/// Always satisfies `part_size * (parts_count - 1) < total_size <= part_size * parts_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPlan {
    total_size: u64,
    part_size: u64,
    parts_count: u64,
}

impl UploadPlan {
    /// Plan with `preferred_part_size`, grown to a whole number of MiB when
    /// the object would otherwise need more than [`MAX_PARTS`] parts
    pub fn new(total_size: u64, preferred_part_size: u64) -> UploadResult<Self> {
        if total_size == 0 {
            return Err(UploadError::validation("file size must be greater than zero"));
        }
        if preferred_part_size == 0 {
            return Err(UploadError::validation("part size must be greater than zero"));
        }

        let mut part_size = preferred_part_size;
        if total_size.div_ceil(part_size) > MAX_PARTS {
            part_size = total_size.div_ceil(MAX_PARTS).div_ceil(MIB) * MIB;
        }
        if part_size > MAX_PART_SIZE {
            return Err(UploadError::validation(format!(
                "file size {} cannot be split into {} parts of at most {} bytes",
                total_size, MAX_PARTS, MAX_PART_SIZE
            )));
        }

        Ok(Self {
            total_size,
            part_size,
            parts_count: total_size.div_ceil(part_size),
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn parts_count(&self) -> u64 {
        self.parts_count
    }

    /// Size of the given 1-based part; the last part carries the remainder
    pub fn part_len(&self, part_number: u64) -> Option<u64> {
        if part_number == 0 || part_number > self.parts_count {
            return None;
        }
        let start = (part_number - 1) * self.part_size;
        Some(self.part_size.min(self.total_size - start))
    }
}

/// An in-progress multipart upload as handed back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub upload_id: String,
    pub key: String,
    pub bucket: String,
    pub total_size: u64,
    pub part_size: u64,
    pub parts_count: u64,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Parts submitted to complete an upload: non-empty, unique and contiguous
/// from 1, held in ascending order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartList(Vec<CompletedPart>);

impl PartList {
    pub fn new(parts: Vec<CompletedPart>) -> UploadResult<Self> {
        if parts.is_empty() {
            return Err(UploadError::validation("parts list must not be empty"));
        }

        let mut sorted = BTreeMap::new();
        for part in parts {
            if part.part_number < 1 {
                return Err(UploadError::validation(format!(
                    "part number {} must be at least 1",
                    part.part_number
                )));
            }
            if part.etag.trim().is_empty() {
                return Err(UploadError::validation(format!(
                    "part {} has an empty etag",
                    part.part_number
                )));
            }
            let part_number = part.part_number;
            if sorted.insert(part_number, part).is_some() {
                return Err(UploadError::validation(format!(
                    "part {} listed more than once",
                    part_number
                )));
            }
        }

        for (expected, part_number) in (1..).zip(sorted.keys()) {
            if *part_number != expected {
                return Err(UploadError::validation(format!("part {} is missing", expected)));
            }
        }

        Ok(Self(sorted.into_values().collect()))
    }

    /// Check the list covers exactly `parts_count` parts
    pub fn expect_count(&self, parts_count: u64) -> UploadResult<()> {
        if self.0.len() as u64 != parts_count {
            return Err(UploadError::validation(format!(
                "expected {} parts, got {}",
                parts_count,
                self.0.len()
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[CompletedPart] {
        &self.0
    }
}

pub fn validate_filename(filename: &str) -> UploadResult<()> {
    if filename.trim().is_empty() {
        return Err(UploadError::validation("filename must not be empty"));
    }
    if filename.chars().count() > MAX_FILENAME_LEN {
        return Err(UploadError::validation(format!(
            "filename must be at most {} characters",
            MAX_FILENAME_LEN
        )));
    }
    if filename.contains(['/', '\\']) || filename.chars().any(char::is_control) {
        return Err(UploadError::validation(
            "filename must not contain path separators or control characters",
        ));
    }
    Ok(())
}

pub fn validate_key(key: &str) -> UploadResult<()> {
    if key.is_empty() {
        return Err(UploadError::validation("key must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(UploadError::validation(format!(
            "key must be at most {} bytes",
            MAX_KEY_LEN
        )));
    }
    Ok(())
}

/// Lowercased text after the last dot, if any
pub fn file_extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
        .map(str::to_ascii_lowercase)
}

/// Key for a new object: `{prefix}/{YYYY}/{MM}/{DD}/{uuid}_{filename}`
pub fn generate_key(prefix: &str, filename: &str, now: DateTime<Utc>) -> String {
    let id = Uuid::new_v4().simple();
    let date = now.format("%Y/%m/%d");
    if prefix.is_empty() {
        format!("{}/{}_{}", date, id, filename)
    } else {
        format!("{}/{}/{}_{}", prefix, date, id, filename)
    }
}

/// Last path segment of a key
pub fn filename_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn part(part_number: i32) -> CompletedPart {
        CompletedPart {
            part_number,
            etag: format!("\"etag-{}\"", part_number),
        }
    }

    #[test]
    fn test_plan_counts() {
        let plan = UploadPlan::new(12 * MIB, 5 * MIB).unwrap();
        assert_eq!(plan.parts_count(), 3);
        assert_eq!(plan.part_len(3), Some(2 * MIB));
        assert_eq!(plan.part_len(4), None);

        let exact = UploadPlan::new(10 * MIB, 5 * MIB).unwrap();
        assert_eq!(exact.parts_count(), 2);
        assert_eq!(exact.part_len(2), Some(5 * MIB));

        let tiny = UploadPlan::new(1, 5 * MIB).unwrap();
        assert_eq!(tiny.parts_count(), 1);
        assert_eq!(tiny.part_len(1), Some(1));
    }

    #[test]
    fn test_plan_invariant() {
        for total in [1, 5 * MIB - 1, 5 * MIB, 5 * MIB + 1, 123_456_789, 50_000 * MIB] {
            let plan = UploadPlan::new(total, 5 * MIB).unwrap();
            let (size, count) = (plan.part_size(), plan.parts_count());
            assert!(count >= 1);
            assert!(count <= MAX_PARTS);
            assert!(size * (count - 1) < total, "total {total}");
            assert!(total <= size * count, "total {total}");
        }
    }

    #[test]
    fn test_plan_grows_part_size() {
        // 100 GiB at 5 MiB would need 20480 parts
        let plan = UploadPlan::new(100 * 1024 * MIB, 5 * MIB).unwrap();
        assert_eq!(plan.part_size() % MIB, 0);
        assert_eq!(plan.part_size(), 11 * MIB);
        assert!(plan.parts_count() <= MAX_PARTS);
    }

    #[test]
    fn test_plan_rejects_zero_and_oversized() {
        assert!(matches!(
            UploadPlan::new(0, 5 * MIB),
            Err(UploadError::Validation(_))
        ));
        assert!(UploadPlan::new(MAX_PART_SIZE * MAX_PARTS + 1, 5 * MIB).is_err());
    }

    #[test]
    fn test_part_list_sorts() {
        let list = PartList::new(vec![part(3), part(1), part(2)]).unwrap();
        let numbers: Vec<i32> = list.as_slice().iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(list.expect_count(3).is_ok());
        assert!(list.expect_count(4).is_err());
    }

    #[test]
    fn test_part_list_rejects_bad_input() {
        assert!(PartList::new(vec![]).is_err());
        assert!(PartList::new(vec![part(0)]).is_err());
        assert!(PartList::new(vec![part(1), part(1)]).is_err());
        assert!(PartList::new(vec![part(1), part(3)]).is_err());
        assert!(PartList::new(vec![part(2)]).is_err());
        assert!(PartList::new(vec![CompletedPart {
            part_number: 1,
            etag: "  ".to_string(),
        }])
        .is_err());
    }

    #[test]
    fn test_filename_rules() {
        assert!(validate_filename("report.pdf").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("a\\b.txt").is_err());
        assert!(validate_filename(&"x".repeat(1025)).is_err());
        assert!(validate_filename(&"x".repeat(1024)).is_ok());
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("Movie.MP4").as_deref(), Some("mp4"));
        assert_eq!(file_extension("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(file_extension("README"), None);
        assert_eq!(file_extension("trailing."), None);
    }

    #[test]
    fn test_generate_key() {
        let now = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
        let key = generate_key("uploads", "photo.jpg", now);
        assert!(key.starts_with("uploads/2024/03/07/"), "{key}");
        assert!(key.ends_with("_photo.jpg"));
        assert_eq!(filename_of(&key).len(), 32 + "_photo.jpg".len());

        let other = generate_key("uploads", "photo.jpg", now);
        assert_ne!(key, other);

        let bare = generate_key("", "a.bin", now);
        assert!(bare.starts_with("2024/03/07/"));
    }

    #[test]
    fn test_filename_of() {
        assert_eq!(filename_of("uploads/2024/01/01/x_a.txt"), "x_a.txt");
        assert_eq!(filename_of("plain"), "plain");
        assert_eq!(filename_of("dir/"), "");
    }
}
