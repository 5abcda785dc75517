//! Tests for the in-memory storage backend

use super::*;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use url::Url;

/// Test helper to create storage
fn storage() -> EphemeralStore {
    EphemeralStore::new("test-bucket", Url::parse("http://localhost:4566").unwrap())
}

async fn open_upload(s: &EphemeralStore, key: &str) -> String {
    s.create_multipart_upload(key, &UploadOptions::default())
        .await
        .unwrap()
}

// =============================================================================
// MULTIPART UPLOADS
// =============================================================================

mod multipart_tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_rejects_mismatched_etag() {
        let s = storage();
        let upload_id = open_upload(&s, "key").await;
        s.upload_part("key", &upload_id, 1, Bytes::from("data"))
            .unwrap();

        let result = s
            .complete_multipart_upload(
                "key",
                &upload_id,
                &[CompletedPart {
                    part_number: 1,
                    etag: "\"not-the-etag\"".to_string(),
                }],
            )
            .await;
        assert!(matches!(result, Err(StorageError::InvalidPart(_))));
        assert!(s.has_upload(&upload_id));
    }

    #[tokio::test]
    async fn test_concurrent_completes_assemble_once() {
        let s = storage();
        let upload_id = open_upload(&s, "key").await;
        let part = s
            .upload_part("key", &upload_id, 1, Bytes::from("data"))
            .unwrap();
        let parts = [CompletedPart {
            part_number: 1,
            etag: part.etag,
        }];

        let (first, second) = tokio::join!(
            s.complete_multipart_upload("key", &upload_id, &parts),
            s.complete_multipart_upload("key", &upload_id, &parts),
        );
        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(StorageError::UploadNotFound(_)))));
        assert!(!s.has_upload(&upload_id));
        assert_eq!(&s.object_data("key").unwrap()[..], b"data");
    }

    #[tokio::test]
    async fn test_complete_rejects_missing_part() {
        let s = storage();
        let upload_id = open_upload(&s, "key").await;
        let part = s
            .upload_part("key", &upload_id, 1, Bytes::from("data"))
            .unwrap();

        let result = s
            .complete_multipart_upload(
                "key",
                &upload_id,
                &[
                    CompletedPart {
                        part_number: 1,
                        etag: part.etag,
                    },
                    CompletedPart {
                        part_number: 2,
                        etag: "\"abc\"".to_string(),
                    },
                ],
            )
            .await;
        assert!(matches!(result, Err(StorageError::InvalidPart(_))));
    }

    #[tokio::test]
    async fn test_complete_accepts_unquoted_etag() {
        let s = storage();
        let upload_id = open_upload(&s, "key").await;
        let part = s
            .upload_part("key", &upload_id, 1, Bytes::from("data"))
            .unwrap();

        s.complete_multipart_upload(
            "key",
            &upload_id,
            &[CompletedPart {
                part_number: 1,
                etag: part.etag.trim_matches('"').to_string(),
            }],
        )
        .await
        .unwrap();
        assert_eq!(&s.object_data("key").unwrap()[..], b"data");
    }

    #[tokio::test]
    async fn test_upload_id_is_scoped_to_key() {
        let s = storage();
        let upload_id = open_upload(&s, "key").await;

        assert!(matches!(
            s.upload_part("other", &upload_id, 1, Bytes::from("x")),
            Err(StorageError::UploadNotFound(_))
        ));
        assert!(matches!(
            s.presign_upload_part("other", &upload_id, 1, Duration::from_secs(60))
                .await,
            Err(StorageError::UploadNotFound(_))
        ));
        assert!(matches!(
            s.abort_multipart_upload("other", &upload_id).await,
            Err(StorageError::UploadNotFound(_))
        ));
        assert!(s.has_upload(&upload_id));
    }

    #[tokio::test]
    async fn test_abort_missing_upload() {
        let s = storage();
        let upload_id = open_upload(&s, "key").await;

        s.abort_multipart_upload("key", &upload_id).await.unwrap();
        let result = s.abort_multipart_upload("key", &upload_id).await;
        assert!(matches!(result, Err(StorageError::UploadNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_uploads_with_markers() {
        let s = storage().with_page_size(2);
        for key in ["a", "b", "c", "skip/d", "e"] {
            open_upload(&s, key).await;
        }

        let mut seen = Vec::new();
        let mut marker = None;
        loop {
            let page = s
                .list_multipart_uploads(None, marker.as_ref())
                .await
                .unwrap();
            assert!(page.uploads.len() <= 2);
            seen.extend(page.uploads.into_iter().map(|u| u.key));
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, vec!["a", "b", "c", "e", "skip/d"]);

        let filtered = s.list_multipart_uploads(Some("skip/"), None).await.unwrap();
        assert_eq!(filtered.uploads.len(), 1);
        assert!(filtered.next_marker.is_none());
    }

    #[tokio::test]
    async fn test_set_upload_initiated() {
        let s = storage();
        let upload_id = open_upload(&s, "key").await;
        let then = Utc::now() - ChronoDuration::days(3);

        assert!(s.set_upload_initiated(&upload_id, then));
        assert!(!s.set_upload_initiated("missing", then));

        let page = s.list_multipart_uploads(None, None).await.unwrap();
        assert_eq!(page.uploads[0].initiated, then);
    }
}

// =============================================================================
// OBJECTS AND URLS
// =============================================================================

mod object_tests {
    use super::*;

    #[tokio::test]
    async fn test_list_objects_pagination() {
        let s = storage().with_page_size(3);
        for i in 0..7 {
            s.put_object(&format!("logs/{i}"), Bytes::from("x"));
        }
        s.put_object("other", Bytes::from("x"));

        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let result = s.list_objects(Some("logs/"), token.as_deref()).await.unwrap();
            keys.extend(result.objects.into_iter().map(|o| o.key));
            match result.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        assert_eq!(keys.len(), 7);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_delete_missing_object_succeeds() {
        let s = storage();
        s.delete_object("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn test_presigned_urls() {
        let s = storage().with_region("eu-west-1");
        let upload_id = open_upload(&s, "dir/my file.bin").await;

        let put = s
            .presign_upload_part("dir/my file.bin", &upload_id, 7, Duration::from_secs(900))
            .await
            .unwrap();
        let url = Url::parse(&put).unwrap();
        assert_eq!(url.path(), "/test-bucket/dir/my%20file.bin");
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |name: &str| {
            query
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("partNumber").as_deref(), Some("7"));
        assert_eq!(get("uploadId"), Some(upload_id));
        assert_eq!(get("X-Amz-Expires").as_deref(), Some("900"));
        assert!(get("X-Amz-Credential").unwrap().contains("/eu-west-1/s3/aws4_request"));

        let download = s
            .presign_get_object("dir/my file.bin", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(download.starts_with("http://localhost:4566/test-bucket/dir/my%20file.bin?"));
        assert!(!download.contains("uploadId"));
    }
}
