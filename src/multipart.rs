//! In-memory multipart upload state management.
//!
//! Parts are buffered until CompleteMultipartUpload stitches them into one
//! object and hands it to the backend. Uploads are ephemeral state shared
//! across requests: concurrent part uploads for distinct part numbers are
//! fine, while Complete and Abort take the write lock and are exclusive
//! with everything else on the same upload id.

use crate::api::errors::S3Error;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Duration, Utc};
use md5::{Digest, Md5};
use parking_lot::RwLock;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub const MAX_PART_NUMBER: u32 = 10000;

/// Data for a single uploaded part
struct PartData {
    data: Bytes,
    md5_hex: String,
    md5_raw: [u8; 16],
    size: u64,
    uploaded_at: DateTime<Utc>,
}

/// State for an in-progress multipart upload
struct Upload {
    upload_id: String,
    bucket: String,
    key: String,
    created_at: DateTime<Utc>,
    initiator_id: String,
    initiator_display: String,
    content_type: Option<String>,
    user_metadata: HashMap<String, String>,
    acl: Vec<u8>,
    parts: HashMap<u32, PartData>,
}

/// One part as reported by ListParts.
#[derive(Debug, Clone)]
pub struct PartInfo {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Page of parts plus the cursor bookkeeping ListParts reports.
#[derive(Debug, Clone)]
pub struct PartsPage {
    pub parts: Vec<PartInfo>,
    pub part_number_marker: u32,
    pub next_part_number_marker: u32,
    pub is_truncated: bool,
    pub initiator_id: String,
    pub initiator_display: String,
}

/// An in-progress upload as reported by ListMultipartUploads.
#[derive(Debug, Clone)]
pub struct UploadInfo {
    pub key: String,
    pub upload_id: String,
    pub initiator_id: String,
    pub initiator_display: String,
    pub initiated: DateTime<Utc>,
}

/// Result of assembling a completed multipart upload
pub struct CompletedUpload {
    pub data: Bytes,
    pub etag: String,
    pub content_type: Option<String>,
    pub user_metadata: HashMap<String, String>,
    pub acl: Vec<u8>,
}

/// Thread-safe in-memory store for multipart upload state
pub struct MultipartStore {
    uploads: RwLock<HashMap<String, Upload>>,
    id_counter: AtomicU64,
}

impl MultipartStore {
    pub fn new() -> Self {
        Self {
            uploads: RwLock::new(HashMap::new()),
            id_counter: AtomicU64::new(0),
        }
    }

    /// Create a new upload and return its id: SHA256 over a process
    /// counter, the clock, and the target, so ids are opaque and unique.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        bucket: &str,
        key: &str,
        initiator_id: &str,
        initiator_display: &str,
        content_type: Option<String>,
        user_metadata: HashMap<String, String>,
        acl: Vec<u8>,
    ) -> String {
        let counter = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let nanos = now.timestamp_nanos_opt().unwrap_or(0);

        let mut hasher = Sha256::new();
        hasher.update(counter.to_le_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(bucket.as_bytes());
        hasher.update(key.as_bytes());
        let hash = hasher.finalize();
        let upload_id = hex::encode(&hash[..16]); // 32 hex chars

        let upload = Upload {
            upload_id: upload_id.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            created_at: now,
            initiator_id: initiator_id.to_string(),
            initiator_display: initiator_display.to_string(),
            content_type,
            user_metadata,
            acl,
            parts: HashMap::new(),
        };

        self.uploads.write().insert(upload_id.clone(), upload);
        upload_id
    }

    /// Upload a part, returns the quoted ETag (MD5 hex).
    /// Re-uploading the same part number replaces the previous data.
    pub fn upload_part(
        &self,
        upload_id: &str,
        bucket: &str,
        key: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, S3Error> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(S3Error::InvalidArgument(format!(
                "Part number must be between 1 and {}",
                MAX_PART_NUMBER
            )));
        }

        let md5_raw: [u8; 16] = Md5::digest(&data).into();
        let md5_hex = hex::encode(md5_raw);
        let etag = format!("\"{}\"", md5_hex);
        let size = data.len() as u64;

        let mut uploads = self.uploads.write();
        let upload = uploads
            .get_mut(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .ok_or_else(|| S3Error::NoSuchUpload(upload_id.to_string()))?;

        upload.parts.insert(
            part_number,
            PartData {
                data,
                md5_hex,
                md5_raw,
                size,
                uploaded_at: Utc::now(),
            },
        );

        Ok(etag)
    }

    /// List parts after `marker`, at most `max_parts`.
    /// NextPartNumberMarker is one past the highest part returned.
    pub fn list_parts(
        &self,
        upload_id: &str,
        bucket: &str,
        key: &str,
        marker: u32,
        max_parts: usize,
    ) -> Result<PartsPage, S3Error> {
        let uploads = self.uploads.read();
        let upload = uploads
            .get(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .ok_or_else(|| S3Error::NoSuchUpload(upload_id.to_string()))?;

        let mut numbers: Vec<u32> = upload.parts.keys().copied().filter(|&n| n > marker).collect();
        numbers.sort_unstable();
        let is_truncated = numbers.len() > max_parts;
        numbers.truncate(max_parts);

        let parts: Vec<PartInfo> = numbers
            .iter()
            .map(|n| {
                let pd = &upload.parts[n];
                PartInfo {
                    part_number: *n,
                    etag: format!("\"{}\"", pd.md5_hex),
                    size: pd.size,
                    last_modified: pd.uploaded_at,
                }
            })
            .collect();
        let next_part_number_marker = numbers.last().map(|n| n + 1).unwrap_or(marker + 1);

        Ok(PartsPage {
            parts,
            part_number_marker: marker,
            next_part_number_marker,
            is_truncated,
            initiator_id: upload.initiator_id.clone(),
            initiator_display: upload.initiator_display.clone(),
        })
    }

    /// Assemble parts into a single object. The requested list must be
    /// ascending and match the stored ETags. Takes the write lock, so it
    /// excludes concurrent part uploads for the same id. Does NOT remove
    /// the upload; the caller removes it once the backend store succeeds.
    pub fn complete(
        &self,
        upload_id: &str,
        bucket: &str,
        key: &str,
        requested_parts: &[(u32, String)],
    ) -> Result<CompletedUpload, S3Error> {
        let uploads = self.uploads.write();
        let upload = uploads
            .get(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .ok_or_else(|| S3Error::NoSuchUpload(upload_id.to_string()))?;

        if requested_parts.is_empty() {
            return Err(S3Error::InvalidPart(
                "You must specify at least one part".to_string(),
            ));
        }

        for window in requested_parts.windows(2) {
            if window[0].0 >= window[1].0 {
                return Err(S3Error::InvalidPartOrder);
            }
        }

        let mut md5_concat = Vec::new();
        let mut assembled = BytesMut::new();

        for (part_number, requested_etag) in requested_parts {
            let part = upload.parts.get(part_number).ok_or_else(|| {
                S3Error::InvalidPart(format!("Part {} has not been uploaded", part_number))
            })?;

            let requested_clean = requested_etag.trim_matches('"');
            if requested_clean != part.md5_hex {
                return Err(S3Error::InvalidPart(format!(
                    "ETag mismatch for part {}",
                    part_number
                )));
            }

            md5_concat.extend_from_slice(&part.md5_raw);
            assembled.extend_from_slice(&part.data);
        }

        // S3-compatible multipart ETag: MD5 over the concatenated raw
        // part digests, suffixed with the part count.
        let final_md5 = Md5::digest(&md5_concat);
        let etag = format!("\"{}-{}\"", hex::encode(final_md5), requested_parts.len());

        Ok(CompletedUpload {
            data: assembled.freeze(),
            etag,
            content_type: upload.content_type.clone(),
            user_metadata: upload.user_metadata.clone(),
            acl: upload.acl.clone(),
        })
    }

    /// Remove upload state after successful finalization.
    pub fn remove(&self, upload_id: &str) {
        self.uploads.write().remove(upload_id);
    }

    /// Abort an upload, freeing all its parts.
    pub fn abort(&self, upload_id: &str, bucket: &str, key: &str) -> Result<(), S3Error> {
        let mut uploads = self.uploads.write();
        uploads
            .get(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .ok_or_else(|| S3Error::NoSuchUpload(upload_id.to_string()))?;
        uploads.remove(upload_id);
        Ok(())
    }

    /// List uploads in a bucket, optionally filtered by key prefix.
    pub fn list_uploads(&self, bucket: &str, prefix: Option<&str>) -> Vec<UploadInfo> {
        let uploads = self.uploads.read();
        let mut result: Vec<UploadInfo> = uploads
            .values()
            .filter(|u| u.bucket == bucket)
            .filter(|u| prefix.map(|p| u.key.starts_with(p)).unwrap_or(true))
            .map(|u| UploadInfo {
                key: u.key.clone(),
                upload_id: u.upload_id.clone(),
                initiator_id: u.initiator_id.clone(),
                initiator_display: u.initiator_display.clone(),
                initiated: u.created_at,
            })
            .collect();
        result.sort_by(|a, b| a.key.cmp(&b.key).then(a.upload_id.cmp(&b.upload_id)));
        result
    }

    /// Drop uploads older than max_age.
    pub fn cleanup_expired(&self, max_age: std::time::Duration) {
        let cutoff = Utc::now() - Duration::from_std(max_age).unwrap_or(Duration::hours(1));
        self.uploads.write().retain(|_, u| u.created_at > cutoff);
    }
}

impl Default for MultipartStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MultipartStore {
        MultipartStore::new()
    }

    fn create(store: &MultipartStore, bucket: &str, key: &str) -> String {
        store.create(
            bucket,
            key,
            "alice",
            "Alice",
            None,
            HashMap::new(),
            Vec::new(),
        )
    }

    #[test]
    fn test_create_and_upload_part() {
        let store = store();
        let upload_id = create(&store, "bucket", "key.bin");
        assert_eq!(upload_id.len(), 32);

        let etag = store
            .upload_part(&upload_id, "bucket", "key.bin", 1, Bytes::from(vec![0u8; 1024]))
            .unwrap();
        assert!(etag.starts_with('"'));
        assert!(etag.ends_with('"'));
    }

    #[test]
    fn test_upload_ids_unique() {
        let store = store();
        let a = create(&store, "bucket", "key");
        let b = create(&store, "bucket", "key");
        assert_ne!(a, b);
    }

    #[test]
    fn test_complete_concatenates_parts() {
        let store = store();
        let upload_id = create(&store, "bucket", "key.bin");

        let etag1 = store
            .upload_part(&upload_id, "bucket", "key.bin", 1, Bytes::from(vec![1u8; 100]))
            .unwrap();
        let etag2 = store
            .upload_part(&upload_id, "bucket", "key.bin", 2, Bytes::from(vec![2u8; 200]))
            .unwrap();

        let result = store
            .complete(&upload_id, "bucket", "key.bin", &[(1, etag1), (2, etag2)])
            .unwrap();

        assert_eq!(result.data.len(), 300);
        assert_eq!(&result.data[..100], &[1u8; 100]);
        assert_eq!(&result.data[100..], &[2u8; 200]);
        assert!(result.etag.ends_with("-2\""));
    }

    #[test]
    fn test_complete_etag_is_md5_of_part_digests() {
        let store = store();
        let upload_id = create(&store, "b", "k");
        let p1 = Bytes::from_static(b"first");
        let p2 = Bytes::from_static(b"second");
        let e1 = store.upload_part(&upload_id, "b", "k", 1, p1.clone()).unwrap();
        let e2 = store.upload_part(&upload_id, "b", "k", 2, p2.clone()).unwrap();
        let result = store
            .complete(&upload_id, "b", "k", &[(1, e1), (2, e2)])
            .unwrap();

        let mut concat = Vec::new();
        concat.extend_from_slice(&<[u8; 16]>::from(Md5::digest(&p1)));
        concat.extend_from_slice(&<[u8; 16]>::from(Md5::digest(&p2)));
        let expected = format!("\"{}-2\"", hex::encode(Md5::digest(&concat)));
        assert_eq!(result.etag, expected);
    }

    #[test]
    fn test_complete_rejects_out_of_order() {
        let store = store();
        let upload_id = create(&store, "b", "k");
        let e1 = store
            .upload_part(&upload_id, "b", "k", 1, Bytes::from_static(b"a"))
            .unwrap();
        let e2 = store
            .upload_part(&upload_id, "b", "k", 2, Bytes::from_static(b"b"))
            .unwrap();
        let result = store.complete(&upload_id, "b", "k", &[(2, e2), (1, e1)]);
        assert!(matches!(result, Err(S3Error::InvalidPartOrder)));
    }

    #[test]
    fn test_complete_rejects_etag_mismatch() {
        let store = store();
        let upload_id = create(&store, "b", "k");
        store
            .upload_part(&upload_id, "b", "k", 1, Bytes::from_static(b"a"))
            .unwrap();
        let result = store.complete(&upload_id, "b", "k", &[(1, "\"beef\"".to_string())]);
        assert!(matches!(result, Err(S3Error::InvalidPart(_))));
    }

    #[test]
    fn test_abort_frees_parts() {
        let store = store();
        let upload_id = create(&store, "bucket", "key.bin");
        store.abort(&upload_id, "bucket", "key.bin").unwrap();
        let result =
            store.upload_part(&upload_id, "bucket", "key.bin", 1, Bytes::from(vec![0u8; 10]));
        assert!(matches!(result, Err(S3Error::NoSuchUpload(_))));
    }

    #[test]
    fn test_bucket_key_mismatch() {
        let store = store();
        let upload_id = create(&store, "bucket-a", "key.bin");
        let result =
            store.upload_part(&upload_id, "bucket-b", "key.bin", 1, Bytes::from(vec![0u8; 10]));
        assert!(matches!(result, Err(S3Error::NoSuchUpload(_))));
    }

    #[test]
    fn test_invalid_part_number() {
        let store = store();
        let upload_id = create(&store, "bucket", "key.bin");
        for bad in [0, MAX_PART_NUMBER + 1] {
            let result =
                store.upload_part(&upload_id, "bucket", "key.bin", bad, Bytes::from(vec![0u8; 1]));
            assert!(result.is_err());
        }
    }

    #[test]
    fn test_list_parts_marker_pagination() {
        let store = store();
        let upload_id = create(&store, "bucket", "key.bin");
        for i in [1u32, 2, 3, 5, 8] {
            store
                .upload_part(&upload_id, "bucket", "key.bin", i, Bytes::from(vec![i as u8; 10]))
                .unwrap();
        }

        let page = store.list_parts(&upload_id, "bucket", "key.bin", 0, 3).unwrap();
        assert_eq!(
            page.parts.iter().map(|p| p.part_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(page.is_truncated);
        assert_eq!(page.next_part_number_marker, 4);

        let page = store
            .list_parts(&upload_id, "bucket", "key.bin", 3, 100)
            .unwrap();
        assert_eq!(
            page.parts.iter().map(|p| p.part_number).collect::<Vec<_>>(),
            vec![5, 8]
        );
        assert!(!page.is_truncated);
        assert_eq!(page.next_part_number_marker, 9);
        assert_eq!(page.initiator_id, "alice");
    }

    #[test]
    fn test_overwrite_part() {
        let store = store();
        let upload_id = create(&store, "bucket", "key.bin");
        let etag1 = store
            .upload_part(&upload_id, "bucket", "key.bin", 1, Bytes::from(vec![1u8; 100]))
            .unwrap();
        let etag2 = store
            .upload_part(&upload_id, "bucket", "key.bin", 1, Bytes::from(vec![2u8; 100]))
            .unwrap();
        assert_ne!(etag1, etag2);

        let page = store.list_parts(&upload_id, "bucket", "key.bin", 0, 10).unwrap();
        assert_eq!(page.parts.len(), 1);
        assert_eq!(page.parts[0].etag, etag2);
    }

    #[test]
    fn test_list_uploads_filters_by_bucket_and_prefix() {
        let store = store();
        create(&store, "b1", "photos/cat.jpg");
        create(&store, "b1", "docs/a.txt");
        create(&store, "b2", "photos/dog.jpg");

        let all_b1 = store.list_uploads("b1", None);
        assert_eq!(all_b1.len(), 2);
        let photos = store.list_uploads("b1", Some("photos/"));
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].key, "photos/cat.jpg");
    }

    #[test]
    fn test_cleanup_expired() {
        let store = store();
        let upload_id = create(&store, "bucket", "key");
        store.cleanup_expired(std::time::Duration::from_secs(0));
        assert!(matches!(
            store.abort(&upload_id, "bucket", "key"),
            Err(S3Error::NoSuchUpload(_))
        ));
    }
}
