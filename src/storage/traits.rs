//! Storage backend trait definitions.
//!
//! The gateway treats the store as an opaque backend exposing bucket,
//! object, attribute, usage, log, and gc primitives. The backend owns its
//! own concurrency; the gateway holds one shared handle for the life of
//! the process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Attribute name under which a bucket's or object's ACL policy is stored.
pub const ACL_ATTR: &str = "acl";

/// Errors surfaced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("bucket already exists: {0}")]
    BucketExists(String),

    #[error("attribute not found: {0}")]
    AttrNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Other(String),
}

/// Bucket control record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    pub pool: String,
    pub bucket_id: String,
    pub marker: String,
    pub owner: String,
    pub creation_time: DateTime<Utc>,
}

/// Object record: payload descriptors plus named byte attributes.
/// User metadata lives in `attrs` under the `x-amz-meta-` prefix; the
/// ACL under [`ACL_ATTR`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub etag: String,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub attrs: BTreeMap<String, Vec<u8>>,
}

/// Per-category bucket accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketStats {
    pub size_kb: u64,
    pub size_kb_actual: u64,
    pub num_objects: u64,
}

/// Usage accounting key: user + hour bucket + op category.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UsageKey {
    pub user: String,
    pub epoch: u64,
    pub category: String,
}

/// Usage counters accumulated under a [`UsageKey`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub ops: u64,
    pub successful_ops: u64,
}

/// One request-log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub bucket: String,
    pub bucket_id: String,
    pub bucket_owner: String,
    pub time: DateTime<Utc>,
    pub remote_addr: String,
    pub user: String,
    pub op: String,
    pub uri: String,
    pub http_status: String,
    pub error_code: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub obj_size: u64,
    pub total_time_us: u64,
    pub user_agent: String,
    pub referrer: String,
}

/// A pending garbage-collection chain: a tag, the deletion time, and the
/// parked object refs awaiting reclamation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcEntry {
    pub tag: String,
    pub time: DateTime<Utc>,
    pub objs: Vec<String>,
}

/// Abstract backend contract. Object listings are returned sorted
/// lexicographically by key; pagination and delimiter collapsing are the
/// op layer's concern.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // === Buckets ===

    /// Create a bucket from its control record. Fails with
    /// `BucketExists` when the name is taken.
    async fn create_bucket(&self, info: &BucketInfo) -> Result<(), StorageError>;

    /// Delete a bucket; it must hold no objects.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    async fn bucket_info(&self, bucket: &str) -> Result<BucketInfo, StorageError>;

    /// Rewrite a bucket's control record (owner transfer).
    async fn put_bucket_info(&self, info: &BucketInfo) -> Result<(), StorageError>;

    async fn list_bucket_names(&self) -> Result<Vec<String>, StorageError>;

    /// Per-category stats derived from the bucket index.
    async fn bucket_stats(
        &self,
        bucket: &str,
    ) -> Result<BTreeMap<String, BucketStats>, StorageError>;

    /// Compare the stored index header against a fresh scan.
    /// Returns `(existing, calculated)`.
    #[allow(clippy::type_complexity)]
    async fn check_bucket_index(
        &self,
        bucket: &str,
    ) -> Result<(BTreeMap<String, BucketStats>, BTreeMap<String, BucketStats>), StorageError>;

    /// Rebuild the bucket index from the objects present.
    async fn rebuild_bucket_index(&self, bucket: &str) -> Result<(), StorageError>;

    // === Per-user bucket lists ===

    async fn add_user_bucket(&self, uid: &str, bucket: &str) -> Result<(), StorageError>;
    async fn remove_user_bucket(&self, uid: &str, bucket: &str) -> Result<(), StorageError>;
    async fn user_buckets(&self, uid: &str) -> Result<Vec<String>, StorageError>;

    // === Objects ===

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        meta: &ObjectMeta,
    ) -> Result<(), StorageError>;

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(Vec<u8>, ObjectMeta), StorageError>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StorageError>;

    /// Delete an object; its data is parked under a gc entry until
    /// `process_gc` reclaims it.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// All keys under `prefix`, sorted, with metadata.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<(String, ObjectMeta)>, StorageError>;

    // === Attributes ===

    /// `key` of `None` addresses the bucket itself.
    async fn get_attr(
        &self,
        bucket: &str,
        key: Option<&str>,
        name: &str,
    ) -> Result<Vec<u8>, StorageError>;

    async fn set_attr(
        &self,
        bucket: &str,
        key: Option<&str>,
        name: &str,
        value: &[u8],
    ) -> Result<(), StorageError>;

    // === Usage accounting ===

    async fn record_usage(&self, key: &UsageKey, delta: &UsageEntry) -> Result<(), StorageError>;

    async fn read_usage(
        &self,
        uid: Option<&str>,
        start_epoch: u64,
        end_epoch: u64,
    ) -> Result<Vec<(UsageKey, UsageEntry)>, StorageError>;

    async fn trim_usage(
        &self,
        uid: Option<&str>,
        start_epoch: u64,
        end_epoch: u64,
    ) -> Result<(), StorageError>;

    // === Request logs ===

    async fn append_log(&self, name: &str, entry: &LogEntry) -> Result<(), StorageError>;
    async fn list_logs(&self, date_prefix: &str) -> Result<Vec<String>, StorageError>;
    async fn read_log(&self, name: &str) -> Result<Vec<LogEntry>, StorageError>;
    async fn remove_log(&self, name: &str) -> Result<(), StorageError>;

    // === Garbage collection ===

    async fn list_gc(
        &self,
        marker: &str,
        max: usize,
    ) -> Result<(Vec<GcEntry>, bool), StorageError>;

    /// Reclaim all pending gc chains; returns how many were processed.
    async fn process_gc(&self) -> Result<usize, StorageError>;

    // === Placement pools ===

    async fn add_pool(&self, name: &str) -> Result<(), StorageError>;
    async fn remove_pool(&self, name: &str) -> Result<(), StorageError>;
    async fn list_pools(&self) -> Result<Vec<String>, StorageError>;

    // === Temp spool ===

    /// Remove temp spool files last touched before `cutoff`.
    async fn remove_temp_objects(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError>;

    /// Backend parameters for `cluster info`.
    fn params(&self) -> Vec<(String, String)>;
}
