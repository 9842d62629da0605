//! Filesystem storage backend with per-object metadata sidecars.
//!
//! Layout:
//! ```text
//! {root}/
//!   buckets/{bucket}/
//!     .bucket.json          # BucketInfo
//!     .battrs/{name}        # bucket attributes (ACL)
//!     .index.json           # index header: per-category stats
//!     objects/{enc}.data    # object payload
//!     objects/{enc}.meta    # ObjectMeta (JSON)
//!   userbuckets/{uid}.json  # per-user bucket list
//!   usage.json              # usage counters
//!   logs/{name}.log         # request logs, one JSON entry per line
//!   gc/pending.json         # gc chains
//!   gc/data/{tag}           # parked object payloads
//!   pools.json              # placement set
//!   .tmp/                   # write spool
//! ```
//!
//! Object keys are percent-encoded into single path segments, so keys
//! containing `/` never escape the objects directory. Writes go through
//! the `.tmp` spool and are renamed into place.

use super::traits::{
    BucketInfo, BucketStats, GcEntry, LogEntry, ObjectMeta, StorageBackend, StorageError,
    UsageEntry, UsageKey,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

const DATA_SUFFIX: &str = ".data";
const META_SUFFIX: &str = ".meta";

/// Async-safe path existence check (avoids blocking the Tokio runtime)
async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

pub struct FilesystemBackend {
    root: PathBuf,
    // Serializes read-modify-write cycles on the shared control files
    // (usage, gc, pools, user bucket lists, index headers).
    control: Mutex<()>,
}

impl FilesystemBackend {
    pub async fn new(root: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(root.join("buckets")).await?;
        fs::create_dir_all(root.join(".tmp")).await?;
        Ok(Self {
            root,
            control: Mutex::new(()),
        })
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join(".tmp")
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join("buckets").join(bucket)
    }

    fn objects_dir(&self, bucket: &str) -> PathBuf {
        self.bucket_dir(bucket).join("objects")
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.objects_dir(bucket)
            .join(format!("{}{}", enc(key), DATA_SUFFIX))
    }

    fn object_meta_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.objects_dir(bucket)
            .join(format!("{}{}", enc(key), META_SUFFIX))
    }

    fn bucket_info_path(&self, bucket: &str) -> PathBuf {
        self.bucket_dir(bucket).join(".bucket.json")
    }

    fn bucket_attr_path(&self, bucket: &str, name: &str) -> PathBuf {
        self.bucket_dir(bucket).join(".battrs").join(enc(name))
    }

    fn index_path(&self, bucket: &str) -> PathBuf {
        self.bucket_dir(bucket).join(".index.json")
    }

    fn user_buckets_path(&self, uid: &str) -> PathBuf {
        self.root.join("userbuckets").join(format!("{}.json", enc(uid)))
    }

    fn usage_path(&self) -> PathBuf {
        self.root.join("usage.json")
    }

    fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    fn gc_pending_path(&self) -> PathBuf {
        self.root.join("gc").join("pending.json")
    }

    fn gc_data_dir(&self) -> PathBuf {
        self.root.join("gc").join("data")
    }

    fn pools_path(&self) -> PathBuf {
        self.root.join("pools.json")
    }

    /// Write through the spool directory, then rename into place.
    async fn spool_write(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let spool = self.tmp_dir();
        let path = path.to_path_buf();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut tmp = tempfile::NamedTempFile::new_in(&spool)?;
            tmp.write_all(&data)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| StorageError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Other(format!("spawn_blocking join failed: {}", e)))?
    }

    async fn read_json<T: serde::de::DeserializeOwned + Default>(
        &self,
        path: &Path,
    ) -> Result<T, StorageError> {
        match fs::read(path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json<T: serde::Serialize>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(value)?;
        self.spool_write(path, &data).await
    }

    async fn require_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        if !path_exists(&self.bucket_info_path(bucket)).await {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        Ok(())
    }

    /// Scan the objects directory and compute per-category stats.
    async fn calculate_stats(
        &self,
        bucket: &str,
    ) -> Result<BTreeMap<String, BucketStats>, StorageError> {
        let mut stats = BTreeMap::new();
        let main = stats.entry("main".to_string()).or_insert(BucketStats::default());
        for (_, meta) in self.scan_objects(bucket, "").await? {
            main.num_objects += 1;
            main.size_kb += meta.size.div_ceil(1024);
            main.size_kb_actual += meta.size.div_ceil(4096) * 4;
        }
        Ok(stats)
    }

    async fn scan_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<(String, ObjectMeta)>, StorageError> {
        let dir = self.objects_dir(bucket);
        let mut out = Vec::new();
        if !is_dir(&dir).await {
            return Ok(out);
        }
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(n) => n,
                None => continue,
            };
            let encoded = match name.strip_suffix(DATA_SUFFIX) {
                Some(e) => e,
                None => continue,
            };
            let key = dec(encoded);
            if !key.starts_with(prefix) {
                continue;
            }
            let meta_path = dir.join(format!("{}{}", encoded, META_SUFFIX));
            match fs::read(&meta_path).await {
                Ok(data) => match serde_json::from_slice::<ObjectMeta>(&data) {
                    Ok(meta) => out.push((key, meta)),
                    Err(e) => warn!("Unreadable metadata sidecar {:?}: {}", meta_path, e),
                },
                Err(e) => warn!("Orphaned object data {:?}: {}", meta_path, e),
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    // === Buckets ===

    #[instrument(skip(self, info), fields(bucket = %info.name))]
    async fn create_bucket(&self, info: &BucketInfo) -> Result<(), StorageError> {
        let info_path = self.bucket_info_path(&info.name);
        if path_exists(&info_path).await {
            return Err(StorageError::BucketExists(info.name.clone()));
        }
        fs::create_dir_all(self.objects_dir(&info.name)).await?;
        self.write_json(&info_path, info).await?;
        debug!("Created bucket {}", info.name);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        self.require_bucket(bucket).await?;
        if !self.scan_objects(bucket, "").await?.is_empty() {
            return Err(StorageError::BucketNotEmpty(bucket.to_string()));
        }
        fs::remove_dir_all(self.bucket_dir(bucket)).await?;
        debug!("Deleted bucket {}", bucket);
        Ok(())
    }

    async fn bucket_info(&self, bucket: &str) -> Result<BucketInfo, StorageError> {
        match fs::read(self.bucket_info_path(bucket)).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::BucketNotFound(bucket.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put_bucket_info(&self, info: &BucketInfo) -> Result<(), StorageError> {
        self.require_bucket(&info.name).await?;
        self.write_json(&self.bucket_info_path(&info.name), info).await
    }

    async fn list_bucket_names(&self) -> Result<Vec<String>, StorageError> {
        let dir = self.root.join("buckets");
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn bucket_stats(
        &self,
        bucket: &str,
    ) -> Result<BTreeMap<String, BucketStats>, StorageError> {
        self.require_bucket(bucket).await?;
        let stored: BTreeMap<String, BucketStats> =
            self.read_json(&self.index_path(bucket)).await?;
        if stored.is_empty() {
            return self.calculate_stats(bucket).await;
        }
        Ok(stored)
    }

    async fn check_bucket_index(
        &self,
        bucket: &str,
    ) -> Result<(BTreeMap<String, BucketStats>, BTreeMap<String, BucketStats>), StorageError> {
        self.require_bucket(bucket).await?;
        let existing: BTreeMap<String, BucketStats> =
            self.read_json(&self.index_path(bucket)).await?;
        let calculated = self.calculate_stats(bucket).await?;
        Ok((existing, calculated))
    }

    async fn rebuild_bucket_index(&self, bucket: &str) -> Result<(), StorageError> {
        self.require_bucket(bucket).await?;
        let _guard = self.control.lock().await;
        let calculated = self.calculate_stats(bucket).await?;
        self.write_json(&self.index_path(bucket), &calculated).await
    }

    // === Per-user bucket lists ===

    async fn add_user_bucket(&self, uid: &str, bucket: &str) -> Result<(), StorageError> {
        let _guard = self.control.lock().await;
        let path = self.user_buckets_path(uid);
        let mut list: Vec<String> = self.read_json(&path).await?;
        if !list.iter().any(|b| b == bucket) {
            list.push(bucket.to_string());
            list.sort();
            self.write_json(&path, &list).await?;
        }
        Ok(())
    }

    async fn remove_user_bucket(&self, uid: &str, bucket: &str) -> Result<(), StorageError> {
        let _guard = self.control.lock().await;
        let path = self.user_buckets_path(uid);
        let mut list: Vec<String> = self.read_json(&path).await?;
        list.retain(|b| b != bucket);
        self.write_json(&path, &list).await
    }

    async fn user_buckets(&self, uid: &str) -> Result<Vec<String>, StorageError> {
        self.read_json(&self.user_buckets_path(uid)).await
    }

    // === Objects ===

    #[instrument(skip(self, data, meta))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        meta: &ObjectMeta,
    ) -> Result<(), StorageError> {
        self.require_bucket(bucket).await?;
        self.spool_write(&self.object_path(bucket, key), data).await?;
        self.write_json(&self.object_meta_path(bucket, key), meta).await?;
        {
            let _guard = self.control.lock().await;
            let calculated = self.calculate_stats(bucket).await?;
            self.write_json(&self.index_path(bucket), &calculated).await?;
        }
        debug!("Wrote object {}/{} ({} bytes)", bucket, key, data.len());
        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(Vec<u8>, ObjectMeta), StorageError> {
        let meta = self.head_object(bucket, key).await?;
        let data = fs::read(self.object_path(bucket, key)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(format!("{}/{}", bucket, key))
            } else {
                e.into()
            }
        })?;
        Ok((data, meta))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StorageError> {
        self.require_bucket(bucket).await?;
        match fs::read(self.object_meta_path(bucket, key)).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("{}/{}", bucket, key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.require_bucket(bucket).await?;
        let data_path = self.object_path(bucket, key);
        let meta_path = self.object_meta_path(bucket, key);
        if !path_exists(&meta_path).await {
            return Err(StorageError::NotFound(format!("{}/{}", bucket, key)));
        }

        // Park the payload under a gc chain instead of unlinking it.
        let tag = uuid::Uuid::new_v4().to_string();
        fs::create_dir_all(self.gc_data_dir()).await?;
        let parked = self.gc_data_dir().join(&tag);
        if path_exists(&data_path).await {
            fs::rename(&data_path, &parked).await?;
        }
        fs::remove_file(&meta_path).await?;

        let _guard = self.control.lock().await;
        let mut pending: Vec<GcEntry> = self.read_json(&self.gc_pending_path()).await?;
        pending.push(GcEntry {
            tag,
            time: Utc::now(),
            objs: vec![format!("{}/{}", bucket, key)],
        });
        self.write_json(&self.gc_pending_path(), &pending).await?;

        let calculated = self.calculate_stats(bucket).await?;
        self.write_json(&self.index_path(bucket), &calculated).await?;
        debug!("Deleted object {}/{}", bucket, key);
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<(String, ObjectMeta)>, StorageError> {
        self.require_bucket(bucket).await?;
        self.scan_objects(bucket, prefix).await
    }

    // === Attributes ===

    async fn get_attr(
        &self,
        bucket: &str,
        key: Option<&str>,
        name: &str,
    ) -> Result<Vec<u8>, StorageError> {
        match key {
            None => match fs::read(self.bucket_attr_path(bucket, name)).await {
                Ok(data) => Ok(data),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(StorageError::AttrNotFound(name.to_string()))
                }
                Err(e) => Err(e.into()),
            },
            Some(key) => {
                let meta = self.head_object(bucket, key).await?;
                meta.attrs
                    .get(name)
                    .cloned()
                    .ok_or_else(|| StorageError::AttrNotFound(name.to_string()))
            }
        }
    }

    async fn set_attr(
        &self,
        bucket: &str,
        key: Option<&str>,
        name: &str,
        value: &[u8],
    ) -> Result<(), StorageError> {
        self.require_bucket(bucket).await?;
        match key {
            None => self.spool_write(&self.bucket_attr_path(bucket, name), value).await,
            Some(key) => {
                let _guard = self.control.lock().await;
                let mut meta = self.head_object(bucket, key).await?;
                meta.attrs.insert(name.to_string(), value.to_vec());
                self.write_json(&self.object_meta_path(bucket, key), &meta).await
            }
        }
    }

    // === Usage accounting ===

    async fn record_usage(&self, key: &UsageKey, delta: &UsageEntry) -> Result<(), StorageError> {
        let _guard = self.control.lock().await;
        let mut records: Vec<(UsageKey, UsageEntry)> = self.read_json(&self.usage_path()).await?;
        match records.iter_mut().find(|(k, _)| k == key) {
            Some((_, entry)) => {
                entry.bytes_sent += delta.bytes_sent;
                entry.bytes_received += delta.bytes_received;
                entry.ops += delta.ops;
                entry.successful_ops += delta.successful_ops;
            }
            None => records.push((key.clone(), *delta)),
        }
        self.write_json(&self.usage_path(), &records).await
    }

    async fn read_usage(
        &self,
        uid: Option<&str>,
        start_epoch: u64,
        end_epoch: u64,
    ) -> Result<Vec<(UsageKey, UsageEntry)>, StorageError> {
        let mut records: Vec<(UsageKey, UsageEntry)> = self.read_json(&self.usage_path()).await?;
        records.retain(|(k, _)| {
            k.epoch >= start_epoch
                && k.epoch <= end_epoch
                && uid.map(|u| k.user == u).unwrap_or(true)
        });
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }

    async fn trim_usage(
        &self,
        uid: Option<&str>,
        start_epoch: u64,
        end_epoch: u64,
    ) -> Result<(), StorageError> {
        let _guard = self.control.lock().await;
        let mut records: Vec<(UsageKey, UsageEntry)> = self.read_json(&self.usage_path()).await?;
        records.retain(|(k, _)| {
            !(k.epoch >= start_epoch
                && k.epoch <= end_epoch
                && uid.map(|u| k.user == u).unwrap_or(true))
        });
        self.write_json(&self.usage_path(), &records).await
    }

    // === Request logs ===

    async fn append_log(&self, name: &str, entry: &LogEntry) -> Result<(), StorageError> {
        let _guard = self.control.lock().await;
        fs::create_dir_all(self.logs_dir()).await?;
        let path = self.logs_dir().join(format!("{}.log", enc(name)));
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut existing = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        existing.extend_from_slice(&line);
        self.spool_write(&path, &existing).await
    }

    async fn list_logs(&self, date_prefix: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.logs_dir();
        let mut names = Vec::new();
        if !is_dir(&dir).await {
            return Ok(names);
        }
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(file) = entry.file_name().to_str() {
                if let Some(encoded) = file.strip_suffix(".log") {
                    let name = dec(encoded);
                    if name.starts_with(date_prefix) {
                        names.push(name);
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read_log(&self, name: &str) -> Result<Vec<LogEntry>, StorageError> {
        let path = self.logs_dir().join(format!("{}.log", enc(name)));
        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(format!("log: {}", name))
            } else {
                e.into()
            }
        })?;
        let mut entries = Vec::new();
        for line in data.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            entries.push(serde_json::from_slice(line)?);
        }
        Ok(entries)
    }

    async fn remove_log(&self, name: &str) -> Result<(), StorageError> {
        let path = self.logs_dir().join(format!("{}.log", enc(name)));
        fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(format!("log: {}", name))
            } else {
                e.into()
            }
        })
    }

    // === Garbage collection ===

    async fn list_gc(
        &self,
        marker: &str,
        max: usize,
    ) -> Result<(Vec<GcEntry>, bool), StorageError> {
        let mut pending: Vec<GcEntry> = self.read_json(&self.gc_pending_path()).await?;
        pending.sort_by(|a, b| a.tag.cmp(&b.tag));
        let mut page: Vec<GcEntry> = pending
            .into_iter()
            .filter(|e| e.tag.as_str() > marker)
            .collect();
        let truncated = page.len() > max;
        page.truncate(max);
        Ok((page, truncated))
    }

    async fn process_gc(&self) -> Result<usize, StorageError> {
        let _guard = self.control.lock().await;
        let pending: Vec<GcEntry> = self.read_json(&self.gc_pending_path()).await?;
        let count = pending.len();
        for entry in &pending {
            let parked = self.gc_data_dir().join(&entry.tag);
            if path_exists(&parked).await {
                fs::remove_file(&parked).await?;
            }
        }
        self.write_json(&self.gc_pending_path(), &Vec::<GcEntry>::new()).await?;
        debug!("Processed {} gc chains", count);
        Ok(count)
    }

    // === Placement pools ===

    async fn add_pool(&self, name: &str) -> Result<(), StorageError> {
        let _guard = self.control.lock().await;
        let mut pools: Vec<String> = self.read_json(&self.pools_path()).await?;
        if !pools.iter().any(|p| p == name) {
            pools.push(name.to_string());
            pools.sort();
            self.write_json(&self.pools_path(), &pools).await?;
        }
        Ok(())
    }

    async fn remove_pool(&self, name: &str) -> Result<(), StorageError> {
        let _guard = self.control.lock().await;
        let mut pools: Vec<String> = self.read_json(&self.pools_path()).await?;
        pools.retain(|p| p != name);
        self.write_json(&self.pools_path(), &pools).await
    }

    async fn list_pools(&self) -> Result<Vec<String>, StorageError> {
        self.read_json(&self.pools_path()).await
    }

    // === Temp spool ===

    async fn remove_temp_objects(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut removed = 0;
        let mut entries = fs::read_dir(self.tmp_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            let modified: DateTime<Utc> = match meta.modified() {
                Ok(t) => t.into(),
                Err(_) => continue,
            };
            if modified < cutoff {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        debug!("Removed {} stale temp files", removed);
        Ok(removed)
    }

    fn params(&self) -> Vec<(String, String)> {
        vec![
            ("backend".to_string(), "filesystem".to_string()),
            ("root".to_string(), self.root.display().to_string()),
        ]
    }
}

fn enc(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

fn dec(s: &str) -> String {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}
