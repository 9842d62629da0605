//! Bucket admin operations: link/unlink, remove, stats, index check.
//!
//! These cross the identity store and the backend: linking a bucket
//! moves it between users' bucket lists and rewrites its ACL to the new
//! owner's default policy.

use super::AdminOpError;
use crate::acl::AclPolicy;
use crate::fmt::Formatter;
use crate::iam::UserDb;
use crate::storage::{
    BucketInfo, BucketStats, StorageBackend, StorageError, ACL_ATTR,
};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Link a bucket to a user. An existing bucket changes hands: it leaves
/// the current owner's list, its ACL is rewritten to the new owner's
/// private policy, and it joins the new owner's list. A missing bucket
/// is created outright.
pub async fn link(
    backend: &dyn StorageBackend,
    users: &UserDb,
    uid: &str,
    bucket: &str,
) -> Result<(), AdminOpError> {
    let user = users.info(uid)?;

    match backend.get_attr(bucket, None, ACL_ATTR).await {
        Ok(acl_data) => {
            if let Some(old_policy) = AclPolicy::decode(&acl_data) {
                info!(
                    "Bucket {} linked to {}, unlinking",
                    bucket, old_policy.owner_id
                );
                backend
                    .remove_user_bucket(&old_policy.owner_id, bucket)
                    .await?;
            }
            let policy = AclPolicy::private(&user.user_id, &user.display_name);
            backend
                .set_attr(bucket, None, ACL_ATTR, &policy.encode())
                .await?;

            let mut info = backend.bucket_info(bucket).await?;
            info.owner = user.user_id.clone();
            backend.put_bucket_info(&info).await?;
            backend.add_user_bucket(&user.user_id, bucket).await?;
            Ok(())
        }
        Err(StorageError::AttrNotFound(_)) | Err(StorageError::BucketNotFound(_)) => {
            create(backend, &user.user_id, &user.display_name, bucket).await
        }
        Err(e) => Err(e.into()),
    }
}

/// Create a bucket with the owner's default private policy.
pub async fn create(
    backend: &dyn StorageBackend,
    uid: &str,
    display_name: &str,
    bucket: &str,
) -> Result<(), AdminOpError> {
    let pool = backend
        .list_pools()
        .await?
        .into_iter()
        .next()
        .unwrap_or_else(|| "default".to_string());
    let info = BucketInfo {
        name: bucket.to_string(),
        pool,
        bucket_id: uuid::Uuid::new_v4().to_string(),
        marker: uuid::Uuid::new_v4().to_string(),
        owner: uid.to_string(),
        creation_time: Utc::now(),
    };
    match backend.create_bucket(&info).await {
        Ok(()) => {}
        // linking an existing unowned bucket is fine
        Err(StorageError::BucketExists(_)) => {}
        Err(e) => return Err(e.into()),
    }
    let policy = AclPolicy::private(uid, display_name);
    backend
        .set_attr(bucket, None, ACL_ATTR, &policy.encode())
        .await?;
    backend.add_user_bucket(uid, bucket).await?;
    Ok(())
}

/// Unlink a bucket from a user's list. The ACL is left as-is.
pub async fn unlink(
    backend: &dyn StorageBackend,
    uid: &str,
    bucket: &str,
) -> Result<(), AdminOpError> {
    backend.remove_user_bucket(uid, bucket).await?;
    Ok(())
}

/// Remove a bucket. With `purge_children` every object is deleted
/// first; without it a non-empty bucket is refused.
pub async fn remove(
    backend: &dyn StorageBackend,
    bucket: &str,
    purge_children: bool,
) -> Result<(), AdminOpError> {
    let info = backend.bucket_info(bucket).await?;
    if purge_children {
        for (key, _) in backend.list_objects(bucket, "").await? {
            if let Err(e) = backend.delete_object(bucket, &key).await {
                warn!("Failed to purge {}/{}: {}", bucket, key, e);
                return Err(e.into());
            }
        }
    }
    backend.delete_bucket(bucket).await?;
    backend.remove_user_bucket(&info.owner, bucket).await?;
    Ok(())
}

/// Remove a single object.
pub async fn remove_object(
    backend: &dyn StorageBackend,
    bucket: &str,
    key: &str,
) -> Result<(), AdminOpError> {
    backend.delete_object(bucket, key).await?;
    Ok(())
}

/// Remove a user. A user owning buckets needs the purge flag; purging
/// removes the buckets and their objects first.
pub async fn remove_user(
    backend: &dyn StorageBackend,
    users: &UserDb,
    uid: &str,
    purge_data: bool,
) -> Result<(), AdminOpError> {
    let owned = backend.user_buckets(uid).await?;
    if !owned.is_empty() && purge_data {
        for bucket in &owned {
            remove(backend, bucket, true).await?;
        }
    }
    users.remove_user(uid, !owned.is_empty() && !purge_data, purge_data)?;
    Ok(())
}

/// Per-category usage block shared by stats and index-check output.
pub fn dump_bucket_usage(stats: &BTreeMap<String, BucketStats>, f: &mut dyn Formatter) {
    f.open_object_section("usage");
    for (category, s) in stats {
        f.open_object_section(category);
        f.dump_int("size_kb", s.size_kb as i64);
        f.dump_int("size_kb_actual", s.size_kb_actual as i64);
        f.dump_int("num_objects", s.num_objects as i64);
        f.close_section();
    }
    f.close_section();
}

/// Render `bucket stats` output for one bucket.
pub async fn dump_stats(
    backend: &dyn StorageBackend,
    bucket: &str,
    f: &mut dyn Formatter,
) -> Result<(), AdminOpError> {
    let info = backend.bucket_info(bucket).await?;
    let stats = backend.bucket_stats(bucket).await?;
    f.open_object_section("stats");
    f.dump_string("bucket", &info.name);
    f.dump_string("pool", &info.pool);
    f.dump_string("id", &info.bucket_id);
    f.dump_string("marker", &info.marker);
    f.dump_string("owner", &info.owner);
    dump_bucket_usage(&stats, f);
    f.close_section();
    Ok(())
}

/// Render `bucket check` output; with `fix` the index is rebuilt first
/// reported, then repaired.
pub async fn check_index(
    backend: &dyn StorageBackend,
    bucket: &str,
    fix: bool,
    f: &mut dyn Formatter,
) -> Result<(), AdminOpError> {
    let (existing, calculated) = backend.check_bucket_index(bucket).await?;
    f.open_object_section("check_result");
    f.open_object_section("existing_header");
    dump_bucket_usage(&existing, f);
    f.close_section();
    f.open_object_section("calculated_header");
    dump_bucket_usage(&calculated, f);
    f.close_section();
    f.close_section();
    if fix {
        backend.rebuild_bucket_index(bucket).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmt::{into_string, JsonFormatter};
    use crate::iam::UserAdminRequest;
    use crate::storage::FilesystemBackend;

    async fn setup() -> (tempfile::TempDir, FilesystemBackend, UserDb) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path().to_path_buf()).await.unwrap();
        let users = UserDb::new();
        for uid in ["alice", "bob"] {
            users
                .add_user(&UserAdminRequest {
                    user_id: Some(uid.to_string()),
                    display_name: Some(uid.to_string()),
                    ..Default::default()
                })
                .unwrap();
        }
        (dir, backend, users)
    }

    #[tokio::test]
    async fn test_link_creates_missing_bucket() {
        let (_dir, backend, users) = setup().await;
        link(&backend, &users, "alice", "fresh").await.unwrap();
        assert_eq!(backend.user_buckets("alice").await.unwrap(), vec!["fresh"]);
        let acl = backend.get_attr("fresh", None, ACL_ATTR).await.unwrap();
        assert_eq!(AclPolicy::decode(&acl).unwrap().owner_id, "alice");
        assert_eq!(backend.bucket_info("fresh").await.unwrap().owner, "alice");
    }

    #[tokio::test]
    async fn test_link_transfers_ownership() {
        let (_dir, backend, users) = setup().await;
        link(&backend, &users, "alice", "shared").await.unwrap();
        link(&backend, &users, "bob", "shared").await.unwrap();

        assert!(backend.user_buckets("alice").await.unwrap().is_empty());
        assert_eq!(backend.user_buckets("bob").await.unwrap(), vec!["shared"]);
        let acl = backend.get_attr("shared", None, ACL_ATTR).await.unwrap();
        let policy = AclPolicy::decode(&acl).unwrap();
        assert_eq!(policy.owner_id, "bob");
        assert_eq!(backend.bucket_info("shared").await.unwrap().owner, "bob");
    }

    #[tokio::test]
    async fn test_unlink_leaves_acl() {
        let (_dir, backend, users) = setup().await;
        link(&backend, &users, "alice", "b").await.unwrap();
        unlink(&backend, "alice", "b").await.unwrap();
        assert!(backend.user_buckets("alice").await.unwrap().is_empty());
        // ACL still names alice
        let acl = backend.get_attr("b", None, ACL_ATTR).await.unwrap();
        assert_eq!(AclPolicy::decode(&acl).unwrap().owner_id, "alice");
    }

    #[tokio::test]
    async fn test_remove_requires_purge_for_children() {
        let (_dir, backend, users) = setup().await;
        link(&backend, &users, "alice", "b").await.unwrap();
        let meta = crate::storage::ObjectMeta {
            etag: "\"x\"".to_string(),
            size: 1,
            mtime: Utc::now(),
            content_type: None,
            attrs: Default::default(),
        };
        backend.put_object("b", "k", b"x", &meta).await.unwrap();

        assert!(matches!(
            remove(&backend, "b", false).await,
            Err(AdminOpError::Storage(StorageError::BucketNotEmpty(_)))
        ));
        remove(&backend, "b", true).await.unwrap();
        assert!(backend.bucket_info("b").await.is_err());
        assert!(backend.user_buckets("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_user_with_buckets() {
        let (_dir, backend, users) = setup().await;
        link(&backend, &users, "alice", "b").await.unwrap();

        let err = remove_user(&backend, &users, "alice", false).await;
        assert!(err.is_err());
        assert!(users.info("alice").is_ok());

        remove_user(&backend, &users, "alice", true).await.unwrap();
        assert!(users.info("alice").is_err());
        assert!(backend.bucket_info("b").await.is_err());
    }

    #[tokio::test]
    async fn test_dump_stats_shape() {
        let (_dir, backend, users) = setup().await;
        link(&backend, &users, "alice", "b").await.unwrap();
        let mut f = JsonFormatter::new(false);
        dump_stats(&backend, "b", &mut f).await.unwrap();
        let out = into_string(&mut f);
        assert!(out.contains(r#""bucket":"b""#));
        assert!(out.contains(r#""owner":"alice""#));
        assert!(out.contains(r#""usage""#));
    }

    #[tokio::test]
    async fn test_check_index_fix_rebuilds() {
        let (_dir, backend, users) = setup().await;
        link(&backend, &users, "alice", "b").await.unwrap();
        let mut f = JsonFormatter::new(false);
        check_index(&backend, "b", true, &mut f).await.unwrap();
        let out = into_string(&mut f);
        assert!(out.contains("existing_header"));
        assert!(out.contains("calculated_header"));
    }
}
