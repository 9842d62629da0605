//! Bucket-level S3 handlers: create, delete, stat, listing, ACLs,
//! logging status, and multi-object delete.

use super::multipart::list_parts_response;
use super::post_object::post_object;
use super::{
    body_to_utf8, bucket_acl, canned_policy_from_headers, require_access, validate_bucket_name,
    xml_response, AppState,
};
use crate::acl::AclPolicy;
use crate::api::auth::AuthContext;
use crate::api::errors::S3Error;
use crate::api::xml::{
    self, bucket_logging_status_xml, DeleteRequest, ListBucketResult, ListMultipartUploadsResult,
    ObjectEntry,
};
use crate::iam::perm::{PERM_READ, PERM_READ_ACP, PERM_WRITE, PERM_WRITE_ACP};
use crate::storage::{BucketInfo, ACL_ATTR};
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use chrono::Utc;
use futures::SinkExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const DEFAULT_MAX_KEYS: usize = 1000;

/// Query parameters for bucket-level GET operations.
/// Bare sub-resource keys (`?acl`) arrive as `Some("")`.
#[derive(Debug, serde::Deserialize, Default)]
pub struct BucketGetQuery {
    pub acl: Option<String>,
    pub logging: Option<String>,
    pub uploads: Option<String>,
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
    pub prefix: Option<String>,
    pub marker: Option<String>,
    pub delimiter: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<String>,
    #[serde(rename = "part-number-marker")]
    pub part_number_marker: Option<u32>,
    #[serde(rename = "max-parts")]
    pub max_parts: Option<usize>,
}

/// Bucket GET dispatch by sub-resource:
/// `?logging` → GetBucketLogging, `?acl` → GetACLs,
/// `?uploadId` → ListParts, `?uploads` → ListMultipartUploads,
/// otherwise ListObjects.
#[instrument(skip(state, ctx, query), fields(user = %ctx.uid_str()))]
pub async fn bucket_get(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(bucket): Path<String>,
    Query(query): Query<BucketGetQuery>,
) -> Result<Response, S3Error> {
    if query.logging.is_some() {
        info!("GET bucket logging: {}", bucket);
        state.backend.bucket_info(&bucket).await?;
        return Ok(xml_response(bucket_logging_status_xml()));
    }
    if query.acl.is_some() {
        return get_bucket_acls(&state, &ctx, &bucket).await;
    }
    if let Some(upload_id) = &query.upload_id {
        // bucket-level uploadId listing addresses the empty key
        return list_parts_response(
            &state,
            &bucket,
            "",
            upload_id,
            query.part_number_marker.unwrap_or(0),
            query.max_parts.unwrap_or(1000),
        );
    }
    if query.uploads.is_some() {
        return list_multipart_uploads(&state, &ctx, &bucket, query.prefix.as_deref()).await;
    }
    list_objects(&state, &ctx, &bucket, &query).await
}

async fn get_bucket_acls(
    state: &AppState,
    ctx: &AuthContext,
    bucket: &str,
) -> Result<Response, S3Error> {
    info!("GET bucket acl: {}", bucket);
    let policy = bucket_acl(state, bucket).await?;
    require_access(&policy, ctx, PERM_READ_ACP)?;
    Ok(xml_response(policy.to_xml()))
}

async fn list_multipart_uploads(
    state: &AppState,
    ctx: &AuthContext,
    bucket: &str,
    prefix: Option<&str>,
) -> Result<Response, S3Error> {
    info!("LIST multipart uploads: {}", bucket);
    let policy = bucket_acl(state, bucket).await?;
    require_access(&policy, ctx, PERM_READ)?;

    let uploads = state.multipart.list_uploads(bucket, prefix);
    let result = ListMultipartUploadsResult {
        bucket: bucket.to_string(),
        prefix: prefix.unwrap_or("").to_string(),
        max_uploads: 1000,
        is_truncated: false,
        uploads,
    };
    Ok(xml_response(result.to_xml()))
}

/// ListObjects: lexicographic keys after `marker`, up to `max-keys`,
/// with `delimiter` collapsing shared prefixes into CommonPrefixes
/// (which count toward max-keys).
async fn list_objects(
    state: &AppState,
    ctx: &AuthContext,
    bucket: &str,
    query: &BucketGetQuery,
) -> Result<Response, S3Error> {
    let policy = bucket_acl(state, bucket).await?;
    require_access(&policy, ctx, PERM_READ)?;

    let prefix = query.prefix.clone().unwrap_or_default();
    let marker = query.marker.clone().unwrap_or_default();
    let delimiter = query.delimiter.clone().filter(|d| !d.is_empty());
    let max_keys: usize = match &query.max_keys {
        Some(raw) => raw
            .parse()
            .map_err(|_| S3Error::InvalidArgument(format!("bad max-keys: {}", raw)))?,
        None => DEFAULT_MAX_KEYS,
    };
    // requested page size is capped, never trusted
    let max_keys = max_keys.min(state.config.max_keys_ceiling);

    info!("LIST {}/{}* marker={:?}", bucket, prefix, marker);

    let all = state.backend.list_objects(bucket, &prefix).await?;
    let info = state.backend.bucket_info(bucket).await?;

    let mut contents = Vec::new();
    let mut common_prefixes: BTreeSet<String> = BTreeSet::new();
    let mut is_truncated = false;
    let mut next_marker = None;
    let mut count = 0usize;

    for (key, meta) in all {
        if key.as_str() <= marker.as_str() {
            continue;
        }
        if count >= max_keys {
            is_truncated = true;
            break;
        }
        if let Some(delim) = &delimiter {
            if let Some(idx) = key[prefix.len()..].find(delim.as_str()) {
                let cp = key[..prefix.len() + idx + delim.len()].to_string();
                if common_prefixes.insert(cp.clone()) {
                    count += 1;
                    next_marker = Some(cp);
                }
                continue;
            }
        }
        count += 1;
        next_marker = Some(key.clone());
        contents.push(ObjectEntry {
            key,
            last_modified: meta.mtime,
            etag: meta.etag,
            size: meta.size,
            owner_id: info.owner.clone(),
            owner_display_name: info.owner.clone(),
        });
    }

    let result = ListBucketResult {
        name: bucket.to_string(),
        prefix,
        marker,
        max_keys,
        delimiter,
        is_truncated,
        next_marker: if is_truncated { next_marker } else { None },
        contents,
        common_prefixes: common_prefixes.into_iter().collect(),
    };
    state.record_usage(ctx, "list_bucket", 0, 0, true).await;
    Ok(xml_response(result.to_xml()))
}

/// HEAD bucket — StatBucket: existence plus accounting headers.
/// `?uploadId` selects ListParts like GET.
#[instrument(skip(state, ctx, query), fields(user = %ctx.uid_str()))]
pub async fn bucket_head(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(bucket): Path<String>,
    Query(query): Query<BucketGetQuery>,
) -> Result<Response, S3Error> {
    if let Some(upload_id) = &query.upload_id {
        return list_parts_response(
            &state,
            &bucket,
            "",
            upload_id,
            query.part_number_marker.unwrap_or(0),
            query.max_parts.unwrap_or(1000),
        );
    }

    info!("HEAD bucket {}", bucket);
    let policy = bucket_acl(&state, &bucket).await?;
    require_access(&policy, &ctx, PERM_READ)?;

    let stats = state.backend.bucket_stats(&bucket).await?;
    let (mut objects, mut bytes_kb) = (0u64, 0u64);
    for s in stats.values() {
        objects += s.num_objects;
        bytes_kb += s.size_kb;
    }
    let mut itoa_buf = itoa::Buffer::new();
    Ok((
        StatusCode::OK,
        [
            ("x-sg-object-count", itoa_buf.format(objects).to_string()),
            ("x-sg-bytes-used", (bytes_kb * 1024).to_string()),
        ],
    )
        .into_response())
}

/// Query parameters for bucket-level PUT operations
#[derive(Debug, serde::Deserialize, Default)]
pub struct BucketPutQuery {
    pub acl: Option<String>,
}

/// PUT bucket — CreateBucket, or PutACLs with `?acl`.
#[instrument(skip(state, ctx, query, headers, body), fields(user = %ctx.uid_str()))]
pub async fn bucket_put(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(bucket): Path<String>,
    Query(query): Query<BucketPutQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    if query.acl.is_some() {
        return put_bucket_acls(&state, &ctx, &bucket, &headers, &body).await;
    }

    info!("CREATE bucket {}", bucket);
    let uid = ctx.uid.as_deref().ok_or(S3Error::AccessDenied)?;
    validate_bucket_name(&bucket)?;
    let policy = canned_policy_from_headers(&ctx, &headers)?;

    // re-creating a bucket you already own is idempotent
    if let Ok(existing) = state.backend.bucket_info(&bucket).await {
        if existing.owner == uid {
            return Ok((StatusCode::OK, [("Location", format!("/{}", bucket))], "")
                .into_response());
        }
        return Err(S3Error::BucketAlreadyExists(bucket));
    }

    let user = state.users.info(uid)?;
    let owned = state.backend.user_buckets(uid).await?;
    if user.max_buckets >= 0 && owned.len() >= user.max_buckets as usize {
        return Err(S3Error::InvalidRequest(
            "bucket limit exceeded for this user".to_string(),
        ));
    }

    let pool = state
        .backend
        .list_pools()
        .await?
        .into_iter()
        .next()
        .unwrap_or_else(|| "default".to_string());
    let info = BucketInfo {
        name: bucket.clone(),
        pool,
        bucket_id: uuid::Uuid::new_v4().to_string(),
        marker: uuid::Uuid::new_v4().to_string(),
        owner: uid.to_string(),
        creation_time: Utc::now(),
    };
    state.backend.create_bucket(&info).await?;
    state
        .backend
        .set_attr(&bucket, None, ACL_ATTR, &policy.encode())
        .await?;
    state.backend.add_user_bucket(uid, &bucket).await?;

    state.record_usage(&ctx, "create_bucket", 0, 0, true).await;
    Ok((StatusCode::OK, [("Location", format!("/{}", bucket))], "").into_response())
}

async fn put_bucket_acls(
    state: &AppState,
    ctx: &AuthContext,
    bucket: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, S3Error> {
    info!("PUT bucket acl: {}", bucket);
    let current = bucket_acl(state, bucket).await?;
    require_access(&current, ctx, PERM_WRITE_ACP)?;

    let new_policy = if body.is_empty() {
        canned_policy_from_headers(ctx, headers)?
    } else {
        AclPolicy::from_xml(body_to_utf8(body)?).map_err(|_| S3Error::MalformedXML)?
    };
    state
        .backend
        .set_attr(bucket, None, ACL_ATTR, &new_policy.encode())
        .await?;
    Ok(xml_response(String::new()))
}

/// DELETE bucket — must be empty; unlinks from the owner's list.
#[instrument(skip(state, ctx), fields(user = %ctx.uid_str()))]
pub async fn bucket_delete(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(bucket): Path<String>,
) -> Result<Response, S3Error> {
    info!("DELETE bucket {}", bucket);
    let policy = bucket_acl(&state, &bucket).await?;
    require_access(&policy, &ctx, PERM_WRITE)?;

    let info = state.backend.bucket_info(&bucket).await?;
    state.backend.delete_bucket(&bucket).await?;
    state.backend.remove_user_bucket(&info.owner, &bucket).await?;

    state.record_usage(&ctx, "delete_bucket", 0, 0, true).await;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// POST on a bucket: `?delete` streams a multi-object delete, anything
/// else is a browser form upload.
pub async fn bucket_post(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(bucket): Path<String>,
    request: Request<Body>,
) -> Result<Response, S3Error> {
    let is_delete = request
        .uri()
        .query()
        .map(|q| q.split('&').any(|p| p == "delete" || p.starts_with("delete=")))
        .unwrap_or(false);

    if is_delete {
        let body = axum::body::to_bytes(request.into_body(), usize::MAX)
            .await
            .map_err(|e| S3Error::InternalError(e.to_string()))?;
        delete_multiple_objects(state, ctx, bucket, body).await
    } else {
        post_object(state, ctx, bucket, request).await
    }
}

/// DeleteMultipleObjects: per-key results are streamed into the response
/// as each delete resolves; the envelope is always well-formed.
#[instrument(skip(state, ctx, body), fields(user = %ctx.uid_str()))]
async fn delete_multiple_objects(
    state: Arc<AppState>,
    ctx: AuthContext,
    bucket: String,
    body: Bytes,
) -> Result<Response, S3Error> {
    let delete_req = DeleteRequest::from_xml(body_to_utf8(&body)?).map_err(|e| {
        warn!("Failed to parse DeleteObjects XML: {}", e);
        S3Error::MalformedXML
    })?;
    let quiet = delete_req.quiet.unwrap_or(false);

    info!(
        "DELETE multiple objects in {} ({} keys, quiet={})",
        bucket,
        delete_req.objects.len(),
        quiet
    );

    let policy = bucket_acl(&state, &bucket).await?;
    require_access(&policy, &ctx, PERM_WRITE)?;

    let (mut tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes, std::io::Error>>();
    tokio::spawn(async move {
        let _ = tx.send(Ok(Bytes::from(xml::delete_result_open()))).await;
        for obj in delete_req.objects {
            let key = obj.key.trim_start_matches('/').to_string();
            let fragment = match state.backend.delete_object(&bucket, &key).await {
                Ok(()) => {
                    if quiet {
                        continue;
                    }
                    xml::delete_result_deleted(&obj.key)
                }
                Err(e) => {
                    let s3_err = S3Error::from(e);
                    // batch delete treats a missing key as deleted
                    if matches!(s3_err, S3Error::NoSuchKey(_)) {
                        if quiet {
                            continue;
                        }
                        xml::delete_result_deleted(&obj.key)
                    } else {
                        warn!("Failed to delete {}/{}: {}", bucket, key, s3_err);
                        xml::delete_result_error(&obj.key, s3_err.code(), &s3_err.to_string())
                    }
                }
            };
            if tx.send(Ok(Bytes::from(fragment))).await.is_err() {
                // client went away; abandon the remainder
                return;
            }
        }
        let _ = tx.send(Ok(Bytes::from(xml::delete_result_close()))).await;
        state.record_usage(&ctx, "multi_object_delete", 0, 0, true).await;
    });

    Ok((
        StatusCode::OK,
        [("Content-Type", "application/xml")],
        Body::from_stream(rx),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::iam::{UserAdminRequest, UserDb};
    use crate::multipart::MultipartStore;
    use crate::storage::FilesystemBackend;

    async fn test_state_with(config: Config) -> (tempfile::TempDir, Arc<AppState>) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path().to_path_buf())
            .await
            .unwrap();
        let users = Arc::new(UserDb::new());
        for uid in ["alice", "bob"] {
            users
                .add_user(&UserAdminRequest {
                    user_id: Some(uid.to_string()),
                    display_name: Some(uid.to_string()),
                    ..Default::default()
                })
                .unwrap();
        }
        let state = Arc::new(AppState {
            backend: Box::new(backend),
            users,
            multipart: Arc::new(MultipartStore::new()),
            config,
        });
        (dir, state)
    }

    async fn test_state() -> (tempfile::TempDir, Arc<AppState>) {
        test_state_with(Config::default()).await
    }

    fn ctx_for(uid: &str) -> AuthContext {
        AuthContext {
            uid: Some(uid.to_string()),
            display_name: uid.to_string(),
            perm_mask: crate::iam::PERM_FULL_CONTROL,
            caps: Default::default(),
        }
    }

    async fn create(state: &Arc<AppState>, uid: &str, bucket: &str) -> Result<Response, S3Error> {
        bucket_put(
            State(state.clone()),
            Extension(ctx_for(uid)),
            Path(bucket.to_string()),
            Query(BucketPutQuery::default()),
            HeaderMap::new(),
            Bytes::new(),
        )
        .await
    }

    #[tokio::test]
    async fn test_create_bucket_idempotent_for_owner() {
        let (_dir, state) = test_state().await;
        assert_eq!(create(&state, "alice", "b").await.unwrap().status(), 200);
        // same owner re-creating is a 200
        assert_eq!(create(&state, "alice", "b").await.unwrap().status(), 200);
        assert_eq!(
            state.backend.user_buckets("alice").await.unwrap(),
            vec!["b"]
        );
    }

    #[tokio::test]
    async fn test_create_bucket_owned_by_other_user_conflicts() {
        let (_dir, state) = test_state().await;
        create(&state, "alice", "b").await.unwrap();
        let err = create(&state, "bob", "b").await.unwrap_err();
        assert!(matches!(err, S3Error::BucketAlreadyExists(_)));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_create_bucket_rejects_invalid_name() {
        let (_dir, state) = test_state().await;
        let err = create(&state, "alice", "10.0.0.1").await.unwrap_err();
        assert!(matches!(err, S3Error::InvalidBucketName(_)));
    }

    #[tokio::test]
    async fn test_create_bucket_anonymous_denied() {
        let (_dir, state) = test_state().await;
        let result = bucket_put(
            State(state.clone()),
            Extension(AuthContext::anonymous()),
            Path("b".to_string()),
            Query(BucketPutQuery::default()),
            HeaderMap::new(),
            Bytes::new(),
        )
        .await;
        assert!(matches!(result, Err(S3Error::AccessDenied)));
    }

    #[tokio::test]
    async fn test_delete_bucket_unlinks_owner() {
        let (_dir, state) = test_state().await;
        create(&state, "alice", "b").await.unwrap();
        let resp = bucket_delete(
            State(state.clone()),
            Extension(ctx_for("alice")),
            Path("b".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(state.backend.user_buckets("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_objects_max_keys_is_clamped() {
        let config = Config {
            max_keys_ceiling: 2,
            ..Config::default()
        };
        let (_dir, state) = test_state_with(config).await;
        create(&state, "alice", "b").await.unwrap();
        for key in ["a", "c", "e"] {
            let meta = crate::storage::ObjectMeta {
                etag: "\"x\"".to_string(),
                size: 1,
                mtime: Utc::now(),
                content_type: None,
                attrs: Default::default(),
            };
            state.backend.put_object("b", key, b"x", &meta).await.unwrap();
        }

        // an oversized request is cut down to the ceiling
        let query = BucketGetQuery {
            max_keys: Some("100000000".to_string()),
            ..Default::default()
        };
        let resp = list_objects(&state, &ctx_for("alice"), "b", &query)
            .await
            .unwrap();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let xml = String::from_utf8(body.to_vec()).unwrap();
        assert!(xml.contains("<MaxKeys>2</MaxKeys>"));
        assert!(xml.contains("<IsTruncated>true</IsTruncated>"));
        assert_eq!(xml.matches("<Contents>").count(), 2);
    }

    #[tokio::test]
    async fn test_bucket_acl_denies_other_users() {
        let (_dir, state) = test_state().await;
        create(&state, "alice", "b").await.unwrap();
        // bob holds no grant on alice's private bucket
        let err = list_objects(
            &state,
            &ctx_for("bob"),
            "b",
            &BucketGetQuery::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, S3Error::AccessDenied));
    }
}
