//! Object-level S3 handlers: GET, HEAD, PUT (with copy and part-upload
//! detection), DELETE.

use super::multipart::list_parts_response;
use super::{
    body_to_utf8, bucket_acl, canned_policy_from_headers, extract_content_type,
    extract_user_metadata, object_acl, require_access, xml_response, AppState, AMZ_META_PREFIX,
};
use crate::acl::AclPolicy;
use crate::api::auth::AuthContext;
use crate::api::errors::S3Error;
use crate::api::xml::CopyObjectResult;
use crate::dates::{http_date, parse_http_date};
use crate::iam::perm::{PERM_READ, PERM_READ_ACP, PERM_WRITE, PERM_WRITE_ACP};
use crate::storage::{ObjectMeta, ACL_ATTR};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const DEFAULT_CONTENT_TYPE: &str = "binary/octet-stream";

/// Query parameters for object-level operations
#[derive(Debug, serde::Deserialize, Default)]
pub struct ObjectQuery {
    pub acl: Option<String>,
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
    #[serde(rename = "partNumber")]
    pub part_number: Option<u32>,
    #[serde(rename = "part-number-marker")]
    pub part_number_marker: Option<u32>,
    #[serde(rename = "max-parts")]
    pub max_parts: Option<usize>,
    #[serde(rename = "response-content-type")]
    pub response_content_type: Option<String>,
    #[serde(rename = "response-content-language")]
    pub response_content_language: Option<String>,
    #[serde(rename = "response-expires")]
    pub response_expires: Option<String>,
    #[serde(rename = "response-cache-control")]
    pub response_cache_control: Option<String>,
    #[serde(rename = "response-content-disposition")]
    pub response_content_disposition: Option<String>,
    #[serde(rename = "response-content-encoding")]
    pub response_content_encoding: Option<String>,
}

/// Evaluate `Range: bytes=a-b` (or `bytes=a-`) against the object size.
/// Anything outside `0 <= a <= b < size` is unsatisfiable.
fn parse_range(header: &str, size: u64) -> Result<(u64, u64), S3Error> {
    let spec = header.strip_prefix("bytes=").ok_or(S3Error::InvalidRange)?;
    let (start_s, end_s) = spec.split_once('-').ok_or(S3Error::InvalidRange)?;
    let start: u64 = start_s.parse().map_err(|_| S3Error::InvalidRange)?;
    let end: u64 = if end_s.is_empty() {
        size.checked_sub(1).ok_or(S3Error::InvalidRange)?
    } else {
        end_s.parse().map_err(|_| S3Error::InvalidRange)?
    };
    if start > end || end >= size {
        return Err(S3Error::InvalidRange);
    }
    Ok((start, end))
}

fn etag_matches(condition: &str, etag: &str) -> bool {
    condition == "*" || condition.trim_matches('"') == etag.trim_matches('"')
}

/// Conditional-request evaluation, ETag conditions first, then the
/// modification-time pair.
fn check_preconditions(
    meta: &ObjectMeta,
    if_match: Option<&str>,
    if_none_match: Option<&str>,
    if_modified_since: Option<DateTime<Utc>>,
    if_unmodified_since: Option<DateTime<Utc>>,
) -> Result<(), S3Error> {
    if let Some(cond) = if_match {
        if !etag_matches(cond, &meta.etag) {
            return Err(S3Error::PreconditionFailed);
        }
    }
    if let Some(cond) = if_none_match {
        if etag_matches(cond, &meta.etag) {
            return Err(S3Error::NotModified);
        }
    }
    if let Some(since) = if_modified_since {
        if meta.mtime <= since {
            return Err(S3Error::NotModified);
        }
    }
    if let Some(since) = if_unmodified_since {
        if meta.mtime > since {
            return Err(S3Error::PreconditionFailed);
        }
    }
    Ok(())
}

fn header_date(headers: &HeaderMap, name: &str) -> Option<DateTime<Utc>> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
}

fn hval(s: &str) -> HeaderValue {
    HeaderValue::from_bytes(s.as_bytes()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Common response headers for GET/HEAD. Query overrides from the
/// response-* family win over stored attributes.
fn object_headers(meta: &ObjectMeta, query: &ObjectQuery) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ETAG, hval(&meta.etag));
    headers.insert(header::LAST_MODIFIED, hval(&http_date(&meta.mtime)));

    let content_type = query
        .response_content_type
        .clone()
        .or_else(|| meta.content_type.clone())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
    headers.insert(header::CONTENT_TYPE, hval(&content_type));

    let overrides: [(&HeaderName, &Option<String>); 5] = [
        (&header::CONTENT_LANGUAGE, &query.response_content_language),
        (&header::EXPIRES, &query.response_expires),
        (&header::CACHE_CONTROL, &query.response_cache_control),
        (&header::CONTENT_DISPOSITION, &query.response_content_disposition),
        (&header::CONTENT_ENCODING, &query.response_content_encoding),
    ];
    for (name, value) in overrides {
        if let Some(v) = value {
            headers.insert(name.clone(), hval(v));
        }
    }

    for (name, value) in &meta.attrs {
        if name.starts_with(AMZ_META_PREFIX) {
            if let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) {
                headers.insert(header_name, hval(&String::from_utf8_lossy(value)));
            }
        }
    }
    headers
}

/// GET object: plain download with range/conditional semantics, or
/// `?acl` / `?uploadId` sub-resources.
#[instrument(skip(state, ctx, query, headers), fields(user = %ctx.uid_str()))]
pub async fn object_get(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<ObjectQuery>,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    let key = key.trim_start_matches('/').to_string();

    if let Some(upload_id) = &query.upload_id {
        return list_parts_response(
            &state,
            &bucket,
            &key,
            upload_id,
            query.part_number_marker.unwrap_or(0),
            query.max_parts.unwrap_or(1000),
        );
    }
    if query.acl.is_some() {
        info!("GET object acl {}/{}", bucket, key);
        let meta = state.backend.head_object(&bucket, &key).await?;
        let policy = object_acl(&state, &bucket, &meta).await?;
        require_access(&policy, &ctx, PERM_READ_ACP)?;
        return Ok(xml_response(policy.to_xml()));
    }

    info!("GET {}/{}", bucket, key);
    let (data, meta) = state.backend.get_object(&bucket, &key).await?;
    let policy = object_acl(&state, &bucket, &meta).await?;
    require_access(&policy, &ctx, PERM_READ)?;

    check_preconditions(
        &meta,
        headers.get(header::IF_MATCH).and_then(|v| v.to_str().ok()),
        headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()),
        header_date(&headers, "if-modified-since"),
        header_date(&headers, "if-unmodified-since"),
    )?;

    let mut response_headers = object_headers(&meta, &query);

    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let (status, body) = match range {
        Some(r) => {
            let (start, end) = parse_range(r, meta.size)?;
            debug!("Range {}-{} of {}", start, end, meta.size);
            response_headers.insert(
                header::CONTENT_RANGE,
                hval(&format!("bytes {}-{}/{}", start, end, meta.size)),
            );
            let slice = data[start as usize..=end as usize].to_vec();
            (StatusCode::PARTIAL_CONTENT, slice)
        }
        None => (StatusCode::OK, data),
    };

    state
        .record_usage(&ctx, "get_obj", body.len() as u64, 0, true)
        .await;
    Ok((status, response_headers, body).into_response())
}

/// HEAD object: metadata only, no range evaluation.
#[instrument(skip(state, ctx, query, headers), fields(user = %ctx.uid_str()))]
pub async fn object_head(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<ObjectQuery>,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    let key = key.trim_start_matches('/').to_string();
    if let Some(upload_id) = &query.upload_id {
        return list_parts_response(
            &state,
            &bucket,
            &key,
            upload_id,
            query.part_number_marker.unwrap_or(0),
            query.max_parts.unwrap_or(1000),
        );
    }

    info!("HEAD {}/{}", bucket, key);
    let meta = state.backend.head_object(&bucket, &key).await?;
    let policy = object_acl(&state, &bucket, &meta).await?;
    require_access(&policy, &ctx, PERM_READ)?;

    check_preconditions(
        &meta,
        headers.get(header::IF_MATCH).and_then(|v| v.to_str().ok()),
        headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()),
        header_date(&headers, "if-modified-since"),
        header_date(&headers, "if-unmodified-since"),
    )?;

    let mut response_headers = object_headers(&meta, &query);
    response_headers.insert(header::CONTENT_LENGTH, hval(&meta.size.to_string()));
    Ok((StatusCode::OK, response_headers).into_response())
}

/// PUT object: plain upload, `?acl`, multipart part upload
/// (`?partNumber&uploadId`), or copy (`x-amz-copy-source`).
#[instrument(skip(state, ctx, query, headers, body), fields(user = %ctx.uid_str()))]
pub async fn object_put(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<ObjectQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    let key = key.trim_start_matches('/').to_string();

    if query.acl.is_some() {
        return put_object_acls(&state, &ctx, &bucket, &key, &headers, &body).await;
    }

    if let (Some(part_number), Some(upload_id)) = (query.part_number, &query.upload_id) {
        info!(
            "UploadPart {}/{} part={} uploadId={}",
            bucket, key, part_number, upload_id
        );
        let policy = bucket_acl(&state, &bucket).await?;
        require_access(&policy, &ctx, PERM_WRITE)?;
        let received = body.len() as u64;
        let etag = state
            .multipart
            .upload_part(upload_id, &bucket, &key, part_number, body)?;
        state.record_usage(&ctx, "put_obj", 0, received, true).await;
        return Ok((StatusCode::OK, [(header::ETAG, etag)], "").into_response());
    }

    if headers.contains_key("x-amz-copy-source") {
        return copy_object(&state, &ctx, &bucket, &key, &headers).await;
    }

    put_object(&state, &ctx, &bucket, &key, &headers, body).await
}

async fn put_object(
    state: &AppState,
    ctx: &AuthContext,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    info!("PUT {}/{} ({} bytes)", bucket, key, body.len());

    if !headers.contains_key(header::CONTENT_LENGTH) {
        return Err(S3Error::LengthRequired);
    }
    let bucket_policy = bucket_acl(state, bucket).await?;
    require_access(&bucket_policy, ctx, PERM_WRITE)?;

    let object_policy = canned_policy_from_headers(ctx, headers)?;
    let etag = format!("\"{}\"", hex::encode(Md5::digest(&body)));

    let mut attrs = BTreeMap::new();
    attrs.insert(ACL_ATTR.to_string(), object_policy.encode());
    for (name, value) in extract_user_metadata(headers) {
        attrs.insert(format!("{}{}", AMZ_META_PREFIX, name), value.into_bytes());
    }

    let meta = ObjectMeta {
        etag: etag.clone(),
        size: body.len() as u64,
        mtime: Utc::now(),
        content_type: extract_content_type(headers),
        attrs,
    };
    state.backend.put_object(bucket, key, &body, &meta).await?;

    state
        .record_usage(ctx, "put_obj", 0, body.len() as u64, true)
        .await;
    Ok((StatusCode::OK, [(header::ETAG, etag)], "").into_response())
}

async fn put_object_acls(
    state: &AppState,
    ctx: &AuthContext,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, S3Error> {
    info!("PUT object acl {}/{}", bucket, key);
    let meta = state.backend.head_object(bucket, key).await?;
    let current = object_acl(state, bucket, &meta).await?;
    require_access(&current, ctx, PERM_WRITE_ACP)?;

    let new_policy = if body.is_empty() {
        canned_policy_from_headers(ctx, headers)?
    } else {
        AclPolicy::from_xml(body_to_utf8(body)?).map_err(|_| S3Error::MalformedXML)?
    };
    state
        .backend
        .set_attr(bucket, Some(key), ACL_ATTR, &new_policy.encode())
        .await?;
    Ok(xml_response(String::new()))
}

/// Copy: source from `x-amz-copy-source: /bucket/key`, conditional on
/// the `x-amz-copy-if-*` family, metadata per `x-amz-metadata-directive`.
async fn copy_object(
    state: &AppState,
    ctx: &AuthContext,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let source = headers
        .get("x-amz-copy-source")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| S3Error::InvalidArgument("missing copy source".to_string()))?;
    let source = urlencoding::decode(source)
        .map_err(|_| S3Error::InvalidArgument("bad copy source encoding".to_string()))?;
    let source = source.trim_start_matches('/');
    let (src_bucket, src_key) = source
        .split_once('/')
        .ok_or_else(|| S3Error::InvalidArgument("copy source must be bucket/key".to_string()))?;

    info!("COPY {}/{} -> {}/{}", src_bucket, src_key, bucket, key);

    let replace_attrs = match headers
        .get("x-amz-metadata-directive")
        .and_then(|v| v.to_str().ok())
    {
        None => false,
        Some(d) if d.eq_ignore_ascii_case("COPY") => false,
        Some(d) if d.eq_ignore_ascii_case("REPLACE") => true,
        Some(d) => {
            return Err(S3Error::InvalidArgument(format!(
                "bad metadata directive: {}",
                d
            )))
        }
    };
    // copying an object onto itself only makes sense when replacing attrs
    if src_bucket == bucket && src_key == key && !replace_attrs {
        return Err(S3Error::InvalidRequest(
            "this copy request is illegal because it is copying an object to itself".to_string(),
        ));
    }

    let (data, src_meta) = state.backend.get_object(src_bucket, src_key).await?;
    let src_policy = object_acl(state, src_bucket, &src_meta).await?;
    require_access(&src_policy, ctx, PERM_READ)?;

    check_preconditions(
        &src_meta,
        headers.get("x-amz-copy-if-match").and_then(|v| v.to_str().ok()),
        headers
            .get("x-amz-copy-if-none-match")
            .and_then(|v| v.to_str().ok()),
        None,
        header_date(headers, "x-amz-copy-if-unmodified-since"),
    )
    .map_err(|_| S3Error::PreconditionFailed)?;
    if let Some(since) = header_date(headers, "x-amz-copy-if-modified-since") {
        if src_meta.mtime <= since {
            return Err(S3Error::PreconditionFailed);
        }
    }

    let dest_policy = bucket_acl(state, bucket).await?;
    require_access(&dest_policy, ctx, PERM_WRITE)?;

    let object_policy = canned_policy_from_headers(ctx, headers)?;
    let mut attrs = BTreeMap::new();
    attrs.insert(ACL_ATTR.to_string(), object_policy.encode());
    let content_type;
    if replace_attrs {
        for (name, value) in extract_user_metadata(headers) {
            attrs.insert(format!("{}{}", AMZ_META_PREFIX, name), value.into_bytes());
        }
        content_type = extract_content_type(headers).or_else(|| src_meta.content_type.clone());
    } else {
        for (name, value) in &src_meta.attrs {
            if name.starts_with(AMZ_META_PREFIX) {
                attrs.insert(name.clone(), value.clone());
            }
        }
        content_type = src_meta.content_type.clone();
    }

    let meta = ObjectMeta {
        etag: src_meta.etag.clone(),
        size: data.len() as u64,
        mtime: Utc::now(),
        content_type,
        attrs,
    };
    state.backend.put_object(bucket, key, &data, &meta).await?;

    let result = CopyObjectResult {
        etag: meta.etag.clone(),
        last_modified: meta.mtime,
    };
    state
        .record_usage(ctx, "copy_obj", 0, data.len() as u64, true)
        .await;
    Ok(xml_response(result.to_xml()))
}

/// DELETE object, or AbortMultipartUpload with `?uploadId`.
#[instrument(skip(state, ctx, query), fields(user = %ctx.uid_str()))]
pub async fn object_delete(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<ObjectQuery>,
) -> Result<Response, S3Error> {
    let key = key.trim_start_matches('/').to_string();

    if let Some(upload_id) = &query.upload_id {
        info!("AbortMultipartUpload {}/{} uploadId={}", bucket, key, upload_id);
        let policy = bucket_acl(&state, &bucket).await?;
        require_access(&policy, &ctx, PERM_WRITE)?;
        state.multipart.abort(upload_id, &bucket, &key)?;
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    info!("DELETE {}/{}", bucket, key);
    let policy = bucket_acl(&state, &bucket).await?;
    require_access(&policy, &ctx, PERM_WRITE)?;

    // deleting an absent key is a success
    if let Err(err) = state.backend.delete_object(&bucket, &key).await {
        match S3Error::from(err) {
            S3Error::NoSuchKey(_) => {}
            other => return Err(other),
        }
    }

    state.record_usage(&ctx, "delete_obj", 0, 0, true).await;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::iam::{UserAdminRequest, UserDb};
    use crate::multipart::MultipartStore;
    use crate::storage::{BucketInfo, FilesystemBackend};

    fn meta_with(etag: &str, mtime: DateTime<Utc>) -> ObjectMeta {
        ObjectMeta {
            etag: etag.to_string(),
            size: 1000,
            mtime,
            content_type: None,
            attrs: BTreeMap::new(),
        }
    }

    #[test]
    fn test_parse_range_simple() {
        assert_eq!(parse_range("bytes=0-9", 1000).unwrap(), (0, 9));
        assert_eq!(parse_range("bytes=500-999", 1000).unwrap(), (500, 999));
        assert_eq!(parse_range("bytes=990-", 1000).unwrap(), (990, 999));
    }

    #[test]
    fn test_parse_range_length_property() {
        let (start, end) = parse_range("bytes=0-9", 1000).unwrap();
        assert_eq!(end - start + 1, 10);
    }

    #[test]
    fn test_parse_range_rejects_unsatisfiable() {
        assert!(parse_range("bytes=5-4", 1000).is_err());
        assert!(parse_range("bytes=0-1000", 1000).is_err());
        assert!(parse_range("bytes=1000-", 1000).is_err());
        assert!(parse_range("bytes=0-0", 0).is_err());
        assert!(parse_range("chunks=0-9", 1000).is_err());
        assert!(parse_range("bytes=a-b", 1000).is_err());
    }

    #[test]
    fn test_etag_matches() {
        assert!(etag_matches("\"abc\"", "\"abc\""));
        assert!(etag_matches("abc", "\"abc\""));
        assert!(etag_matches("*", "\"anything\""));
        assert!(!etag_matches("\"abc\"", "\"def\""));
    }

    #[test]
    fn test_preconditions_etag_first() {
        let now = Utc::now();
        let meta = meta_with("\"abc\"", now);

        // If-Match mismatch fails even when If-Modified-Since would 304
        let result = check_preconditions(
            &meta,
            Some("\"other\""),
            None,
            Some(now + chrono::Duration::hours(1)),
            None,
        );
        assert!(matches!(result, Err(S3Error::PreconditionFailed)));

        // If-None-Match hit yields NotModified
        let result = check_preconditions(&meta, None, Some("\"abc\""), None, None);
        assert!(matches!(result, Err(S3Error::NotModified)));
    }

    #[test]
    fn test_preconditions_modified_since() {
        let mtime = Utc::now() - chrono::Duration::hours(2);
        let meta = meta_with("\"abc\"", mtime);

        let result =
            check_preconditions(&meta, None, None, Some(mtime + chrono::Duration::hours(1)), None);
        assert!(matches!(result, Err(S3Error::NotModified)));

        let result =
            check_preconditions(&meta, None, None, Some(mtime - chrono::Duration::hours(1)), None);
        assert!(result.is_ok());

        let result = check_preconditions(
            &meta,
            None,
            None,
            None,
            Some(mtime - chrono::Duration::hours(1)),
        );
        assert!(matches!(result, Err(S3Error::PreconditionFailed)));
    }

    #[test]
    fn test_object_headers_defaults_and_overrides() {
        let meta = meta_with("\"abc\"", Utc::now());
        let query = ObjectQuery::default();
        let headers = object_headers(&meta, &query);
        assert_eq!(headers[header::CONTENT_TYPE], DEFAULT_CONTENT_TYPE);
        assert_eq!(headers[header::ETAG], "\"abc\"");

        let query = ObjectQuery {
            response_content_type: Some("text/html".to_string()),
            response_cache_control: Some("no-cache".to_string()),
            ..Default::default()
        };
        let headers = object_headers(&meta, &query);
        assert_eq!(headers[header::CONTENT_TYPE], "text/html");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
    }

    #[test]
    fn test_object_headers_user_metadata() {
        let mut meta = meta_with("\"abc\"", Utc::now());
        meta.attrs.insert(
            "x-amz-meta-color".to_string(),
            b"blue".to_vec(),
        );
        meta.attrs.insert("acl".to_string(), b"ignored".to_vec());
        let headers = object_headers(&meta, &ObjectQuery::default());
        assert_eq!(headers["x-amz-meta-color"], "blue");
        assert!(!headers.contains_key("acl"));
    }

    mod handler {
        use super::*;
        use crate::storage::StorageBackend;
        use axum::Extension;

        async fn test_state() -> (tempfile::TempDir, Arc<AppState>) {
            let dir = tempfile::tempdir().unwrap();
            let backend = FilesystemBackend::new(dir.path().to_path_buf())
                .await
                .unwrap();
            let users = Arc::new(UserDb::new());
            users
                .add_user(&UserAdminRequest {
                    user_id: Some("alice".to_string()),
                    display_name: Some("Alice".to_string()),
                    ..Default::default()
                })
                .unwrap();
            backend
                .create_bucket(&BucketInfo {
                    name: "b".to_string(),
                    pool: "default".to_string(),
                    bucket_id: "id".to_string(),
                    marker: "m".to_string(),
                    owner: "alice".to_string(),
                    creation_time: Utc::now(),
                })
                .await
                .unwrap();
            let state = Arc::new(AppState {
                backend: Box::new(backend),
                users,
                multipart: Arc::new(MultipartStore::new()),
                config: Config::default(),
            });
            (dir, state)
        }

        fn alice() -> AuthContext {
            AuthContext {
                uid: Some("alice".to_string()),
                display_name: "Alice".to_string(),
                perm_mask: crate::iam::PERM_FULL_CONTROL,
                caps: Default::default(),
            }
        }

        async fn put(state: &Arc<AppState>, key: &str, data: &[u8]) {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_LENGTH, data.len().into());
            let resp = object_put(
                State(state.clone()),
                Extension(alice()),
                Path(("b".to_string(), key.to_string())),
                Query(ObjectQuery::default()),
                headers,
                Bytes::copy_from_slice(data),
            )
            .await
            .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }

        #[tokio::test]
        async fn test_put_requires_content_length() {
            let (_dir, state) = test_state().await;
            let err = object_put(
                State(state.clone()),
                Extension(alice()),
                Path(("b".to_string(), "k".to_string())),
                Query(ObjectQuery::default()),
                HeaderMap::new(),
                Bytes::from_static(b"x"),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, S3Error::LengthRequired));
        }

        #[tokio::test]
        async fn test_get_with_range_returns_partial_content() {
            let (_dir, state) = test_state().await;
            put(&state, "k", &[7u8; 1000]).await;

            let mut headers = HeaderMap::new();
            headers.insert(header::RANGE, "bytes=0-9".parse().unwrap());
            let resp = object_get(
                State(state.clone()),
                Extension(alice()),
                Path(("b".to_string(), "k".to_string())),
                Query(ObjectQuery::default()),
                headers,
            )
            .await
            .unwrap();

            assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
            assert_eq!(resp.headers()[header::CONTENT_RANGE], "bytes 0-9/1000");
            let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
                .await
                .unwrap();
            assert_eq!(body.len(), 10);
        }

        #[tokio::test]
        async fn test_get_unsatisfiable_range() {
            let (_dir, state) = test_state().await;
            put(&state, "k", b"small").await;

            let mut headers = HeaderMap::new();
            headers.insert(header::RANGE, "bytes=3-100".parse().unwrap());
            let err = object_get(
                State(state.clone()),
                Extension(alice()),
                Path(("b".to_string(), "k".to_string())),
                Query(ObjectQuery::default()),
                headers,
            )
            .await
            .unwrap_err();
            assert!(matches!(err, S3Error::InvalidRange));
        }

        #[tokio::test]
        async fn test_get_if_none_match_not_modified() {
            let (_dir, state) = test_state().await;
            put(&state, "k", b"content").await;
            let meta = state.backend.head_object("b", "k").await.unwrap();

            let mut headers = HeaderMap::new();
            headers.insert(header::IF_NONE_MATCH, meta.etag.parse().unwrap());
            let err = object_get(
                State(state.clone()),
                Extension(alice()),
                Path(("b".to_string(), "k".to_string())),
                Query(ObjectQuery::default()),
                headers,
            )
            .await
            .unwrap_err();
            assert!(matches!(err, S3Error::NotModified));
        }

        #[tokio::test]
        async fn test_anonymous_denied_on_private_object() {
            let (_dir, state) = test_state().await;
            put(&state, "k", b"secret").await;

            let err = object_get(
                State(state.clone()),
                Extension(AuthContext::anonymous()),
                Path(("b".to_string(), "k".to_string())),
                Query(ObjectQuery::default()),
                HeaderMap::new(),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, S3Error::AccessDenied));
        }

        #[tokio::test]
        async fn test_anonymous_allowed_on_public_read_object() {
            let (_dir, state) = test_state().await;
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(6u64));
            headers.insert("x-amz-acl", "public-read".parse().unwrap());
            object_put(
                State(state.clone()),
                Extension(alice()),
                Path(("b".to_string(), "k".to_string())),
                Query(ObjectQuery::default()),
                headers,
                Bytes::from_static(b"public"),
            )
            .await
            .unwrap();

            let resp = object_get(
                State(state.clone()),
                Extension(AuthContext::anonymous()),
                Path(("b".to_string(), "k".to_string())),
                Query(ObjectQuery::default()),
                HeaderMap::new(),
            )
            .await
            .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }

        #[tokio::test]
        async fn test_delete_missing_key_is_no_content() {
            let (_dir, state) = test_state().await;
            let resp = object_delete(
                State(state.clone()),
                Extension(alice()),
                Path(("b".to_string(), "nope".to_string())),
                Query(ObjectQuery::default()),
            )
            .await
            .unwrap();
            assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        }

        #[tokio::test]
        async fn test_copy_to_self_requires_replace() {
            let (_dir, state) = test_state().await;
            put(&state, "k", b"data").await;

            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(0u64));
            headers.insert("x-amz-copy-source", "/b/k".parse().unwrap());
            let err = object_put(
                State(state.clone()),
                Extension(alice()),
                Path(("b".to_string(), "k".to_string())),
                Query(ObjectQuery::default()),
                headers.clone(),
                Bytes::new(),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, S3Error::InvalidRequest(_)));

            headers.insert("x-amz-metadata-directive", "REPLACE".parse().unwrap());
            let resp = object_put(
                State(state.clone()),
                Extension(alice()),
                Path(("b".to_string(), "k".to_string())),
                Query(ObjectQuery::default()),
                headers,
                Bytes::new(),
            )
            .await
            .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
    }
}
