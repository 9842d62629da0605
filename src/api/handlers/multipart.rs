//! Multipart upload S3 handlers: InitiateMultipartUpload,
//! CompleteMultipartUpload, and the shared ListParts renderer.
//! (UploadPart and Abort live with the object PUT/DELETE dispatch.)

use super::{
    body_to_utf8, bucket_acl, canned_policy_from_headers, extract_content_type,
    extract_user_metadata, require_access, xml_response, AppState, AMZ_META_PREFIX,
};
use crate::api::auth::AuthContext;
use crate::api::errors::S3Error;
use crate::api::xml::{
    CompleteMultipartUploadRequest, CompleteMultipartUploadResult, InitiateMultipartUploadResult,
    ListPartsResult,
};
use crate::iam::perm::PERM_WRITE;
use crate::storage::{ObjectMeta, ACL_ATTR};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Extension;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Query parameters for object-level POST operations
#[derive(Debug, serde::Deserialize, Default)]
pub struct MultipartQuery {
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
}

/// POST on an object: `?uploadId` completes an upload, anything else
/// initiates one.
#[instrument(skip(state, ctx, query, headers, body), fields(user = %ctx.uid_str()))]
pub async fn object_post(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<MultipartQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    let key = key.trim_start_matches('/').to_string();
    match &query.upload_id {
        Some(upload_id) => {
            complete_multipart_upload(&state, &ctx, &bucket, &key, upload_id, body).await
        }
        None => initiate_multipart_upload(&state, &ctx, &bucket, &key, &headers).await,
    }
}

async fn initiate_multipart_upload(
    state: &AppState,
    ctx: &AuthContext,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    info!("InitiateMultipartUpload {}/{}", bucket, key);
    let policy = bucket_acl(state, bucket).await?;
    require_access(&policy, ctx, PERM_WRITE)?;

    let object_policy = canned_policy_from_headers(ctx, headers)?;
    let upload_id = state.multipart.create(
        bucket,
        key,
        ctx.uid_str(),
        &ctx.display_name,
        extract_content_type(headers),
        extract_user_metadata(headers),
        object_policy.encode(),
    );

    let xml = InitiateMultipartUploadResult {
        bucket: bucket.to_string(),
        key: key.to_string(),
        upload_id,
    }
    .to_xml();
    Ok(xml_response(xml))
}

async fn complete_multipart_upload(
    state: &AppState,
    ctx: &AuthContext,
    bucket: &str,
    key: &str,
    upload_id: &str,
    body: Bytes,
) -> Result<Response, S3Error> {
    info!(
        "CompleteMultipartUpload {}/{} uploadId={}",
        bucket, key, upload_id
    );
    let policy = bucket_acl(state, bucket).await?;
    require_access(&policy, ctx, PERM_WRITE)?;

    let complete_req = CompleteMultipartUploadRequest::from_xml(body_to_utf8(&body)?)
        .map_err(|e| {
            warn!("Failed to parse CompleteMultipartUpload XML: {}", e);
            S3Error::MalformedXML
        })?;
    let requested_parts: Vec<(u32, String)> = complete_req
        .parts
        .iter()
        .map(|p| (p.part_number, p.etag.clone()))
        .collect();

    let completed = state
        .multipart
        .complete(upload_id, bucket, key, &requested_parts)?;

    let mut attrs = BTreeMap::new();
    attrs.insert(ACL_ATTR.to_string(), completed.acl.clone());
    for (name, value) in &completed.user_metadata {
        attrs.insert(format!("{}{}", AMZ_META_PREFIX, name), value.clone().into_bytes());
    }
    let meta = ObjectMeta {
        etag: completed.etag.clone(),
        size: completed.data.len() as u64,
        mtime: Utc::now(),
        content_type: completed.content_type.clone(),
        attrs,
    };
    state
        .backend
        .put_object(bucket, key, &completed.data, &meta)
        .await?;
    state.multipart.remove(upload_id);

    // virtual-host deployments advertise the bucket's host name
    let location = if state.config.host_suffix.is_empty() {
        format!("/{}/{}", bucket, key)
    } else {
        format!("{}.{}/{}", bucket, state.config.host_suffix, key)
    };
    let xml = CompleteMultipartUploadResult {
        location,
        bucket: bucket.to_string(),
        key: key.to_string(),
        etag: completed.etag.clone(),
    }
    .to_xml();
    state
        .record_usage(ctx, "complete_multipart", 0, completed.data.len() as u64, true)
        .await;
    Ok(xml_response(xml))
}

/// Render ListParts for GET/HEAD requests carrying `?uploadId`.
pub(crate) fn list_parts_response(
    state: &AppState,
    bucket: &str,
    key: &str,
    upload_id: &str,
    marker: u32,
    max_parts: usize,
) -> Result<Response, S3Error> {
    info!("ListParts {}/{} uploadId={}", bucket, key, upload_id);
    let page = state
        .multipart
        .list_parts(upload_id, bucket, key, marker, max_parts)?;
    let result = ListPartsResult {
        bucket: bucket.to_string(),
        key: key.to_string(),
        upload_id: upload_id.to_string(),
        part_number_marker: page.part_number_marker,
        next_part_number_marker: page.next_part_number_marker,
        max_parts,
        is_truncated: page.is_truncated,
        owner_id: page.initiator_id.clone(),
        owner_display_name: page.initiator_display.clone(),
        parts: page.parts,
    };
    Ok(xml_response(result.to_xml()))
}
