//! POST object: browser form uploads.
//!
//! The body is multipart/form-data read through the streaming form
//! parser; the `file` part is the payload, the other parts are request
//! parameters (`key`, `acl`, `Content-Type`, `success_action_*`, and
//! user metadata).

use super::{bucket_acl, require_access, AppState, AMZ_META_PREFIX};
use crate::acl::AclPolicy;
use crate::api::auth::AuthContext;
use crate::api::errors::S3Error;
use crate::dates::http_date;
use crate::iam::perm::PERM_WRITE;
use crate::postform::parse_post_form;
use crate::storage::{ObjectMeta, ACL_ATTR};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::TryStreamExt;
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::io::StreamReader;
use tracing::{info, instrument};

#[instrument(skip(state, ctx, request), fields(user = %ctx.uid_str()))]
pub async fn post_object(
    state: Arc<AppState>,
    ctx: AuthContext,
    bucket: String,
    request: Request<Body>,
) -> Result<Response, S3Error> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body_stream = request
        .into_body()
        .into_data_stream()
        .map_err(|e| std::io::Error::other(e.to_string()));
    let reader = StreamReader::new(body_stream);
    let form = parse_post_form(reader, &content_type).await?;

    let key = form
        .key()
        .ok_or_else(|| S3Error::InvalidArgument("no object key supplied".to_string()))?
        .to_string();

    info!("POST object {}/{} ({} bytes)", bucket, key, form.file.len());

    let bucket_policy = bucket_acl(&state, &bucket).await?;
    require_access(&bucket_policy, &ctx, PERM_WRITE)?;

    let canned = form.params.get("acl").map(|s| s.as_str()).unwrap_or("");
    let object_policy = AclPolicy::canned(ctx.uid_str(), &ctx.display_name, canned)
        .ok_or_else(|| S3Error::InvalidArgument(format!("invalid canned acl: {}", canned)))?;

    let etag = format!("\"{}\"", hex::encode(Md5::digest(&form.file)));
    let mut attrs = BTreeMap::new();
    attrs.insert(ACL_ATTR.to_string(), object_policy.encode());
    for (name, value) in &form.params {
        if name.starts_with(AMZ_META_PREFIX) {
            attrs.insert(name.clone(), value.clone().into_bytes());
        }
    }

    let content_type = form
        .params
        .get("Content-Type")
        .cloned()
        .or_else(|| form.file_content_type.clone());
    let meta = ObjectMeta {
        etag: etag.clone(),
        size: form.file.len() as u64,
        mtime: Utc::now(),
        content_type,
        attrs,
    };
    state
        .backend
        .put_object(&bucket, &key, &form.file, &meta)
        .await?;
    state
        .record_usage(&ctx, "post_obj", 0, form.file.len() as u64, true)
        .await;

    // success_action_redirect wins over success_action_status
    if let Some(redirect) = form.params.get("success_action_redirect") {
        if !redirect.is_empty() {
            return Ok((
                StatusCode::SEE_OTHER,
                [(header::LOCATION, redirect.clone()), (header::ETAG, etag)],
            )
                .into_response());
        }
    }

    let status = form
        .params
        .get("success_action_status")
        .and_then(|s| s.parse::<u16>().ok())
        .and_then(|s| StatusCode::from_u16(s).ok())
        .filter(|s| matches!(s.as_u16(), 200 | 201 | 204))
        .unwrap_or(StatusCode::OK);

    Ok((
        status,
        [
            (header::ETAG, etag),
            (header::DATE, http_date(&Utc::now())),
            (header::CONTENT_TYPE, "text/plain".to_string()),
            (
                header::LOCATION,
                format!("/{}/{}", bucket, key),
            ),
        ],
        "",
    )
        .into_response())
}
