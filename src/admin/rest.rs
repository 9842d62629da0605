//! Admin REST endpoints under `/admin/bucket`.
//!
//! Every endpoint is gated on the caller's capability set: read-only
//! endpoints need `buckets=read`, mutating ones `buckets=write`. Results
//! render through the Formatter, JSON by default (`format=xml` honored).

use super::bucket as bucket_admin;
use super::AdminOpError;
use crate::api::auth::AuthContext;
use crate::api::errors::S3Error;
use crate::api::handlers::AppState;
use crate::fmt::{self, Formatter};
use crate::iam::perm::{PERM_READ, PERM_WRITE};
use crate::storage::ACL_ATTR;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use std::sync::Arc;
use tracing::{info, instrument};

/// Query parameters shared by the /admin/bucket endpoints.
#[derive(Debug, serde::Deserialize, Default)]
pub struct AdminBucketQuery {
    pub uid: Option<String>,
    pub bucket: Option<String>,
    pub object: Option<String>,
    pub stats: Option<String>,
    pub fix: Option<String>,
    #[serde(rename = "check-objects")]
    pub check_objects: Option<String>,
    #[serde(rename = "purge-objects")]
    pub purge_objects: Option<String>,
    pub policy: Option<String>,
    pub index: Option<String>,
    pub format: Option<String>,
}

fn flag(v: &Option<String>) -> bool {
    matches!(v.as_deref(), Some("") | Some("true") | Some("1") | Some("True"))
}

fn check_caps(ctx: &AuthContext, perm: u32) -> Result<(), S3Error> {
    if ctx.caps.check_cap("buckets", perm) {
        Ok(())
    } else {
        Err(S3Error::AccessDenied)
    }
}

fn formatter_for(query: &AdminBucketQuery) -> Result<(Box<dyn Formatter>, &'static str), S3Error> {
    let format = query.format.as_deref().unwrap_or("json");
    let content_type = match format {
        "xml" => "application/xml",
        _ => "application/json",
    };
    let f = fmt::for_format(format, false)
        .ok_or_else(|| S3Error::InvalidArgument(format!("unrecognized format: {}", format)))?;
    Ok((f, content_type))
}

fn rendered(mut f: Box<dyn Formatter>, content_type: &'static str) -> Response {
    (
        StatusCode::OK,
        [("Content-Type", content_type)],
        fmt::into_string(f.as_mut()),
    )
        .into_response()
}

impl From<AdminOpError> for S3Error {
    fn from(err: AdminOpError) -> Self {
        match err {
            AdminOpError::Identity(e) => e.into(),
            AdminOpError::Storage(e) => e.into(),
            AdminOpError::InvalidArgument(m) => S3Error::InvalidArgument(m),
        }
    }
}

/// GET /admin/bucket — bucket info/stats; `?policy` returns the ACL
/// document, `?index` runs an index check.
#[instrument(skip(state, ctx, query), fields(user = %ctx.uid_str()))]
pub async fn admin_bucket_get(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<AdminBucketQuery>,
) -> Result<Response, S3Error> {
    if query.policy.is_some() {
        return get_policy(&state, &ctx, &query).await;
    }
    if query.index.is_some() {
        // index repair mutates; gate on write
        check_caps(&ctx, PERM_WRITE)?;
        let bucket = require(&query.bucket, "bucket")?;
        info!("admin: check index {}", bucket);
        let (mut f, content_type) = formatter_for(&query)?;
        bucket_admin::check_index(state.backend.as_ref(), bucket, flag(&query.fix), f.as_mut())
            .await?;
        return Ok(rendered(f, content_type));
    }

    check_caps(&ctx, PERM_READ)?;
    let (mut f, content_type) = formatter_for(&query)?;
    match (&query.bucket, &query.uid) {
        (Some(bucket), _) => {
            info!("admin: bucket info {}", bucket);
            if flag(&query.stats) {
                bucket_admin::dump_stats(state.backend.as_ref(), bucket, f.as_mut()).await?;
            } else {
                let info = state.backend.bucket_info(bucket).await?;
                f.open_object_section("bucket_info");
                f.dump_string("bucket", &info.name);
                f.dump_string("pool", &info.pool);
                f.dump_string("id", &info.bucket_id);
                f.dump_string("marker", &info.marker);
                f.dump_string("owner", &info.owner);
                f.close_section();
            }
        }
        (None, Some(uid)) => {
            info!("admin: bucket list for {}", uid);
            f.open_array_section("buckets");
            for bucket in state.backend.user_buckets(uid).await? {
                if flag(&query.stats) {
                    bucket_admin::dump_stats(state.backend.as_ref(), &bucket, f.as_mut()).await?;
                } else {
                    f.dump_string("bucket", &bucket);
                }
            }
            f.close_section();
        }
        (None, None) => {
            info!("admin: bucket list (all)");
            f.open_array_section("buckets");
            for bucket in state.backend.list_bucket_names().await? {
                f.dump_string("bucket", &bucket);
            }
            f.close_section();
        }
    }
    Ok(rendered(f, content_type))
}

async fn get_policy(
    state: &AppState,
    ctx: &AuthContext,
    query: &AdminBucketQuery,
) -> Result<Response, S3Error> {
    check_caps(ctx, PERM_READ)?;
    let bucket = require(&query.bucket, "bucket")?;
    info!("admin: get policy {} {:?}", bucket, query.object);
    let data = state
        .backend
        .get_attr(bucket, query.object.as_deref().filter(|o| !o.is_empty()), ACL_ATTR)
        .await?;
    let policy = crate::acl::AclPolicy::decode(&data)
        .ok_or_else(|| S3Error::InternalError("undecodable acl attribute".to_string()))?;
    Ok((
        StatusCode::OK,
        [("Content-Type", "application/xml")],
        policy.to_xml(),
    )
        .into_response())
}

/// PUT /admin/bucket — link a bucket to a user.
#[instrument(skip(state, ctx, query), fields(user = %ctx.uid_str()))]
pub async fn admin_bucket_put(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<AdminBucketQuery>,
) -> Result<Response, S3Error> {
    check_caps(&ctx, PERM_WRITE)?;
    let uid = require(&query.uid, "uid")?;
    let bucket = require(&query.bucket, "bucket")?;
    info!("admin: link {} -> {}", bucket, uid);
    bucket_admin::link(state.backend.as_ref(), &state.users, uid, bucket).await?;
    Ok(StatusCode::OK.into_response())
}

/// POST /admin/bucket — unlink a bucket from a user.
#[instrument(skip(state, ctx, query), fields(user = %ctx.uid_str()))]
pub async fn admin_bucket_post(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<AdminBucketQuery>,
) -> Result<Response, S3Error> {
    check_caps(&ctx, PERM_WRITE)?;
    let uid = require(&query.uid, "uid")?;
    let bucket = require(&query.bucket, "bucket")?;
    info!("admin: unlink {} from {}", bucket, uid);
    bucket_admin::unlink(state.backend.as_ref(), uid, bucket).await?;
    Ok(StatusCode::OK.into_response())
}

/// DELETE /admin/bucket — remove a bucket (`purge-objects` to empty it
/// first), or a single object with `?object=`.
#[instrument(skip(state, ctx, query), fields(user = %ctx.uid_str()))]
pub async fn admin_bucket_delete(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<AdminBucketQuery>,
) -> Result<Response, S3Error> {
    check_caps(&ctx, PERM_WRITE)?;
    let bucket = require(&query.bucket, "bucket")?;
    match query.object.as_deref().filter(|o| !o.is_empty()) {
        Some(object) => {
            info!("admin: remove object {}/{}", bucket, object);
            bucket_admin::remove_object(state.backend.as_ref(), bucket, object).await?;
        }
        None => {
            info!("admin: remove bucket {}", bucket);
            bucket_admin::remove(state.backend.as_ref(), bucket, flag(&query.purge_objects))
                .await?;
        }
    }
    Ok(StatusCode::OK.into_response())
}

fn require<'a>(field: &'a Option<String>, what: &str) -> Result<&'a str, S3Error> {
    field
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| S3Error::InvalidArgument(format!("{} was not specified", what)))
}
