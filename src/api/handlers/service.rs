//! Service-level handlers: ListBuckets and the auth probe.

use super::{xml_response, AppState};
use crate::api::auth::AuthContext;
use crate::api::errors::S3Error;
use crate::api::xml::{BucketEntry, ListBucketsResult};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use std::sync::Arc;
use tracing::{info, instrument};

/// GET / — list the caller's buckets.
/// An anonymous caller owns nothing and receives an empty set.
#[instrument(skip(state, ctx), fields(user = %ctx.uid_str()))]
pub async fn list_buckets(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Response, S3Error> {
    info!("LIST buckets for {}", ctx.uid_str());

    let mut buckets = Vec::new();
    if let Some(uid) = &ctx.uid {
        for name in state.backend.user_buckets(uid).await? {
            match state.backend.bucket_info(&name).await {
                Ok(info) => buckets.push(BucketEntry {
                    name: info.name,
                    creation_date: info.creation_time,
                }),
                // an unlinked-but-listed bucket is not this op's problem
                Err(_) => continue,
            }
        }
    }

    let result = ListBucketsResult {
        owner_id: ctx.uid_str().to_string(),
        owner_display_name: ctx.display_name.clone(),
        buckets,
    };
    state.record_usage(&ctx, "list_buckets", 0, 0, true).await;
    Ok(xml_response(result.to_xml()))
}

/// GET /auth — signature probe: echoes the authenticated identity.
/// Anonymous callers are rejected; the authenticator already verified
/// everyone else.
pub async fn auth_check(
    Extension(ctx): Extension<AuthContext>,
) -> Result<Response, S3Error> {
    match &ctx.uid {
        Some(uid) => Ok(Json(serde_json::json!({
            "user_id": uid,
            "display_name": ctx.display_name,
        }))
        .into_response()),
        None => Err(S3Error::AccessDenied),
    }
}

/// GET /health — liveness probe, no auth.
pub async fn health_check() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}
