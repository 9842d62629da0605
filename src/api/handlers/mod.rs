//! S3 API request handlers
//!
//! Split into submodules by target:
//! - `service` — ListBuckets and the auth probe endpoint
//! - `bucket` — bucket CRUD, listing, ACLs, multi-object delete
//! - `object` — GET, HEAD, PUT (with copy detection), DELETE
//! - `multipart` — multipart upload lifecycle
//! - `post_object` — browser form uploads (POST with multipart/form-data)

mod bucket;
mod multipart;
mod object;
mod post_object;
mod service;

use crate::acl::AclPolicy;
use crate::api::auth::AuthContext;
use crate::api::errors::S3Error;
use crate::config::Config;
use crate::iam::UserDb;
use crate::multipart::MultipartStore;
use crate::storage::{ObjectMeta, StorageBackend, StorageError, UsageEntry, UsageKey, ACL_ATTR};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub use bucket::{bucket_delete, bucket_get, bucket_head, bucket_post, bucket_put};
pub use multipart::object_post;
pub use object::{object_delete, object_get, object_head, object_put};
pub use service::{auth_check, health_check, list_buckets};

/// Prefix carried by user-defined metadata headers and attributes.
pub const AMZ_META_PREFIX: &str = "x-amz-meta-";

/// Application state shared across handlers
pub struct AppState {
    pub backend: Box<dyn StorageBackend>,
    pub users: Arc<UserDb>,
    pub multipart: Arc<MultipartStore>,
    pub config: Config,
}

impl AppState {
    /// Best-effort usage accounting; failures are logged, never surfaced.
    pub async fn record_usage(
        &self,
        ctx: &AuthContext,
        category: &str,
        bytes_sent: u64,
        bytes_received: u64,
        success: bool,
    ) {
        let key = UsageKey {
            user: ctx.uid_str().to_string(),
            epoch: hour_epoch(),
            category: category.to_string(),
        };
        let entry = UsageEntry {
            bytes_sent,
            bytes_received,
            ops: 1,
            successful_ops: u64::from(success),
        };
        if let Err(e) = self.backend.record_usage(&key, &entry).await {
            warn!("Failed to record usage for {}: {}", key.user, e);
        }
    }
}

/// Usage epochs are bucketed by the hour.
pub fn hour_epoch() -> u64 {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    now - now % 3600
}

/// Reject names that are empty, start with a non-alphanumeric, contain
/// chars outside `[A-Za-z0-9._-]`, or look like an IPv4 address.
pub fn validate_bucket_name(bucket: &str) -> Result<(), S3Error> {
    let bytes = bucket.as_bytes();
    match bytes.first() {
        None => return Err(S3Error::InvalidBucketName(bucket.to_string())),
        Some(c) if !c.is_ascii_alphanumeric() => {
            return Err(S3Error::InvalidBucketName(bucket.to_string()))
        }
        _ => {}
    }
    for &c in bytes {
        if !(c.is_ascii_alphanumeric() || c == b'.' || c == b'_' || c == b'-') {
            return Err(S3Error::InvalidBucketName(bucket.to_string()));
        }
    }
    if looks_like_ip_address(bucket) {
        return Err(S3Error::InvalidBucketName(bucket.to_string()));
    }
    Ok(())
}

/// Dotted-quad shapes (`10.0.0.1`) are reserved: exactly four runs of
/// digits separated by single dots.
fn looks_like_ip_address(bucket: &str) -> bool {
    let mut num_periods = 0;
    let mut expect_period = false;
    for c in bucket.chars() {
        if c == '.' {
            if !expect_period {
                return false;
            }
            num_periods += 1;
            if num_periods > 3 {
                return false;
            }
            expect_period = false;
        } else if c.is_ascii_digit() {
            expect_period = true;
        } else {
            return false;
        }
    }
    num_periods == 3 && expect_period
}

/// Build an XML response with correct Content-Type header.
pub(crate) fn xml_response(xml: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        [("Content-Type", "application/xml")],
        xml.into(),
    )
        .into_response()
}

/// Extract Content-Type header as an owned String.
pub(crate) fn extract_content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Parse request body as UTF-8, mapping errors to MalformedXML.
pub(crate) fn body_to_utf8(body: &axum::body::Bytes) -> Result<&str, S3Error> {
    std::str::from_utf8(body).map_err(|_| S3Error::MalformedXML)
}

/// Extract user-provided x-amz-meta-* headers.
pub(crate) fn extract_user_metadata(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let suffix = name.as_str().strip_prefix(AMZ_META_PREFIX)?;
            let v = value.to_str().ok()?;
            Some((suffix.to_string(), v.to_string()))
        })
        .collect()
}

/// Canned ACL from the request headers, defaulting to private.
pub(crate) fn canned_policy_from_headers(
    ctx: &AuthContext,
    headers: &HeaderMap,
) -> Result<AclPolicy, S3Error> {
    let canned = headers
        .get("x-amz-acl")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    AclPolicy::canned(ctx.uid_str(), &ctx.display_name, canned)
        .ok_or_else(|| S3Error::InvalidArgument(format!("invalid canned acl: {}", canned)))
}

/// Load a bucket's ACL; a bucket with no stored policy falls back to a
/// private policy owned by the bucket's recorded owner.
pub(crate) async fn bucket_acl(state: &AppState, bucket: &str) -> Result<AclPolicy, S3Error> {
    match state.backend.get_attr(bucket, None, ACL_ATTR).await {
        Ok(data) => AclPolicy::decode(&data)
            .ok_or_else(|| S3Error::InternalError("undecodable bucket acl".to_string())),
        Err(StorageError::AttrNotFound(_)) => {
            let info = state.backend.bucket_info(bucket).await?;
            Ok(AclPolicy::private(&info.owner, &info.owner))
        }
        Err(e) => Err(e.into()),
    }
}

/// An object's ACL from its attributes, falling back to the bucket ACL's
/// owner when the object carries none.
pub(crate) async fn object_acl(
    state: &AppState,
    bucket: &str,
    meta: &ObjectMeta,
) -> Result<AclPolicy, S3Error> {
    if let Some(data) = meta.attrs.get(ACL_ATTR) {
        if let Some(policy) = AclPolicy::decode(data) {
            return Ok(policy);
        }
    }
    bucket_acl(state, bucket).await
}

/// ACL gate: the effective permission is the grant intersected with the
/// session mask.
pub(crate) fn require_access(
    policy: &AclPolicy,
    ctx: &AuthContext,
    needed: u32,
) -> Result<(), S3Error> {
    if policy.verify(ctx.uid.as_deref(), ctx.perm_mask, needed) {
        Ok(())
    } else {
        Err(S3Error::AccessDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_bucket_name_accepts_normal_names() {
        for name in ["bucket", "my-bucket", "b", "photos.2011", "a_b", "0start"] {
            assert!(validate_bucket_name(name).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_validate_bucket_name_rejections() {
        for name in ["", "-leading", ".leading", "_leading", "has space", "has/slash", "ünïcode"] {
            assert!(validate_bucket_name(name).is_err(), "{:?}", name);
        }
    }

    #[test]
    fn test_validate_bucket_name_rejects_ip_shapes() {
        for name in ["10.0.0.1", "192.168.5.4", "1.2.3.4"] {
            assert!(validate_bucket_name(name).is_err(), "{}", name);
        }
        // dotted but not IPv4-shaped names are fine
        for name in ["1.2.3", "1.2.3.4.5", "10.0.0.x", "a.b.c.d"] {
            assert!(validate_bucket_name(name).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_extract_user_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-meta-color", "blue".parse().unwrap());
        headers.insert("x-amz-acl", "private".parse().unwrap());
        headers.insert("content-type", "text/plain".parse().unwrap());
        let meta = extract_user_metadata(&headers);
        assert_eq!(meta.len(), 1);
        assert_eq!(meta["color"], "blue");
    }

    #[test]
    fn test_hour_epoch_is_aligned() {
        assert_eq!(hour_epoch() % 3600, 0);
    }

    mod bucket_name_properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // any accepted name must satisfy the documented shape
            #[test]
            fn accepted_names_match_charset(name in "\\PC{0,24}") {
                if validate_bucket_name(&name).is_ok() {
                    let bytes = name.as_bytes();
                    prop_assert!(bytes[0].is_ascii_alphanumeric());
                    prop_assert!(bytes.iter().all(|&c| c.is_ascii_alphanumeric()
                        || c == b'.' || c == b'_' || c == b'-'));
                    prop_assert!(!super::super::looks_like_ip_address(&name));
                }
            }

            // names drawn from the legal alphabet with a legal lead are
            // accepted unless IPv4-shaped
            #[test]
            fn legal_names_accepted(name in "[a-zA-Z0-9][a-zA-Z0-9._-]{0,23}") {
                let ip_shaped = super::super::looks_like_ip_address(&name);
                prop_assert_eq!(validate_bucket_name(&name).is_ok(), !ip_shaped);
            }
        }
    }
}
