//! Per-request access logging.
//!
//! Each S3 request appends one entry to the backend's request log under
//! an object named `YYYY-MM-DD-<bucket_id>-<bucket>`; `log list/show/rm`
//! on the admin CLI read these back.

use crate::api::auth::AuthContext;
use crate::api::handlers::AppState;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, Method, Request};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::storage::LogEntry;

/// Short op label for the access log and usage categories.
fn op_name(method: &Method, has_bucket: bool, has_key: bool) -> &'static str {
    match (method.as_str(), has_bucket, has_key) {
        ("GET", false, _) => "list_buckets",
        ("GET", true, false) => "list_bucket",
        ("GET", true, true) => "get_obj",
        ("HEAD", true, false) => "stat_bucket",
        ("HEAD", true, true) => "stat_obj",
        ("PUT", true, false) => "create_bucket",
        ("PUT", true, true) => "put_obj",
        ("POST", true, false) => "post_obj",
        ("POST", true, true) => "post_obj",
        ("DELETE", true, false) => "delete_bucket",
        ("DELETE", true, true) => "delete_obj",
        _ => "unknown",
    }
}

fn header_u64(headers: &axum::http::HeaderMap, name: header::HeaderName) -> u64 {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn header_string(headers: &axum::http::HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Middleware appending one access-log entry per S3 request.
/// Runs inside the authenticator so the bound identity is visible.
pub async fn request_log_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if path == "/health" || path == "/auth" || path.starts_with("/admin/") {
        return next.run(request).await;
    }

    let started = Instant::now();
    let method = request.method().clone();
    let uri = format!("{} {}", method, request.uri());
    let mut segments = path.trim_start_matches('/').splitn(2, '/');
    let bucket = segments.next().unwrap_or("").to_string();
    let key = segments.next().unwrap_or("").to_string();

    let user = request
        .extensions()
        .get::<AuthContext>()
        .map(|c| c.uid_str().to_string())
        .unwrap_or_else(|| "anonymous".to_string());
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.to_string())
        .unwrap_or_default();
    let bytes_received = header_u64(request.headers(), header::CONTENT_LENGTH);
    let user_agent = header_string(request.headers(), header::USER_AGENT);
    let referrer = header_string(request.headers(), header::REFERER);

    let response = next.run(request).await;

    if bucket.is_empty() {
        return response;
    }

    let status = response.status();
    let bytes_sent = header_u64(response.headers(), header::CONTENT_LENGTH);
    let op = op_name(&method, true, !key.is_empty());
    let total_time_us = started.elapsed().as_micros() as u64;

    let state = state.clone();
    tokio::spawn(async move {
        // a request against an unknown bucket still logs, without an id
        let (bucket_id, bucket_owner) = match state.backend.bucket_info(&bucket).await {
            Ok(info) => (info.bucket_id, info.owner),
            Err(_) => (String::new(), String::new()),
        };
        let now = Utc::now();
        let entry = LogEntry {
            bucket: bucket.clone(),
            bucket_id: bucket_id.clone(),
            bucket_owner,
            time: now,
            remote_addr,
            user,
            op: op.to_string(),
            uri,
            http_status: status.as_u16().to_string(),
            error_code: if status.is_success() {
                String::new()
            } else {
                status.canonical_reason().unwrap_or("").to_string()
            },
            bytes_sent,
            bytes_received,
            obj_size: bytes_sent.max(bytes_received),
            total_time_us,
            user_agent,
            referrer,
        };
        let name = format!("{}-{}-{}", now.format("%Y-%m-%d"), bucket_id, bucket);
        if let Err(e) = state.backend.append_log(&name, &entry).await {
            debug!("Failed to append access log {}: {}", name, e);
        }
    });

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_names() {
        assert_eq!(op_name(&Method::GET, false, false), "list_buckets");
        assert_eq!(op_name(&Method::GET, true, false), "list_bucket");
        assert_eq!(op_name(&Method::GET, true, true), "get_obj");
        assert_eq!(op_name(&Method::PUT, true, true), "put_obj");
        assert_eq!(op_name(&Method::DELETE, true, false), "delete_bucket");
    }
}
