//! Virtual-host-style addressing.
//!
//! A request for `Host: mybucket.gw.example.com` with path `/key` is the
//! same operation as `/mybucket/key` in path style. The rewrite runs as a
//! `MapRequest` layer wrapped around the whole router, so routing sees
//! the path-style URI.

use axum::body::Body;
use axum::http::uri::Uri;
use axum::http::Request;
use tracing::debug;

/// Extract the bucket from a `Host` header value given the configured
/// base domain. Ports are ignored; a host equal to the suffix itself
/// (or unrelated to it) yields no bucket.
pub fn bucket_from_host(host: &str, suffix: &str) -> Option<String> {
    if suffix.is_empty() {
        return None;
    }
    let host = host.split(':').next().unwrap_or(host);
    let bucket = host.strip_suffix(suffix)?.strip_suffix('.')?;
    if bucket.is_empty() {
        return None;
    }
    Some(bucket.to_string())
}

/// Rewrite a virtual-host request into path style.
pub fn rewrite_host_style(mut request: Request<Body>, suffix: &str) -> Request<Body> {
    let host = match request
        .headers()
        .get("host")
        .and_then(|v| v.to_str().ok())
    {
        Some(h) => h.to_string(),
        None => return request,
    };
    let bucket = match bucket_from_host(&host, suffix) {
        Some(b) => b,
        None => return request,
    };

    let uri = request.uri();
    let path = uri.path();
    let new_path_and_query = match uri.query() {
        Some(q) => format!("/{}{}?{}", bucket, path, q),
        None => format!("/{}{}", bucket, path),
    };

    let mut parts = uri.clone().into_parts();
    match new_path_and_query.parse() {
        Ok(pq) => parts.path_and_query = Some(pq),
        Err(_) => return request,
    }
    if let Ok(new_uri) = Uri::from_parts(parts) {
        debug!("Rewrote virtual-host request for {} to {}", host, new_uri);
        *request.uri_mut() = new_uri;
    }
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_from_host() {
        assert_eq!(
            bucket_from_host("photos.gw.example.com", "gw.example.com"),
            Some("photos".to_string())
        );
        assert_eq!(
            bucket_from_host("photos.gw.example.com:7480", "gw.example.com"),
            Some("photos".to_string())
        );
        assert_eq!(bucket_from_host("gw.example.com", "gw.example.com"), None);
        assert_eq!(bucket_from_host("elsewhere.net", "gw.example.com"), None);
        assert_eq!(bucket_from_host("photos.example.com", ""), None);
    }

    #[test]
    fn test_rewrite_prepends_bucket() {
        let req = Request::builder()
            .uri("/key/name.txt?acl")
            .header("host", "photos.gw.example.com")
            .body(Body::empty())
            .unwrap();
        let req = rewrite_host_style(req, "gw.example.com");
        assert_eq!(req.uri().path(), "/photos/key/name.txt");
        assert_eq!(req.uri().query(), Some("acl"));
    }

    #[test]
    fn test_rewrite_leaves_path_style_alone() {
        let req = Request::builder()
            .uri("/bucket/key")
            .header("host", "gw.example.com")
            .body(Body::empty())
            .unwrap();
        let req = rewrite_host_style(req, "gw.example.com");
        assert_eq!(req.uri().path(), "/bucket/key");
    }

    #[test]
    fn test_rewrite_root_path() {
        let req = Request::builder()
            .uri("/")
            .header("host", "photos.gw.example.com")
            .body(Body::empty())
            .unwrap();
        let req = rewrite_host_style(req, "gw.example.com");
        assert_eq!(req.uri().path(), "/photos/");
    }
}
