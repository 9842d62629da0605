//! S3 error types and XML responses

use crate::iam::AdminError;
use crate::postform::FormError;
use crate::storage::StorageError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// S3 API errors. Every op runs to completion or fails with exactly one
/// of these kinds; the kind maps to an HTTP status and an S3 error code.
#[derive(Debug, Clone, Error)]
pub enum S3Error {
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    #[error("InvalidBucketName: The specified bucket is not valid.")]
    InvalidBucketName(String),

    #[error("BucketAlreadyExists: The requested bucket name is not available.")]
    BucketAlreadyExists(String),

    #[error("BucketNotEmpty: The bucket you tried to delete is not empty.")]
    BucketNotEmpty(String),

    #[error("NoSuchBucket: The specified bucket does not exist.")]
    NoSuchBucket(String),

    #[error("NoSuchKey: The specified key does not exist.")]
    NoSuchKey(String),

    #[error("NoSuchUpload: The specified multipart upload does not exist.")]
    NoSuchUpload(String),

    #[error("AccessDenied: Access Denied")]
    AccessDenied,

    #[error("SignatureDoesNotMatch: The request signature we calculated does not match the signature you provided.")]
    SignatureDoesNotMatch,

    #[error("RequestTimeTooSkewed: The difference between the request time and the current time is too large.")]
    RequestTimeTooSkewed,

    #[error("MissingContentLength: You must provide the Content-Length HTTP header.")]
    LengthRequired,

    #[error("PreconditionFailed: At least one of the preconditions you specified did not hold.")]
    PreconditionFailed,

    #[error("NotModified")]
    NotModified,

    #[error("InvalidRange: The requested range is not satisfiable.")]
    InvalidRange,

    #[error("InvalidPart: {0}")]
    InvalidPart(String),

    #[error("InvalidPartOrder: The list of parts was not in ascending order.")]
    InvalidPartOrder,

    #[error("MalformedXML: The XML you provided was not well-formed.")]
    MalformedXML,

    #[error("MissingData: Request body is missing required data.")]
    MissingData,

    #[error("InvalidRequest: {0}")]
    InvalidRequest(String),

    #[error("NotImplemented: A header or query you provided implies functionality that is not implemented.")]
    NotImplemented,

    #[error("InternalError: We encountered an internal error. Please try again.")]
    InternalError(String),
}

impl S3Error {
    /// Get the S3 error code
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::InvalidArgument(_) => "InvalidArgument",
            S3Error::InvalidBucketName(_) => "InvalidBucketName",
            S3Error::BucketAlreadyExists(_) => "BucketAlreadyExists",
            S3Error::BucketNotEmpty(_) => "BucketNotEmpty",
            S3Error::NoSuchBucket(_) => "NoSuchBucket",
            S3Error::NoSuchKey(_) => "NoSuchKey",
            S3Error::NoSuchUpload(_) => "NoSuchUpload",
            S3Error::AccessDenied => "AccessDenied",
            S3Error::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            S3Error::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            S3Error::LengthRequired => "MissingContentLength",
            S3Error::PreconditionFailed => "PreconditionFailed",
            S3Error::NotModified => "NotModified",
            S3Error::InvalidRange => "InvalidRange",
            S3Error::InvalidPart(_) => "InvalidPart",
            S3Error::InvalidPartOrder => "InvalidPartOrder",
            S3Error::MalformedXML => "MalformedXML",
            S3Error::MissingData => "MissingData",
            S3Error::InvalidRequest(_) => "InvalidRequest",
            S3Error::NotImplemented => "NotImplemented",
            S3Error::InternalError(_) => "InternalError",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            S3Error::InvalidBucketName(_) => StatusCode::BAD_REQUEST,
            S3Error::BucketAlreadyExists(_) => StatusCode::CONFLICT,
            S3Error::BucketNotEmpty(_) => StatusCode::CONFLICT,
            S3Error::NoSuchBucket(_) => StatusCode::NOT_FOUND,
            S3Error::NoSuchKey(_) => StatusCode::NOT_FOUND,
            S3Error::NoSuchUpload(_) => StatusCode::NOT_FOUND,
            S3Error::AccessDenied => StatusCode::FORBIDDEN,
            S3Error::SignatureDoesNotMatch => StatusCode::FORBIDDEN,
            S3Error::RequestTimeTooSkewed => StatusCode::FORBIDDEN,
            S3Error::LengthRequired => StatusCode::LENGTH_REQUIRED,
            S3Error::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            S3Error::NotModified => StatusCode::NOT_MODIFIED,
            S3Error::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            S3Error::InvalidPart(_) => StatusCode::BAD_REQUEST,
            S3Error::InvalidPartOrder => StatusCode::BAD_REQUEST,
            S3Error::MalformedXML => StatusCode::BAD_REQUEST,
            S3Error::MissingData => StatusCode::BAD_REQUEST,
            S3Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            S3Error::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            S3Error::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Generate XML error response
    pub fn to_xml(&self) -> String {
        let resource = match self {
            S3Error::NoSuchKey(r)
            | S3Error::NoSuchBucket(r)
            | S3Error::NoSuchUpload(r)
            | S3Error::BucketAlreadyExists(r)
            | S3Error::BucketNotEmpty(r)
            | S3Error::InvalidBucketName(r) => r.clone(),
            _ => String::new(),
        };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
    <Code>{}</Code>
    <Message>{}</Message>
    <Resource>{}</Resource>
    <RequestId>{}</RequestId>
</Error>"#,
            self.code(),
            self,
            resource,
            uuid::Uuid::new_v4(),
        )
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // 304 carries no body by definition
        if matches!(self, S3Error::NotModified) {
            return status.into_response();
        }
        (status, [("Content-Type", "application/xml")], self.to_xml()).into_response()
    }
}

impl From<StorageError> for S3Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => S3Error::NoSuchKey(key),
            StorageError::BucketNotFound(bucket) => S3Error::NoSuchBucket(bucket),
            StorageError::BucketNotEmpty(bucket) => S3Error::BucketNotEmpty(bucket),
            StorageError::BucketExists(bucket) => S3Error::BucketAlreadyExists(bucket),
            other => S3Error::InternalError(other.to_string()),
        }
    }
}

impl From<FormError> for S3Error {
    fn from(err: FormError) -> Self {
        match err {
            FormError::MissingData => S3Error::MissingData,
            FormError::NotMultipart | FormError::MissingBoundary => {
                S3Error::InvalidRequest(err.to_string())
            }
            FormError::Malformed(m) => S3Error::InvalidArgument(m),
            FormError::Io(e) => S3Error::InternalError(e.to_string()),
        }
    }
}

impl From<AdminError> for S3Error {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::UserNotFound(_) => S3Error::AccessDenied,
            AdminError::InvalidArgument(m) => S3Error::InvalidArgument(m),
            other => S3Error::InternalError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(S3Error::AccessDenied.code(), "AccessDenied");
        assert_eq!(
            S3Error::SignatureDoesNotMatch.code(),
            "SignatureDoesNotMatch"
        );
        assert_eq!(S3Error::LengthRequired.code(), "MissingContentLength");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            S3Error::BucketAlreadyExists("b".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            S3Error::NoSuchKey("k".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            S3Error::RequestTimeTooSkewed.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            S3Error::InvalidRange.status_code(),
            StatusCode::RANGE_NOT_SATISFIABLE
        );
        assert_eq!(
            S3Error::LengthRequired.status_code(),
            StatusCode::LENGTH_REQUIRED
        );
    }

    #[test]
    fn test_xml_body_shape() {
        let xml = S3Error::NoSuchBucket("mybucket".into()).to_xml();
        assert!(xml.contains("<Code>NoSuchBucket</Code>"));
        assert!(xml.contains("<Resource>mybucket</Resource>"));
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: S3Error = StorageError::BucketNotFound("b".into()).into();
        assert!(matches!(err, S3Error::NoSuchBucket(_)));
        let err: S3Error = StorageError::Other("boom".into()).into();
        assert!(matches!(err, S3Error::InternalError(_)));
    }

    #[test]
    fn test_form_error_conversion() {
        let err: S3Error = FormError::MissingData.into();
        assert!(matches!(err, S3Error::MissingData));
    }
}
