use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::xml::ErrorBody;

/// Every failure a request can surface, mapped onto the S3 error wire shape.
///
/// Variants that carry a `String` carry the resource path (`/{bucket}/{key}`)
/// reported back to the caller; nothing else about the filesystem leaks out.
#[derive(Debug)]
pub enum S3Error {
    AccessDenied,
    MissingBucket(String),
    InvalidKey(String),
    InvalidRequest { message: String, resource: String },
    NoSuchKey(String),
    NoSuchUpload(String),
    MethodNotAllowed,
    RequestTooLarge,
    /// A part referenced at completion time was never uploaded.
    InvalidPart { part_number: u32, resource: String },
    Internal(anyhow::Error),
}

impl S3Error {
    pub fn status(&self) -> StatusCode {
        match self {
            S3Error::AccessDenied => StatusCode::UNAUTHORIZED,
            S3Error::MissingBucket(_)
            | S3Error::InvalidKey(_)
            | S3Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            S3Error::NoSuchKey(_) | S3Error::NoSuchUpload(_) => StatusCode::NOT_FOUND,
            S3Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            S3Error::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            // A missing part surfaces as a server-side failure, matching
            // what existing clients of this API expect.
            S3Error::InvalidPart { .. } | S3Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            S3Error::AccessDenied => "AccessDenied",
            S3Error::MissingBucket(_) => "MissingBucket",
            S3Error::InvalidKey(_) => "InvalidKey",
            S3Error::InvalidRequest { .. } => "InvalidRequest",
            S3Error::NoSuchKey(_) => "NoSuchKey",
            S3Error::NoSuchUpload(_) => "NoSuchUpload",
            S3Error::MethodNotAllowed => "MethodNotAllowed",
            S3Error::RequestTooLarge => "RequestTooLarge",
            S3Error::InvalidPart { .. } => "InvalidPart",
            S3Error::Internal(_) => "InternalError",
        }
    }

    fn message(&self) -> String {
        match self {
            S3Error::AccessDenied => "Access denied".to_string(),
            S3Error::MissingBucket(msg) => msg.clone(),
            S3Error::InvalidKey(_) => "Key escapes the bucket root or uses a reserved name".to_string(),
            S3Error::InvalidRequest { message, .. } => message.clone(),
            S3Error::NoSuchKey(_) => "Object not found".to_string(),
            S3Error::NoSuchUpload(_) => "Upload ID not found".to_string(),
            S3Error::MethodNotAllowed => "Method not allowed".to_string(),
            S3Error::RequestTooLarge => "Request too large".to_string(),
            S3Error::InvalidPart { part_number, .. } => {
                format!("Part file missing: {part_number}")
            }
            S3Error::Internal(_) => "Internal error".to_string(),
        }
    }

    fn resource(&self) -> String {
        match self {
            S3Error::MissingBucket(_) => "/".to_string(),
            S3Error::InvalidKey(r)
            | S3Error::NoSuchKey(r)
            | S3Error::NoSuchUpload(r)
            | S3Error::InvalidRequest { resource: r, .. }
            | S3Error::InvalidPart { resource: r, .. } => r.clone(),
            _ => String::new(),
        }
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        if let S3Error::Internal(ref e) = self {
            error!("internal error: {e:#}");
        }

        let body = ErrorBody {
            code: self.code().to_string(),
            message: self.message(),
            resource: self.resource(),
        };
        let xml = body.to_xml();
        (
            self.status(),
            [(header::CONTENT_TYPE, "application/xml")],
            xml,
        )
            .into_response()
    }
}

impl From<std::io::Error> for S3Error {
    fn from(e: std::io::Error) -> Self {
        S3Error::Internal(e.into())
    }
}

impl From<anyhow::Error> for S3Error {
    fn from(e: anyhow::Error) -> Self {
        S3Error::Internal(e)
    }
}
