//! S3 wire-format request and response bodies.
//!
//! Serialization is serde through quick-xml, one struct per S3 document
//! shape. All responses carry the standard S3 namespace and the XML
//! declaration the AWS SDKs expect.

use chrono::{DateTime, Utc};
use quick_xml::de::from_str as from_xml_str;
use quick_xml::se::to_string as to_xml_string;
use serde::{Deserialize, Serialize};

use crate::error::S3Error;

pub const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

fn with_decl(body: String) -> String {
    format!("{XML_DECL}{body}")
}

/// `<Error>` document returned with every non-2xx status.
#[derive(Debug, Serialize)]
#[serde(rename = "Error")]
pub struct ErrorBody {
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Resource")]
    pub resource: String,
}

impl ErrorBody {
    pub fn to_xml(&self) -> String {
        // Serialization of three string fields cannot realistically fail;
        // fall back to a bare error document rather than panicking inside
        // a response path.
        with_decl(to_xml_string(self).unwrap_or_else(|_| {
            "<Error><Code>InternalError</Code><Message>Internal error</Message><Resource></Resource></Error>"
                .to_string()
        }))
    }
}

#[derive(Debug, Serialize)]
pub struct ObjectSummary {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "LastModified")]
    pub last_modified: String,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "StorageClass")]
    pub storage_class: &'static str,
}

impl ObjectSummary {
    pub fn new(key: String, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            key,
            last_modified: format_timestamp(last_modified),
            size,
            storage_class: "STANDARD",
        }
    }
}

/// `GET /{bucket}` response document.
#[derive(Debug, Serialize)]
#[serde(rename = "ListBucketResult")]
pub struct ListBucketResult {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Prefix")]
    pub prefix: String,
    #[serde(rename = "MaxKeys")]
    pub max_keys: u32,
    #[serde(rename = "IsTruncated")]
    pub is_truncated: bool,
    #[serde(rename = "Contents")]
    pub contents: Vec<ObjectSummary>,
}

impl ListBucketResult {
    pub fn new(bucket: &str, prefix: &str, contents: Vec<ObjectSummary>) -> Self {
        Self {
            xmlns: S3_XMLNS,
            name: bucket.to_string(),
            prefix: prefix.to_string(),
            max_keys: 1000,
            is_truncated: false,
            contents,
        }
    }

    pub fn to_xml(&self) -> Result<String, S3Error> {
        Ok(with_decl(to_xml_string(self).map_err(anyhow::Error::from)?))
    }
}

/// `POST /{bucket}/{key}?uploads` response document.
#[derive(Debug, Serialize)]
#[serde(rename = "InitiateMultipartUploadResult")]
pub struct InitiateMultipartUploadResult {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "UploadId")]
    pub upload_id: String,
}

impl InitiateMultipartUploadResult {
    pub fn new(bucket: &str, key: &str, upload_id: String) -> Self {
        Self {
            xmlns: S3_XMLNS,
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
        }
    }

    pub fn to_xml(&self) -> Result<String, S3Error> {
        Ok(with_decl(to_xml_string(self).map_err(anyhow::Error::from)?))
    }
}

/// `POST /{bucket}/{key}?uploadId=X` response document.
#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUploadResult")]
pub struct CompleteMultipartUploadResult {
    #[serde(rename = "@xmlns")]
    pub xmlns: &'static str,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "UploadId")]
    pub upload_id: String,
}

impl CompleteMultipartUploadResult {
    pub fn new(host: &str, bucket: &str, key: &str, upload_id: &str) -> Self {
        Self {
            xmlns: S3_XMLNS,
            location: format!("http://{host}/{bucket}/{key}"),
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        }
    }

    pub fn to_xml(&self) -> Result<String, S3Error> {
        Ok(with_decl(to_xml_string(self).map_err(anyhow::Error::from)?))
    }
}

/// `CompleteMultipartUpload` request body: the caller's ordered part list.
#[derive(Debug, Deserialize)]
#[serde(rename = "CompleteMultipartUpload")]
pub struct CompleteMultipartUpload {
    #[serde(rename = "Part", default)]
    pub parts: Vec<CompletedPart>,
}

#[derive(Debug, Deserialize)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag", default)]
    pub etag: String,
}

impl CompleteMultipartUpload {
    pub fn from_xml(body: &str, resource: &str) -> Result<Self, S3Error> {
        from_xml_str(body).map_err(|e| S3Error::InvalidRequest {
            message: format!("Malformed CompleteMultipartUpload body: {e}"),
            resource: resource.to_string(),
        })
    }
}

/// `2026-08-30T12:34:56.000Z`, the timestamp shape used in listings.
fn format_timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
