//! HTTP dispatch: maps the S3 wire surface onto the store, the multipart
//! manager and the listing engine, and serializes results to XML.

use axum::{
    body::{Body, Bytes},
    extract::{Path as AxumPath, Query, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::info;

use crate::error::S3Error;
use crate::list;
use crate::store::{resource, ByteStream};
use crate::xml::{
    CompleteMultipartUpload, CompleteMultipartUploadResult, InitiateMultipartUploadResult,
    ListBucketResult, ObjectSummary,
};
use crate::AppState;

/// Query parameters the object routes care about.
#[derive(Debug, Default, Deserialize)]
pub struct ObjectQuery {
    /// Bare `?uploads` marker on POST.
    pub uploads: Option<String>,
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
    #[serde(rename = "partNumber")]
    pub part_number: Option<String>,
    pub prefix: Option<String>,
}

fn xml_response(xml: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        xml,
    )
        .into_response()
}

fn body_stream(req: Request) -> ByteStream {
    Box::pin(
        req.into_body()
            .into_data_stream()
            .map(|chunk| chunk.map_err(anyhow::Error::from)),
    )
}

fn parse_part_number(raw: &str, resource: &str) -> Result<u32, S3Error> {
    match raw.parse::<u32>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(S3Error::InvalidRequest {
            message: "partNumber must be a positive integer".to_string(),
            resource: resource.to_string(),
        }),
    }
}

/// Requests to `/` carry no bucket segment and are rejected before auth
/// ever runs.
pub async fn missing_bucket(method: Method) -> S3Error {
    let message = if method == Method::GET {
        "Bucket name required"
    } else {
        "Bucket name not specified"
    };
    S3Error::MissingBucket(message.to_string())
}

pub async fn method_not_allowed() -> S3Error {
    S3Error::MethodNotAllowed
}

/// Rejects a declared Content-Length beyond the configured cap before the
/// body is read. Streamed bodies without a declared length are bounded by
/// the router's body limit instead.
pub async fn request_size_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, S3Error> {
    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(len) = declared {
        if len > state.max_request_size {
            return Err(S3Error::RequestTooLarge);
        }
    }
    Ok(next.run(request).await)
}

/// `PUT /{bucket}/{*key}` — UploadPart when both `partNumber` and
/// `uploadId` are present, PutObject otherwise.
pub async fn put_object(
    State(state): State<AppState>,
    AxumPath((bucket, key)): AxumPath<(String, String)>,
    Query(query): Query<ObjectQuery>,
    req: Request,
) -> Result<Response, S3Error> {
    match (&query.upload_id, &query.part_number) {
        (Some(upload_id), Some(raw_number)) => {
            let part_number = parse_part_number(raw_number, &resource(&bucket, &key))?;
            info!("UploadPart {bucket}/{key} uploadId={upload_id} partNumber={part_number}");
            let etag = state
                .multipart
                .upload_part(&bucket, &key, upload_id, part_number, body_stream(req))
                .await?;
            Ok((StatusCode::OK, [(header::ETAG, etag)]).into_response())
        }
        _ => {
            info!("PutObject {bucket}/{key}");
            let (etag, size) = state.store.put(&bucket, &key, body_stream(req)).await?;
            info!("stored {bucket}/{key} ({size} bytes, ETag {etag})");
            Ok((StatusCode::OK, [(header::ETAG, etag)]).into_response())
        }
    }
}

/// `POST /{bucket}/{*key}` — `?uploads` initiates a multipart upload,
/// `?uploadId=X` completes one.
pub async fn post_object(
    State(state): State<AppState>,
    AxumPath((bucket, key)): AxumPath<(String, String)>,
    Query(query): Query<ObjectQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    if query.uploads.is_some() {
        info!("CreateMultipartUpload {bucket}/{key}");
        let upload_id = state.multipart.initiate(&bucket, &key).await?;
        let xml = InitiateMultipartUploadResult::new(&bucket, &key, upload_id).to_xml()?;
        return Ok(xml_response(xml));
    }

    if let Some(upload_id) = &query.upload_id {
        info!("CompleteMultipartUpload {bucket}/{key} uploadId={upload_id}");
        let request = CompleteMultipartUpload::from_xml(
            std::str::from_utf8(&body).map_err(|_| S3Error::InvalidRequest {
                message: "Request body is not UTF-8".to_string(),
                resource: resource(&bucket, &key),
            })?,
            &resource(&bucket, &key),
        )?;
        let part_numbers: Vec<u32> = request.parts.iter().map(|p| p.part_number).collect();
        let size = state
            .multipart
            .complete(&bucket, &key, upload_id, &part_numbers)
            .await?;
        info!("completed {bucket}/{key} ({size} bytes)");

        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost");
        let xml = CompleteMultipartUploadResult::new(host, &bucket, &key, upload_id).to_xml()?;
        return Ok(xml_response(xml));
    }

    Err(S3Error::InvalidRequest {
        message: "Invalid POST request: missing uploads or uploadId parameter".to_string(),
        resource: resource(&bucket, &key),
    })
}

/// `GET /{bucket}/{*key}` — streams the object.
pub async fn get_object(
    State(state): State<AppState>,
    AxumPath((bucket, key)): AxumPath<(String, String)>,
) -> Result<Response, S3Error> {
    info!("GetObject {bucket}/{key}");
    let result = state.store.get(&bucket, &key).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, result.content_type)
        .header(header::CONTENT_LENGTH, result.size)
        .body(Body::from_stream(result.stream))
        .map_err(|e| S3Error::Internal(anyhow::anyhow!("build GET response: {e}")))
}

/// `HEAD /{bucket}/{*key}` — metadata only.
pub async fn head_object(
    State(state): State<AppState>,
    AxumPath((bucket, key)): AxumPath<(String, String)>,
) -> Result<Response, S3Error> {
    info!("HeadObject {bucket}/{key}");
    let result = state.store.head(&bucket, &key).await?;

    let last_modified = result
        .last_modified
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, result.content_type)
        .header(header::CONTENT_LENGTH, result.size)
        .header(header::LAST_MODIFIED, last_modified)
        .body(Body::empty())
        .map_err(|e| S3Error::Internal(anyhow::anyhow!("build HEAD response: {e}")))
}

/// `DELETE /{bucket}/{*key}` — AbortMultipartUpload when `uploadId` is
/// present, DeleteObject otherwise. Both answer 204.
pub async fn delete_object(
    State(state): State<AppState>,
    AxumPath((bucket, key)): AxumPath<(String, String)>,
    Query(query): Query<ObjectQuery>,
) -> Result<StatusCode, S3Error> {
    if let Some(upload_id) = &query.upload_id {
        info!("AbortMultipartUpload {bucket}/{key} uploadId={upload_id}");
        state.multipart.abort(&bucket, &key, upload_id).await?;
    } else {
        info!("DeleteObject {bucket}/{key}");
        state.store.delete(&bucket, &key).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /{bucket}` — prefix-filtered listing.
pub async fn list_bucket(
    State(state): State<AppState>,
    AxumPath(bucket): AxumPath<String>,
    Query(query): Query<ObjectQuery>,
) -> Result<Response, S3Error> {
    let prefix = query.prefix.as_deref().unwrap_or("");
    info!("ListObjects {bucket} prefix={prefix:?}");

    let entries = list::list_objects(&state.storage_root, &bucket, prefix).await?;
    let contents = entries
        .into_iter()
        .map(|e| ObjectSummary::new(e.key, e.size, e.last_modified))
        .collect();
    let xml = ListBucketResult::new(&bucket, prefix, contents).to_xml()?;
    Ok(xml_response(xml))
}
