//! End-to-end tests against the full router, request in / response out.

use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use pail::multipart::MultipartManager;
use pail::store::LocalStore;
use pail::{build_router, AppState};

const AUTH: &str = "AWS4-HMAC-SHA256 Credential=testkey/20260830/us-east-1/s3/aws4_request, \
                    SignedHeaders=host, Signature=unverified";

fn gateway() -> (Router, TempDir) {
    let dir = TempDir::new().unwrap();
    let state = AppState {
        storage_root: dir.path().to_path_buf(),
        store: Arc::new(LocalStore::new(dir.path())),
        multipart: Arc::new(MultipartManager::new(dir.path())),
        allowed_access_keys: Arc::new(HashSet::from(["testkey".to_string()])),
        max_request_size: 1024 * 1024,
    };
    (build_router(state), dir)
}

fn request(method: &str, uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, AUTH)
        .body(body.into())
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn extract_tag(xml: &str, tag: &str) -> String {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open).unwrap() + open.len();
    let end = xml.find(&close).unwrap();
    xml[start..end].to_string()
}

#[tokio::test]
async fn put_get_head_round_trip() {
    let (app, _dir) = gateway();

    let put = app
        .clone()
        .oneshot(request("PUT", "/photos/pets/cat.txt", "meow"))
        .await
        .unwrap();
    assert_eq!(put.status(), StatusCode::OK);
    assert!(put.headers().contains_key(header::ETAG));

    let get = app
        .clone()
        .oneshot(request("GET", "/photos/pets/cat.txt", Body::empty()))
        .await
        .unwrap();
    assert_eq!(get.status(), StatusCode::OK);
    assert_eq!(
        get.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain"
    );
    assert_eq!(get.headers().get(header::CONTENT_LENGTH).unwrap(), "4");
    assert_eq!(body_string(get).await, "meow");

    let head = app
        .clone()
        .oneshot(request("HEAD", "/photos/pets/cat.txt", Body::empty()))
        .await
        .unwrap();
    assert_eq!(head.status(), StatusCode::OK);
    assert_eq!(head.headers().get(header::CONTENT_LENGTH).unwrap(), "4");
    assert!(head.headers().contains_key(header::LAST_MODIFIED));
    assert!(body_string(head).await.is_empty());
}

#[tokio::test]
async fn get_missing_object_is_xml_404() {
    let (app, _dir) = gateway();
    let response = app
        .oneshot(request("GET", "/b/absent", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_string(response).await;
    assert!(body.contains("<Code>NoSuchKey</Code>"));
    assert!(body.contains("<Resource>/b/absent</Resource>"));
}

#[tokio::test]
async fn delete_is_idempotent_over_http() {
    let (app, _dir) = gateway();

    app.clone()
        .oneshot(request("PUT", "/b/k", "data"))
        .await
        .unwrap();
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(request("DELETE", "/b/k", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}

#[tokio::test]
async fn auth_gate_rejects_before_any_side_effect() {
    let (app, dir) = gateway();

    // No Authorization header.
    let bare = Request::builder()
        .method("PUT")
        .uri("/b/k")
        .body(Body::from("data"))
        .unwrap();
    let response = app.clone().oneshot(bare).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(body_string(response).await.contains("<Code>AccessDenied</Code>"));

    // Credential not in the allow-list.
    let stranger = Request::builder()
        .method("PUT")
        .uri("/b/k")
        .header(
            header::AUTHORIZATION,
            "AWS4-HMAC-SHA256 Credential=stranger/20260830/us-east-1/s3/aws4_request",
        )
        .body(Body::from("data"))
        .unwrap();
    let response = app.clone().oneshot(stranger).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Nothing was written under the storage root.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn bucketless_requests_are_400() {
    let (app, _dir) = gateway();

    let get = app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(get.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(get).await.contains("<Code>MissingBucket</Code>"));

    let put = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(put.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_declared_length_is_413() {
    let (app, _dir) = gateway();
    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/b/k")
                .header(header::AUTHORIZATION, AUTH)
                .header(header::CONTENT_LENGTH, "999999999")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body_string(response).await.contains("<Code>RequestTooLarge</Code>"));
}

#[tokio::test]
async fn unsupported_method_is_405() {
    let (app, _dir) = gateway();
    let response = app
        .clone()
        .oneshot(request("PATCH", "/b/k", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let response = app
        .oneshot(request("DELETE", "/b", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn listing_filters_by_prefix_and_sorts() {
    let (app, _dir) = gateway();
    for (key, content) in [("a/1", "one"), ("b/1", "three"), ("a/2", "two")] {
        let response = app
            .clone()
            .oneshot(request("PUT", &format!("/x/{key}"), content))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(request("GET", "/x?prefix=a/", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("<Key>a/1</Key>"));
    assert!(body.contains("<Key>a/2</Key>"));
    assert!(!body.contains("<Key>b/1</Key>"));
    assert!(body.find("<Key>a/1</Key>").unwrap() < body.find("<Key>a/2</Key>").unwrap());

    let everything = body_string(
        app.clone()
            .oneshot(request("GET", "/x", Body::empty()))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(everything.matches("<Contents>").count(), 3);

    // Unknown bucket lists empty, not an error.
    let empty = app
        .oneshot(request("GET", "/never-created", Body::empty()))
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::OK);
    assert_eq!(body_string(empty).await.matches("<Contents>").count(), 0);
}

#[tokio::test]
async fn multipart_upload_merges_by_part_number() {
    let (app, _dir) = gateway();

    let initiate = app
        .clone()
        .oneshot(request("POST", "/b/big.bin?uploads", Body::empty()))
        .await
        .unwrap();
    assert_eq!(initiate.status(), StatusCode::OK);
    let body = body_string(initiate).await;
    assert!(body.contains("<Bucket>b</Bucket>"));
    let upload_id = extract_tag(&body, "UploadId");
    assert_eq!(upload_id.len(), 32);

    // Parts submitted out of order.
    for (n, content) in [(3, "c"), (1, "a"), (2, "b")] {
        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/b/big.bin?partNumber={n}&uploadId={upload_id}"),
                content,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::ETAG));
    }

    // Completion list also out of order; merge is by ascending part number.
    let complete_body = "<CompleteMultipartUpload>\
         <Part><PartNumber>3</PartNumber><ETag>x</ETag></Part>\
         <Part><PartNumber>1</PartNumber><ETag>x</ETag></Part>\
         <Part><PartNumber>2</PartNumber><ETag>x</ETag></Part>\
         </CompleteMultipartUpload>";
    let complete = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/b/big.bin?uploadId={upload_id}"),
            complete_body,
        ))
        .await
        .unwrap();
    assert_eq!(complete.status(), StatusCode::OK);
    assert!(body_string(complete)
        .await
        .contains("<Key>big.bin</Key>"));

    let get = app
        .clone()
        .oneshot(request("GET", "/b/big.bin", Body::empty()))
        .await
        .unwrap();
    assert_eq!(body_string(get).await, "abc");

    // Session storage is gone and the upload id no longer resolves.
    let listing = body_string(
        app.clone()
            .oneshot(request("GET", "/b", Body::empty()))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(listing.matches("<Contents>").count(), 1);

    let gone = app
        .oneshot(request(
            "DELETE",
            &format!("/b/big.bin?uploadId={upload_id}"),
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn multipart_session_storage_is_unreachable_and_unlisted() {
    let (app, _dir) = gateway();

    let initiate = app
        .clone()
        .oneshot(request("POST", "/b/doc?uploads", Body::empty()))
        .await
        .unwrap();
    let upload_id = extract_tag(&body_string(initiate).await, "UploadId");

    app.clone()
        .oneshot(request(
            "PUT",
            &format!("/b/doc?partNumber=1&uploadId={upload_id}"),
            "secret part",
        ))
        .await
        .unwrap();

    // Parts must not be downloadable as objects.
    let sneak = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/b/doc-temp/{upload_id}/1"),
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(sneak.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(sneak).await.contains("<Code>InvalidKey</Code>"));

    // And never listed.
    let listing = body_string(
        app.oneshot(request("GET", "/b", Body::empty()))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(listing.matches("<Contents>").count(), 0);
}

#[tokio::test]
async fn completing_with_missing_part_reports_invalid_part() {
    let (app, _dir) = gateway();

    let initiate = app
        .clone()
        .oneshot(request("POST", "/b/k?uploads", Body::empty()))
        .await
        .unwrap();
    let upload_id = extract_tag(&body_string(initiate).await, "UploadId");

    app.clone()
        .oneshot(request(
            "PUT",
            &format!("/b/k?partNumber=1&uploadId={upload_id}"),
            "a",
        ))
        .await
        .unwrap();

    let complete_body = "<CompleteMultipartUpload>\
         <Part><PartNumber>1</PartNumber><ETag>x</ETag></Part>\
         <Part><PartNumber>7</PartNumber><ETag>x</ETag></Part>\
         </CompleteMultipartUpload>";
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/b/k?uploadId={upload_id}"),
            complete_body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_string(response).await.contains("<Code>InvalidPart</Code>"));

    // No object was published.
    let get = app
        .oneshot(request("GET", "/b/k", Body::empty()))
        .await
        .unwrap();
    assert_eq!(get.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn abort_discards_session() {
    let (app, _dir) = gateway();

    let initiate = app
        .clone()
        .oneshot(request("POST", "/b/k?uploads", Body::empty()))
        .await
        .unwrap();
    let upload_id = extract_tag(&body_string(initiate).await, "UploadId");

    app.clone()
        .oneshot(request(
            "PUT",
            &format!("/b/k?partNumber=1&uploadId={upload_id}"),
            "a",
        ))
        .await
        .unwrap();

    let abort = app
        .clone()
        .oneshot(request(
            "DELETE",
            &format!("/b/k?uploadId={upload_id}"),
            Body::empty(),
        ))
        .await
        .unwrap();
    assert_eq!(abort.status(), StatusCode::NO_CONTENT);

    // Subsequent part uploads and completion see NoSuchUpload.
    let late_part = app
        .clone()
        .oneshot(request(
            "PUT",
            &format!("/b/k?partNumber=2&uploadId={upload_id}"),
            "b",
        ))
        .await
        .unwrap();
    assert_eq!(late_part.status(), StatusCode::NOT_FOUND);
    assert!(body_string(late_part).await.contains("<Code>NoSuchUpload</Code>"));
}

#[tokio::test]
async fn post_without_multipart_params_is_400() {
    let (app, _dir) = gateway();
    let response = app
        .oneshot(request("POST", "/b/k", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_string(response).await;
    assert!(body.contains("<Code>InvalidRequest</Code>"));
    // The error body names the object the request addressed.
    assert_eq!(extract_tag(&body, "Resource"), "/b/k");
}

#[tokio::test]
async fn traversal_key_is_rejected_over_http() {
    let (app, dir) = gateway();
    let response = app
        .oneshot(request("PUT", "/b/..%2F..%2Fescape", "x"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!dir.path().parent().unwrap().join("escape").exists());
}
