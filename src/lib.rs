//! Filesystem-backed object storage gateway speaking a subset of the S3
//! HTTP API: put/get/head/delete, prefix listing and the multipart upload
//! workflow.
//!
//! Objects live at `<root>/<bucket>/<key>`; in-progress multipart sessions
//! live under the reserved `<key>-temp/<uploadId>/` namespace, which is
//! never visible through the object routes. Writes publish by atomic
//! rename, and complete/abort on the same upload id are mutually exclusive.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod list;
pub mod multipart;
pub mod store;
pub mod xml;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{any, get, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use config::Config;
use multipart::MultipartManager;
use store::LocalStore;

/// Shared state handed to every handler and middleware.
#[derive(Clone)]
pub struct AppState {
    pub storage_root: PathBuf,
    pub store: Arc<LocalStore>,
    pub multipart: Arc<MultipartManager>,
    pub allowed_access_keys: Arc<HashSet<String>>,
    pub max_request_size: u64,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            storage_root: config.storage_root.clone(),
            store: Arc::new(LocalStore::new(config.storage_root.clone())),
            multipart: Arc::new(MultipartManager::new(config.storage_root.clone())),
            allowed_access_keys: Arc::new(config.allowed_access_keys.clone()),
            max_request_size: config.max_request_size,
        }
    }
}

/// Builds the gateway router: bucket-less requests answer 400, everything
/// else passes the access gate, then the size gate, then the handlers.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let bucket_routes = Router::new()
        .route(
            "/{bucket}",
            get(handlers::list_bucket).fallback(handlers::method_not_allowed),
        )
        // S3 clients often send GET /bucket/ with a trailing slash.
        .route(
            "/{bucket}/",
            get(handlers::list_bucket).fallback(handlers::method_not_allowed),
        )
        .route(
            "/{bucket}/{*key}",
            put(handlers::put_object)
                .get(handlers::get_object)
                .head(handlers::head_object)
                .delete(handlers::delete_object)
                .post(handlers::post_object)
                .fallback(handlers::method_not_allowed),
        )
        // route_layer wraps outside-in: auth runs first, then the size gate.
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::request_size_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .route("/", any(handlers::missing_bucket))
        .merge(bucket_routes)
        .layer(DefaultBodyLimit::max(state.max_request_size as usize))
        .layer(cors)
        .with_state(state)
}
