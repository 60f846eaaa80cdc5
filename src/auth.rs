//! Access gate: asserted-identity check in front of every storage route.
//!
//! The gate extracts the access-key id from a SigV4-shaped `Authorization`
//! header and checks it against the configured allow-list. The signature
//! itself is never verified — identity is asserted, not proven. That trust
//! model is deliberate (suitable only behind a trusted perimeter) and
//! documented rather than silently strengthened.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::error::S3Error;
use crate::AppState;

/// Pull the access-key id out of an `Authorization` header of the form
/// `AWS4-HMAC-SHA256 Credential=<access-key>/<date>/<region>/...`.
///
/// The id is the substring between `Credential=` and the first `/`; the
/// slash must be present and the id non-empty.
pub fn extract_access_key_id(authorization: &str) -> Option<&str> {
    let rest = authorization.split_once("Credential=")?.1;
    let (key, _) = rest.split_once('/')?;
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

/// Rejects requests whose claimed access key is missing or not allow-listed,
/// before any handler (and therefore any storage side effect) runs.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, S3Error> {
    let claimed = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(extract_access_key_id);

    match claimed {
        Some(key) if state.allowed_access_keys.contains(key) => Ok(next.run(request).await),
        Some(key) => {
            warn!("rejected request from unknown access key '{key}'");
            Err(S3Error::AccessDenied)
        }
        None => {
            warn!("rejected request without a parsable Credential");
            Err(S3Error::AccessDenied)
        }
    }
}
