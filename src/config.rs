use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

use anyhow::{bail, Result};

const DEFAULT_MAX_REQUEST_SIZE: u64 = 100 * 1024 * 1024; // 100MB

/// Everything the gateway needs from its environment, resolved once at
/// startup. Handlers and the access gate receive these values through
/// [`crate::AppState`] rather than reading process-wide globals, so tests
/// can construct their own.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory under which `<bucket>/<key>` trees live.
    pub storage_root: PathBuf,
    /// Access-key identifiers accepted by the access gate.
    pub allowed_access_keys: HashSet<String>,
    /// Largest declared Content-Length accepted, in bytes.
    pub max_request_size: u64,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let storage_root =
            PathBuf::from(env::var("STORAGE_ROOT").unwrap_or_else(|_| "./s3_data".into()));

        let allowed_access_keys: HashSet<String> = env::var("ALLOWED_ACCESS_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if allowed_access_keys.is_empty() {
            bail!("ALLOWED_ACCESS_KEYS must list at least one access key id");
        }

        let max_request_size = env::var("MAX_REQUEST_SIZE")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_MAX_REQUEST_SIZE);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(3000);

        Ok(Self {
            storage_root,
            allowed_access_keys,
            max_request_size,
            host,
            port,
        })
    }
}
