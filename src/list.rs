//! Listing engine: recursive bucket walk with a plain byte-prefix filter.
//!
//! Hidden entries (any segment starting with `.`) and the reserved `-temp`
//! multipart namespace are never surfaced. Results come back in
//! lexicographic key order.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::fs;

use crate::error::S3Error;
use crate::store::{validate_bucket, TEMP_SUFFIX};

#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

fn hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Enumerates regular files under `<root>/<bucket>` whose bucket-relative
/// key starts with `prefix`. A missing bucket directory is an empty listing,
/// not an error.
pub async fn list_objects(
    root: &Path,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<ObjectEntry>, S3Error> {
    validate_bucket(bucket, "")?;

    let bucket_path = root.join(bucket);
    let mut entries = Vec::new();
    if fs::metadata(&bucket_path).await.is_err() {
        return Ok(entries);
    }

    let mut dirs = vec![bucket_path.clone()];
    while let Some(dir) = dirs.pop() {
        let mut read_dir = fs::read_dir(&dir).await.context("read bucket directory")?;
        while let Some(entry) = read_dir.next_entry().await.context("walk bucket directory")? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type().await.context("stat directory entry")?;

            if file_type.is_dir() {
                // Never descend into hidden directories or multipart
                // session storage.
                if !hidden(&name) && !name.ends_with(TEMP_SUFFIX) {
                    dirs.push(entry.path());
                }
                continue;
            }
            if !file_type.is_file() || hidden(&name) {
                continue;
            }

            let path = entry.path();
            let rel = match path.strip_prefix(&bucket_path) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            if !rel.starts_with(prefix) {
                continue;
            }

            let meta = entry.metadata().await.context("stat object file")?;
            let last_modified: DateTime<Utc> = meta
                .modified()
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
                .into();
            entries.push(ObjectEntry {
                key: rel,
                size: meta.len(),
                last_modified,
            });
        }
    }

    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}
