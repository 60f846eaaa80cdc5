//! Filesystem object store: `(bucket, key)` maps to `<root>/<bucket>/<key>`.
//!
//! Writes stream through a hidden temp sibling and are published with an
//! atomic rename, so concurrent readers observe either the old object in
//! full or the new one in full. Buckets are directories, lazily created by
//! the first write that needs them.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use anyhow::Context;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::error::S3Error;

/// Reserved suffix for in-progress multipart session directories
/// (`<key>-temp/<uploadId>/<partNumber>`). Keys using it are rejected and
/// listings never descend into it.
pub(crate) const TEMP_SUFFIX: &str = "-temp";

/// Request/part body as the handlers hand it to the core.
pub type ByteStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

/// Resource path reported in error responses.
pub(crate) fn resource(bucket: &str, key: &str) -> String {
    format!("/{bucket}/{key}")
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".."
}

pub(crate) fn validate_bucket(bucket: &str, key: &str) -> Result<(), S3Error> {
    if valid_segment(bucket) {
        Ok(())
    } else {
        Err(S3Error::InvalidKey(resource(bucket, key)))
    }
}

/// A key must stay inside its bucket directory and out of the reserved
/// multipart namespace: no empty, `.` or `..` segments, no segment ending
/// in `-temp`.
pub(crate) fn validate_key(bucket: &str, key: &str) -> Result<(), S3Error> {
    for segment in key.split('/') {
        if !valid_segment(segment) || segment.ends_with(TEMP_SUFFIX) {
            return Err(S3Error::InvalidKey(resource(bucket, key)));
        }
    }
    Ok(())
}

pub(crate) fn safe_object_path(root: &Path, bucket: &str, key: &str) -> Result<PathBuf, S3Error> {
    validate_bucket(bucket, key)?;
    validate_key(bucket, key)?;
    Ok(root.join(bucket).join(key))
}

/// Hidden temp sibling for an object about to be published at `path`.
/// The leading dot keeps partially written files out of listings.
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

/// Removes its temp file on drop unless the write was published.
pub(crate) struct TempGuard {
    path: PathBuf,
    committed: bool,
}

impl TempGuard {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    pub(crate) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

pub struct GetResult {
    pub size: u64,
    pub content_type: String,
    pub stream: ReaderStream<File>,
}

pub struct HeadResult {
    pub size: u64,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
}

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn content_type(path: &Path) -> String {
        mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string()
    }

    /// Streams `body` into `(bucket, key)`, fully replacing any prior
    /// content. Returns the quoted MD5 ETag and the byte count. A failed or
    /// truncated stream leaves the prior object untouched.
    pub async fn put(
        &self,
        bucket: &str,
        key: &str,
        mut body: ByteStream,
    ) -> Result<(String, u64), S3Error> {
        let path = safe_object_path(&self.root, bucket, key)?;
        let parent = path
            .parent()
            .ok_or_else(|| S3Error::InvalidKey(resource(bucket, key)))?;
        fs::create_dir_all(parent)
            .await
            .context("create object parent directory")?;

        let tmp = temp_sibling(&path);
        let file = File::create(&tmp).await.context("create temp file")?;
        let guard = TempGuard::new(tmp.clone());
        let mut writer = BufWriter::with_capacity(512 * 1024, file);

        let mut hasher = md5::Context::new();
        let mut total = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.context("read body chunk")?;
            hasher.consume(&chunk);
            writer.write_all(&chunk).await.context("write body chunk")?;
            total += chunk.len() as u64;
        }

        writer.flush().await.context("flush object data")?;
        writer
            .get_mut()
            .sync_all()
            .await
            .context("sync object data")?;
        fs::rename(&tmp, &path).await.context("publish object")?;
        guard.commit();

        let etag = format!("\"{}\"", hex::encode(hasher.compute().0));
        Ok((etag, total))
    }

    pub async fn get(&self, bucket: &str, key: &str) -> Result<GetResult, S3Error> {
        let path = safe_object_path(&self.root, bucket, key)?;
        let file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(S3Error::NoSuchKey(resource(bucket, key)))
            }
            Err(e) => return Err(e.into()),
        };
        let meta = file.metadata().await.context("read object metadata")?;
        if meta.is_dir() {
            // A directory is a key prefix, not an object.
            return Err(S3Error::NoSuchKey(resource(bucket, key)));
        }

        Ok(GetResult {
            size: meta.len(),
            content_type: Self::content_type(&path),
            stream: ReaderStream::new(file),
        })
    }

    pub async fn head(&self, bucket: &str, key: &str) -> Result<HeadResult, S3Error> {
        let path = safe_object_path(&self.root, bucket, key)?;
        let meta = match fs::metadata(&path).await {
            Ok(m) if !m.is_dir() => m,
            Ok(_) => return Err(S3Error::NoSuchKey(resource(bucket, key))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(S3Error::NoSuchKey(resource(bucket, key)))
            }
            Err(e) => return Err(e.into()),
        };

        let last_modified: DateTime<Utc> = meta
            .modified()
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
            .into();

        Ok(HeadResult {
            size: meta.len(),
            content_type: Self::content_type(&path),
            last_modified,
        })
    }

    /// Removes the object if present. Absence is success: delete is
    /// idempotent and always reports 204.
    pub async fn delete(&self, bucket: &str, key: &str) -> Result<(), S3Error> {
        let path = safe_object_path(&self.root, bucket, key)?;
        match fs::metadata(&path).await {
            Ok(m) if m.is_file() => fs::remove_file(&path)
                .await
                .context("delete object")
                .map_err(S3Error::from),
            // Absent, or a key prefix rather than an object.
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
