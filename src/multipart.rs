//! Multipart upload sessions.
//!
//! A session lives at `<root>/<bucket>/<key>-temp/<uploadId>/`, one file per
//! part number. Part uploads for different numbers run concurrently;
//! complete and abort on the same session serialize through a per-upload-id
//! lock, so a racing pair resolves to exactly one winner and the loser sees
//! `NoSuchUpload`. The merged object is built in a temp file and published
//! by atomic rename, never left half-written at the key.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::S3Error;
use crate::store::{
    resource, safe_object_path, temp_sibling, validate_bucket, validate_key, ByteStream,
    TempGuard, TEMP_SUFFIX,
};

pub struct MultipartManager {
    root: PathBuf,
    /// Exclusive complete/abort lock per upload id.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MultipartManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    /// `<root>/<bucket>/<key>-temp` — the reserved namespace holding every
    /// session for this key.
    fn temp_root(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(format!("{key}{TEMP_SUFFIX}"))
    }

    fn session_dir(&self, bucket: &str, key: &str, upload_id: &str) -> PathBuf {
        self.temp_root(bucket, key).join(upload_id)
    }

    /// Upload ids are always the 32-hex form we mint in [`initiate`]; anything
    /// else cannot name a session (and must not reach the filesystem).
    fn validate_upload_id(bucket: &str, key: &str, upload_id: &str) -> Result<(), S3Error> {
        if !upload_id.is_empty() && upload_id.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(())
        } else {
            Err(S3Error::NoSuchUpload(resource(bucket, key)))
        }
    }

    fn session_lock(&self, upload_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(upload_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Opens a fresh session and returns its opaque id: 128 random bits as
    /// 32 hex characters.
    pub async fn initiate(&self, bucket: &str, key: &str) -> Result<String, S3Error> {
        validate_bucket(bucket, key)?;
        validate_key(bucket, key)?;

        let upload_id = Uuid::new_v4().simple().to_string();
        let dir = self.session_dir(bucket, key, &upload_id);
        fs::create_dir_all(&dir)
            .await
            .context("create upload session directory")?;
        info!("initiated multipart upload {upload_id} for {}", resource(bucket, key));
        Ok(upload_id)
    }

    /// Stores one part's bytes; a re-upload of the same number overwrites
    /// (last write wins). Returns the part's quoted MD5 ETag.
    pub async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        mut body: ByteStream,
    ) -> Result<String, S3Error> {
        validate_bucket(bucket, key)?;
        validate_key(bucket, key)?;
        Self::validate_upload_id(bucket, key, upload_id)?;
        if part_number == 0 {
            return Err(S3Error::InvalidRequest {
                message: "partNumber must be a positive integer".to_string(),
                resource: resource(bucket, key),
            });
        }

        let dir = self.session_dir(bucket, key, upload_id);
        if fs::metadata(&dir).await.is_err() {
            return Err(S3Error::NoSuchUpload(resource(bucket, key)));
        }

        let part_path = dir.join(part_number.to_string());
        let tmp = temp_sibling(&part_path);
        let file = File::create(&tmp).await.context("create part temp file")?;
        let guard = TempGuard::new(tmp.clone());
        let mut writer = BufWriter::with_capacity(512 * 1024, file);

        let mut hasher = md5::Context::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.context("read part body chunk")?;
            hasher.consume(&chunk);
            writer.write_all(&chunk).await.context("write part chunk")?;
        }
        writer.flush().await.context("flush part data")?;

        match fs::rename(&tmp, &part_path).await {
            Ok(()) => {}
            // Session dir vanished mid-upload: it was aborted or completed.
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(S3Error::NoSuchUpload(resource(bucket, key)));
            }
            Err(e) => return Err(e.into()),
        }
        guard.commit();

        Ok(format!("\"{}\"", hex::encode(hasher.compute().0)))
    }

    /// Merges the referenced parts into the final object, in ascending
    /// numeric part order regardless of caller order, then discards the
    /// session. Fails closed: every referenced part is checked before a
    /// single byte is written, and the merge publishes atomically.
    pub async fn complete(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<u64, S3Error> {
        validate_bucket(bucket, key)?;
        validate_key(bucket, key)?;
        Self::validate_upload_id(bucket, key, upload_id)?;

        let lock = self.session_lock(upload_id);
        let _guard = lock.lock().await;

        let dir = self.session_dir(bucket, key, upload_id);
        if fs::metadata(&dir).await.is_err() {
            // The session is gone or never existed; drop the lock entry this
            // lookup created so phantom ids cannot grow the map unbounded.
            self.locks.remove(upload_id);
            return Err(S3Error::NoSuchUpload(resource(bucket, key)));
        }

        let mut numbers = part_numbers.to_vec();
        numbers.sort_unstable();
        numbers.dedup();

        for n in &numbers {
            if fs::metadata(dir.join(n.to_string())).await.is_err() {
                return Err(S3Error::InvalidPart {
                    part_number: *n,
                    resource: resource(bucket, key),
                });
            }
        }

        let dest = safe_object_path(&self.root, bucket, key)?;
        let parent = dest
            .parent()
            .ok_or_else(|| S3Error::InvalidKey(resource(bucket, key)))?;
        fs::create_dir_all(parent)
            .await
            .context("create object parent directory")?;

        let tmp = temp_sibling(&dest);
        let file = File::create(&tmp).await.context("create merge temp file")?;
        let tmp_guard = TempGuard::new(tmp.clone());
        let mut writer = BufWriter::with_capacity(512 * 1024, file);

        let mut total = 0u64;
        for n in &numbers {
            let mut part = File::open(dir.join(n.to_string()))
                .await
                .context("open part file")?;
            total += tokio::io::copy(&mut part, &mut writer)
                .await
                .context("append part to merge file")?;
        }
        writer.flush().await.context("flush merged object")?;
        writer
            .get_mut()
            .sync_all()
            .await
            .context("sync merged object")?;
        fs::rename(&tmp, &dest).await.context("publish merged object")?;
        tmp_guard.commit();

        // The object is published at this point. A failure to clear the
        // session directory leaves stray files behind but must not turn a
        // successful completion into an error response.
        if let Err(err) = fs::remove_dir_all(&dir).await {
            warn!(
                "leaving upload session directory {} in place: {err}",
                dir.display()
            );
        }
        // Drop the `<key>-temp` parent when this was its last session.
        let _ = fs::remove_dir(self.temp_root(bucket, key)).await;
        self.locks.remove(upload_id);

        info!(
            "completed multipart upload {upload_id} for {} ({} parts, {total} bytes)",
            resource(bucket, key),
            numbers.len()
        );
        Ok(total)
    }

    /// Discards the session without producing an object.
    pub async fn abort(&self, bucket: &str, key: &str, upload_id: &str) -> Result<(), S3Error> {
        validate_bucket(bucket, key)?;
        validate_key(bucket, key)?;
        Self::validate_upload_id(bucket, key, upload_id)?;

        let lock = self.session_lock(upload_id);
        let _guard = lock.lock().await;

        let dir = self.session_dir(bucket, key, upload_id);
        if fs::metadata(&dir).await.is_err() {
            self.locks.remove(upload_id);
            return Err(S3Error::NoSuchUpload(resource(bucket, key)));
        }

        fs::remove_dir_all(&dir)
            .await
            .context("remove upload session directory")?;
        let _ = fs::remove_dir(self.temp_root(bucket, key)).await;
        self.locks.remove(upload_id);

        info!("aborted multipart upload {upload_id} for {}", resource(bucket, key));
        Ok(())
    }
}
