//! Blob storage for uploaded originals and generated reports.
//!
//! Objects are addressed by `(bucket, key)`. The filesystem backend writes
//! them to `<root>/<bucket>/<key>` and serves them back through the
//! `/files/{bucket}/{key}` route, so public URLs are
//! `<public_base_url>/<bucket>/<key>`.

use async_trait::async_trait;
use std::path::PathBuf;

use concierge_core::error::{Error, Result};

use crate::config::StorageConfig;

pub const REPORTS_BUCKET: &str = "reports";

const BUCKETS: &[&str] = &["knowledge-base", "user-uploads", REPORTS_BUCKET];

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `(bucket, key)`, refusing to overwrite.
    /// Returns the public URL.
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<String>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    async fn remove(&self, bucket: &str, key: &str) -> Result<()>;

    fn public_url(&self, bucket: &str, key: &str) -> String;
}

pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsBlobStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            root: config.root.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        if !BUCKETS.contains(&bucket) {
            return Err(Error::not_found(format!("unknown bucket '{}'", bucket)));
        }
        if !is_safe_key(key) {
            return Err(Error::validation(format!("invalid object key '{}'", key)));
        }
        Ok(self.root.join(bucket).join(key))
    }
}

/// Keys are flat file names: no separators, no parent references.
fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && !key.contains(['/', '\\'])
        && !key.starts_with('.')
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<String> {
        let path = self.path_for(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::upstream("storage", e))?;
        }
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(Error::upstream(
                "storage",
                format!("object {}/{} already exists", bucket, key),
            ));
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::upstream("storage", e))?;
        Ok(self.public_url(bucket, key))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::not_found(format!(
                "object {}/{} not found",
                bucket, key
            ))),
            Err(e) => Err(Error::upstream("storage", e)),
        }
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.path_for(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::upstream("storage", e)),
        }
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, bucket, key)
    }
}

/// Guess a MIME type from an object key, for serving files back.
pub fn content_type_for_key(key: &str) -> &'static str {
    let ext = key.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
