//! Content-addressed storage backends for encoded photos.
//!
//! Objects are keyed by a truncated SHA-256 of their *encoded* bytes, so
//! two uploads that compress to identical output share one stored object
//! no matter what they looked like on the way in. Both backends check for
//! an existing object before writing; the check-then-write pair is not
//! atomic against a concurrent identical upload, which is fine because both
//! writers would publish byte-identical content under the same key.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// Hex characters of SHA-256 kept in object keys (128 bits).
const KEY_HASH_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid object key")]
    InvalidKey,
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("blob endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("blob endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Reference to a stored, content-addressed object. Created once per unique
/// hash and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObjectRef {
    /// Truncated SHA-256 of the stored bytes.
    pub hash: String,
    /// Storage key: hash plus extension.
    pub key: String,
    /// Public URL (remote backend) or server-relative path (local backend).
    pub url: String,
    /// Stored size in bytes.
    pub bytes: usize,
}

/// Derive `(hash, key)` for a payload.
///
/// The digest is computed over the bytes being stored, not the original
/// upload, so the dedup key is a function of what actually lands on disk.
pub fn content_key(data: &[u8], extension: &str) -> (String, String) {
    let digest = Sha256::digest(data);
    let hash = format!("{digest:x}")[..KEY_HASH_LEN].to_string();
    let key = format!("{hash}.{extension}");
    (hash, key)
}

fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Pluggable storage backend for encoded photos.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Persist `data` under its content-derived key, deduplicating against
    /// objects already present. The existence check runs strictly before
    /// any write attempt; when the object exists the write is skipped
    /// entirely.
    async fn store(&self, data: &[u8], extension: &str) -> StoreResult<StoredObjectRef>;
}

/// Local-filesystem backend.
///
/// Keys become filenames directly under `base_dir`; existence is a file
/// stat; writes go through a temp file and rename so readers never observe
/// a partial object.
#[derive(Clone)]
pub struct FsStore {
    /// Directory holding the stored objects.
    pub base_dir: PathBuf,
    /// URL prefix under which stored objects are served.
    pub public_base: String,
}

impl FsStore {
    pub fn new(base_dir: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            public_base: public_base.into(),
        }
    }

    /// Reject keys that could escape the storage directory. Keys are
    /// hash-derived in normal operation; this guards the GET path, which
    /// accepts a client-supplied key.
    fn ensure_key_safe(key: &str) -> StoreResult<()> {
        if key.is_empty() || key.len() > 255 {
            return Err(StoreError::InvalidKey);
        }
        if key.contains('/') || key.contains('\\') || key.contains("..") {
            return Err(StoreError::InvalidKey);
        }
        if key.bytes().any(|b| b.is_ascii_control()) {
            return Err(StoreError::InvalidKey);
        }
        Ok(())
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base.trim_end_matches('/'), key)
    }

    /// Open a stored object for streaming, returning the file and its size.
    pub async fn open(&self, key: &str) -> StoreResult<(fs::File, u64)> {
        Self::ensure_key_safe(key)?;
        let path = self.object_path(key);
        let file = fs::File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound(key.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// Remove every entry in the storage directory, keeping (or recreating)
    /// the directory itself. Returns the number of entries removed.
    pub async fn purge(&self) -> StoreResult<usize> {
        let mut entries = match fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&self.base_dir).await?;
                return Ok(0);
            }
            Err(err) => return Err(StoreError::Io(err)),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await?;
            } else {
                fs::remove_file(&path).await?;
            }
            removed += 1;
        }
        Ok(removed)
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn store(&self, data: &[u8], extension: &str) -> StoreResult<StoredObjectRef> {
        let (hash, key) = content_key(data, extension);
        Self::ensure_key_safe(&key)?;
        let path = self.object_path(&key);
        let url = self.public_url(&key);

        // Identical output bytes map to the same key, so a stat hit means
        // the payload is already on disk.
        if fs::try_exists(&path).await? {
            debug!(key = %key, "object already stored, reusing");
            return Ok(StoredObjectRef {
                hash,
                key,
                url,
                bytes: data.len(),
            });
        }

        fs::create_dir_all(&self.base_dir).await?;
        let tmp_path = self.base_dir.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = fs::write(&tmp_path, data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        info!(key = %key, bytes = data.len(), "stored object");
        Ok(StoredObjectRef {
            hash,
            key,
            url,
            bytes: data.len(),
        })
    }
}

/// Remote content-addressed blob backend.
///
/// Existence is a `HEAD {endpoint}/{key}`; absent objects are published
/// with a `PUT` carrying the content type and a one-year immutable cache
/// policy. Objects are public-read and never rewritten once present.
#[derive(Clone)]
pub struct BlobStore {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl BlobStore {
    pub fn new(endpoint: String, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.endpoint, key)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Best-effort reachability probe for the readiness endpoint.
    pub async fn reachable(&self) -> bool {
        self.authorize(self.client.head(&self.endpoint))
            .send()
            .await
            .is_ok()
    }
}

#[async_trait]
impl ObjectStore for BlobStore {
    async fn store(&self, data: &[u8], extension: &str) -> StoreResult<StoredObjectRef> {
        let (hash, key) = content_key(data, extension);
        let url = self.object_url(&key);

        // HEAD before PUT: a hit skips the upload entirely.
        let head = self.authorize(self.client.head(&url)).send().await?;
        if head.status().is_success() {
            debug!(key = %key, "blob already present, skipping upload");
            return Ok(StoredObjectRef {
                hash,
                key,
                url,
                bytes: data.len(),
            });
        }
        if head.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::Endpoint {
                status: head.status().as_u16(),
                body: head.text().await.unwrap_or_default(),
            });
        }

        let response = self
            .authorize(self.client.put(&url))
            .header(reqwest::header::CONTENT_TYPE, content_type_for(extension))
            .header(
                reqwest::header::CACHE_CONTROL,
                "public, max-age=31536000, immutable",
            )
            .body(data.to_vec())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Endpoint {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        info!(key = %key, bytes = data.len(), "uploaded blob");
        Ok(StoredObjectRef {
            hash,
            key,
            url,
            bytes: data.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn content_key_is_truncated_sha256_plus_extension() {
        // SHA-256 of the empty string is well known.
        let (hash, key) = content_key(b"", "jpg");
        assert_eq!(hash, "e3b0c44298fc1c149afbf4c8996fb924");
        assert_eq!(key, "e3b0c44298fc1c149afbf4c8996fb924.jpg");
    }

    #[test]
    fn content_key_depends_only_on_the_bytes() {
        let (_, a) = content_key(b"payload one", "jpg");
        let (_, b) = content_key(b"payload two", "jpg");
        let (_, a_again) = content_key(b"payload one", "jpg");
        assert_ne!(a, b);
        assert_eq!(a, a_again);
    }

    #[test]
    fn traversal_keys_are_rejected() {
        assert!(matches!(
            FsStore::ensure_key_safe("../evil.jpg"),
            Err(StoreError::InvalidKey)
        ));
        assert!(matches!(
            FsStore::ensure_key_safe("a/b.jpg"),
            Err(StoreError::InvalidKey)
        ));
        assert!(matches!(
            FsStore::ensure_key_safe(""),
            Err(StoreError::InvalidKey)
        ));
        assert!(FsStore::ensure_key_safe("abc123.jpg").is_ok());
    }

    #[tokio::test]
    async fn fs_store_writes_once_and_dedupes_after() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path(), "/uploads");

        let data = b"encoded jpeg bytes";
        let first = store.store(data, "jpg").await.unwrap();
        assert_eq!(first.url, format!("/uploads/{}", first.key));
        assert_eq!(first.bytes, data.len());

        // Overwrite the stored file out of band; if the second store call
        // really skips the write, the tampered content survives.
        let path = dir.path().join(&first.key);
        fs::write(&path, b"tampered").await.unwrap();

        let second = store.store(data, "jpg").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::read(&path).await.unwrap(), b"tampered");
    }

    #[tokio::test]
    async fn distinct_payloads_get_distinct_objects() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path(), "/uploads");

        let a = store.store(b"first output", "jpg").await.unwrap();
        let b = store.store(b"second output", "jpg").await.unwrap();
        assert_ne!(a.key, b.key);
        assert!(dir.path().join(&a.key).exists());
        assert!(dir.path().join(&b.key).exists());
    }

    #[tokio::test]
    async fn open_missing_object_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path(), "/uploads");
        let err = store.open("nothere.jpg").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn purge_empties_the_directory() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path(), "/uploads");

        store.store(b"one", "jpg").await.unwrap();
        store.store(b"two", "jpg").await.unwrap();
        assert_eq!(store.purge().await.unwrap(), 2);

        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());

        // Idempotent on an already-empty directory.
        assert_eq!(store.purge().await.unwrap(), 0);
    }
}
