//! Where finished videos go: Cloudflare R2 for the service, a plain
//! directory for local renders and tests.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage not configured: {0}")]
    Config(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("list failed: {0}")]
    ListFailed(String),

    #[error("delete failed: {0}")]
    DeleteFailed(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn delete_failed(msg: impl Into<String>) -> Self {
        Self::DeleteFailed(msg.into())
    }
}

#[derive(Debug, Clone)]
pub struct R2Config {
    /// S3 API endpoint of the account.
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    /// Base of the public URL objects are served from.
    pub public_base_url: String,
    /// Usually "auto" for R2.
    pub region: String,
}

impl R2Config {
    pub fn from_env() -> StorageResult<Self> {
        Self::from_lookup(|key| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
    }

    /// `R2_ENDPOINT_URL` wins over the endpoint derived from `R2_ACCOUNT_ID`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> StorageResult<Self> {
        let require = |key: &str| lookup(key).ok_or_else(|| StorageError::config(format!("{key} not set")));

        let endpoint_url = match lookup("R2_ENDPOINT_URL") {
            Some(url) => url,
            None => {
                let account = lookup("R2_ACCOUNT_ID")
                    .ok_or_else(|| StorageError::config("R2_ACCOUNT_ID or R2_ENDPOINT_URL not set"))?;
                format!("https://{account}.r2.cloudflarestorage.com")
            }
        };

        Ok(Self {
            endpoint_url,
            access_key_id: require("R2_ACCESS_KEY_ID")?,
            secret_access_key: require("R2_SECRET_ACCESS_KEY")?,
            bucket_name: require("R2_BUCKET_NAME")?,
            public_base_url: require("R2_PUBLIC_BASE_URL")?,
            region: lookup("R2_REGION").unwrap_or_else(|| "auto".to_string()),
        })
    }
}

/// Public location of `key` under `base`.
pub fn public_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}

/// Fresh key for one deliverable: `<prefix><UTC date>/<uuid>.mp4`.
pub fn object_key(prefix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let date = Utc::now().format("%Y-%m-%d");
    let id = Uuid::new_v4().simple();
    if prefix.is_empty() {
        format!("{date}/{id}.mp4")
    } else {
        format!("{prefix}/{date}/{id}.mp4")
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Store `local` under `key` and return its public location.
    async fn upload(&self, local: &Path, key: &str, content_type: &str) -> StorageResult<String>;

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    async fn delete(&self, key: &str) -> StorageResult<()>;
}

/// Delete every `.mp4` under `prefix` except `keep`. Failures are logged and
/// skipped; returns how many objects were removed.
pub async fn prune_previous_artifacts(store: &dyn ArtifactStore, prefix: &str, keep: &str) -> usize {
    let keys = match store.list(prefix).await {
        Ok(keys) => keys,
        Err(err) => {
            tracing::warn!("Listing {} for cleanup failed: {}", prefix, err);
            return 0;
        }
    };

    let mut removed = 0;
    for key in keys.iter().filter(|k| k.as_str() != keep && k.ends_with(".mp4")) {
        match store.delete(key).await {
            Ok(()) => removed += 1,
            Err(err) => tracing::warn!("Cleanup of {} failed: {}", key, err),
        }
    }
    if removed > 0 {
        info!("Removed {} previous video(s) from {}", removed, store.name());
    }
    removed
}

#[derive(Clone)]
pub struct R2Store {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl R2Store {
    pub fn new(config: R2Config) -> Self {
        let credentials = Credentials::new(&config.access_key_id, &config.secret_access_key, None, None, "r2");

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
            public_base_url: config.public_base_url,
        }
    }
}

#[async_trait]
impl ArtifactStore for R2Store {
    fn name(&self) -> &'static str {
        "r2"
    }

    async fn upload(&self, local: &Path, key: &str, content_type: &str) -> StorageResult<String> {
        debug!("Uploading {} to {}", local.display(), key);

        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!("Uploaded {} to {}", local.display(), key);
        Ok(public_url(&self.public_base_url, key))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket).prefix(prefix);
            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StorageError::ListFailed(e.to_string()))?;

            keys.extend(response.contents().iter().filter_map(|obj| obj.key.clone()));

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token;
            } else {
                break;
            }
        }

        Ok(keys)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        debug!("Deleting {}", key);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;
        Ok(())
    }
}

/// Stores artifacts as files below `root`; keys map to relative paths.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let rel = Path::new(key);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ArtifactStore for LocalDirStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn upload(&self, local: &Path, key: &str, _content_type: &str) -> StorageResult<String> {
        let dest = self.path_for(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, &dest)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", dest.display(), e)))?;
        Ok(dest.display().to_string())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || -> StorageResult<Vec<String>> {
            let mut keys = Vec::new();
            if !root.exists() {
                return Ok(keys);
            }
            for entry in walkdir::WalkDir::new(&root) {
                let entry = entry.map_err(|e| StorageError::ListFailed(e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(&prefix) {
                    keys.push(key);
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| StorageError::ListFailed(e.to_string()))?
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| StorageError::delete_failed(format!("{}: {}", key, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn object_keys_are_dated_and_unique() {
        let a = object_key("videos/");
        let b = object_key("videos");
        assert!(a.starts_with("videos/"));
        assert!(a.ends_with(".mp4"));
        assert_ne!(a, b);

        let parts: Vec<&str> = a.split('/').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 10);
        assert_eq!(parts[2].len(), 32 + 4);
    }

    #[test]
    fn public_url_joins_cleanly() {
        assert_eq!(
            public_url("https://pub.example.dev/", "videos/2024-01-01/a.mp4"),
            "https://pub.example.dev/videos/2024-01-01/a.mp4"
        );
    }

    #[test]
    fn r2_endpoint_from_account_id() {
        let vars: HashMap<&str, &str> = [
            ("R2_ACCOUNT_ID", "abc123"),
            ("R2_ACCESS_KEY_ID", "id"),
            ("R2_SECRET_ACCESS_KEY", "secret"),
            ("R2_BUCKET_NAME", "bucket"),
            ("R2_PUBLIC_BASE_URL", "https://pub.example.dev"),
        ]
        .into_iter()
        .collect();
        let cfg = R2Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.endpoint_url, "https://abc123.r2.cloudflarestorage.com");
        assert_eq!(cfg.region, "auto");
    }

    #[test]
    fn r2_config_reports_missing_variable() {
        let err = R2Config::from_lookup(|k| (k == "R2_ENDPOINT_URL").then(|| "https://x".to_string())).unwrap_err();
        assert!(err.to_string().contains("R2_ACCESS_KEY_ID"));
    }

    #[tokio::test]
    async fn local_store_uploads_lists_and_prunes() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(out.path());

        let src = work.path().join("final.mp4");
        tokio::fs::write(&src, b"video").await.unwrap();

        let first = "videos/2024-01-01/a.mp4";
        let second = "videos/2024-01-02/b.mp4";
        store.upload(&src, first, "video/mp4").await.unwrap();
        store.upload(&src, "other/keep.mp4", "video/mp4").await.unwrap();
        let location = store.upload(&src, second, "video/mp4").await.unwrap();
        assert!(Path::new(&location).exists());

        tokio::fs::write(out.path().join("videos/notes.txt"), b"x").await.unwrap();

        let listed = store.list("videos/").await.unwrap();
        assert_eq!(listed, vec![first.to_string(), second.to_string(), "videos/notes.txt".to_string()]);

        let removed = prune_previous_artifacts(&store, "videos/", second).await;
        assert_eq!(removed, 1);
        assert_eq!(
            store.list("").await.unwrap(),
            vec!["other/keep.mp4".to_string(), second.to_string(), "videos/notes.txt".to_string()]
        );
    }

    #[tokio::test]
    async fn local_store_rejects_escaping_keys() {
        let out = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(out.path());
        assert!(matches!(
            store.delete("../etc/passwd").await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
