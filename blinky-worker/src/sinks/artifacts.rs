//! Local-filesystem artifact bucket
//!
//! Objects live at `<root>/<bucket>/<key>`. Every upload gets a fresh version
//! id, recorded with the content type in `<root>/<bucket>/.meta/<key>.json`.
//! "Presigned" URLs are `file://` URLs carrying the version and an expiry.

use super::ArtifactSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Artifact storage errors
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Key is empty or escapes the bucket
    #[error("Invalid object key {0:?}")]
    InvalidKey(String),

    /// Local file to upload does not exist
    #[error("Source file not found: {0}")]
    SourceMissing(PathBuf),

    /// Nothing stored under the key
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Artifact IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Sidecar written next to each object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub version_id: String,
    pub content_type: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// Bucket on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalArtifactSink {
    root: PathBuf,
    bucket: String,
    presign_expiry: Duration,
}

impl LocalArtifactSink {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>, presign_expiry: Duration) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
            presign_expiry,
        }
    }

    fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, ArtifactError> {
        validate_key(key)?;
        Ok(self.bucket_dir().join(key))
    }

    fn info_path(&self, key: &str) -> Result<PathBuf, ArtifactError> {
        validate_key(key)?;
        Ok(self.bucket_dir().join(".meta").join(format!("{}.json", key)))
    }

    /// Sidecar for `key`
    pub async fn object_info(&self, key: &str) -> Result<ObjectInfo, ArtifactError> {
        let path = self.info_path(key)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[async_trait]
impl ArtifactSink for LocalArtifactSink {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<String, ArtifactError> {
        let target = self.object_path(key)?;
        let info_path = self.info_path(key)?;

        if !tokio::fs::try_exists(local_path).await.unwrap_or(false) {
            return Err(ArtifactError::SourceMissing(local_path.to_path_buf()));
        }

        for dir in [target.parent(), info_path.parent()].into_iter().flatten() {
            tokio::fs::create_dir_all(dir).await?;
        }

        // Copy under a temporary name so readers never see a partial object
        let staging = target.with_extension("upload.tmp");
        let size = match stage_object(local_path, &staging, &target).await {
            Ok(size) => size,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&staging).await {
                    debug!(path = %staging.display(), error = %rm, "No staging file to remove");
                }
                return Err(e.into());
            }
        };

        let info = ObjectInfo {
            key: key.to_string(),
            version_id: uuid::Uuid::new_v4().simple().to_string(),
            content_type: content_type.to_string(),
            size,
            uploaded_at: Utc::now(),
        };
        tokio::fs::write(&info_path, serde_json::to_vec_pretty(&info)?).await?;

        debug!(
            bucket = %self.bucket,
            key,
            version_id = %info.version_id,
            size,
            "Artifact stored"
        );
        Ok(info.version_id)
    }

    async fn presigned_get(&self, key: &str) -> Result<String, ArtifactError> {
        let info = self.object_info(key).await?;
        let path = tokio::fs::canonicalize(self.object_path(key)?)
            .await
            .map_err(|_| ArtifactError::NotFound(key.to_string()))?;

        let expires = Utc::now()
            + chrono::Duration::from_std(self.presign_expiry).unwrap_or(chrono::Duration::zero());

        Ok(format!(
            "file://{}?version={}&expires={}",
            path.to_string_lossy().replace('\\', "/"),
            info.version_id,
            expires.timestamp()
        ))
    }
}

/// Keys are relative paths that stay inside the bucket
fn validate_key(key: &str) -> Result<(), ArtifactError> {
    if key.trim().is_empty() {
        return Err(ArtifactError::InvalidKey(key.to_string()));
    }
    let escapes = Path::new(key).components().any(|c| {
        matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
    });
    if escapes || key.starts_with(".meta") {
        return Err(ArtifactError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Object key for a processed output file: `<prefix>/<file name>`
pub fn object_key(prefix: &str, output_path: &Path) -> String {
    let name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name
    } else {
        format!("{}/{}", prefix, name)
    }
}

async fn stage_object(source: &Path, staging: &Path, target: &Path) -> std::io::Result<u64> {
    let size = tokio::fs::copy(source, staging).await?;
    tokio::fs::rename(staging, target).await?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key() {
        assert_eq!(
            object_key("processed", Path::new("/calls/out/abc.wav")),
            "processed/abc.wav"
        );
        assert_eq!(object_key("/", Path::new("abc.wav")), "abc.wav");
    }

    #[test]
    fn test_keys_cannot_escape_bucket() {
        assert!(validate_key("processed/a.wav").is_ok());
        assert!(validate_key("../a.wav").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("").is_err());
        assert!(validate_key(".meta/x.json").is_err());
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("out.wav");
        tokio::fs::write(&source, b"RIFF....WAVE").await.unwrap();

        // A non-empty directory where the object should land makes the rename fail
        let target = dir.path().join("store/calls/processed/out.wav");
        tokio::fs::create_dir_all(&target).await.unwrap();
        tokio::fs::write(target.join("occupied"), b"x").await.unwrap();

        let sink = LocalArtifactSink::new(dir.path().join("store"), "calls", Duration::from_secs(60));
        let result = sink.upload(&source, "processed/out.wav", "audio/wav").await;

        assert!(matches!(result, Err(ArtifactError::Io(_))));
        assert!(!target.with_extension("upload.tmp").exists());
        assert!(sink.object_info("processed/out.wav").await.is_err());
    }

    #[tokio::test]
    async fn test_upload_then_presign() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("out.wav");
        tokio::fs::write(&source, b"RIFF....WAVE").await.unwrap();

        let sink = LocalArtifactSink::new(dir.path().join("store"), "calls", Duration::from_secs(60));
        let v1 = sink.upload(&source, "processed/out.wav", "audio/wav").await.unwrap();
        let v2 = sink.upload(&source, "processed/out.wav", "audio/wav").await.unwrap();
        assert_ne!(v1, v2);

        let stored = dir.path().join("store/calls/processed/out.wav");
        assert_eq!(tokio::fs::read(&stored).await.unwrap(), b"RIFF....WAVE");

        let info = sink.object_info("processed/out.wav").await.unwrap();
        assert_eq!(info.version_id, v2);
        assert_eq!(info.size, 12);

        let url = sink.presigned_get("processed/out.wav").await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.contains(&format!("version={}", v2)));
        assert!(url.contains("&expires="));
    }

    #[tokio::test]
    async fn test_upload_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalArtifactSink::new(dir.path(), "calls", Duration::from_secs(60));
        let err = sink
            .upload(&dir.path().join("nope.wav"), "processed/nope.wav", "audio/wav")
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::SourceMissing(_)));
    }

    #[tokio::test]
    async fn test_presign_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalArtifactSink::new(dir.path(), "calls", Duration::from_secs(60));
        assert!(matches!(
            sink.presigned_get("processed/none.wav").await,
            Err(ArtifactError::NotFound(_))
        ));
    }
}
