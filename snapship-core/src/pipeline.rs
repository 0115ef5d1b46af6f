/*!
Compress-then-upload pipeline.

The pipeline only wires the two stages together: the artifact path returned by
the compressor is the single hand-off, and the upload starts only after the
compressor returned successfully. It never retries, schedules or prunes.
*/

use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::compression::{CompressedArtifact, GzipCompressor};
use crate::config::{S3Info, ServiceConfig};
use crate::upload::{push_snapshot, ObjectStore, S3ObjectStore, UploadReceipt};
use crate::{Result, SnapshipError};

/// Result of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub artifact: String,
    pub source_size: u64,
    pub compressed_size: u64,
    pub sha256: String,
    pub receipt: UploadReceipt,
}

impl BackupReport {
    fn new(artifact: CompressedArtifact, receipt: UploadReceipt) -> Self {
        Self {
            artifact: artifact.path.to_string_lossy().into_owned(),
            source_size: artifact.source_size,
            compressed_size: artifact.compressed_size,
            sha256: artifact.sha256,
            receipt,
        }
    }
}

/// Compresses a snapshot and pushes the artifact to one bucket and prefix
///
/// # Example
/// ```rust,no_run
/// use snapship_core::{BackupPipeline, S3Info, ServiceConfig};
///
/// # async fn run() -> snapship_core::Result<()> {
/// let service = ServiceConfig::new("us-east-1");
/// let pipeline = BackupPipeline::connect(&service, S3Info::new("backups"), "cluster-a").await?;
/// let report = pipeline.run("etcd.snapshot").await?;
/// println!("uploaded to {}", report.receipt.key);
/// # Ok(())
/// # }
/// ```
pub struct BackupPipeline<S> {
    store: S,
    target: S3Info,
    prefix: String,
    compressor: GzipCompressor,
}

impl BackupPipeline<S3ObjectStore> {
    /// Build the S3 client for `service` and a pipeline on top of it
    pub async fn connect(
        service: &ServiceConfig,
        target: S3Info,
        prefix: impl Into<String>,
    ) -> Result<Self> {
        let store = S3ObjectStore::connect(service).await?;
        Self::new(store, target, prefix)
    }
}

impl<S: ObjectStore> BackupPipeline<S> {
    /// Create a pipeline over an existing store
    pub fn new(store: S, target: S3Info, prefix: impl Into<String>) -> Result<Self> {
        target.validate()?;
        Ok(Self {
            store,
            target,
            prefix: prefix.into(),
            compressor: GzipCompressor::best(),
        })
    }

    /// Replace the compressor (best compression by default)
    pub fn with_compressor(mut self, compressor: GzipCompressor) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn target(&self) -> &S3Info {
        &self.target
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Compress `source` on a blocking thread
    pub async fn compress(&self, source: impl AsRef<Path>) -> Result<CompressedArtifact> {
        let source = source.as_ref().to_path_buf();
        let compressor = self.compressor.clone();

        tokio::task::spawn_blocking(move || compressor.compress_file(source))
            .await
            .map_err(|e| SnapshipError::Task(e.to_string()))?
    }

    /// Upload an existing artifact
    pub async fn push(&self, artifact: impl AsRef<Path>) -> Result<UploadReceipt> {
        push_snapshot(&self.store, &self.target, &self.prefix, artifact).await
    }

    /// Compress `source`, then upload the artifact
    ///
    /// A failed compression leaves no artifact behind. A failed upload leaves
    /// the artifact in place so the caller can retry the push.
    pub async fn run(&self, source: impl AsRef<Path>) -> Result<BackupReport> {
        let source = source.as_ref();
        let artifact = self.compress(source).await?;

        let receipt = match self.push(&artifact.path).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(
                    artifact = %artifact.path.display(),
                    error = %e,
                    "Upload failed, artifact kept for retry"
                );
                return Err(e);
            }
        };

        info!(
            source = %source.display(),
            bucket = %receipt.bucket,
            key = %receipt.key,
            "Backup completed"
        );

        Ok(BackupReport::new(artifact, receipt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::compressed_path;
    use crate::upload::{object_key, MemoryObjectStore, MockObjectStore};
    use flate2::read::GzDecoder;
    use std::fs;
    use std::io::{self, Read};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_compresses_and_uploads() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("etcd.snapshot");
        let data = b"member data ".repeat(1000);
        fs::write(&source, &data).unwrap();

        let pipeline =
            BackupPipeline::new(MemoryObjectStore::new(), S3Info::new("backups"), "cluster-a")
                .unwrap();

        let report = pipeline.run(&source).await.unwrap();

        let artifact = compressed_path(&source);
        assert_eq!(report.receipt.key, object_key("cluster-a", &artifact));
        assert_eq!(report.source_size, data.len() as u64);

        let uploaded = pipeline
            .store()
            .get("backups", &report.receipt.key)
            .unwrap();
        let mut restored = Vec::new();
        GzDecoder::new(&uploaded[..])
            .read_to_end(&mut restored)
            .unwrap();
        assert_eq!(restored, data);
        assert_eq!(pipeline.store().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_compression_skips_upload() {
        let dir = TempDir::new().unwrap();
        let mut store = MockObjectStore::new();
        store.expect_put_object().never();

        let pipeline = BackupPipeline::new(store, S3Info::new("backups"), "p").unwrap();
        let source = dir.path().join("missing.snapshot");

        let err = pipeline.run(&source).await.unwrap_err();

        assert!(matches!(err, SnapshipError::OpenSource { .. }));
        assert!(!compressed_path(&source).exists());
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_artifact() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("snap");
        fs::write(&source, b"payload").unwrap();

        let mut store = MockObjectStore::new();
        store
            .expect_put_object()
            .times(1)
            .returning(|bucket, key, _, _| {
                Err(SnapshipError::put_object(
                    bucket,
                    key,
                    io::Error::new(io::ErrorKind::PermissionDenied, "AccessDenied"),
                ))
            });

        let pipeline = BackupPipeline::new(store, S3Info::new("backups"), "p").unwrap();

        let err = pipeline.run(&source).await.unwrap_err();

        assert!(err.is_remote());
        assert!(compressed_path(&source).exists());
        assert_eq!(fs::read(&source).unwrap(), b"payload");
    }

    #[test]
    fn test_new_rejects_empty_bucket() {
        let result = BackupPipeline::new(MemoryObjectStore::new(), S3Info::new(""), "p");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_custom_compressor_is_used() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("snap");
        fs::write(&source, b"abc".repeat(100)).unwrap();

        let pipeline = BackupPipeline::new(MemoryObjectStore::new(), S3Info::new("b"), "p")
            .unwrap()
            .with_compressor(GzipCompressor::fast());

        let artifact = pipeline.compress(&source).await.unwrap();

        assert_eq!(artifact.path, compressed_path(&source));
        assert_eq!(pipeline.prefix(), "p");
        assert_eq!(pipeline.target().bucket, "b");
    }
}
