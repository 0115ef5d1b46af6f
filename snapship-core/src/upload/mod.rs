/*!
Shipping compressed artifacts to object storage.

The uploader talks to the store through the [`ObjectStore`] port so the
pipeline can run against S3 in production and against doubles in tests. A
store performs exactly one put per artifact and never retries; retry policy
belongs to whoever drives the pipeline.
*/

pub mod endpoint;
pub mod s3;

use std::io;
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::primitives::{ByteStream, Length};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::S3Info;
use crate::{Result, SnapshipError};

pub use endpoint::{ResolvedEndpoint, StaticEndpoint};
pub use s3::{create_client, s3_config, S3ObjectStore};

/// Joiner placed between the key prefix and the artifact path
pub const KEY_SEPARATOR: &str = "/";

/// Object storage port used by the uploader
///
/// Implementations issue a single put request and return the entity tag the
/// store reported, if any. Errors from the store are passed back as
/// `SnapshipError::PutObject` with the original error as the source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key` in `bucket`
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        content_length: u64,
    ) -> Result<Option<String>>;
}

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<T> {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        content_length: u64,
    ) -> Result<Option<String>> {
        (**self).put_object(bucket, key, body, content_length).await
    }
}

/// Outcome of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    pub bucket: String,
    pub key: String,
    /// Bytes sent as the object body
    pub size: u64,
    pub e_tag: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// Remote key for an artifact: `prefix`, the separator, then the path as given
///
/// The path is used literally, so a path with directories (or an absolute
/// path) ends up as part of the key.
pub fn object_key<P: AsRef<Path>>(prefix: &str, artifact: P) -> String {
    format!(
        "{prefix}{KEY_SEPARATOR}{}",
        artifact.as_ref().to_string_lossy()
    )
}

/// Upload the file at `artifact` to `target.bucket` under `prefix/artifact`
///
/// The file is opened before the store is contacted: when it cannot be opened
/// no request is made. The local file is left untouched either way.
///
/// # Errors
/// * `SnapshipError::OpenArtifact` - the artifact cannot be opened or streamed
/// * `SnapshipError::Metadata` - the artifact size cannot be determined
/// * `SnapshipError::PutObject` - the store rejected or failed the request
pub async fn push_snapshot<S, P>(
    store: &S,
    target: &S3Info,
    prefix: &str,
    artifact: P,
) -> Result<UploadReceipt>
where
    S: ObjectStore + ?Sized,
    P: AsRef<Path>,
{
    let artifact = artifact.as_ref();
    let key = object_key(prefix, artifact);

    let file = tokio::fs::File::open(artifact)
        .await
        .map_err(|e| SnapshipError::OpenArtifact {
            path: artifact.to_path_buf(),
            source: e,
        })?;

    let size = file
        .metadata()
        .await
        .map_err(|e| SnapshipError::Metadata {
            path: artifact.to_path_buf(),
            source: e,
        })?
        .len();

    let body = ByteStream::read_from()
        .file(file)
        .length(Length::Exact(size))
        .build()
        .await
        .map_err(|e| SnapshipError::OpenArtifact {
            path: artifact.to_path_buf(),
            source: io::Error::other(e),
        })?;

    info!(
        bucket = %target.bucket,
        key = %key,
        size,
        "Pushing snapshot"
    );

    let e_tag = store.put_object(&target.bucket, &key, body, size).await?;

    debug!(bucket = %target.bucket, key = %key, e_tag = ?e_tag, "Snapshot pushed");

    Ok(UploadReceipt {
        bucket: target.bucket.clone(),
        key,
        size,
        e_tag,
        uploaded_at: Utc::now(),
    })
}

/// In-memory object store for tests
///
/// Bodies are collected eagerly so tests can compare the uploaded bytes.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: std::sync::Mutex<std::collections::HashMap<(String, String), Vec<u8>>>,
}

#[cfg(test)]
impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let objects = self.objects.lock().unwrap();
        objects.get(&(bucket.to_string(), key.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        _content_length: u64,
    ) -> Result<Option<String>> {
        let data = body
            .collect()
            .await
            .map_err(|e| SnapshipError::put_object(bucket, key, e))?
            .into_bytes()
            .to_vec();
        let e_tag = format!("\"{}\"", data.len());
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data);
        Ok(Some(e_tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_object_key_is_literal_concatenation() {
        assert_eq!(
            object_key("cluster-a", "etcd.snapshot.gz"),
            "cluster-a/etcd.snapshot.gz"
        );
        assert_eq!(
            object_key("cluster-a", "/var/lib/backup/etcd.snapshot.gz"),
            "cluster-a//var/lib/backup/etcd.snapshot.gz"
        );
        assert_eq!(object_key("", "snap.gz"), "/snap.gz");
    }

    #[test]
    fn test_changing_prefix_only_changes_leading_segment() {
        let path = "tmp/backups/etcd.snapshot.gz";
        let a = object_key("prod", path);
        let b = object_key("staging", path);

        assert_eq!(a.strip_prefix("prod"), b.strip_prefix("staging"));
        assert!(a.ends_with(path));
    }

    #[tokio::test]
    async fn test_push_snapshot_uploads_file_contents() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("etcd.snapshot.gz");
        fs::write(&artifact, b"gzip bytes").unwrap();
        let store = MemoryObjectStore::new();
        let target = S3Info::new("backups");

        let receipt = push_snapshot(&store, &target, "nightly", &artifact)
            .await
            .unwrap();

        let expected_key = format!("nightly/{}", artifact.display());
        assert_eq!(receipt.key, expected_key);
        assert_eq!(receipt.bucket, "backups");
        assert_eq!(receipt.size, 10);
        assert_eq!(receipt.e_tag.as_deref(), Some("\"10\""));
        assert_eq!(
            store.get("backups", &expected_key).unwrap(),
            b"gzip bytes".to_vec()
        );
        // Local artifact stays for the caller
        assert!(artifact.exists());
    }

    #[tokio::test]
    async fn test_push_missing_file_makes_no_request() {
        let dir = TempDir::new().unwrap();
        let mut store = MockObjectStore::new();
        store.expect_put_object().never();

        let err = push_snapshot(
            &store,
            &S3Info::new("backups"),
            "nightly",
            dir.path().join("missing.gz"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SnapshipError::OpenArtifact { .. }));
        assert!(err.to_string().contains("missing.gz"));
    }

    #[tokio::test]
    async fn test_push_issues_exactly_one_request() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("a.gz");
        fs::write(&artifact, vec![1u8; 2048]).unwrap();
        let expected_key = object_key("pfx", &artifact);

        let mut store = MockObjectStore::new();
        let key_for_match = expected_key.clone();
        store
            .expect_put_object()
            .withf(move |bucket, key, _body, len| {
                bucket == "bkt" && key == key_for_match && *len == 2048
            })
            .times(1)
            .returning(|_, _, _, _| Ok(Some("\"etag\"".to_string())));

        let receipt = push_snapshot(&store, &S3Info::new("bkt"), "pfx", &artifact)
            .await
            .unwrap();

        assert_eq!(receipt.key, expected_key);
        assert_eq!(receipt.e_tag.as_deref(), Some("\"etag\""));
    }

    #[tokio::test]
    async fn test_store_error_is_returned_as_is() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("a.gz");
        fs::write(&artifact, b"x").unwrap();

        let mut store = MockObjectStore::new();
        store
            .expect_put_object()
            .times(1)
            .returning(|bucket, key, _, _| {
                Err(SnapshipError::put_object(
                    bucket,
                    key,
                    io::Error::new(io::ErrorKind::TimedOut, "request timed out"),
                ))
            });

        let err = push_snapshot(&store, &S3Info::new("bkt"), "pfx", &artifact)
            .await
            .unwrap_err();

        assert!(err.is_remote());
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(
            source.downcast_ref::<io::Error>().unwrap().kind(),
            io::ErrorKind::TimedOut
        );
        assert!(artifact.exists());
    }
}
