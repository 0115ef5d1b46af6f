/*!
Error types for the snapship pipeline.
*/

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout snapship.
pub type Result<T> = std::result::Result<T, SnapshipError>;

/// Boxed error coming back from an object store.
pub type RemoteError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while compressing or uploading an artifact.
#[derive(Error, Debug)]
pub enum SnapshipError {
    /// The source snapshot could not be opened for reading
    #[error("failed to open file for compression {path:?}: {source}")]
    OpenSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The compressed destination file could not be created
    #[error("failed to allocate compressed file {path:?}: {source}")]
    AllocateArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Streaming the source through the compressor failed mid-way
    #[error("failed to write compressed file {path:?}: {source}")]
    WriteArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The compressing writer failed to flush its buffer or trailer
    #[error("failed to close writer for {path:?}: {source}")]
    FinishArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The compressed file could not be forced to stable storage
    #[error("failed to sync compressed file {path:?} to disk: {source}")]
    SyncArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The artifact could not be opened for reading
    #[error("failed to open artifact {path:?}: {source}")]
    OpenArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Decompressing an artifact or writing the restored file failed
    #[error("failed to restore {path:?}: {source}")]
    Restore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File metadata could not be read
    #[error("failed to read metadata of {path:?}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration or credential resolution failure
    #[error("configuration error: {0}")]
    Config(String),

    /// The put-object request failed; the store's error is kept as the source
    #[error("failed to put object {key:?} into bucket {bucket:?}: {source}")]
    PutObject {
        bucket: String,
        key: String,
        #[source]
        source: RemoteError,
    },

    /// A blocking compression task did not run to completion
    #[error("compression task failed: {0}")]
    Task(String),
}

impl SnapshipError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new put-object error, keeping the store error as the source
    pub fn put_object<E>(bucket: impl Into<String>, key: impl Into<String>, source: E) -> Self
    where
        E: Into<RemoteError>,
    {
        Self::PutObject {
            bucket: bucket.into(),
            key: key.into(),
            source: source.into(),
        }
    }

    /// Local path the error refers to, if any
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::OpenSource { path, .. }
            | Self::AllocateArtifact { path, .. }
            | Self::WriteArtifact { path, .. }
            | Self::FinishArtifact { path, .. }
            | Self::SyncArtifact { path, .. }
            | Self::OpenArtifact { path, .. }
            | Self::Restore { path, .. }
            | Self::Metadata { path, .. } => Some(path),
            Self::Config(_) | Self::PutObject { .. } | Self::Task(_) => None,
        }
    }

    /// True for failures of the remote put-object call
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::PutObject { .. })
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
