/*!
Gzip compression of snapshot files.

A snapshot is compressed into a sibling file named `<source>.gz`. The sibling
is either complete and synced to disk when the call returns successfully, or
it does not exist at all: every failure after the destination was created
removes it again before the error reaches the caller.
*/

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::{write::GzEncoder, Compression};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::{Result, SnapshipError};

/// Suffix appended to the source path to name the compressed artifact
pub const COMPRESSED_SUFFIX: &str = ".gz";

/// Path of the artifact produced for `source`
pub fn compressed_path(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_owned();
    name.push(COMPRESSED_SUFFIX);
    PathBuf::from(name)
}

/// Compress `source` at the strongest gzip level and return the artifact path
///
/// This is the plain form of [`GzipCompressor::compress_file`] for callers that
/// only need the hand-off path.
pub fn compress_file<P: AsRef<Path>>(source: P) -> Result<PathBuf> {
    GzipCompressor::best()
        .compress_file(source)
        .map(|artifact| artifact.path)
}

/// Description of a compressed artifact that was written and synced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedArtifact {
    /// Location of the `.gz` file
    pub path: PathBuf,
    /// Number of bytes read from the source
    pub source_size: u64,
    /// Number of bytes written to the artifact
    pub compressed_size: u64,
    /// Hex encoded SHA-256 of the artifact bytes
    pub sha256: String,
}

/// Gzip file compressor
///
/// Defaults to the best compression level; snapshots are written once and
/// shipped over the network, so size wins over CPU time.
///
/// # Example
/// ```rust,no_run
/// use snapship_core::GzipCompressor;
///
/// let artifact = GzipCompressor::best().compress_file("/var/backups/etcd.snapshot")?;
/// assert!(artifact.path.ends_with("etcd.snapshot.gz"));
/// # Ok::<(), snapship_core::SnapshipError>(())
/// ```
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    level: Compression,
}

impl GzipCompressor {
    /// Create a compressor at the best compression level
    pub fn new() -> Self {
        Self::best()
    }

    /// Maximum compression (level 9)
    pub fn best() -> Self {
        Self {
            level: Compression::best(),
        }
    }

    /// Fast compression (level 1)
    pub fn fast() -> Self {
        Self {
            level: Compression::fast(),
        }
    }

    /// Create a compressor with the given level, clamped to 0-9
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }

    /// Configured compression level
    pub fn level(&self) -> u32 {
        self.level.level()
    }

    /// Compress `source` into `<source>.gz`
    ///
    /// The destination is created owner read/write only, truncating whatever
    /// was at that path. The source file is never modified. Both file handles
    /// are released on every exit path.
    ///
    /// # Errors
    /// * `SnapshipError::OpenSource` - the source cannot be opened
    /// * `SnapshipError::AllocateArtifact` - the destination cannot be created
    /// * `SnapshipError::WriteArtifact` - streaming the data failed
    /// * `SnapshipError::FinishArtifact` - the gzip trailer could not be written
    /// * `SnapshipError::SyncArtifact` - the destination could not be synced
    pub fn compress_file<P: AsRef<Path>>(&self, source: P) -> Result<CompressedArtifact> {
        let source = source.as_ref();
        info!(path = %source.display(), level = self.level(), "Compressing snapshot");

        let result = self.compress_into_sibling(source);

        #[cfg(feature = "metrics")]
        crate::observability::SnapshipMetrics::global().record_compression(result.as_ref().ok());

        match &result {
            Ok(artifact) => info!(
                path = %artifact.path.display(),
                source_size = artifact.source_size,
                compressed_size = artifact.compressed_size,
                "Snapshot compressed"
            ),
            Err(e) => warn!(path = %source.display(), error = %e, "Snapshot compression failed"),
        }

        result
    }

    fn compress_into_sibling(&self, source: &Path) -> Result<CompressedArtifact> {
        let input = File::open(source).map_err(|e| SnapshipError::OpenSource {
            path: source.to_path_buf(),
            source: e,
        })?;

        self.compress_reader(input, compressed_path(source))
    }

    /// Stream `input` into a freshly created artifact at `dest`
    pub(crate) fn compress_reader<R: Read>(
        &self,
        mut input: R,
        dest: PathBuf,
    ) -> Result<CompressedArtifact> {
        let output = create_artifact_file(&dest).map_err(|e| SnapshipError::AllocateArtifact {
            path: dest.clone(),
            source: e,
        })?;

        // Everything holding `output` is declared after the guard, so on an
        // early return the handle is closed before the file is removed.
        let pending = PendingArtifact::new(dest.clone());
        let mut encoder = GzEncoder::new(HashingWriter::new(output), self.level);

        let source_size =
            io::copy(&mut input, &mut encoder).map_err(|e| SnapshipError::WriteArtifact {
                path: dest.clone(),
                source: e,
            })?;

        let (output, digest, compressed_size) = encoder
            .finish()
            .map_err(|e| SnapshipError::FinishArtifact {
                path: dest.clone(),
                source: e,
            })?
            .into_parts();

        output.sync_all().map_err(|e| SnapshipError::SyncArtifact {
            path: dest.clone(),
            source: e,
        })?;
        drop(output);

        debug!(path = %dest.display(), sha256 = %digest, "Artifact synced to disk");

        Ok(CompressedArtifact {
            path: pending.commit(),
            source_size,
            compressed_size,
            sha256: digest,
        })
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

fn create_artifact_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options.open(path)
}

/// Removes a freshly created artifact unless it is committed
///
/// Removal is best effort: a failure is logged and never replaces the error
/// that caused the artifact to be abandoned.
pub(crate) struct PendingArtifact {
    path: PathBuf,
    committed: bool,
}

impl PendingArtifact {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    /// Keep the file and hand back its path
    pub(crate) fn commit(mut self) -> PathBuf {
        self.committed = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for PendingArtifact {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed partial artifact"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove partial artifact"
            ),
        }
    }
}

/// Writer that hashes and counts every byte passed to the inner writer
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn into_parts(self) -> (W, String, u64) {
        let digest = self.hasher.finalize();
        let hex = digest.iter().map(|b| format!("{b:02x}")).collect();
        (self.inner, hex, self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
