/*!
# Snapship Core

Two-stage backup artifact pipeline: compress a local snapshot file, then ship
the compressed artifact to S3 (or any S3-compatible store) under a key prefix.

- The compressor writes `<source>.gz` at the best gzip level, syncs it to disk
  and removes it again on any failure, so no partial artifact is ever left.
- The uploader streams the artifact as the body of a single put-object
  request to `prefix/<artifact path>`.
- The client factory builds a reusable S3 client for a region and an optional
  custom endpoint.

Deciding when to back up, producing the snapshot, retention and retries are
left to the caller.

## Usage

```rust,no_run
use snapship_core::{
    compress_file, create_client, push_snapshot, S3Info, S3ObjectStore, ServiceConfig,
};

# async fn run() -> snapship_core::Result<()> {
let service = ServiceConfig::new("us-east-1");
let store = S3ObjectStore::new(create_client(&service).await?);

let artifact = compress_file("/var/backups/etcd.snapshot")?;
push_snapshot(&store, &S3Info::new("backups"), "cluster-a", &artifact).await?;
# Ok(())
# }
```
*/

pub mod compression;
pub mod config;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod restore;
pub mod upload;

pub use compression::{compress_file, compressed_path, CompressedArtifact, GzipCompressor};
pub use config::{S3Info, ServiceConfig};
pub use error::{Result, SnapshipError};
pub use observability::{init_default_observability, init_observability};
#[cfg(feature = "metrics")]
pub use observability::{MetricsTimer, SnapshipMetrics};
pub use pipeline::{BackupPipeline, BackupReport};
pub use restore::{artifact_matches, decompress_file, inspect_artifact};
pub use upload::{
    create_client, object_key, push_snapshot, s3_config, ObjectStore, S3ObjectStore,
    StaticEndpoint, UploadReceipt,
};
