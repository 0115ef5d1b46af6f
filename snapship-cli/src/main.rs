/*!
Snapship CLI - compress snapshot files and ship them to S3-compatible storage.

Every S3 setting can be passed as a flag or through the environment
(`AWS_REGION`, `CUSTOM_S3_ENDPOINT`, `BUCKET`, `S3_PREFIX`). Credentials are
resolved by the AWS SDK's default provider chain.
*/

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use snapship_core::{
    artifact_matches, decompress_file, init_observability, inspect_artifact, BackupPipeline,
    GzipCompressor, S3Info, S3ObjectStore, ServiceConfig,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "snapship")]
#[command(about = "Compress snapshot files and ship them to object storage")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON logs and JSON results
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compress a file into <FILE>.gz
    Compress {
        file: PathBuf,
        /// Gzip level, 0-9
        #[arg(
            short,
            long,
            default_value_t = 9,
            value_parser = clap::value_parser!(u32).range(0..=9)
        )]
        level: u32,
    },
    /// Upload an existing artifact
    Push {
        artifact: PathBuf,
        #[command(flatten)]
        s3: S3Args,
    },
    /// Compress a file and upload the artifact
    Backup {
        file: PathBuf,
        #[command(flatten)]
        s3: S3Args,
    },
    /// Decompress an artifact into DEST, which must not exist yet
    Restore { artifact: PathBuf, dest: PathBuf },
    /// Check that an artifact decompresses cleanly
    Verify {
        artifact: PathBuf,
        /// Original file the artifact must decompress to
        #[arg(long)]
        against: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
struct S3Args {
    /// Region used for credentials and request signing
    #[arg(long, env = "AWS_REGION")]
    region: String,

    /// S3-compatible endpoint to use instead of the AWS regional endpoint
    #[arg(long, env = "CUSTOM_S3_ENDPOINT")]
    custom_s3_endpoint: Option<String>,

    /// Destination bucket
    #[arg(long, env = "BUCKET")]
    bucket: String,

    /// Key prefix prepended to the artifact path
    #[arg(long, env = "S3_PREFIX")]
    s3_prefix: String,
}

impl S3Args {
    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            region: self.region.clone(),
            custom_s3_endpoint: self.custom_s3_endpoint.clone(),
        }
    }

    fn target(&self) -> S3Info {
        S3Info::new(self.bucket.clone())
    }

    async fn pipeline(&self) -> anyhow::Result<BackupPipeline<S3ObjectStore>> {
        let pipeline =
            BackupPipeline::connect(&self.service_config(), self.target(), self.s3_prefix.clone())
                .await
                .context("failed to create S3 client")?;
        Ok(pipeline)
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_observability(cli.json, cli.verbose)?;

    let result = match cli.command {
        Commands::Compress { file, level } => compress(&file, level, cli.json).await,
        Commands::Push { artifact, s3 } => push(&artifact, &s3, cli.json).await,
        Commands::Backup { file, s3 } => backup(&file, &s3, cli.json).await,
        Commands::Restore { artifact, dest } => restore(&artifact, &dest),
        Commands::Verify { artifact, against } => verify(&artifact, against.as_deref()),
    };

    if let Err(e) = &result {
        error!("{e:#}");
    }

    #[cfg(feature = "metrics")]
    if cli.verbose {
        eprintln!("{}", snapship_core::SnapshipMetrics::global().gather_metrics()?);
    }

    result
}

async fn compress(file: &Path, level: u32, json: bool) -> anyhow::Result<()> {
    let file = file.to_path_buf();
    let artifact =
        tokio::task::spawn_blocking(move || GzipCompressor::with_level(level).compress_file(file))
            .await??;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "artifact": artifact.path,
                "source_size": artifact.source_size,
                "compressed_size": artifact.compressed_size,
                "sha256": artifact.sha256,
            })
        );
    } else {
        println!("{}", artifact.path.display());
    }
    Ok(())
}

async fn push(artifact: &Path, s3: &S3Args, json: bool) -> anyhow::Result<()> {
    let pipeline = s3.pipeline().await?;
    let receipt = pipeline.push(artifact).await?;

    if json {
        println!("{}", serde_json::to_string(&receipt)?);
    } else {
        println!("✓ Uploaded to s3://{}/{}", receipt.bucket, receipt.key);
    }
    Ok(())
}

async fn backup(file: &Path, s3: &S3Args, json: bool) -> anyhow::Result<()> {
    let pipeline = s3.pipeline().await?;
    let report = pipeline.run(file).await?;

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!(
            "✓ {} ({} -> {} bytes) uploaded to s3://{}/{}",
            report.artifact,
            report.source_size,
            report.compressed_size,
            report.receipt.bucket,
            report.receipt.key
        );
    }
    Ok(())
}

fn restore(artifact: &Path, dest: &Path) -> anyhow::Result<()> {
    let size = decompress_file(artifact, dest)?;
    println!("✓ Restored {} ({size} bytes)", dest.display());
    Ok(())
}

fn verify(artifact: &Path, against: Option<&Path>) -> anyhow::Result<()> {
    match against {
        Some(original) => {
            if !artifact_matches(artifact, original)? {
                bail!(
                    "{} does not decompress to {}",
                    artifact.display(),
                    original.display()
                );
            }
            info!(artifact = %artifact.display(), "Artifact matches original");
            println!("✓ Artifact matches {}", original.display());
        }
        None => {
            let size = inspect_artifact(artifact)?;
            println!("✓ Artifact is valid ({size} bytes decompressed)");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_backup_with_flags() {
        let cli = Cli::try_parse_from([
            "snapship",
            "backup",
            "etcd.snapshot",
            "--region",
            "eu-west-1",
            "--bucket",
            "backups",
            "--s3-prefix",
            "cluster-a",
            "--custom-s3-endpoint",
            "http://minio:9000",
        ])
        .unwrap();

        let Commands::Backup { file, s3 } = cli.command else {
            panic!("expected backup command");
        };
        assert_eq!(file, PathBuf::from("etcd.snapshot"));
        assert_eq!(
            s3.service_config(),
            ServiceConfig::new("eu-west-1").with_custom_endpoint("http://minio:9000")
        );
        assert_eq!(s3.target(), S3Info::new("backups"));
        assert_eq!(s3.s3_prefix, "cluster-a");
    }

    #[test]
    fn test_compress_level_is_bounded() {
        assert!(Cli::try_parse_from(["snapship", "compress", "f", "--level", "10"]).is_err());

        let cli = Cli::try_parse_from(["snapship", "compress", "f"]).unwrap();
        assert!(matches!(cli.command, Commands::Compress { level: 9, .. }));
    }

    #[test]
    fn test_restore_and_verify_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("snap");
        let dest = dir.path().join("restored");
        std::fs::write(&source, b"snapshot bytes").unwrap();

        let artifact = GzipCompressor::best().compress_file(&source).unwrap();

        restore(&artifact.path, &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"snapshot bytes");
        verify(&artifact.path, Some(&source)).unwrap();
        verify(&artifact.path, None).unwrap();

        std::fs::write(&source, b"changed").unwrap();
        assert!(verify(&artifact.path, Some(&source)).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["snapship", "verify", "a.gz", "--json", "-v"]).unwrap();
        assert!(cli.json);
        assert!(cli.verbose);
    }
}
