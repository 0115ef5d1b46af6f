/*!
Amazon S3 client factory and object store.

Works against AWS and against S3-compatible stores reachable through a custom
endpoint.
*/

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use tracing::{debug, error, info};

use super::endpoint::S3_SERVICE;
use super::ObjectStore;
use crate::config::ServiceConfig;
use crate::{Result, SnapshipError};

/// Build an S3 client for `config`
///
/// Ambient credentials are resolved through the standard AWS provider chain
/// for the configured region:
/// 1. Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_SESSION_TOKEN)
/// 2. Shared credentials and config files (~/.aws)
/// 3. Web identity tokens, ECS task roles and EC2 instance roles
///
/// The client is cheap to clone and can be reused for any number of uploads.
///
/// # Errors
/// Returns `SnapshipError::Config` if the configuration is invalid or no
/// credentials provider can be resolved. Nothing is retried.
///
/// # Example
/// ```rust,no_run
/// use snapship_core::{create_client, ServiceConfig};
///
/// # async fn run() -> snapship_core::Result<()> {
/// let config = ServiceConfig::new("us-east-1").with_custom_endpoint("http://localhost:9000");
/// let client = create_client(&config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn create_client(config: &ServiceConfig) -> Result<S3Client> {
    config.validate()?;

    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .load()
        .await;

    if sdk_config.credentials_provider().is_none() {
        return Err(SnapshipError::config(format!(
            "failed to load AWS configuration: no credentials provider for region {}",
            config.region
        )));
    }

    let client = S3Client::from_conf(s3_config(&sdk_config, config));

    info!(
        region = %config.region,
        endpoint = config.custom_endpoint().unwrap_or("default"),
        "Initialized S3 client"
    );

    Ok(client)
}

/// S3 client configuration derived from loaded SDK settings
///
/// With a custom endpoint every request goes to that endpoint using path
/// style addressing, so the hostname is never rewritten with the bucket
/// name, while requests stay signed for the configured region. SDK level
/// retries are disabled.
pub fn s3_config(sdk_config: &SdkConfig, config: &ServiceConfig) -> aws_sdk_s3::Config {
    let mut builder = aws_sdk_s3::config::Builder::from(sdk_config)
        .region(Region::new(config.region.clone()))
        .retry_config(RetryConfig::disabled());

    if let Some(resolver) = config.endpoint_resolver() {
        let endpoint = resolver.resolve(S3_SERVICE, &config.region);
        debug!(url = %endpoint.url, region = %endpoint.signing_region, "Using custom S3 endpoint");

        builder = builder
            .endpoint_url(endpoint.url)
            .region(Region::new(endpoint.signing_region))
            .force_path_style(endpoint.hostname_immutable);
    }

    builder.build()
}

/// [`ObjectStore`] backed by an S3 client
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    /// Create the client for `config` and wrap it
    pub async fn connect(config: &ServiceConfig) -> Result<Self> {
        create_client(config).await.map(Self::new)
    }

    pub fn client(&self) -> &S3Client {
        &self.client
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        content_length: u64,
    ) -> Result<Option<String>> {
        debug!(
            bucket = %bucket,
            key = %key,
            size = content_length,
            "Starting S3 put_object operation"
        );

        #[cfg(feature = "metrics")]
        let timer = crate::observability::MetricsTimer::start_upload(content_length);

        let result = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(content_length as i64)
            .body(body)
            .send()
            .await;

        match result {
            Ok(output) => {
                #[cfg(feature = "metrics")]
                timer.finish();

                Ok(output.e_tag().map(str::to_owned))
            }
            Err(e) => {
                #[cfg(feature = "metrics")]
                timer.finish_with_error();

                Err(put_object_error(bucket, key, e))
            }
        }
    }
}

/// Wrap a put-object failure without interpreting it
fn put_object_error(
    bucket: &str,
    key: &str,
    err: SdkError<PutObjectError, HttpResponse>,
) -> SnapshipError {
    error!(bucket = %bucket, key = %key, error = %err, "S3 put_object failed");
    SnapshipError::put_object(bucket, key, err)
}
