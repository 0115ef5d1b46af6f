//! Configuration values handed to the client factory and the uploader
//!
//! The surrounding application decides where these values come from (flags,
//! environment, a file). The core only validates them and never reads the
//! process environment itself.

use serde::{Deserialize, Serialize};

use crate::upload::endpoint::StaticEndpoint;
use crate::{Result, SnapshipError};

/// Object-store service settings shared by every upload target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Region used to load credentials and sign requests
    pub region: String,
    /// Alternate S3 API endpoint for S3-compatible stores (MinIO, Ceph, R2...)
    #[serde(default)]
    pub custom_s3_endpoint: Option<String>,
}

impl ServiceConfig {
    /// Create a configuration that talks to the provider's regional endpoint
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            custom_s3_endpoint: None,
        }
    }

    /// Route every request to `endpoint` instead of the regional default
    pub fn with_custom_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.custom_s3_endpoint = Some(endpoint.into());
        self
    }

    /// The configured custom endpoint, treating an empty string as unset
    pub fn custom_endpoint(&self) -> Option<&str> {
        self.custom_s3_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
    }

    /// Endpoint strategy selected at client construction time
    pub fn endpoint_resolver(&self) -> Option<StaticEndpoint> {
        self.custom_endpoint().map(StaticEndpoint::new)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            return Err(SnapshipError::config("region must not be empty"));
        }

        if let Some(endpoint) = self.custom_endpoint() {
            let has_scheme =
                endpoint.starts_with("http://") || endpoint.starts_with("https://");
            let has_host = endpoint
                .split_once("://")
                .map(|(_, rest)| !rest.is_empty())
                .unwrap_or(false);
            if !has_scheme || !has_host {
                return Err(SnapshipError::config(format!(
                    "custom S3 endpoint must be an absolute http(s) URL, got {endpoint:?}"
                )));
            }
        }

        Ok(())
    }
}

/// Bucket the artifacts are pushed into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Info {
    pub bucket: String,
}

impl S3Info {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
        }
    }

    /// Validate the bucket name
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(SnapshipError::config("bucket name must not be empty"));
        }
        Ok(())
    }
}
