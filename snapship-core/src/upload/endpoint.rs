/*!
Custom endpoint resolution for S3-compatible stores.
*/

/// Service name the uploader resolves endpoints for
pub const S3_SERVICE: &str = "s3";

/// Where requests for a service/region pair are sent and how they are signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// Base URL every request goes to
    pub url: String,
    /// Region the requests are signed for
    pub signing_region: String,
    /// When set, the bucket is never folded into the hostname
    pub hostname_immutable: bool,
}

/// Resolver that sends every request to one fixed endpoint
///
/// Stateless; the same input always yields the same endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticEndpoint {
    url: String,
}

impl StaticEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Resolve the endpoint for `service` in `region`
    ///
    /// The service is ignored: S3 is the only service spoken to. The region is
    /// passed through unchanged so requests are still signed for it.
    pub fn resolve(&self, _service: &str, region: &str) -> ResolvedEndpoint {
        ResolvedEndpoint {
            url: self.url.clone(),
            signing_region: region.to_string(),
            hostname_immutable: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_keeps_url_and_region() {
        let resolver = StaticEndpoint::new("https://s3.example.internal:9000");

        let endpoint = resolver.resolve(S3_SERVICE, "eu-central-1");

        assert_eq!(endpoint.url, "https://s3.example.internal:9000");
        assert_eq!(endpoint.signing_region, "eu-central-1");
        assert!(endpoint.hostname_immutable);
    }

    #[test]
    fn test_resolve_is_pure() {
        let resolver = StaticEndpoint::new("http://minio:9000");

        let first = resolver.resolve(S3_SERVICE, "us-east-1");
        let second = resolver.resolve("sts", "us-east-1");

        assert_eq!(first, second);
        assert_eq!(resolver.url(), "http://minio:9000");
        assert_ne!(
            resolver.resolve(S3_SERVICE, "us-west-2").signing_region,
            first.signing_region
        );
    }
}
