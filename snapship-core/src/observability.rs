/*!
Observability for the snapship pipeline.

- Structured logging setup through `tracing-subscriber`
- Prometheus metrics for compressions and uploads (`metrics` feature)
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
#[cfg(feature = "metrics")]
use std::time::Instant;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

#[cfg(feature = "metrics")]
use crate::compression::CompressedArtifact;
use crate::{Result, SnapshipError};

/// Filter directive applied when `RUST_LOG` does not say otherwise
pub const DEFAULT_DIRECTIVE: &str = "snapship=info";

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<SnapshipMetrics> = OnceLock::new();

/// Metrics collected for compressions and uploads
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct SnapshipMetrics {
    pub compressions_total: Counter,
    pub compression_errors_total: Counter,
    pub artifact_size_bytes: Histogram,

    pub uploads_total: Counter,
    pub upload_errors_total: Counter,
    pub upload_latency_seconds: Histogram,

    registry: Registry,
}

#[cfg(feature = "metrics")]
fn metric_err(name: &str, e: prometheus::Error) -> SnapshipError {
    SnapshipError::config(format!("failed to set up metric {name}: {e}"))
}

#[cfg(feature = "metrics")]
impl SnapshipMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let compressions_total = Counter::new(
            "snapship_compressions_total",
            "Snapshot files successfully compressed",
        )
        .map_err(|e| metric_err("compressions_total", e))?;

        let compression_errors_total = Counter::new(
            "snapship_compression_errors_total",
            "Snapshot compressions that failed",
        )
        .map_err(|e| metric_err("compression_errors_total", e))?;

        let artifact_size_bytes = Histogram::with_opts(
            HistogramOpts::new(
                "snapship_artifact_size_bytes",
                "Size of compressed artifacts in bytes",
            )
            .buckets(prometheus::exponential_buckets(1024.0, 4.0, 12).map_err(|e| {
                metric_err("artifact_size_bytes", e)
            })?),
        )
        .map_err(|e| metric_err("artifact_size_bytes", e))?;

        let uploads_total = Counter::new("snapship_uploads_total", "put_object requests issued")
            .map_err(|e| metric_err("uploads_total", e))?;

        let upload_errors_total = Counter::new(
            "snapship_upload_errors_total",
            "put_object requests that failed",
        )
        .map_err(|e| metric_err("upload_errors_total", e))?;

        let upload_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "snapship_upload_latency_seconds",
            "Duration of put_object requests in seconds",
        ))
        .map_err(|e| metric_err("upload_latency_seconds", e))?;

        registry
            .register(Box::new(compressions_total.clone()))
            .map_err(|e| metric_err("compressions_total", e))?;
        registry
            .register(Box::new(compression_errors_total.clone()))
            .map_err(|e| metric_err("compression_errors_total", e))?;
        registry
            .register(Box::new(artifact_size_bytes.clone()))
            .map_err(|e| metric_err("artifact_size_bytes", e))?;
        registry
            .register(Box::new(uploads_total.clone()))
            .map_err(|e| metric_err("uploads_total", e))?;
        registry
            .register(Box::new(upload_errors_total.clone()))
            .map_err(|e| metric_err("upload_errors_total", e))?;
        registry
            .register(Box::new(upload_latency_seconds.clone()))
            .map_err(|e| metric_err("upload_latency_seconds", e))?;

        Ok(Self {
            compressions_total,
            compression_errors_total,
            artifact_size_bytes,
            uploads_total,
            upload_errors_total,
            upload_latency_seconds,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    pub fn global() -> &'static SnapshipMetrics {
        METRICS.get_or_init(|| Self::new().expect("Failed to initialize snapship metrics"))
    }

    /// Record the outcome of one compression
    pub fn record_compression(&self, artifact: Option<&CompressedArtifact>) {
        match artifact {
            Some(artifact) => {
                self.compressions_total.inc();
                self.artifact_size_bytes
                    .observe(artifact.compressed_size as f64);
            }
            None => self.compression_errors_total.inc(),
        }
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| SnapshipError::config(format!("failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| SnapshipError::config(format!("metrics are not valid UTF-8: {e}")))
    }
}

/// Times a single put_object request
#[cfg(feature = "metrics")]
pub struct MetricsTimer {
    start: Instant,
}

#[cfg(feature = "metrics")]
impl MetricsTimer {
    /// Count an upload of `size` bytes and start timing it
    pub fn start_upload(size: u64) -> Self {
        let metrics = SnapshipMetrics::global();
        metrics.uploads_total.inc();
        tracing::trace!(size, "Upload timer started");

        Self {
            start: Instant::now(),
        }
    }

    /// Record the latency of a successful request
    pub fn finish(self) {
        SnapshipMetrics::global()
            .upload_latency_seconds
            .observe(self.start.elapsed().as_secs_f64());
    }

    /// Record the latency and the failure of a request
    pub fn finish_with_error(self) {
        let metrics = SnapshipMetrics::global();
        metrics
            .upload_latency_seconds
            .observe(self.start.elapsed().as_secs_f64());
        metrics.upload_errors_total.inc();
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence; otherwise events from snapship crates are
/// shown at `info` (or `debug` when `verbose` is set). With `json` every
/// event is written as one JSON object per line.
pub fn init_observability(json: bool, verbose: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    SnapshipMetrics::global();

    let default_directive = if verbose {
        "snapship=debug"
    } else {
        DEFAULT_DIRECTIVE
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| SnapshipError::config(format!("invalid log filter: {e}")))?;

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };

    result.map_err(|e| {
        SnapshipError::config(format!("failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!("snapship observability initialized");
    Ok(())
}

/// Initialize observability with human readable output at `info`
pub fn init_default_observability() -> Result<()> {
    init_observability(false, false)
}
