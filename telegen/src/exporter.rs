//! Exporters ship collected metrics to a collector.
//!
//! The SDK's [`PushMetricExporter`] is the seam between a pipeline and the
//! wire. [`OtlpGrpc`] owns the single insecure gRPC channel to the collector
//! and builds one OTLP exporter per source on top of it, so every source has
//! its own exporter lifecycle but the process has one outbound client.
//!
//! ## Metrics
//!
//! `requests_sent`: Total number of export requests sent
//! `request_ok`: Successful export requests
//! `request_failure`: Failed export requests
//!

use std::time::Duration;

use http::Uri;
use metrics::counter;
use opentelemetry_otlp::{ExporterBuildError, MetricExporter, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    error::OTelSdkResult,
    metrics::{Temporality, data::ResourceMetrics, exporter::PushMetricExporter},
};
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

/// Errors produced while setting up exporters.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// gRPC transport error
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    /// The OTLP exporter could not be built.
    #[error("Failed to build OTLP exporter: {0}")]
    Build(#[from] ExporterBuildError),
}

/// OTLP/gRPC exporter factory over one insecure channel.
#[derive(Debug, Clone)]
pub struct OtlpGrpc {
    channel: Channel,
    request_timeout: Duration,
    temporality: Temporality,
}

impl OtlpGrpc {
    /// Create a factory for the collector at `uri`.
    ///
    /// The channel connects lazily: no connection is attempted until the first
    /// export, so a collector that is not yet up does not fail setup. Must be
    /// called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if `uri` is not a valid endpoint.
    pub fn new(
        uri: &Uri,
        request_timeout: Duration,
        temporality: impl Into<Temporality>,
    ) -> Result<Self, Error> {
        let channel = Endpoint::from_shared(uri.to_string())?
            .connect_timeout(Duration::from_secs(1))
            .connect_lazy();
        debug!("OTLP exporter configured for {uri}");

        Ok(Self {
            channel,
            request_timeout,
            temporality: temporality.into(),
        })
    }

    /// A new OTLP exporter on the shared channel. Shutting it down leaves
    /// exporters built earlier or later usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the SDK refuses the exporter configuration.
    pub fn exporter(&self) -> Result<MetricExporter, Error> {
        let exporter = MetricExporter::builder()
            .with_tonic()
            .with_channel(self.channel.clone())
            .with_timeout(self.request_timeout)
            .with_temporality(self.temporality)
            .build()?;
        Ok(exporter)
    }
}

/// Wraps an exporter to account for every request it sends.
#[derive(Debug)]
pub struct Instrumented<E> {
    inner: E,
    source: String,
    labels: Vec<(String, String)>,
}

impl<E> Instrumented<E>
where
    E: PushMetricExporter,
{
    /// Wrap `inner`, the exporter for `source`.
    #[must_use]
    pub fn new(inner: E, source: &str) -> Self {
        let labels = vec![
            ("component".to_string(), "exporter".to_string()),
            ("component_name".to_string(), "otlp".to_string()),
            ("source".to_string(), source.to_string()),
        ];
        Self {
            inner,
            source: source.to_string(),
            labels,
        }
    }
}

/// Count the outcome of one export request. Failures are logged, never
/// retried.
fn record(source: &str, labels: &[(String, String)], result: &OTelSdkResult) {
    counter!("requests_sent", labels).increment(1);
    match result {
        Ok(()) => counter!("request_ok", labels).increment(1),
        Err(err) => {
            warn!(source = %source, "Export failed: {err}");
            let mut error_labels = labels.to_vec();
            error_labels.push(("error".to_string(), err.to_string()));
            counter!("request_failure", &error_labels).increment(1);
        }
    }
}

impl<E> PushMetricExporter for Instrumented<E>
where
    E: PushMetricExporter,
{
    async fn export(&self, metrics: &ResourceMetrics) -> OTelSdkResult {
        let result = self.inner.export(metrics).await;
        record(&self.source, &self.labels, &result);
        result
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    fn shutdown_with_timeout(&self, timeout: Duration) -> OTelSdkResult {
        debug!(source = %self.source, "releasing exporter");
        self.inner.shutdown_with_timeout(timeout)
    }

    fn shutdown(&self) -> OTelSdkResult {
        debug!(source = %self.source, "releasing exporter");
        self.inner.shutdown()
    }

    fn temporality(&self) -> Temporality {
        self.inner.temporality()
    }
}


#[cfg(test)]
mod tests {
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use opentelemetry_sdk::error::OTelSdkError;

    use super::*;

    fn counters(recorder: &DebuggingRecorder) -> Vec<(String, u64)> {
        recorder
            .snapshotter()
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| match value {
                DebugValue::Counter(v) => Some((key.key().name().to_string(), v)),
                _ => None,
            })
            .collect()
    }

    fn total(counters: &[(String, u64)], name: &str) -> u64 {
        counters
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .sum()
    }

    #[test]
    fn outcomes_are_counted() {
        let recorder = DebuggingRecorder::new();
        let labels = vec![("source".to_string(), "src1".to_string())];

        metrics::with_local_recorder(&recorder, || {
            record("src1", &labels, &Ok(()));
            record("src1", &labels, &Ok(()));
            record(
                "src1",
                &labels,
                &Err(OTelSdkError::InternalFailure("collector down".into())),
            );
        });

        let counters = counters(&recorder);
        assert_eq!(total(&counters, "requests_sent"), 3);
        assert_eq!(total(&counters, "request_ok"), 2);
        assert_eq!(total(&counters, "request_failure"), 1);
    }

    #[tokio::test]
    async fn exporters_share_one_channel_but_not_a_lifecycle() {
        // Port 1 on loopback: nothing listens there.
        let uri: Uri = "http://127.0.0.1:1".parse().expect("valid uri");
        let otlp = OtlpGrpc::new(&uri, Duration::from_millis(500), Temporality::Cumulative)
            .expect("valid endpoint");

        let first = otlp.exporter().expect("exporter must build");
        let second = otlp.exporter().expect("exporter must build");
        assert_eq!(first.temporality(), Temporality::Cumulative);

        first.shutdown().expect("shutdown must succeed");
        // The sibling is untouched by the first one's shutdown.
        second.force_flush().expect("sibling must still be live");
        second.shutdown().expect("shutdown must succeed");
    }

    #[tokio::test]
    async fn temporality_is_passed_through() {
        let uri: Uri = "http://127.0.0.1:1".parse().expect("valid uri");
        let otlp = OtlpGrpc::new(&uri, Duration::from_millis(500), Temporality::Delta)
            .expect("valid endpoint");
        let exporter = Instrumented::new(otlp.exporter().expect("exporter must build"), "src1");
        assert_eq!(exporter.temporality(), Temporality::Delta);
    }
}
