//! Per-source export pipelines.
//!
//! A [`Pipeline`] is one SDK meter provider bound to one source's resource and
//! a periodic reader over that source's exporter. The reader runs on its own
//! clock: every export interval it collects whatever the pipeline's counters
//! hold at that instant and ships it. Nothing in the generation loop waits for
//! it or tells it when to run.
//!
//! Shutdown is the only coordination point. [`Pipeline::shutdown`] has the
//! reader perform one last collection and export, then release the exporter.
//! The SDK does this synchronously, so it runs on tokio's blocking pool under
//! a deadline.

use std::time::Duration;

use opentelemetry::{
    InstrumentationScope,
    metrics::{Counter, MeterProvider},
};
use opentelemetry_sdk::{
    Resource,
    error::OTelSdkError,
    metrics::{PeriodicReader, SdkMeterProvider, exporter::PushMetricExporter},
};
use tokio::{task, time};
use tracing::{debug, info};

use crate::{config, exporter::Instrumented, resource};

/// Errors produced by [`Pipeline`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The SDK reported a failed flush or shutdown.
    #[error("Metrics SDK error: {0}")]
    Sdk(#[from] OTelSdkError),
    /// Shutdown did not finish in time.
    #[error("Shutdown did not complete within {0:?}")]
    Timeout(Duration),
    /// The blocking SDK call panicked or was cancelled.
    #[error("SDK task failed: {0}")]
    Join(#[from] task::JoinError),
    /// The pipeline has been shut down.
    #[error("Pipeline has been shut down")]
    Shutdown,
}

/// One source's export pipeline.
#[derive(Debug)]
pub struct Pipeline {
    source: String,
    resource: Resource,
    scope: InstrumentationScope,
    provider: SdkMeterProvider,
    is_shutdown: bool,
}

impl Pipeline {
    /// Create the pipeline for `source` and start its periodic reader. The
    /// first export happens one `export_interval` after this call.
    #[must_use]
    pub fn new<E>(service_name: &str, source: &str, exporter: E, export_interval: Duration) -> Self
    where
        E: PushMetricExporter,
    {
        let resource = resource::for_source(service_name, source);
        let reader = PeriodicReader::builder(Instrumented::new(exporter, source))
            .with_interval(export_interval)
            .build();
        let provider = SdkMeterProvider::builder()
            .with_resource(resource.clone())
            .with_reader(reader)
            .build();
        let scope = InstrumentationScope::builder(format!("{service_name}-{source}"))
            .with_version(env!("CARGO_PKG_VERSION"))
            .build();

        Self {
            source: source.to_string(),
            resource,
            scope,
            provider,
            is_shutdown: false,
        }
    }

    /// The source this pipeline exports for.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The resource every export from this pipeline carries.
    #[must_use]
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Create a counter read by this pipeline's reader.
    #[must_use]
    pub fn counter(&self, instrument: &config::Instrument) -> Counter<u64> {
        let meter = self.provider.meter_with_scope(self.scope.clone());
        let builder = meter
            .u64_counter(instrument.name.clone())
            .with_description(instrument.description.clone());
        if instrument.unit.is_empty() {
            builder.build()
        } else {
            builder.with_unit(instrument.unit.clone()).build()
        }
    }

    /// Whether [`Pipeline::shutdown`] has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Collect and export immediately, outside the periodic schedule.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline is shut down or the export fails.
    pub async fn force_flush(&self) -> Result<(), Error> {
        if self.is_shutdown {
            return Err(Error::Shutdown);
        }
        let provider = self.provider.clone();
        task::spawn_blocking(move || provider.force_flush()).await??;
        Ok(())
    }

    /// Perform one final export, then release the exporter.
    ///
    /// Waits at most `timeout`. A shutdown that overruns is reported as
    /// [`Error::Timeout`] and left to finish in the background. Calls after
    /// the first do nothing and return `Ok`.
    ///
    /// # Errors
    ///
    /// Returns an error if the final export or the release fails, or on
    /// timeout.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<(), Error> {
        if self.is_shutdown {
            debug!(source = %self.source, "pipeline already shut down");
            return Ok(());
        }
        self.is_shutdown = true;

        let provider = self.provider.clone();
        let shutdown = task::spawn_blocking(move || provider.shutdown_with_timeout(timeout));
        let result = match time::timeout(timeout, shutdown).await {
            Ok(joined) => joined?.map_err(Error::from),
            Err(_elapsed) => Err(Error::Timeout(timeout)),
        };
        info!(source = %self.source, "pipeline shut down");
        result
    }
}
