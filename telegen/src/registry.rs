//! The source registry.
//!
//! A [`Registry`] is built once at startup and holds, for every configured
//! source in configuration order, exactly one resource, one pipeline and one
//! counter. It is passed by value to the generator and handed back for
//! shutdown; there is no process-wide instance.

use std::time::Duration;

use futures::future::join_all;
use opentelemetry::metrics::Counter;
use opentelemetry_sdk::{Resource, metrics::exporter::PushMetricExporter};
use tracing::{error, info};

use crate::{
    config::{self, Config},
    exporter,
    pipeline::{self, Pipeline},
};

/// Errors produced while building a [`Registry`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The configuration does not validate.
    #[error(transparent)]
    Config(#[from] config::Error),
    /// A source's exporter could not be created.
    #[error(transparent)]
    Exporter(#[from] exporter::Error),
}

/// One source and everything bound to it.
#[derive(Debug)]
pub struct Entry {
    source: String,
    pipeline: Pipeline,
    counter: Counter<u64>,
}

impl Entry {
    /// The source identifier.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The source's resource descriptor.
    #[must_use]
    pub fn resource(&self) -> &Resource {
        self.pipeline.resource()
    }

    /// The source's pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The source's counter.
    #[must_use]
    pub fn counter(&self) -> &Counter<u64> {
        &self.counter
    }
}

/// Ordered mapping from source to its [`Entry`].
#[derive(Debug)]
pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    /// Set up one pipeline per configured source. `exporter_for` is called
    /// once per source, in order, to supply that pipeline's exporter.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate or an exporter cannot
    /// be created.
    pub fn build<E, F>(config: &Config, mut exporter_for: F) -> Result<Self, Error>
    where
        E: PushMetricExporter,
        F: FnMut(&str) -> Result<E, exporter::Error>,
    {
        config.validate()?;

        let mut entries = Vec::with_capacity(config.sources.len());
        for source in &config.sources {
            let pipeline = Pipeline::new(
                &config.service_name,
                source,
                exporter_for(source)?,
                config.export_interval(),
            );
            let counter = pipeline.counter(&config.metric);
            info!("Pipeline ready for {source}");
            entries.push(Entry {
                source: source.clone(),
                pipeline,
                counter,
            });
        }

        Ok(Self { entries })
    }

    /// Entries in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Look up a source's entry.
    #[must_use]
    pub fn get(&self, source: &str) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.source() == source)
    }

    /// Number of sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no sources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shut every pipeline down, concurrently and best-effort.
    ///
    /// Every pipeline is asked to shut down regardless of how the others
    /// fare. Failures are logged and returned by source; they are not
    /// fatal. Repeat calls do nothing.
    pub async fn shutdown(&mut self, timeout: Duration) -> Vec<(String, pipeline::Error)> {
        let results = join_all(self.entries.iter_mut().map(|entry| async move {
            let result = entry.pipeline.shutdown(timeout).await;
            (entry.source.clone(), result)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(source, result)| match result {
                Ok(()) => None,
                Err(err) => {
                    error!("Pipeline for {source} failed to shut down: {err}");
                    Some((source, err))
                }
            })
            .collect()
    }
}
