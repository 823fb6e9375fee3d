//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Crashes are most likely
//! to originate from this code, intentionally.
//!
//! Every field has a default, so the empty document is a valid configuration
//! describing the reference deployment: four sources pushing
//! `custom.request.count` into a collector on `localhost:4317`.

use std::{
    env, fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use http::Uri;
use opentelemetry_sdk::metrics::Temporality as SdkTemporality;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use tracing::debug;

/// Environment variable that, when set, holds the whole YAML configuration.
pub const CONFIG_ENV_VAR: &str = "TELEGEN_CONFIG";

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// No sources were configured.
    #[error("At least one source must be configured")]
    NoSources,
    /// A source identifier was the empty string.
    #[error("Source identifiers must not be empty")]
    EmptySourceId,
    /// The same source identifier appears more than once.
    #[error("Duplicate source ID found: {0}")]
    DuplicateSourceId(String),
    /// An interval or timeout was configured as zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    /// The increment range is empty or admits zero.
    #[error("Increment range must satisfy 1 <= min <= max, got min {min} max {max}")]
    IncrementRange {
        /// Configured lower bound
        min: u64,
        /// Configured upper bound
        max: u64,
    },
    /// The metric name was the empty string.
    #[error("Metric name must not be empty")]
    EmptyMetricName,
    /// The collector endpoint could not be parsed.
    #[error("Invalid collector endpoint {endpoint:?}: {source}")]
    Endpoint {
        /// Endpoint as configured
        endpoint: String,
        /// Underlying parse error
        #[source]
        source: http::uri::InvalidUri,
    },
    /// The collector endpoint has no host.
    #[error("Collector endpoint {0:?} has no host")]
    MissingHost(String),
    /// The collector endpoint asks for TLS, which is not supported.
    #[error("Collector endpoint {0:?} requests TLS, only insecure http is supported")]
    TlsUnsupported(String),
    /// The collector endpoint uses a scheme other than http.
    #[error("Collector endpoint {0:?} has an unsupported scheme")]
    UnsupportedScheme(String),
}

/// Main configuration struct for this program
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// The OTLP/gRPC collector, `host:port` or `http://host:port`
    pub collector_endpoint: String,
    /// Value of the `service.name` resource attribute on every source
    pub service_name: String,
    /// The simulated sources, in generation order
    pub sources: Vec<String>,
    /// How often each pipeline flushes to the collector
    pub export_interval_milliseconds: u64,
    /// How often the generator adds a fresh increment to every counter
    pub generation_interval_milliseconds: u64,
    /// Upper bound on the wait for one pipeline's final flush
    pub shutdown_timeout_milliseconds: u64,
    /// The counter created on every pipeline
    pub metric: Instrument,
    /// Bounds of the per-tick random increment
    pub increment: Increment,
    /// How counter values are reported on export
    pub temporality: Temporality,
    /// The seed for random operations. Absent means seeded from the thread
    /// RNG, different every run.
    pub seed: Option<[u8; 32]>,
    /// The method by which to express telegen's own telemetry
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub telemetry: Option<Telemetry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collector_endpoint: "localhost:4317".to_string(),
            service_name: "telemetry-generator".to_string(),
            sources: ["src1", "src2", "src3", "src4"]
                .into_iter()
                .map(String::from)
                .collect(),
            export_interval_milliseconds: 500,
            generation_interval_milliseconds: 100,
            shutdown_timeout_milliseconds: 5_000,
            metric: Instrument::default(),
            increment: Increment::default(),
            temporality: Temporality::default(),
            seed: None,
            telemetry: None,
        }
    }
}

/// Name and description of the counter every source carries.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Instrument {
    /// Metric name, identical across sources
    pub name: String,
    /// Human friendly description
    pub description: String,
    /// UCUM unit, empty for a plain count
    pub unit: String,
}

impl Default for Instrument {
    fn default() -> Self {
        Self {
            name: "custom.request.count".to_string(),
            description: "Number of requests per source".to_string(),
            unit: String::new(),
        }
    }
}

/// How counter values are reported on each export.
#[derive(Debug, Default, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Temporality {
    /// Report the running total since the pipeline started.
    #[default]
    Cumulative,
    /// Report only what was added since the previous export.
    Delta,
}

impl From<Temporality> for SdkTemporality {
    fn from(temporality: Temporality) -> Self {
        match temporality {
            Temporality::Cumulative => SdkTemporality::Cumulative,
            Temporality::Delta => SdkTemporality::Delta,
        }
    }
}

/// Inclusive bounds of the random increment drawn per source per tick.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Increment {
    /// Smallest increment, at least 1
    pub min: u64,
    /// Largest increment
    pub max: u64,
}

impl Default for Increment {
    fn default() -> Self {
        Self { min: 1, max: 50 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Defines the manner of telegen's own telemetry.
pub enum Telemetry {
    /// Emit internal telemetry for scraping at a prometheus poll endpoint.
    Prometheus {
        /// Address and port for prometheus exporter
        addr: SocketAddr,
    },
}

impl Config {
    /// Parse and validate a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid YAML for this struct or
    /// if [`Config::validate`] rejects it.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        // serde_yaml reads the empty document as unit, not as an empty map.
        let config: Self = if contents.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(contents)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, preferring the [`CONFIG_ENV_VAR`] environment
    /// variable, then `path`, then the built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or its contents do not
    /// parse and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        if let Ok(contents) = env::var(CONFIG_ENV_VAR) {
            debug!("Using config from env var '{CONFIG_ENV_VAR}'");
            return Self::from_yaml(&contents);
        }
        match path {
            Some(path) => {
                debug!("Attempting to open configuration file at: {}", path.display());
                let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
                    path: path.to_path_buf(),
                    source: Box::new(source),
                })?;
                Self::from_yaml(&contents)
            }
            None => {
                debug!("No configuration given, using defaults");
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Determine whether this configuration obeys validation criteria.
    ///
    /// # Errors
    ///
    /// Function will error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), Error> {
        check_sources(&self.sources)?;

        if self.export_interval_milliseconds == 0 {
            return Err(Error::Zero("export_interval_milliseconds"));
        }
        if self.generation_interval_milliseconds == 0 {
            return Err(Error::Zero("generation_interval_milliseconds"));
        }
        if self.shutdown_timeout_milliseconds == 0 {
            return Err(Error::Zero("shutdown_timeout_milliseconds"));
        }

        let Increment { min, max } = self.increment;
        if min == 0 || min > max {
            return Err(Error::IncrementRange { min, max });
        }

        if self.metric.name.is_empty() {
            return Err(Error::EmptyMetricName);
        }

        self.collector_uri()?;
        Ok(())
    }

    /// The collector endpoint as a URI. A bare `host:port` is read as
    /// `http://host:port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint does not parse, has no host, or uses
    /// a scheme other than plain http.
    pub fn collector_uri(&self) -> Result<Uri, Error> {
        let endpoint = self.collector_endpoint.trim();
        let full = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        };
        let uri: Uri = full.parse().map_err(|source| Error::Endpoint {
            endpoint: endpoint.to_string(),
            source,
        })?;

        match uri.scheme_str() {
            Some("http") => {}
            Some("https") => return Err(Error::TlsUnsupported(endpoint.to_string())),
            _ => return Err(Error::UnsupportedScheme(endpoint.to_string())),
        }
        if uri.host().is_none_or(str::is_empty) {
            return Err(Error::MissingHost(endpoint.to_string()));
        }
        Ok(uri)
    }

    /// See [`Config::export_interval_milliseconds`].
    #[must_use]
    pub fn export_interval(&self) -> Duration {
        Duration::from_millis(self.export_interval_milliseconds)
    }

    /// See [`Config::generation_interval_milliseconds`].
    #[must_use]
    pub fn generation_interval(&self) -> Duration {
        Duration::from_millis(self.generation_interval_milliseconds)
    }

    /// See [`Config::shutdown_timeout_milliseconds`].
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_milliseconds)
    }
}

/// Check the source list is non-empty with unique, non-empty identifiers
fn check_sources(sources: &[String]) -> Result<(), Error> {
    if sources.is_empty() {
        return Err(Error::NoSources);
    }
    let mut seen_ids = FxHashSet::default();
    for id in sources {
        if id.is_empty() {
            return Err(Error::EmptySourceId);
        }
        if !seen_ids.insert(id.as_str()) {
            return Err(Error::DuplicateSourceId(id.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use proptest::{prop_assert, proptest};

    use super::*;

    #[test]
    fn empty_document_is_reference_deployment() {
        let config = Config::from_yaml("").expect("empty config must be valid");

        assert_eq!(config.collector_endpoint, "localhost:4317");
        assert_eq!(config.service_name, "telemetry-generator");
        assert_eq!(config.sources, vec!["src1", "src2", "src3", "src4"]);
        assert_eq!(config.export_interval(), Duration::from_millis(500));
        assert_eq!(config.generation_interval(), Duration::from_millis(100));
        assert_eq!(config.metric.name, "custom.request.count");
        assert_eq!(config.metric.description, "Number of requests per source");
        assert_eq!(config.increment, Increment { min: 1, max: 50 });
        assert_eq!(config.temporality, Temporality::Cumulative);
        assert!(config.seed.is_none());
        assert!(config.telemetry.is_none());
    }

    #[test]
    fn partial_document_overrides_only_named_fields() {
        let contents = r#"
sources: [alpha, beta]
generation_interval_milliseconds: 10
increment:
  max: 5
temporality: delta
telemetry:
  prometheus:
    addr: "127.0.0.1:9000"
"#;
        let config = Config::from_yaml(contents).expect("config must be valid");

        assert_eq!(config.sources, vec!["alpha", "beta"]);
        assert_eq!(config.generation_interval(), Duration::from_millis(10));
        assert_eq!(config.export_interval(), Duration::from_millis(500));
        assert_eq!(config.increment, Increment { min: 1, max: 5 });
        assert_eq!(config.temporality, Temporality::Delta);
        assert_eq!(
            config.telemetry,
            Some(Telemetry::Prometheus {
                addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            })
        );
    }

    #[test]
    fn telemetry_prometheus_map_form() {
        let contents = "telemetry:\n  prometheus:\n    addr: \"0.0.0.0:9100\"\n";
        let config = Config::from_yaml(contents).expect("config must be valid");
        assert_eq!(
            config.telemetry,
            Some(Telemetry::Prometheus {
                addr: SocketAddr::from(([0, 0, 0, 0], 9100)),
            })
        );

        let contents = "telemetry:\n  statsd:\n    addr: \"0.0.0.0:9100\"\n";
        let result = Config::from_yaml(contents);
        assert!(matches!(result, Err(Error::SerdeYaml(_))));
    }

    #[test]
    fn temporality_maps_onto_sdk() {
        assert_eq!(
            SdkTemporality::from(Temporality::Cumulative),
            SdkTemporality::Cumulative
        );
        assert_eq!(SdkTemporality::from(Temporality::Delta), SdkTemporality::Delta);
    }

    #[test]
    fn unknown_field_rejected() {
        let result = Config::from_yaml("export_interval_seconds: 0.5\n");
        assert!(matches!(result, Err(Error::SerdeYaml(_))));
    }

    #[test]
    fn duplicate_source_rejected() {
        let result = Config::from_yaml("sources: [src1, src2, src1]\n");
        match result {
            Err(Error::DuplicateSourceId(id)) => assert_eq!(id, "src1"),
            other => panic!("expected duplicate source error, got {other:?}"),
        }
    }

    #[test]
    fn empty_sources_rejected() {
        assert!(matches!(
            Config::from_yaml("sources: []\n"),
            Err(Error::NoSources)
        ));
        assert!(matches!(
            Config::from_yaml("sources: [\"\"]\n"),
            Err(Error::EmptySourceId)
        ));
    }

    #[test]
    fn zero_intervals_rejected() {
        assert!(matches!(
            Config::from_yaml("export_interval_milliseconds: 0\n"),
            Err(Error::Zero("export_interval_milliseconds"))
        ));
        assert!(matches!(
            Config::from_yaml("generation_interval_milliseconds: 0\n"),
            Err(Error::Zero("generation_interval_milliseconds"))
        ));
        assert!(matches!(
            Config::from_yaml("shutdown_timeout_milliseconds: 0\n"),
            Err(Error::Zero("shutdown_timeout_milliseconds"))
        ));
    }

    #[test]
    fn empty_metric_name_rejected() {
        let contents = "metric:\n  name: \"\"\n";
        assert!(matches!(
            Config::from_yaml(contents),
            Err(Error::EmptyMetricName)
        ));
    }

    #[test]
    fn bare_endpoint_is_plain_http() {
        let config = Config::default();
        let uri = config.collector_uri().expect("default endpoint must parse");
        assert_eq!(uri.scheme_str(), Some("http"));
        assert_eq!(uri.host(), Some("localhost"));
        assert_eq!(uri.port_u16(), Some(4317));
    }

    #[test]
    fn tls_endpoint_rejected() {
        let config = Config {
            collector_endpoint: "https://collector:4317".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::TlsUnsupported(_))));

        let config = Config {
            collector_endpoint: "ftp://collector:4317".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn seed_parses_as_byte_array() {
        let seed: Vec<String> = (0..32).map(|i: u8| i.to_string()).collect();
        let contents = format!("seed: [{}]\n", seed.join(", "));
        let config = Config::from_yaml(&contents).expect("config must be valid");
        let expected: [u8; 32] = core::array::from_fn(|i| u8::try_from(i).unwrap());
        assert_eq!(config.seed, Some(expected));
    }

    #[test]
    fn load_reads_file() {
        if env::var(CONFIG_ENV_VAR).is_ok() {
            // The environment takes precedence; nothing to observe here.
            return;
        }
        let tmp_dir = tempfile::tempdir().expect("directory could not be created");
        let path = tmp_dir.path().join("telegen.yaml");
        let mut file = fs::File::create(&path).expect("file could not be created");
        file.write_all(b"sources: [only]\n")
            .expect("file could not be written");

        let config = Config::load(Some(&path)).expect("config must load");
        assert_eq!(config.sources, vec!["only"]);

        let missing = Config::load(Some(&tmp_dir.path().join("missing.yaml")));
        assert!(matches!(missing, Err(Error::ReadFile { .. })));
    }

    proptest! {
        #[test]
        fn increment_range_validation(min in 0..100u64, max in 0..100u64) {
            let config = Config {
                increment: Increment { min, max },
                ..Config::default()
            };
            let valid = config.validate().is_ok();
            prop_assert!(valid == (min >= 1 && min <= max));
        }
    }
}
