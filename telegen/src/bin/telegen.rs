use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use jemallocator::Jemalloc;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use telegen::{
    config::{self, Config, Telemetry},
    exporter::{self, OtlpGrpc},
    generator::Generator,
    registry::{self, Registry},
};
use tokio::{
    runtime::Builder,
    signal,
    time::{Duration, sleep},
};
use tracing::{Instrument, error, info, info_span, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::Error),
    #[error("Exporter setup failed: {0}")]
    Exporter(#[from] exporter::Error),
    #[error("Pipeline setup failed: {0}")]
    Registry(#[from] registry::Error),
    #[error("Failed to install prometheus recorder: {0}")]
    Prometheus(#[from] BuildError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct CliWithSubcommands {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate synthetic counters and push them to the collector
    Run(Box<RunArgs>),
    /// Validate configuration and exit
    ConfigCheck(ConfigCheckArgs),
}

#[derive(Args)]
struct RunArgs {
    /// path on disk to the configuration file, defaults apply when absent
    #[clap(long)]
    config_path: Option<PathBuf>,
    /// the OTLP/gRPC collector, overriding the configuration
    #[clap(long)]
    collector_endpoint: Option<String>,
    /// a source identifier, repeat for several; replaces the configured
    /// sources
    #[clap(long = "source")]
    sources: Vec<String>,
    /// how often each source flushes to the collector, in milliseconds
    #[clap(long)]
    export_interval_milliseconds: Option<u64>,
    /// how often counters are incremented, in milliseconds
    #[clap(long)]
    generation_interval_milliseconds: Option<u64>,
    /// address to bind the prometheus exporter to
    #[clap(long)]
    prometheus_addr: Option<SocketAddr>,
    /// stop after this many seconds; runs until interrupted when absent
    #[clap(long)]
    duration_seconds: Option<u64>,
    /// the maximum time to wait, in seconds, for controlled shutdown
    #[clap(long, default_value_t = 30)]
    max_shutdown_delay: u16,
}

#[derive(Args)]
struct ConfigCheckArgs {
    /// path on disk to the configuration file
    #[clap(long)]
    config_path: Option<PathBuf>,
}

fn get_config(args: &RunArgs) -> Result<Config, Error> {
    let mut config = Config::load(args.config_path.as_deref())?;

    if let Some(endpoint) = &args.collector_endpoint {
        config.collector_endpoint.clone_from(endpoint);
    }
    if !args.sources.is_empty() {
        config.sources.clone_from(&args.sources);
    }
    if let Some(millis) = args.export_interval_milliseconds {
        config.export_interval_milliseconds = millis;
    }
    if let Some(millis) = args.generation_interval_milliseconds {
        config.generation_interval_milliseconds = millis;
    }
    if let Some(addr) = args.prometheus_addr {
        config.telemetry = Some(Telemetry::Prometheus { addr });
    }

    config.validate().map_err(|err| {
        error!("Configuration validation failed: {err}");
        err
    })?;
    Ok(config)
}

async fn inner_main(config: Config, run_duration: Duration) -> Result<(), Error> {
    if let Some(Telemetry::Prometheus { addr }) = config.telemetry {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!("Serving internal telemetry on {addr}");
    }

    let collector = config.collector_uri()?;
    let otlp = OtlpGrpc::new(&collector, config.shutdown_timeout(), config.temporality)?;
    let registry = Registry::build(&config, |_| otlp.exporter())?;
    info!(
        "Exporting {} sources to {collector} every {:?}",
        registry.len(),
        config.export_interval()
    );

    let (shutdown_watcher, shutdown_broadcast) = telegen_signal::signal();
    tokio::spawn(
        async move {
            tokio::select! {
                res = signal::ctrl_c() => match res {
                    Ok(()) => info!("received ctrl-c"),
                    Err(err) => {
                        error!("Could not listen for ctrl-c: {err}");
                        sleep(run_duration).await;
                    }
                },
                () = sleep(run_duration) => {
                    info!("run duration exceeded, signaling for shutdown");
                },
            }
            shutdown_broadcast.signal();
        }
        .instrument(info_span!("interrupt")),
    );

    let mut generator = Generator::new(&config, registry);
    generator.spin(shutdown_watcher).await;
    info!("Generated {} ticks", generator.ticks());

    let mut registry = generator.into_registry();
    let failures = registry.shutdown(config.shutdown_timeout()).await;
    if !failures.is_empty() {
        warn!(
            "{} of {} pipelines did not shut down cleanly",
            failures.len(),
            registry.len()
        );
    }
    Ok(())
}

enum Next {
    Run(Box<RunArgs>),
    Exit(i32),
}

fn dispatch(command: Commands) -> Next {
    match command {
        Commands::Run(args) => {
            let version = env!("CARGO_PKG_VERSION");
            info!("Starting telegen {version} run.");
            Next::Run(args)
        }
        Commands::ConfigCheck(args) => match Config::load(args.config_path.as_deref()) {
            Ok(_) => {
                info!("Configuration is valid");
                Next::Exit(0)
            }
            Err(err) => {
                error!("Configuration is invalid: {err}");
                Next::Exit(1)
            }
        },
    }
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .finish()
        .init();

    let args = match dispatch(CliWithSubcommands::parse().command) {
        Next::Run(args) => args,
        Next::Exit(code) => std::process::exit(code),
    };

    let config = get_config(&args)?;
    let run_duration = args
        .duration_seconds
        .map_or(Duration::MAX, Duration::from_secs);
    let max_shutdown_delay = Duration::from_secs(args.max_shutdown_delay.into());

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config, run_duration));
    info!(
        "Shutting down runtime with a {} second delay. May leave orphaned tasks.",
        max_shutdown_delay.as_secs(),
    );
    runtime.shutdown_timeout(max_shutdown_delay);
    info!("Bye.");
    res
}
