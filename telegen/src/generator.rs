//! The generation loop.
//!
//! Every generation interval the [`Generator`] draws one random increment per
//! source, adds it to that source's counter and logs it. It never exports
//! anything itself; each pipeline's reader collects whatever its counter
//! holds when its own timer fires.
//!
//! ## Metrics
//!
//! `increments_drawn`: Total increments drawn, per source
//! `increment_value`: Sum of increments drawn, per source
//!

use std::time::Duration;

use metrics::counter;
use rand::{Rng, SeedableRng, rngs::StdRng};
use telegen_signal::Watcher;
use tokio::time::{self, MissedTickBehavior};
use tracing::info;

use crate::{
    config::{Config, Increment},
    registry::Registry,
};

/// Drives every source's counter on a fixed cadence.
#[derive(Debug)]
pub struct Generator {
    registry: Registry,
    rng: StdRng,
    increment: Increment,
    interval: Duration,
    ticks: u64,
    sent: Vec<u64>,
    labels: Vec<(String, String)>,
}

impl Generator {
    /// Create a generator over `registry`, configured by `config`.
    ///
    /// With no configured seed the random source is seeded from the thread
    /// RNG, so separate runs draw different sequences.
    #[must_use]
    pub fn new(config: &Config, registry: Registry) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::from_seed(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let sent = vec![0; registry.len()];
        Self {
            registry,
            rng,
            increment: config.increment,
            interval: config.generation_interval(),
            ticks: 0,
            sent,
            labels: vec![("component".to_string(), "generator".to_string())],
        }
    }

    /// Draw one increment, uniformly from the configured inclusive range.
    pub fn draw(&mut self) -> u64 {
        draw(&mut self.rng, self.increment)
    }

    /// Run one tick: draw and add one increment per source, in registry
    /// order. Returns the increments drawn.
    pub fn tick(&mut self) -> Vec<u64> {
        let Self {
            registry,
            rng,
            increment,
            sent,
            labels,
            ..
        } = self;

        let drawn = registry
            .iter()
            .zip(sent.iter_mut())
            .map(|(entry, sent)| {
                let value = draw(rng, *increment);
                let source = entry.source();
                entry.counter().add(value, &[]);
                *sent += value;
                info!("Sent {value} requests for {source}");

                let mut labels = labels.clone();
                labels.push(("source".to_string(), source.to_string()));
                counter!("increments_drawn", &labels).increment(1);
                counter!("increment_value", &labels).increment(value);
                value
            })
            .collect();
        self.ticks += 1;
        drawn
    }

    /// Tick until `shutdown` fires. The first tick runs immediately, then one
    /// per generation interval. The wait between ticks ends as soon as the
    /// signal arrives.
    pub async fn spin(&mut self, shutdown: Watcher) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown_wait = shutdown.recv();
        tokio::pin!(shutdown_wait);
        loop {
            tokio::select! {
                biased;

                () = &mut shutdown_wait => {
                    info!("Shutting down...");
                    return;
                },
                _ = ticker.tick() => {
                    self.tick();
                },
            }
        }
    }

    /// Number of ticks run so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Per source, in registry order, the sum of every increment added so
    /// far.
    #[must_use]
    pub fn sent(&self) -> &[u64] {
        &self.sent
    }

    /// The registry this generator drives.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Give the registry back, for shutdown.
    #[must_use]
    pub fn into_registry(self) -> Registry {
        self.registry
    }
}

fn draw(rng: &mut StdRng, increment: Increment) -> u64 {
    rng.random_range(increment.min..=increment.max)
}
