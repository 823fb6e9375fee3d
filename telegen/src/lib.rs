//! The telegen synthetic telemetry load generator.
//!
//! telegen simulates a fixed set of independent data producers, "sources", each
//! owning one monotonic counter. A single loop adds a random increment to every
//! source's counter on a fixed cadence while one OpenTelemetry meter provider
//! per source ships the accumulated value to an OTLP/gRPC collector on its
//! own, independent cadence.
//!
//! This library supports the telegen binary found elsewhere in this
//! project. The pieces are laid out bottom-up: [`resource`] describes who is
//! measured, [`exporter`] and [`pipeline`] move measurements over the wire,
//! [`registry`] binds one of each per source and [`generator`] drives the
//! whole thing.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod exporter;
pub mod generator;
pub mod pipeline;
pub mod registry;
pub mod resource;
