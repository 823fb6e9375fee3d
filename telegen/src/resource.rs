//! Resource descriptors.
//!
//! Every source exports under its own OTLP `Resource`. The resource carries
//! the service name shared by the whole process and the `source.id` that
//! distinguishes one simulated producer from another. Nothing else on the wire
//! identifies the source.

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;

/// Resource attribute naming the service.
pub const SERVICE_NAME: &str = "service.name";
/// Resource attribute naming the source.
pub const SOURCE_ID: &str = "source.id";

/// The resource for `source_id`, a member of the service `service_name`.
///
/// Built from an empty builder: the SDK's detectors would otherwise add
/// `telemetry.sdk.*` attributes and a default `service.name`.
#[must_use]
pub fn for_source(service_name: &str, source_id: &str) -> Resource {
    Resource::builder_empty()
        .with_service_name(service_name.to_string())
        .with_attribute(KeyValue::new(SOURCE_ID, source_id.to_string()))
        .build()
}
