//! Common utilities for service lifecycle integration tests

#![allow(dead_code)]

pub mod recording;

use service_registry::{MemoryRegistry, Properties, Registry, ServiceObject, ServiceReference};
use std::sync::Arc;

/// Route tracing output through the test harness
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Fresh in-memory registry
pub fn registry() -> Arc<MemoryRegistry> {
    init_logging();
    Arc::new(MemoryRegistry::new())
}

/// Publish a string service under `class_name`
pub fn publish(registry: &MemoryRegistry, class_name: &str, value: &str) -> ServiceReference {
    publish_object(registry, class_name, Arc::new(value.to_string()))
}

/// Publish an existing service object under `class_name`
pub fn publish_object(
    registry: &MemoryRegistry,
    class_name: &str,
    service: ServiceObject,
) -> ServiceReference {
    registry
        .register(vec![class_name.to_string()], service, Properties::new())
        .expect("Failed to register service")
}

/// Withdraw a service
pub fn withdraw(registry: &MemoryRegistry, reference: &ServiceReference) {
    registry
        .unregister(reference)
        .expect("Failed to unregister service");
}
