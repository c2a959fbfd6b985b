//! Registry contract consumed by the lifecycle core

use crate::{
    error::Result,
    models::{Descriptor, ListenerId, Properties, RegistryEvent, ServiceObject, ServiceReference},
};
use std::sync::Arc;

/// Receives registry events for a descriptor
///
/// Events are delivered synchronously on the thread that changed the
/// registry, which may be any thread.
pub trait RegistryListener: Send + Sync {
    /// Handle a registry event
    fn registry_changed(&self, event: &RegistryEvent);
}

impl<F> RegistryListener for F
where
    F: Fn(&RegistryEvent) + Send + Sync,
{
    fn registry_changed(&self, event: &RegistryEvent) {
        self(event)
    }
}

/// A service registry
pub trait Registry: Send + Sync {
    /// Find every reference matching `descriptor`, in registration order
    fn find_all(&self, descriptor: &Descriptor) -> Vec<ServiceReference>;

    /// Resolve a reference to its service, `None` once it is gone
    fn retrieve(&self, reference: &ServiceReference) -> Option<ServiceObject>;

    /// Give back a service obtained through [`Registry::retrieve`]
    fn release(&self, reference: &ServiceReference);

    /// Subscribe to events for services matching `descriptor`
    fn add_listener(&self, descriptor: Descriptor, listener: Arc<dyn RegistryListener>)
    -> ListenerId;

    /// Unsubscribe a listener, returns false if it was unknown
    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Publish a service under the given class names
    fn register(
        &self,
        class_names: Vec<String>,
        service: ServiceObject,
        properties: Properties,
    ) -> Result<ServiceReference>;

    /// Replace the properties of a registered service
    fn set_properties(
        &self,
        reference: &ServiceReference,
        properties: Properties,
    ) -> Result<ServiceReference>;

    /// Withdraw a registered service
    fn unregister(&self, reference: &ServiceReference) -> Result<()>;
}
