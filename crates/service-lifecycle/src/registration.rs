//! Publishing managed services

use crate::Result;
use service_registry::{Properties, Registry, ServiceObject, ServiceReference};
use std::sync::Arc;
use tracing::debug;

/// How a managed service is made visible to others
pub trait RegistrationStrategy<S>: Send {
    /// Publish `service`, replacing any previous registration
    ///
    /// The new registration must be visible before the previous one is
    /// withdrawn.
    fn register(&mut self, service: Arc<S>) -> Result<()>;

    /// Refresh the registration of the already published service
    fn update_registration(&mut self, service: &Arc<S>) -> Result<()>;

    /// Withdraw the registration, if any
    fn unregister(&mut self) -> Result<()>;

    /// Check whether a registration is active
    fn is_registered(&self) -> bool;
}

type PropertiesFn<S> = Box<dyn Fn(&S) -> Properties + Send + Sync>;

/// Publishes a service in a [`Registry`]
pub struct RegistryRegistration<S> {
    registry: Arc<dyn Registry>,
    class_names: Vec<String>,
    properties: PropertiesFn<S>,
    reference: Option<ServiceReference>,
}

impl<S: Send + Sync + 'static> RegistryRegistration<S> {
    /// Publish under `class_names` with no properties
    pub fn new(registry: Arc<dyn Registry>, class_names: Vec<String>) -> Self {
        Self {
            registry,
            class_names,
            properties: Box::new(|_| Properties::new()),
            reference: None,
        }
    }

    /// Compute the published properties from the service
    pub fn with_properties(
        mut self,
        properties: impl Fn(&S) -> Properties + Send + Sync + 'static,
    ) -> Self {
        self.properties = Box::new(properties);
        self
    }

    /// Reference of the active registration
    pub fn reference(&self) -> Option<&ServiceReference> {
        self.reference.as_ref()
    }
}

impl<S: Send + Sync + 'static> RegistrationStrategy<S> for RegistryRegistration<S> {
    fn register(&mut self, service: Arc<S>) -> Result<()> {
        let properties = (self.properties)(&service);
        let object: ServiceObject = service;
        let reference = self
            .registry
            .register(self.class_names.clone(), object, properties)?;
        debug!("Published managed service as {}", reference);

        if let Some(previous) = self.reference.replace(reference) {
            self.registry.unregister(&previous)?;
        }
        Ok(())
    }

    fn update_registration(&mut self, service: &Arc<S>) -> Result<()> {
        let Some(reference) = self.reference.as_ref() else {
            return self.register(service.clone());
        };
        let properties = (self.properties)(service);
        let updated = self.registry.set_properties(reference, properties)?;
        self.reference = Some(updated);
        Ok(())
    }

    fn unregister(&mut self) -> Result<()> {
        if let Some(reference) = self.reference.take() {
            self.registry.unregister(&reference)?;
        }
        Ok(())
    }

    fn is_registered(&self) -> bool {
        self.reference.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_registry::{Descriptor, MemoryRegistry};
    use serde_json::json;

    struct Clock {
        zone: &'static str,
    }

    #[test]
    fn test_register_replaces_previous() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut registration: RegistryRegistration<Clock> =
            RegistryRegistration::new(registry.clone(), vec!["org.example.Clock".to_string()])
                .with_properties(|clock: &Clock| {
                    let mut props = Properties::new();
                    props.insert("zone".to_string(), json!(clock.zone));
                    props
                });

        registration.register(Arc::new(Clock { zone: "utc" })).unwrap();
        let first = registration.reference().cloned().unwrap();
        registration.register(Arc::new(Clock { zone: "cet" })).unwrap();

        let found = registry.find_all(&Descriptor::new("org.example.Clock"));
        assert_eq!(found.len(), 1);
        assert_ne!(found[0], first);
        assert_eq!(found[0].property("zone"), Some(&json!("cet")));

        registration.unregister().unwrap();
        assert!(!registration.is_registered());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_registration_refreshes_properties() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut registration: RegistryRegistration<Clock> =
            RegistryRegistration::new(registry.clone(), vec!["org.example.Clock".to_string()])
                .with_properties(|clock: &Clock| {
                    let mut props = Properties::new();
                    props.insert("zone".to_string(), json!(clock.zone));
                    props
                });

        let clock = Arc::new(Clock { zone: "utc" });
        registration.update_registration(&clock).unwrap();
        assert!(registration.is_registered());
        let reference = registration.reference().cloned().unwrap();

        registration.update_registration(&clock).unwrap();
        assert_eq!(registration.reference(), Some(&reference));
        assert_eq!(registry.len(), 1);
    }
}
