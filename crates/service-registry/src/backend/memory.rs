//! In-memory service registry

use crate::{
    error::{Error, Result},
    models::*,
    registry::{Registry, RegistryListener},
};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// In-process registry
///
/// Listeners are called after the internal lock is released, so a listener
/// may call back into the registry.
pub struct MemoryRegistry {
    state: RwLock<RegistryState>,
}

struct RegistryState {
    next_id: u64,
    services: BTreeMap<u64, ServiceEntry>,
    subscriptions: Vec<Subscription>,
}

struct ServiceEntry {
    reference: ServiceReference,
    service: ServiceObject,
    usage: usize,
}

struct Subscription {
    id: ListenerId,
    descriptor: Descriptor,
    listener: Arc<dyn RegistryListener>,
}

type Deliveries = Vec<(Arc<dyn RegistryListener>, RegistryEvent)>;

impl MemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState {
                next_id: 1,
                services: BTreeMap::new(),
                subscriptions: Vec::new(),
            }),
        }
    }

    /// Number of outstanding `retrieve` calls not yet released
    pub fn usage_count(&self, reference: &ServiceReference) -> usize {
        self.read()
            .services
            .get(&reference.id)
            .map(|entry| entry.usage)
            .unwrap_or(0)
    }

    /// Number of active listeners
    pub fn listener_count(&self) -> usize {
        self.read().subscriptions.len()
    }

    /// Number of registered services
    pub fn len(&self) -> usize {
        self.read().services.len()
    }

    /// Check whether no service is registered
    pub fn is_empty(&self) -> bool {
        self.read().services.is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(deliveries: Deliveries) {
        for (listener, event) in deliveries {
            listener.registry_changed(&event);
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryState {
    fn matching(&self, kind: RegistryEventKind, reference: &ServiceReference) -> Deliveries {
        self.subscriptions
            .iter()
            .filter(|sub| sub.descriptor.matches(reference))
            .map(|sub| {
                (
                    sub.listener.clone(),
                    RegistryEvent::new(kind, reference.clone()),
                )
            })
            .collect()
    }
}

impl Registry for MemoryRegistry {
    fn find_all(&self, descriptor: &Descriptor) -> Vec<ServiceReference> {
        self.read()
            .services
            .values()
            .filter(|entry| descriptor.matches(&entry.reference))
            .map(|entry| entry.reference.clone())
            .collect()
    }

    fn retrieve(&self, reference: &ServiceReference) -> Option<ServiceObject> {
        let mut state = self.write();
        let entry = state.services.get_mut(&reference.id)?;
        entry.usage += 1;
        Some(entry.service.clone())
    }

    fn release(&self, reference: &ServiceReference) {
        if let Some(entry) = self.write().services.get_mut(&reference.id) {
            entry.usage = entry.usage.saturating_sub(1);
        }
    }

    fn add_listener(
        &self,
        descriptor: Descriptor,
        listener: Arc<dyn RegistryListener>,
    ) -> ListenerId {
        let id = ListenerId::new();
        debug!("Adding registry listener {} for {}", id, descriptor);
        self.write().subscriptions.push(Subscription {
            id,
            descriptor,
            listener,
        });
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.write();
        let before = state.subscriptions.len();
        state.subscriptions.retain(|sub| sub.id != id);
        before != state.subscriptions.len()
    }

    fn register(
        &self,
        class_names: Vec<String>,
        service: ServiceObject,
        properties: Properties,
    ) -> Result<ServiceReference> {
        if class_names.is_empty() {
            return Err(Error::InvalidRegistration(
                "At least one class name is required".to_string(),
            ));
        }

        let (reference, deliveries) = {
            let mut state = self.write();
            let id = state.next_id;
            state.next_id += 1;

            let reference = ServiceReference::new(id, class_names, properties);
            state.services.insert(
                id,
                ServiceEntry {
                    reference: reference.clone(),
                    service,
                    usage: 0,
                },
            );
            let deliveries = state.matching(RegistryEventKind::Registered, &reference);
            (reference, deliveries)
        };

        info!("Registered service {}", reference);
        Self::deliver(deliveries);
        Ok(reference)
    }

    fn set_properties(
        &self,
        reference: &ServiceReference,
        properties: Properties,
    ) -> Result<ServiceReference> {
        let (updated, deliveries) = {
            let mut state = self.write();
            let entry = state
                .services
                .get_mut(&reference.id)
                .ok_or(Error::ServiceNotFound(reference.id))?;
            let previous = entry.reference.clone();
            entry.reference.properties = properties;
            let updated = entry.reference.clone();

            let deliveries: Deliveries = state
                .subscriptions
                .iter()
                .filter_map(|sub| {
                    let kind = if sub.descriptor.matches(&updated) {
                        RegistryEventKind::Modified
                    } else if sub.descriptor.matches(&previous) {
                        RegistryEventKind::ModifiedEndMatch
                    } else {
                        return None;
                    };
                    Some((sub.listener.clone(), RegistryEvent::new(kind, updated.clone())))
                })
                .collect();
            (updated, deliveries)
        };

        debug!("Updated properties of service {}", updated);
        Self::deliver(deliveries);
        Ok(updated)
    }

    fn unregister(&self, reference: &ServiceReference) -> Result<()> {
        let deliveries = {
            let state = self.read();
            let entry = state
                .services
                .get(&reference.id)
                .ok_or(Error::ServiceNotFound(reference.id))?;
            state.matching(RegistryEventKind::Unregistering, &entry.reference)
        };

        // Listeners see the service while it is still registered
        Self::deliver(deliveries);

        self.write()
            .services
            .remove(&reference.id)
            .ok_or(Error::ServiceNotFound(reference.id))?;
        info!("Unregistered service {}", reference);
        Ok(())
    }
}
