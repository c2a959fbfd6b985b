//! Feeding a provider from the registry
//!
//! A [`ServiceDependenciesTracker`] keeps one registry subscription per
//! dependency a [`LifecycleProvider`] declares, including ones declared while
//! running. Each dependency is bound to the first resolvable matching
//! reference and falls back to the oldest remaining candidate when that one
//! goes away.

use crate::{
    Result,
    events::ChangeListener,
    lock,
    provider::{DependencyDescriptor, LifecycleProvider, ProviderEvent, ProviderHooks},
    types::{DependencyMap, DependencyValue},
};
use indexmap::IndexMap;
use service_registry::{
    ListenerId, Registry, RegistryEvent, RegistryEventKind, RegistryListener, ServiceObject,
    ServiceReference,
};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, warn};

struct Subscription {
    descriptor: DependencyDescriptor,
    listener: ListenerId,
    candidates: Vec<ServiceReference>,
    bound: Option<(ServiceReference, ServiceObject)>,
}

impl Subscription {
    fn value(&self) -> Option<DependencyValue> {
        self.bound
            .as_ref()
            .map(|(_, service)| DependencyValue::Single(service.clone()))
    }

    /// Bind the first resolvable candidate, returns whether one was bound
    fn bind_first(&mut self, registry: &dyn Registry) -> bool {
        for candidate in &self.candidates {
            if let Some(service) = resolve(registry, &self.descriptor, candidate) {
                debug!(
                    "Dependency {} bound to {}",
                    self.descriptor.name, candidate
                );
                self.bound = Some((candidate.clone(), service));
                return true;
            }
        }
        false
    }

    fn release(&mut self, registry: &dyn Registry) {
        if let Some((reference, _)) = self.bound.take() {
            registry.release(&reference);
        }
    }
}

fn resolve(
    registry: &dyn Registry,
    descriptor: &DependencyDescriptor,
    reference: &ServiceReference,
) -> Option<ServiceObject> {
    let service = registry.retrieve(reference)?;
    if let Some(service_type) = descriptor.service_type {
        if !service_type.accepts(&service) {
            warn!(
                "Service {} does not have type {}, skipping it",
                reference,
                service_type.name()
            );
            registry.release(reference);
            return None;
        }
    }
    Some(service)
}

struct TrackerState {
    registry: Option<Arc<dyn Registry>>,
    subscriptions: IndexMap<String, Subscription>,
    provider_listener: Option<ListenerId>,
}

impl TrackerState {
    fn values(&self) -> DependencyMap {
        self.subscriptions
            .iter()
            .filter_map(|(name, subscription)| Some((name.clone(), subscription.value()?)))
            .collect()
    }
}

struct TrackerShared<H: ProviderHooks> {
    provider: Arc<LifecycleProvider<H>>,
    delivery: Mutex<()>,
    state: Mutex<TrackerState>,
}

/// Binds the dependencies of a [`LifecycleProvider`] from a registry
pub struct ServiceDependenciesTracker<H: ProviderHooks> {
    shared: Arc<TrackerShared<H>>,
}

impl<H: ProviderHooks> ServiceDependenciesTracker<H> {
    /// Create a tracker for `provider`
    pub fn new(provider: Arc<LifecycleProvider<H>>) -> Self {
        Self {
            shared: Arc::new(TrackerShared {
                provider,
                delivery: Mutex::new(()),
                state: Mutex::new(TrackerState {
                    registry: None,
                    subscriptions: IndexMap::new(),
                    provider_listener: None,
                }),
            }),
        }
    }

    /// The tracked provider
    pub fn provider(&self) -> &Arc<LifecycleProvider<H>> {
        &self.shared.provider
    }

    /// Subscribe to every declared dependency and start the provider
    ///
    /// Returns `Ok(false)` if already started. A failing initial creation is
    /// returned as an error; tracking stays active.
    pub fn start(&self, registry: Arc<dyn Registry>) -> Result<bool> {
        let shared = &self.shared;
        let _delivery = lock(&shared.delivery);
        let values = {
            let mut state = lock(&shared.state);
            if state.registry.is_some() {
                return Ok(false);
            }
            state.registry = Some(registry.clone());
            for descriptor in shared.provider.descriptors() {
                shared.subscribe(&mut state, &registry, descriptor);
            }

            let link = Arc::new(ProviderLink {
                shared: Arc::downgrade(shared),
            });
            state.provider_listener = Some(shared.provider.add_listener(link));
            state.values()
        };

        shared.provider.start(&values)?;
        Ok(true)
    }

    /// Release every bound service, unsubscribe and stop the provider
    ///
    /// Returns `Ok(false)` if not started.
    pub fn stop(&self) -> Result<bool> {
        let shared = &self.shared;
        {
            let _delivery = lock(&shared.delivery);
            let mut state = lock(&shared.state);
            if !shared.shutdown(&mut state) {
                return Ok(false);
            }
        }
        shared.provider.stop()?;
        Ok(true)
    }

    /// Check whether the tracker is started
    pub fn is_started(&self) -> bool {
        lock(&self.shared.state).registry.is_some()
    }

    /// Reference each dependency is bound to
    pub fn bound_references(&self) -> IndexMap<String, ServiceReference> {
        lock(&self.shared.state)
            .subscriptions
            .iter()
            .filter_map(|(name, s)| Some((name.clone(), s.bound.as_ref()?.0.clone())))
            .collect()
    }

    /// Current values of every bound dependency
    pub fn dependencies(&self) -> DependencyMap {
        lock(&self.shared.state).values()
    }
}

impl<H: ProviderHooks> Drop for ServiceDependenciesTracker<H> {
    fn drop(&mut self) {
        let mut state = lock(&self.shared.state);
        self.shared.shutdown(&mut state);
    }
}

impl<H: ProviderHooks> TrackerShared<H> {
    fn subscribe(
        self: &Arc<Self>,
        state: &mut TrackerState,
        registry: &Arc<dyn Registry>,
        descriptor: DependencyDescriptor,
    ) {
        let name = descriptor.name.clone();
        let listener = registry.add_listener(
            descriptor.descriptor.clone(),
            Arc::new(DependencyLink {
                shared: Arc::downgrade(self),
                name: name.clone(),
            }),
        );
        let mut subscription = Subscription {
            candidates: registry.find_all(&descriptor.descriptor),
            descriptor,
            listener,
            bound: None,
        };
        subscription.bind_first(registry.as_ref());
        debug!(
            "Subscribed dependency {} with {} candidates",
            name,
            subscription.candidates.len()
        );
        state.subscriptions.insert(name, subscription);
    }

    /// Drop every subscription, returns false if nothing was running
    fn shutdown(&self, state: &mut TrackerState) -> bool {
        let Some(registry) = state.registry.take() else {
            return false;
        };
        if let Some(id) = state.provider_listener.take() {
            self.provider.remove_listener(id);
        }
        for (_, mut subscription) in state.subscriptions.drain(..) {
            registry.remove_listener(subscription.listener);
            subscription.release(registry.as_ref());
        }
        true
    }

    fn registry_changed(&self, name: &str, event: &RegistryEvent) {
        let _delivery = lock(&self.delivery);
        let change = {
            let mut state = lock(&self.state);
            let Some(registry) = state.registry.clone() else {
                return;
            };
            let Some(subscription) = state.subscriptions.get_mut(name) else {
                return;
            };
            let reference = &event.reference;

            let rebound = match event.kind {
                RegistryEventKind::Registered | RegistryEventKind::Modified => {
                    match subscription.candidates.iter_mut().find(|c| **c == *reference) {
                        Some(existing) => *existing = reference.clone(),
                        None => subscription.candidates.push(reference.clone()),
                    }
                    subscription.bound.is_none() && subscription.bind_first(registry.as_ref())
                }
                RegistryEventKind::ModifiedEndMatch | RegistryEventKind::Unregistering => {
                    subscription.candidates.retain(|c| c != reference);
                    let was_bound = matches!(&subscription.bound, Some((r, _)) if r == reference);
                    if was_bound {
                        subscription.release(registry.as_ref());
                        if !subscription.bind_first(registry.as_ref()) {
                            debug!("Dependency {} is unavailable", name);
                        }
                    }
                    was_bound
                }
            };

            let value = subscription.value();
            if !rebound {
                return;
            }
            (value, state.values())
        };

        let (value, values) = change;
        if let Err(e) = self.provider.dependency_changed(name, value.as_ref(), &values) {
            error!("Provider failed to apply change of {}: {}", name, e);
        }
    }

    fn provider_changed(self: &Arc<Self>, event: &ProviderEvent<H::Service>) {
        match event {
            ProviderEvent::DescriptorAdded(descriptor) => {
                let _delivery = lock(&self.delivery);
                let change = {
                    let mut state = lock(&self.state);
                    let Some(registry) = state.registry.clone() else {
                        return;
                    };
                    if state.subscriptions.contains_key(&descriptor.name) {
                        return;
                    }
                    self.subscribe(&mut state, &registry, descriptor.clone());
                    state
                        .subscriptions
                        .get(&descriptor.name)
                        .and_then(Subscription::value)
                        .map(|value| (value, state.values()))
                };

                if let Some((value, values)) = change {
                    if let Err(e) =
                        self.provider
                            .dependency_changed(&descriptor.name, Some(&value), &values)
                    {
                        error!(
                            "Provider failed to apply new dependency {}: {}",
                            descriptor.name, e
                        );
                    }
                }
            }
            ProviderEvent::DescriptorRemoved(descriptor) => {
                let _delivery = lock(&self.delivery);
                let mut state = lock(&self.state);
                let Some(registry) = state.registry.clone() else {
                    return;
                };
                if let Some(mut subscription) = state.subscriptions.shift_remove(&descriptor.name) {
                    registry.remove_listener(subscription.listener);
                    subscription.release(registry.as_ref());
                    debug!("Unsubscribed dependency {}", descriptor.name);
                }
            }
            ProviderEvent::ServiceChanged { .. } => {}
        }
    }
}

/// Forwards registry events for one dependency
struct DependencyLink<H: ProviderHooks> {
    shared: Weak<TrackerShared<H>>,
    name: String,
}

impl<H: ProviderHooks> RegistryListener for DependencyLink<H> {
    fn registry_changed(&self, event: &RegistryEvent) {
        if let Some(shared) = self.shared.upgrade() {
            shared.registry_changed(&self.name, event);
        }
    }
}

/// Follows runtime dependency declarations of the provider
struct ProviderLink<H: ProviderHooks> {
    shared: Weak<TrackerShared<H>>,
}

impl<H: ProviderHooks> ChangeListener<ProviderEvent<H::Service>> for ProviderLink<H> {
    fn changed(&self, event: &ProviderEvent<H::Service>) {
        if let Some(shared) = self.shared.upgrade() {
            shared.provider_changed(event);
        }
    }
}
