//! Registry reference tracking
//!
//! A [`ReferenceTracker`] watches one [`Descriptor`] and keeps two
//! collections in a [`ReferenceSet`]: every reference currently matching the
//! descriptor, in discovery order, and the subset that has been resolved to a
//! live service. Membership changes are forwarded to a [`ReferenceHooks`]
//! implementation, which is how dependency trackers apply their binding
//! policy on top of the raw registry view.
//!
//! Every state transition happens under the tracker's state lock. Notices
//! produced by the hooks are delivered after that lock is released but while
//! a separate delivery lock is still held, so observers see them in registry
//! order and may freely query the tracker.

use crate::{events::ChangeListener, events::ChangeSupport, lock, types::ServiceType};
use indexmap::IndexMap;
use service_registry::{
    Descriptor, ListenerId, Registry, RegistryEvent, RegistryEventKind, RegistryListener,
    ServiceObject, ServiceReference,
};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

/// References matching a descriptor and the services resolved from them
///
/// Invariant: every tracked reference is also available, and a reference
/// leaves both collections together with exactly one registry release.
pub struct ReferenceSet {
    registry: Arc<dyn Registry>,
    descriptor: Descriptor,
    service_type: Option<ServiceType>,
    available: Vec<ServiceReference>,
    tracked: IndexMap<ServiceReference, ServiceObject>,
}

impl ReferenceSet {
    /// Create an empty set bound to a registry
    pub fn new(
        registry: Arc<dyn Registry>,
        descriptor: Descriptor,
        service_type: Option<ServiceType>,
    ) -> Self {
        Self {
            registry,
            descriptor,
            service_type,
            available: Vec::new(),
            tracked: IndexMap::new(),
        }
    }

    /// The descriptor being tracked
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Add a reference, returns false if it was already available
    ///
    /// A known reference only has its property snapshot refreshed.
    pub fn add_reference(&mut self, reference: ServiceReference) -> bool {
        match self.available.iter_mut().find(|r| **r == reference) {
            Some(existing) => {
                *existing = reference;
                false
            }
            None => {
                self.available.push(reference);
                true
            }
        }
    }

    /// Remove a reference, releasing its service first if tracked
    ///
    /// Returns false if the reference was not available.
    pub fn remove_reference(&mut self, reference: &ServiceReference) -> bool {
        self.release_reference(reference);
        let before = self.available.len();
        self.available.retain(|r| r != reference);
        before != self.available.len()
    }

    /// Resolve a reference, caching the service on first access
    ///
    /// Only available references are resolved. A missing service or one of
    /// the wrong type yields `None` and leaves the set untouched.
    pub fn get_service(&mut self, reference: &ServiceReference) -> Option<ServiceObject> {
        if let Some(service) = self.tracked.get(reference) {
            return Some(service.clone());
        }
        if !self.available.contains(reference) {
            debug!("Not resolving {}: not available for {}", reference, self.descriptor);
            return None;
        }

        let service = self.registry.retrieve(reference)?;
        if let Some(expected) = &self.service_type {
            if !expected.accepts(&service) {
                warn!(
                    "Service {} for {} is not a {}, ignoring it",
                    reference,
                    self.descriptor,
                    expected.name()
                );
                self.registry.release(reference);
                return None;
            }
        }

        self.tracked.insert(reference.clone(), service.clone());
        Some(service)
    }

    /// Stop holding a resolved service while keeping the reference available
    pub fn release_reference(&mut self, reference: &ServiceReference) -> bool {
        if self.tracked.shift_remove(reference).is_some() {
            self.registry.release(reference);
            true
        } else {
            false
        }
    }

    /// Release every tracked service
    pub fn release_all(&mut self) {
        for (reference, _) in self.tracked.drain(..) {
            self.registry.release(&reference);
        }
    }

    /// Cached service for a tracked reference
    pub fn tracked_service(&self, reference: &ServiceReference) -> Option<&ServiceObject> {
        self.tracked.get(reference)
    }

    /// References currently matching the descriptor, in discovery order
    pub fn available_references(&self) -> &[ServiceReference] {
        &self.available
    }

    /// Resolved references, in resolution order
    pub fn tracked_references(&self) -> Vec<ServiceReference> {
        self.tracked.keys().cloned().collect()
    }

    /// Resolved references with their services
    pub fn tracked_services(&self) -> Vec<(ServiceReference, ServiceObject)> {
        self.tracked
            .iter()
            .map(|(r, s)| (r.clone(), s.clone()))
            .collect()
    }

    /// Check whether a reference is resolved
    pub fn is_tracked(&self, reference: &ServiceReference) -> bool {
        self.tracked.contains_key(reference)
    }
}

/// Policy plugged into a [`ReferenceTracker`]
///
/// Hooks run under the tracker's state lock and report what happened by
/// pushing notices, which are delivered to the tracker's observers afterwards.
pub trait ReferenceHooks: Send + 'static {
    /// Notification type delivered to observers
    type Notice: Send + 'static;

    /// A reference started matching; it is already in `set`
    fn reference_added(
        &mut self,
        set: &mut ReferenceSet,
        reference: &ServiceReference,
        notices: &mut Vec<Self::Notice>,
    );

    /// A reference stopped matching; it is already gone from `set`
    fn reference_removed(
        &mut self,
        set: &mut ReferenceSet,
        reference: &ServiceReference,
        notices: &mut Vec<Self::Notice>,
    );

    /// The tracker stopped; every service has been released
    fn stopped(&mut self, set: &ReferenceSet, notices: &mut Vec<Self::Notice>);
}

/// Membership change reported by [`MembershipHooks`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    /// A reference started matching
    Added(ServiceReference),
    /// A reference stopped matching
    Removed(ServiceReference),
}

/// Hooks that forward raw membership changes
#[derive(Debug, Default)]
pub struct MembershipHooks;

impl ReferenceHooks for MembershipHooks {
    type Notice = MembershipChange;

    fn reference_added(
        &mut self,
        _set: &mut ReferenceSet,
        reference: &ServiceReference,
        notices: &mut Vec<MembershipChange>,
    ) {
        notices.push(MembershipChange::Added(reference.clone()));
    }

    fn reference_removed(
        &mut self,
        _set: &mut ReferenceSet,
        reference: &ServiceReference,
        notices: &mut Vec<MembershipChange>,
    ) {
        notices.push(MembershipChange::Removed(reference.clone()));
    }

    fn stopped(&mut self, set: &ReferenceSet, notices: &mut Vec<MembershipChange>) {
        notices.extend(
            set.available_references()
                .iter()
                .cloned()
                .map(MembershipChange::Removed),
        );
    }
}

struct TrackerState<H> {
    hooks: H,
    service_type: Option<ServiceType>,
    set: Option<ReferenceSet>,
    listener: Option<ListenerId>,
}

impl<H: ReferenceHooks> TrackerState<H> {
    fn add(&mut self, reference: ServiceReference, notices: &mut Vec<H::Notice>) {
        let Some(set) = self.set.as_mut() else {
            return;
        };
        if set.add_reference(reference.clone()) {
            debug!("Reference {} now matches {}", reference, set.descriptor());
            self.hooks.reference_added(set, &reference, notices);
        }
    }

    fn remove(&mut self, reference: &ServiceReference, notices: &mut Vec<H::Notice>) {
        let Some(set) = self.set.as_mut() else {
            return;
        };
        if set.remove_reference(reference) {
            debug!("Reference {} no longer matches {}", reference, set.descriptor());
            self.hooks.reference_removed(set, reference, notices);
        }
    }

    fn stop(&mut self, notices: &mut Vec<H::Notice>) -> bool {
        let Some(mut set) = self.set.take() else {
            return false;
        };
        if let Some(id) = self.listener.take() {
            set.registry.remove_listener(id);
        }
        set.release_all();
        self.hooks.stopped(&set, notices);
        true
    }
}

struct TrackerShared<H: ReferenceHooks> {
    delivery: Mutex<()>,
    state: Mutex<TrackerState<H>>,
    observers: ChangeSupport<H::Notice>,
}

impl<H: ReferenceHooks> TrackerShared<H> {
    fn handle_event(&self, event: &RegistryEvent) {
        let _delivery = lock(&self.delivery);
        let mut notices = Vec::new();
        {
            let mut state = lock(&self.state);
            match event.kind {
                RegistryEventKind::Registered | RegistryEventKind::Modified => {
                    state.add(event.reference.clone(), &mut notices)
                }
                RegistryEventKind::ModifiedEndMatch | RegistryEventKind::Unregistering => {
                    state.remove(&event.reference, &mut notices)
                }
            }
        }
        self.observers.fire_all(notices);
    }
}

struct TrackerListener<H: ReferenceHooks> {
    shared: Weak<TrackerShared<H>>,
}

impl<H: ReferenceHooks> RegistryListener for TrackerListener<H> {
    fn registry_changed(&self, event: &RegistryEvent) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_event(event);
        }
    }
}

/// Watches one descriptor against a registry
pub struct ReferenceTracker<H: ReferenceHooks = MembershipHooks> {
    shared: Arc<TrackerShared<H>>,
}

impl ReferenceTracker<MembershipHooks> {
    /// Create a tracker that reports raw membership changes
    pub fn new() -> Self {
        Self::with_hooks(MembershipHooks)
    }
}

impl Default for ReferenceTracker<MembershipHooks> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ReferenceHooks> ReferenceTracker<H> {
    /// Create a tracker driving the given hooks
    pub fn with_hooks(hooks: H) -> Self {
        Self {
            shared: Arc::new(TrackerShared {
                delivery: Mutex::new(()),
                state: Mutex::new(TrackerState {
                    hooks,
                    service_type: None,
                    set: None,
                    listener: None,
                }),
                observers: ChangeSupport::new(),
            }),
        }
    }

    /// Only resolve services of the given type
    pub fn expecting(self, service_type: ServiceType) -> Self {
        lock(&self.shared.state).service_type = Some(service_type);
        self
    }

    /// Subscribe to `descriptor` and load the current matches
    ///
    /// Returns false, doing nothing, if the tracker is already started.
    pub fn start(&self, registry: Arc<dyn Registry>, descriptor: Descriptor) -> bool {
        let _delivery = lock(&self.shared.delivery);
        let mut notices = Vec::new();
        {
            let mut state = lock(&self.shared.state);
            if state.set.is_some() {
                debug!("Tracker for {} already started", descriptor);
                return false;
            }
            state.set = Some(ReferenceSet::new(
                registry.clone(),
                descriptor.clone(),
                state.service_type,
            ));

            // Events racing with the initial lookup wait on the delivery lock
            // and are reconciled against the loaded set afterwards.
            let listener = Arc::new(TrackerListener {
                shared: Arc::downgrade(&self.shared),
            });
            state.listener = Some(registry.add_listener(descriptor.clone(), listener));

            for reference in registry.find_all(&descriptor) {
                state.add(reference, &mut notices);
            }
        }
        self.shared.observers.fire_all(notices);
        true
    }

    /// Unsubscribe and release every tracked service
    ///
    /// Returns false if the tracker was not started.
    pub fn stop(&self) -> bool {
        let _delivery = lock(&self.shared.delivery);
        let mut notices = Vec::new();
        let stopped = lock(&self.shared.state).stop(&mut notices);
        self.shared.observers.fire_all(notices);
        stopped
    }

    /// Check whether the tracker is started
    pub fn is_started(&self) -> bool {
        lock(&self.shared.state).set.is_some()
    }

    /// Resolve a reference, see [`ReferenceSet::get_service`]
    pub fn get_service(&self, reference: &ServiceReference) -> Option<ServiceObject> {
        lock(&self.shared.state).set.as_mut()?.get_service(reference)
    }

    /// Stop holding a resolved service, see [`ReferenceSet::release_reference`]
    pub fn release_reference(&self, reference: &ServiceReference) -> bool {
        lock(&self.shared.state)
            .set
            .as_mut()
            .map(|set| set.release_reference(reference))
            .unwrap_or(false)
    }

    /// Cached service of a tracked reference
    pub fn tracked_service(&self, reference: &ServiceReference) -> Option<ServiceObject> {
        self.inspect(|_, set| set?.tracked_service(reference).cloned())
    }

    /// Snapshot of the resolved references
    pub fn tracked_references(&self) -> Vec<ServiceReference> {
        self.inspect(|_, set| set.map(ReferenceSet::tracked_references).unwrap_or_default())
    }

    /// Snapshot of the matching references
    pub fn available_references(&self) -> Vec<ServiceReference> {
        self.inspect(|_, set| {
            set.map(|s| s.available_references().to_vec())
                .unwrap_or_default()
        })
    }

    /// Snapshot of the resolved references with their services
    pub fn tracked_services(&self) -> Vec<(ServiceReference, ServiceObject)> {
        self.inspect(|_, set| set.map(ReferenceSet::tracked_services).unwrap_or_default())
    }

    /// Observe the notices produced by the hooks
    pub fn add_listener(&self, listener: Arc<dyn ChangeListener<H::Notice>>) -> ListenerId {
        self.shared.observers.add(listener)
    }

    /// Stop observing
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.observers.remove(id)
    }

    /// Read the hooks and the reference set under the state lock
    pub(crate) fn inspect<R>(&self, f: impl FnOnce(&H, Option<&ReferenceSet>) -> R) -> R {
        let state = lock(&self.shared.state);
        f(&state.hooks, state.set.as_ref())
    }
}

impl<H: ReferenceHooks> Drop for ReferenceTracker<H> {
    fn drop(&mut self) {
        // Unsubscribe and release without notifying anyone
        let mut discarded = Vec::new();
        lock(&self.shared.state).stop(&mut discarded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_registry::{MemoryRegistry, Properties};

    fn publish(registry: &MemoryRegistry, value: u32) -> ServiceReference {
        registry
            .register(vec!["org.example.Counter".to_string()], Arc::new(value), Properties::new())
            .unwrap()
    }

    fn descriptor() -> Descriptor {
        Descriptor::new("org.example.Counter")
    }

    #[test]
    fn test_start_loads_existing_and_follows_events() {
        let registry = Arc::new(MemoryRegistry::new());
        let first = publish(&registry, 1);

        let tracker = ReferenceTracker::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        tracker.add_listener(Arc::new(move |change: &MembershipChange| {
            sink.lock().unwrap().push(change.clone());
        }));

        assert!(tracker.start(registry.clone(), descriptor()));
        assert!(!tracker.start(registry.clone(), descriptor()));
        assert_eq!(registry.listener_count(), 1);

        let second = publish(&registry, 2);
        assert_eq!(tracker.available_references(), vec![first.clone(), second.clone()]);
        assert!(tracker.tracked_references().is_empty());

        registry.unregister(&first).unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                MembershipChange::Added(first.clone()),
                MembershipChange::Added(second.clone()),
                MembershipChange::Removed(first),
            ]
        );
    }

    #[test]
    fn test_lazy_resolution_is_cached() {
        let registry = Arc::new(MemoryRegistry::new());
        let reference = publish(&registry, 7);

        let tracker = ReferenceTracker::new();
        tracker.start(registry.clone(), descriptor());

        let service = tracker.get_service(&reference).unwrap();
        let again = tracker.get_service(&reference).unwrap();
        assert!(Arc::ptr_eq(&service, &again));
        assert_eq!(registry.usage_count(&reference), 1);
        assert_eq!(tracker.tracked_references(), vec![reference.clone()]);
        assert!(tracker.tracked_service(&reference).is_some());

        assert!(tracker.release_reference(&reference));
        assert!(!tracker.release_reference(&reference));
        assert_eq!(registry.usage_count(&reference), 0);
        assert_eq!(tracker.available_references(), vec![reference]);
    }

    #[test]
    fn test_type_mismatch_is_released() {
        let registry = Arc::new(MemoryRegistry::new());
        let reference = publish(&registry, 7);

        let tracker = ReferenceTracker::new().expecting(ServiceType::of::<String>());
        tracker.start(registry.clone(), descriptor());

        assert!(tracker.get_service(&reference).is_none());
        assert!(tracker.tracked_references().is_empty());
        assert_eq!(registry.usage_count(&reference), 0);
    }

    #[test]
    fn test_unavailable_reference_is_not_resolved() {
        let registry = Arc::new(MemoryRegistry::new());
        let other = registry
            .register(vec!["org.example.Other".to_string()], Arc::new(1u32), Properties::new())
            .unwrap();

        let tracker = ReferenceTracker::new();
        tracker.start(registry.clone(), descriptor());
        assert!(tracker.get_service(&other).is_none());
        assert_eq!(registry.usage_count(&other), 0);
    }

    #[test]
    fn test_removal_releases_once() {
        let registry = Arc::new(MemoryRegistry::new());
        let reference = publish(&registry, 3);

        let tracker = ReferenceTracker::new();
        tracker.start(registry.clone(), descriptor());
        tracker.get_service(&reference);
        assert_eq!(registry.usage_count(&reference), 1);

        // Unregistering is delivered while the service is still registered
        let observed = Arc::new(Mutex::new(None));
        let observer = registry.clone();
        let slot = observed.clone();
        let watched = reference.clone();
        tracker.add_listener(Arc::new(move |_: &MembershipChange| {
            *slot.lock().unwrap() = Some(observer.usage_count(&watched));
        }));

        registry.unregister(&reference).unwrap();
        assert_eq!(*observed.lock().unwrap(), Some(0));
        assert!(tracker.available_references().is_empty());
        assert!(tracker.tracked_references().is_empty());
    }

    #[test]
    fn test_stop_releases_and_restart_is_fresh() {
        let registry = Arc::new(MemoryRegistry::new());
        let a = publish(&registry, 1);
        let b = publish(&registry, 2);

        let tracker = ReferenceTracker::new();
        tracker.start(registry.clone(), descriptor());
        tracker.get_service(&a);
        tracker.get_service(&b);

        assert!(tracker.stop());
        assert!(!tracker.stop());
        assert_eq!(registry.usage_count(&a), 0);
        assert_eq!(registry.usage_count(&b), 0);
        assert_eq!(registry.listener_count(), 0);
        assert!(tracker.available_references().is_empty());

        assert!(tracker.start(registry.clone(), descriptor()));
        assert_eq!(tracker.available_references(), vec![a, b]);
        assert!(tracker.tracked_references().is_empty());
    }

    #[test]
    fn test_modified_refreshes_snapshot() {
        let registry = Arc::new(MemoryRegistry::new());
        let reference = publish(&registry, 1);

        let tracker = ReferenceTracker::new();
        let seen = Arc::new(Mutex::new(0usize));
        let count = seen.clone();
        tracker.add_listener(Arc::new(move |_: &MembershipChange| *count.lock().unwrap() += 1));
        tracker.start(registry.clone(), descriptor());

        let mut props = Properties::new();
        props.insert("rate".to_string(), serde_json::json!(10));
        registry.set_properties(&reference, props).unwrap();

        let available = tracker.available_references();
        assert_eq!(available[0].property("rate"), Some(&serde_json::json!(10)));
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = Arc::new(MemoryRegistry::new());
        let reference = publish(&registry, 1);
        {
            let tracker = ReferenceTracker::new();
            tracker.start(registry.clone(), descriptor());
            tracker.get_service(&reference);
        }
        assert_eq!(registry.listener_count(), 0);
        assert_eq!(registry.usage_count(&reference), 0);
    }
}
