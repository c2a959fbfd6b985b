//! Managed services built from tracked dependencies
//!
//! A [`Manager`] owns one dependency tracker per declared dependency and
//! reacts to their transitions: it creates the service once every required
//! dependency is bound, publishes it through a [`RegistrationStrategy`],
//! rebuilds or updates it as bindings change and disposes it on stop.
//!
//! Hooks and registration run while the manager holds its own lock. A
//! managed service must therefore not satisfy its own dependencies, and two
//! managers must not depend on each other's services.

use crate::{
    Error, Result,
    binding::{BindingSpec, DependencySpec, UpdateStrategy},
    config::{ManagerConfig, ManagerPolicy, UnsatisfiedPolicy},
    dependency_tracker::{DependencyTracker, tracker_for},
    events::{ChangeListener, ChangeSupport, DependencyEvent, DependencyEventKind},
    lifecycle::ServiceLifecycle,
    lock,
    registration::{RegistrationStrategy, RegistryRegistration},
    types::{DependencyMap, DependencyValue, same_snapshot},
};
use indexmap::IndexMap;
use service_registry::{ListenerId, Registry};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, info, warn};

/// A declared dependency wired to its running tracker
struct TrackedBinding {
    spec: DependencySpec,
    binding: BindingSpec,
    tracker: Arc<dyn DependencyTracker>,
    listener: ListenerId,
}

struct ManagerState<S> {
    started: bool,
    starting: bool,
    trackers: IndexMap<String, TrackedBinding>,
    registration: Option<Box<dyn RegistrationStrategy<S>>>,
    owns_registration: bool,
    service: Option<Arc<S>>,
    cached: DependencyMap,
    satisfied: bool,
}

struct ManagerShared<L: ServiceLifecycle> {
    lifecycle: L,
    specs: Vec<DependencySpec>,
    bindings: IndexMap<String, BindingSpec>,
    policy: ManagerPolicy,
    state: Mutex<ManagerState<L::Service>>,
    observers: ChangeSupport<DependencyEvent>,
}

/// Drives a [`ServiceLifecycle`] from the state of its dependencies
pub struct Manager<L: ServiceLifecycle> {
    shared: Arc<ManagerShared<L>>,
}

impl<L: ServiceLifecycle> Manager<L> {
    /// Create a manager with explicit bindings and the default policy
    ///
    /// Fails if a binding names an undeclared dependency, a dependency is
    /// bound twice, or two dependencies share a name.
    pub fn new(lifecycle: L, bindings: Vec<BindingSpec>) -> Result<Self> {
        Self::with_config(
            lifecycle,
            ManagerConfig {
                bindings,
                policy: ManagerPolicy::default(),
            },
        )
    }

    /// Create a manager from configuration
    pub fn with_config(lifecycle: L, config: ManagerConfig) -> Result<Self> {
        let specs = lifecycle.dependency_specs();

        let mut names = HashSet::new();
        for spec in &specs {
            if !names.insert(spec.name.as_str()) {
                return Err(Error::DuplicateDependency(spec.name.clone()));
            }
        }

        let mut bindings = IndexMap::new();
        for binding in config.bindings {
            if !names.contains(binding.dependency.as_str()) {
                return Err(Error::InvalidBinding(format!(
                    "no dependency named '{}'",
                    binding.dependency
                )));
            }
            if bindings.contains_key(&binding.dependency) {
                return Err(Error::InvalidBinding(format!(
                    "dependency '{}' is bound more than once",
                    binding.dependency
                )));
            }
            bindings.insert(binding.dependency.clone(), binding);
        }

        Ok(Self {
            shared: Arc::new(ManagerShared {
                lifecycle,
                specs,
                bindings,
                policy: config.policy,
                state: Mutex::new(ManagerState {
                    started: false,
                    starting: false,
                    trackers: IndexMap::new(),
                    registration: None,
                    owns_registration: false,
                    service: None,
                    cached: DependencyMap::new(),
                    satisfied: false,
                }),
                observers: ChangeSupport::new(),
            }),
        })
    }

    /// Publish the service through a custom strategy instead of the registry
    pub fn with_registration(self, registration: impl RegistrationStrategy<L::Service> + 'static) -> Self {
        {
            let mut state = lock(&self.shared.state);
            state.registration = Some(Box::new(registration));
            state.owns_registration = false;
        }
        self
    }

    /// The managed lifecycle
    pub fn lifecycle(&self) -> &L {
        &self.shared.lifecycle
    }

    /// Effective policy
    pub fn policy(&self) -> ManagerPolicy {
        self.shared.policy
    }

    /// Start tracking dependencies in `registry`
    ///
    /// Dependencies without an explicit binding get a lazy static one. Once
    /// every tracker is started the service is created if the dependencies
    /// allow it; a failing initial creation is returned as an error. Calling
    /// `start` on a started manager does nothing.
    pub fn start(&self, registry: Arc<dyn Registry>) -> Result<()> {
        let shared = &self.shared;
        let trackers: Vec<Arc<dyn DependencyTracker>> = {
            let mut state = lock(&shared.state);
            if state.started {
                debug!("Manager already started");
                return Ok(());
            }

            let link: Arc<dyn ChangeListener<DependencyEvent>> = Arc::new(ManagerLink {
                shared: Arc::downgrade(shared),
            });
            for spec in &shared.specs {
                let binding = shared
                    .bindings
                    .get(&spec.name)
                    .cloned()
                    .unwrap_or_else(|| BindingSpec::new(spec.name.clone()));
                let tracker = tracker_for(spec, &binding);
                let listener = tracker.add_listener(link.clone());
                state.trackers.insert(
                    spec.name.clone(),
                    TrackedBinding {
                        spec: spec.clone(),
                        binding,
                        tracker,
                        listener,
                    },
                );
            }

            if state.registration.is_none() {
                let lifecycle = Arc::downgrade(shared);
                let registration = RegistryRegistration::new(
                    registry.clone(),
                    shared.lifecycle.service_class_names(),
                )
                .with_properties(move |service: &L::Service| {
                    lifecycle
                        .upgrade()
                        .map(|shared| shared.lifecycle.registration_properties(service))
                        .unwrap_or_default()
                });
                state.registration = Some(Box::new(registration));
                state.owns_registration = true;
            }

            state.started = true;
            state.starting = true;
            state.trackers.values().map(|t| t.tracker.clone()).collect()
        };

        info!(
            "Starting manager for {:?} with {} dependencies",
            shared.lifecycle.service_class_names(),
            trackers.len()
        );
        for tracker in trackers {
            tracker.start(registry.clone());
        }

        let mut notices = Vec::new();
        let result = {
            let mut state = lock(&shared.state);
            state.starting = false;
            shared.refresh_satisfaction(&mut state, &mut notices);
            shared.try_create(&mut state)
        };
        shared.observers.fire_all(notices);
        result
    }

    /// Stop tracking, withdraw and dispose the service
    ///
    /// Every tracked reference is released. Errors from unregistering or
    /// disposing are returned after the teardown completes. Calling `stop`
    /// on a stopped manager does nothing.
    pub fn stop(&self) -> Result<()> {
        let shared = &self.shared;
        let (trackers, result) = {
            let mut state = lock(&shared.state);
            if !state.started {
                return Ok(());
            }
            state.started = false;
            state.satisfied = false;

            let result = shared.teardown(&mut state);
            if state.owns_registration {
                state.registration = None;
                state.owns_registration = false;
            }
            let trackers: Vec<TrackedBinding> = state.trackers.drain(..).map(|(_, t)| t).collect();
            (trackers, result)
        };

        for tracked in trackers {
            tracked.tracker.remove_listener(tracked.listener);
            tracked.tracker.stop();
        }
        info!(
            "Stopped manager for {:?}",
            shared.lifecycle.service_class_names()
        );
        result
    }

    /// Check whether the manager is started
    pub fn is_started(&self) -> bool {
        lock(&self.shared.state).started
    }

    /// Check whether every required dependency is bound
    pub fn is_satisfied(&self) -> bool {
        let state = lock(&self.shared.state);
        self.shared.is_satisfied(&state)
    }

    /// Check whether the service exists and is published
    pub fn is_available(&self) -> bool {
        let state = lock(&self.shared.state);
        state.service.is_some()
            && state
                .registration
                .as_ref()
                .is_some_and(|registration| registration.is_registered())
    }

    /// The current service instance
    pub fn service(&self) -> Option<Arc<L::Service>> {
        lock(&self.shared.state).service.clone()
    }

    /// Current values of every bound dependency
    pub fn dependencies(&self) -> DependencyMap {
        let state = lock(&self.shared.state);
        self.shared.snapshot(&state)
    }

    /// Observe dependency transitions and satisfaction
    pub fn add_listener(&self, listener: Arc<dyn ChangeListener<DependencyEvent>>) -> ListenerId {
        self.shared.observers.add(listener)
    }

    /// Stop observing
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.observers.remove(id)
    }
}

impl<L: ServiceLifecycle> Drop for Manager<L> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop manager on drop: {}", e);
        }
    }
}

impl<L: ServiceLifecycle> ManagerShared<L> {
    fn is_satisfied(&self, state: &ManagerState<L::Service>) -> bool {
        self.specs.iter().filter(|spec| spec.required).all(|spec| {
            state
                .trackers
                .get(&spec.name)
                .is_some_and(|t| t.tracker.tracked_dependency().is_some())
        })
    }

    fn snapshot(&self, state: &ManagerState<L::Service>) -> DependencyMap {
        let mut snapshot = DependencyMap::new();
        for (name, tracked) in &state.trackers {
            match tracked.tracker.tracked_dependency() {
                Some(value) => {
                    snapshot.insert(name.clone(), value);
                }
                None if tracked.spec.cardinality == crate::Cardinality::Multiple => {
                    snapshot.insert(name.clone(), DependencyValue::Multiple(Vec::new()));
                }
                None => {}
            }
        }
        snapshot
    }

    /// Record satisfaction, announcing the unsatisfied to satisfied edge
    fn refresh_satisfaction(
        &self,
        state: &mut ManagerState<L::Service>,
        notices: &mut Vec<DependencyEvent>,
    ) -> bool {
        let satisfied = self.is_satisfied(state);
        if satisfied && !state.satisfied {
            debug!("All required dependencies are available");
            notices.push(DependencyEvent::new(
                String::new(),
                DependencyEventKind::AllAvailable,
                None,
                None,
            ));
        }
        state.satisfied = satisfied;
        satisfied
    }

    fn try_create(&self, state: &mut ManagerState<L::Service>) -> Result<()> {
        if state.service.is_some() || !state.started || state.starting {
            return Ok(());
        }
        if !self.is_satisfied(state) {
            debug!("Dependencies not satisfied, service not created");
            return Ok(());
        }

        let snapshot = self.snapshot(state);
        let Some(service) = self.lifecycle.create_service(&snapshot)? else {
            debug!("Lifecycle declined to create the service");
            return Ok(());
        };

        if let Some(registration) = state.registration.as_mut() {
            if let Err(e) = registration.register(service.clone()) {
                if let Err(dispose) = self.lifecycle.dispose_service(service, &snapshot) {
                    warn!("Failed to dispose unpublished service: {}", dispose);
                }
                return Err(e);
            }
        }

        info!(
            "Created service {:?}",
            self.lifecycle.service_class_names()
        );
        state.service = Some(service);
        state.cached = snapshot;
        Ok(())
    }

    /// Unregister and dispose the current service, if any
    fn teardown(&self, state: &mut ManagerState<L::Service>) -> Result<()> {
        let mut result = Ok(());
        if let Some(registration) = state.registration.as_mut() {
            if let Err(e) = registration.unregister() {
                error!("Failed to unregister service: {}", e);
                result = Err(e);
            }
        }

        let cached = std::mem::take(&mut state.cached);
        if let Some(service) = state.service.take() {
            debug!(
                "Disposing service {:?}",
                self.lifecycle.service_class_names()
            );
            if let Err(e) = self.lifecycle.dispose_service(service, &cached) {
                error!("Failed to dispose service: {}", e);
                if result.is_ok() {
                    result = Err(Error::Hook(e));
                }
            }
        }
        result
    }

    fn dependency_changed(&self, event: &DependencyEvent) {
        let mut notices = vec![event.clone()];
        {
            let mut state = lock(&self.state);
            if !state.started {
                return;
            }
            let satisfied = self.refresh_satisfaction(&mut state, &mut notices);

            if state.starting {
                // initial creation happens once every tracker is running
            } else if state.service.is_none() {
                if satisfied {
                    if let Err(e) = self.try_create(&mut state) {
                        error!("Failed to create service: {}", e);
                    }
                }
            } else if !satisfied && self.policy.unsatisfied == UnsatisfiedPolicy::Dispose {
                info!(
                    "Dependency {} lost, withdrawing service",
                    event.dependency
                );
                // errors are already logged
                let _ = self.teardown(&mut state);
            } else {
                self.update_dependency(&mut state, event, satisfied);
            }
        }
        self.observers.fire_all(notices);
    }

    fn update_dependency(
        &self,
        state: &mut ManagerState<L::Service>,
        event: &DependencyEvent,
        satisfied: bool,
    ) {
        let Some(tracked) = state.trackers.get(&event.dependency) else {
            return;
        };

        match tracked.binding.update {
            UpdateStrategy::Static => {
                if !satisfied {
                    debug!(
                        "Dependency {} unavailable, keeping current service",
                        event.dependency
                    );
                    return;
                }
                let snapshot = self.snapshot(state);
                if same_snapshot(&snapshot, &state.cached) {
                    debug!("Dependencies unchanged, keeping current service");
                    return;
                }
                self.rebuild(state, snapshot);
            }
            UpdateStrategy::Dynamic => self.apply_change(state, event),
        }
    }

    /// Replace the service with one built from `snapshot`
    fn rebuild(&self, state: &mut ManagerState<L::Service>, snapshot: DependencyMap) {
        match self.lifecycle.create_service(&snapshot) {
            Err(e) => {
                error!("Failed to rebuild service, keeping current one: {}", e);
            }
            Ok(None) => {
                debug!("Lifecycle declined to rebuild the service, withdrawing it");
                let _ = self.teardown(state);
            }
            Ok(Some(service)) => {
                debug!("Rebuilding service after dependency change");
                self.swap(state, service, snapshot);
            }
        }
    }

    fn apply_change(&self, state: &mut ManagerState<L::Service>, event: &DependencyEvent) {
        let Some(current) = state.service.clone() else {
            return;
        };
        let snapshot = self.snapshot(state);

        let outcome = self.lifecycle.handle_dependency_change(
            &current,
            event.kind,
            &event.dependency,
            event.new.as_ref(),
            &snapshot,
        );
        match outcome {
            Err(e) => {
                error!(
                    "Failed to apply change of dependency {}: {}",
                    event.dependency, e
                );
            }
            Ok(Some(service)) if Arc::ptr_eq(&service, &current) => {
                state.cached = snapshot;
                if let Some(registration) = state.registration.as_mut() {
                    if let Err(e) = registration.update_registration(&service) {
                        error!("Failed to update service registration: {}", e);
                    }
                }
            }
            Ok(Some(service)) => self.swap(state, service, snapshot),
            Ok(None) => {
                debug!(
                    "Lifecycle withdrew the service after change of {}",
                    event.dependency
                );
                let _ = self.teardown(state);
            }
        }
    }

    /// Publish `service` in place of the current one, then dispose the old one
    ///
    /// If the replacement cannot be published it is disposed and the current
    /// service stays in place.
    fn swap(&self, state: &mut ManagerState<L::Service>, service: Arc<L::Service>, snapshot: DependencyMap) {
        if let Some(registration) = state.registration.as_mut() {
            if let Err(e) = registration.register(service.clone()) {
                error!("Failed to publish replacement service, keeping current one: {}", e);
                if let Err(e) = self.lifecycle.dispose_service(service, &snapshot) {
                    error!("Failed to dispose unpublished replacement: {}", e);
                }
                return;
            }
        }

        let previous = state.service.replace(service);
        let previous_snapshot = std::mem::replace(&mut state.cached, snapshot);
        if let Some(previous) = previous {
            if let Err(e) = self.lifecycle.dispose_service(previous, &previous_snapshot) {
                error!("Failed to dispose replaced service: {}", e);
            }
        }
    }
}

/// Forwards tracker events to the owning manager
struct ManagerLink<L: ServiceLifecycle> {
    shared: Weak<ManagerShared<L>>,
}

impl<L: ServiceLifecycle> ChangeListener<DependencyEvent> for ManagerLink<L> {
    fn changed(&self, event: &DependencyEvent) {
        if let Some(shared) = self.shared.upgrade() {
            shared.dependency_changed(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_registry::{MemoryRegistry, Properties};

    struct Standalone;

    impl ServiceLifecycle for Standalone {
        type Service = String;

        fn dependency_specs(&self) -> Vec<DependencySpec> {
            Vec::new()
        }

        fn service_class_names(&self) -> Vec<String> {
            vec!["org.example.Standalone".to_string()]
        }

        fn create_service(&self, _: &DependencyMap) -> anyhow::Result<Option<Arc<String>>> {
            Ok(Some(Arc::new("standalone".to_string())))
        }

        fn dispose_service(&self, _: Arc<String>, _: &DependencyMap) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Needy;

    impl ServiceLifecycle for Needy {
        type Service = String;

        fn dependency_specs(&self) -> Vec<DependencySpec> {
            vec![
                DependencySpec::required("clock", "org.example.Clock"),
                DependencySpec::optional("log", "org.example.Log"),
            ]
        }

        fn service_class_names(&self) -> Vec<String> {
            vec!["org.example.Needy".to_string()]
        }

        fn create_service(&self, _: &DependencyMap) -> anyhow::Result<Option<Arc<String>>> {
            Ok(Some(Arc::new("needy".to_string())))
        }

        fn dispose_service(&self, _: Arc<String>, _: &DependencyMap) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_binding_validation() {
        assert!(matches!(
            Manager::new(Needy, vec![BindingSpec::new("missing")]),
            Err(Error::InvalidBinding(_))
        ));
        assert!(matches!(
            Manager::new(Needy, vec![BindingSpec::new("clock"), BindingSpec::eager("clock")]),
            Err(Error::InvalidBinding(_))
        ));
        assert!(Manager::new(Needy, vec![BindingSpec::eager("clock")]).is_ok());
    }

    #[test]
    fn test_zero_dependencies_created_on_start() {
        let registry = Arc::new(MemoryRegistry::new());
        let manager = Manager::new(Standalone, vec![]).unwrap();
        assert!(manager.is_satisfied());
        assert!(!manager.is_available());

        manager.start(registry.clone()).unwrap();
        assert!(manager.is_available());
        assert_eq!(
            registry
                .find_all(&service_registry::Descriptor::new("org.example.Standalone"))
                .len(),
            1
        );

        manager.stop().unwrap();
        assert!(!manager.is_available());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_optional_dependency_not_needed() {
        let registry = Arc::new(MemoryRegistry::new());
        let manager = Manager::new(Needy, vec![]).unwrap();
        manager.start(registry.clone()).unwrap();
        assert!(!manager.is_satisfied());
        assert!(manager.service().is_none());

        registry
            .register(vec!["org.example.Clock".to_string()], Arc::new(1u8), Properties::new())
            .unwrap();
        assert!(manager.is_satisfied());
        assert!(manager.is_available());
        assert!(manager.dependencies().contains_key("clock"));
        assert!(!manager.dependencies().contains_key("log"));
    }

    #[test]
    fn test_drop_withdraws_service() {
        let registry = Arc::new(MemoryRegistry::new());
        {
            let manager = Manager::new(Standalone, vec![]).unwrap();
            manager.start(registry.clone()).unwrap();
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }
}
