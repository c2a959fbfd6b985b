//! Lifecycle providers with a runtime-extensible dependency set
//!
//! A [`LifecycleProvider`] owns a service built from named dependencies that
//! are handed to it from outside, typically by a
//! [`ServiceDependenciesTracker`](crate::ServiceDependenciesTracker). Optional
//! dependencies can be added and removed while the provider runs.

use crate::{
    Error, Result,
    events::{ChangeListener, ChangeSupport},
    lock,
    types::{DependencyMap, DependencyValue, ServiceType},
};
use indexmap::IndexMap;
use service_registry::{Descriptor, ListenerId};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A named dependency of a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDescriptor {
    /// Name the dependency is exposed under
    pub name: String,
    /// Registry query
    pub descriptor: Descriptor,
    /// Whether the service can exist without it
    pub required: bool,
    /// Expected concrete type of the bound service
    pub service_type: Option<ServiceType>,
}

impl DependencyDescriptor {
    /// Declare a required dependency
    pub fn required(name: impl Into<String>, descriptor: Descriptor) -> Self {
        Self {
            name: name.into(),
            descriptor,
            required: true,
            service_type: None,
        }
    }

    /// Declare an optional dependency
    pub fn optional(name: impl Into<String>, descriptor: Descriptor) -> Self {
        Self {
            required: false,
            ..Self::required(name, descriptor)
        }
    }

    /// Require the bound service to be of type `T`
    pub fn of_type<T: std::any::Any>(mut self) -> Self {
        self.service_type = Some(ServiceType::of::<T>());
        self
    }

    /// Check whether `value` is acceptable for this dependency
    pub fn accepts(&self, value: &DependencyValue) -> bool {
        self.service_type
            .is_none_or(|service_type| service_type.accepts_value(value))
    }
}

/// Notification from a provider
pub enum ProviderEvent<S> {
    /// A runtime dependency was declared
    DescriptorAdded(DependencyDescriptor),
    /// A runtime dependency was withdrawn
    DescriptorRemoved(DependencyDescriptor),
    /// The provided service was created, replaced or withdrawn
    ServiceChanged {
        /// Service before the change
        old: Option<Arc<S>>,
        /// Service after the change
        new: Option<Arc<S>>,
    },
}

/// Builds and maintains the provided service
pub trait ProviderHooks: Send + Sync + 'static {
    /// The provided service type
    type Service: Send + Sync + 'static;

    /// Build the service; `Ok(None)` declines
    fn create(&self, dependencies: &DependencyMap) -> anyhow::Result<Option<Arc<Self::Service>>>;

    /// Apply one dependency change to the running service
    ///
    /// Return the same instance to keep it, another instance to replace it
    /// or `None` to withdraw it.
    fn handle_change(
        &self,
        service: &Arc<Self::Service>,
        dependency: &str,
        value: Option<&DependencyValue>,
        dependencies: &DependencyMap,
    ) -> anyhow::Result<Option<Arc<Self::Service>>>;

    /// Tear a service down
    fn dispose(&self, _service: Arc<Self::Service>) -> anyhow::Result<()> {
        Ok(())
    }
}

struct ProviderState<S> {
    descriptors: IndexMap<String, DependencyDescriptor>,
    service: Option<Arc<S>>,
    /// Dependencies last handed to the provider
    dependencies: DependencyMap,
}

/// A service swap to dispose and announce once the state lock is released
struct Replacement<S> {
    old: Option<Arc<S>>,
    new: Option<Arc<S>>,
}

/// A service whose dependencies are supplied from outside
pub struct LifecycleProvider<H: ProviderHooks> {
    hooks: H,
    state: Mutex<ProviderState<H::Service>>,
    observers: ChangeSupport<ProviderEvent<H::Service>>,
}

impl<H: ProviderHooks> LifecycleProvider<H> {
    /// Create a provider with its initial dependencies
    pub fn new(hooks: H, descriptors: Vec<DependencyDescriptor>) -> Result<Self> {
        let mut declared = IndexMap::new();
        for descriptor in descriptors {
            if declared.contains_key(&descriptor.name) {
                return Err(Error::DuplicateDependency(descriptor.name));
            }
            declared.insert(descriptor.name.clone(), descriptor);
        }

        Ok(Self {
            hooks,
            state: Mutex::new(ProviderState {
                descriptors: declared,
                service: None,
                dependencies: DependencyMap::new(),
            }),
            observers: ChangeSupport::new(),
        })
    }

    /// The provider hooks
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Currently declared dependencies
    pub fn descriptors(&self) -> Vec<DependencyDescriptor> {
        lock(&self.state).descriptors.values().cloned().collect()
    }

    /// The current service
    pub fn service(&self) -> Option<Arc<H::Service>> {
        lock(&self.state).service.clone()
    }

    /// Check whether `dependencies` can build the service
    ///
    /// Every required dependency must be present and every present,
    /// declared dependency must have an acceptable type.
    pub fn is_satisfied(&self, dependencies: &DependencyMap) -> bool {
        let state = lock(&self.state);
        Self::satisfied_by(&state.descriptors, dependencies)
    }

    fn satisfied_by(
        descriptors: &IndexMap<String, DependencyDescriptor>,
        dependencies: &DependencyMap,
    ) -> bool {
        descriptors.values().all(|descriptor| match dependencies.get(&descriptor.name) {
            Some(value) => descriptor.accepts(value),
            None => !descriptor.required,
        })
    }

    /// Create the service if `dependencies` allow it
    ///
    /// Returns whether a service exists afterwards.
    pub fn start(&self, dependencies: &DependencyMap) -> Result<bool> {
        let created = {
            let mut state = lock(&self.state);
            if state.service.is_some() {
                return Ok(true);
            }
            state.dependencies = dependencies.clone();
            self.create_locked(&mut state, dependencies)?
        };
        let available = created.is_some();
        if let Some(service) = created {
            self.observers.fire(&ProviderEvent::ServiceChanged {
                old: None,
                new: Some(service),
            });
        }
        Ok(available)
    }

    fn create_locked(
        &self,
        state: &mut ProviderState<H::Service>,
        dependencies: &DependencyMap,
    ) -> Result<Option<Arc<H::Service>>> {
        if !Self::satisfied_by(&state.descriptors, dependencies) {
            debug!("Provider dependencies not satisfied");
            return Ok(None);
        }
        let created = self.hooks.create(dependencies)?;
        if created.is_some() {
            info!("Provider created its service");
        }
        state.service = created.clone();
        Ok(created)
    }

    /// Apply a change of dependency `name` to the service
    ///
    /// Changes to undeclared dependencies and values of the wrong type are
    /// ignored. Without a service the provider tries to create one.
    pub fn dependency_changed(
        &self,
        name: &str,
        value: Option<&DependencyValue>,
        dependencies: &DependencyMap,
    ) -> Result<()> {
        let replacement = {
            let mut state = lock(&self.state);
            let Some(descriptor) = state.descriptors.get(name) else {
                debug!("Ignoring change of undeclared dependency {}", name);
                return Ok(());
            };
            if let Some(value) = value {
                if !descriptor.accepts(value) {
                    warn!("Ignoring dependency {} with unexpected type", name);
                    return Ok(());
                }
            }

            state.dependencies = dependencies.clone();
            match state.service.clone() {
                None => self
                    .create_locked(&mut state, dependencies)?
                    .map(|created| Replacement {
                        old: None,
                        new: Some(created),
                    }),
                Some(current) => self.change_locked(&mut state, current, name, value, dependencies)?,
            }
        };

        self.replaced(replacement)
    }

    fn change_locked(
        &self,
        state: &mut ProviderState<H::Service>,
        current: Arc<H::Service>,
        name: &str,
        value: Option<&DependencyValue>,
        dependencies: &DependencyMap,
    ) -> Result<Option<Replacement<H::Service>>> {
        let next = self.hooks.handle_change(&current, name, value, dependencies)?;
        if next.as_ref().is_some_and(|next| Arc::ptr_eq(next, &current)) {
            return Ok(None);
        }
        state.service = next.clone();
        Ok(Some(Replacement {
            old: Some(current),
            new: next,
        }))
    }

    /// Dispose the replaced service and announce the swap
    ///
    /// Observers are notified even when disposal fails.
    fn replaced(&self, replacement: Option<Replacement<H::Service>>) -> Result<()> {
        let Some(Replacement { old, new }) = replacement else {
            return Ok(());
        };
        let disposed = match old.clone() {
            Some(old) => self.hooks.dispose(old),
            None => Ok(()),
        };
        self.observers.fire(&ProviderEvent::ServiceChanged { old, new });
        disposed.map_err(Error::Hook)
    }

    /// Declare an optional dependency at runtime
    pub fn add_runtime_dependency(&self, descriptor: DependencyDescriptor) -> Result<()> {
        if descriptor.required {
            return Err(Error::InvalidDescriptor(format!(
                "runtime dependency '{}' must be optional",
                descriptor.name
            )));
        }
        {
            let mut state = lock(&self.state);
            if state.descriptors.contains_key(&descriptor.name) {
                return Err(Error::DuplicateDependency(descriptor.name));
            }
            state
                .descriptors
                .insert(descriptor.name.clone(), descriptor.clone());
        }
        debug!("Added runtime dependency {}", descriptor.name);
        self.observers.fire(&ProviderEvent::DescriptorAdded(descriptor));
        Ok(())
    }

    /// Withdraw an optional dependency at runtime
    ///
    /// A running service is told the dependency became unavailable before
    /// the descriptor goes away.
    pub fn remove_runtime_dependency(&self, name: &str) -> Result<DependencyDescriptor> {
        let (removed, replacement) = {
            let mut state = lock(&self.state);
            match state.descriptors.get(name) {
                None => return Err(Error::DependencyNotFound(name.to_string())),
                Some(descriptor) if descriptor.required => {
                    return Err(Error::InvalidDescriptor(format!(
                        "required dependency '{}' cannot be removed",
                        name
                    )));
                }
                Some(_) => {}
            }

            let mut reduced = state.dependencies.clone();
            let was_bound = reduced.remove(name).is_some();
            let replacement = match state.service.clone() {
                Some(current) if was_bound => {
                    self.change_locked(&mut state, current, name, None, &reduced)?
                }
                _ => None,
            };
            state.dependencies = reduced;

            match state.descriptors.shift_remove(name) {
                Some(descriptor) => (descriptor, replacement),
                None => return Err(Error::DependencyNotFound(name.to_string())),
            }
        };
        debug!("Removed runtime dependency {}", name);
        let result = self.replaced(replacement);
        self.observers
            .fire(&ProviderEvent::DescriptorRemoved(removed.clone()));
        result.map(|()| removed)
    }

    /// Withdraw and dispose the service
    pub fn stop(&self) -> Result<()> {
        let service = {
            let mut state = lock(&self.state);
            state.dependencies.clear();
            state.service.take()
        };
        let Some(service) = service else {
            return Ok(());
        };
        info!("Provider disposing its service");
        let result = self.hooks.dispose(service.clone());
        self.observers.fire(&ProviderEvent::ServiceChanged {
            old: Some(service),
            new: None,
        });
        result.map_err(Error::Hook)
    }

    /// Observe provider events
    pub fn add_listener(&self, listener: Arc<dyn ChangeListener<ProviderEvent<H::Service>>>) -> ListenerId {
        self.observers.add(listener)
    }

    /// Stop observing
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.observers.remove(id)
    }
}
