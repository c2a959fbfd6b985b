//! Single-value dependency tracking

use super::DependencyTracker;
use crate::{
    binding::BindingStrategy,
    events::{ChangeListener, DependencyEvent, DependencyEventKind},
    reference_tracker::{ReferenceHooks, ReferenceSet, ReferenceTracker},
    types::{DependencyValue, ServiceType},
};
use service_registry::{Descriptor, ListenerId, Registry, ServiceObject, ServiceReference};
use std::sync::Arc;
use tracing::debug;

/// Binding policy for a single-value dependency
///
/// Holds at most one bound reference. Eager binding lets every newly
/// resolvable reference take over; lazy binding keeps the first one until it
/// goes away.
pub struct SingleBinding {
    name: String,
    strategy: BindingStrategy,
    bound: Option<(ServiceReference, ServiceObject)>,
}

impl SingleBinding {
    /// Create an unbound policy
    pub fn new(name: impl Into<String>, strategy: BindingStrategy) -> Self {
        Self {
            name: name.into(),
            strategy,
            bound: None,
        }
    }

    fn event(
        &self,
        kind: DependencyEventKind,
        old: Option<ServiceObject>,
        new: Option<ServiceObject>,
    ) -> DependencyEvent {
        DependencyEvent::new(
            self.name.clone(),
            kind,
            old.map(DependencyValue::Single),
            new.map(DependencyValue::Single),
        )
    }
}

impl ReferenceHooks for SingleBinding {
    type Notice = DependencyEvent;

    fn reference_added(
        &mut self,
        set: &mut ReferenceSet,
        reference: &ServiceReference,
        notices: &mut Vec<DependencyEvent>,
    ) {
        let current = self.bound.as_ref().map(|(r, _)| r.clone());
        match current {
            None => {
                if let Some(service) = set.get_service(reference) {
                    debug!("Dependency {} bound to {}", self.name, reference);
                    self.bound = Some((reference.clone(), service.clone()));
                    notices.push(self.event(DependencyEventKind::Available, None, Some(service)));
                }
            }
            Some(current) if self.strategy.replaces_bound() && current != *reference => {
                let Some(service) = set.get_service(reference) else {
                    return;
                };
                let Some((_, previous)) = self.bound.take() else {
                    return;
                };
                if Arc::ptr_eq(&previous, &service) {
                    // Same instance published twice, keep the existing binding
                    set.release_reference(reference);
                    self.bound = Some((current, previous));
                    return;
                }

                debug!(
                    "Dependency {} rebound from {} to {}",
                    self.name, current, reference
                );
                set.release_reference(&current);
                self.bound = Some((reference.clone(), service.clone()));
                notices.push(self.event(
                    DependencyEventKind::Changed,
                    Some(previous),
                    Some(service),
                ));
            }
            Some(_) => {}
        }
    }

    fn reference_removed(
        &mut self,
        set: &mut ReferenceSet,
        reference: &ServiceReference,
        notices: &mut Vec<DependencyEvent>,
    ) {
        let is_bound = matches!(&self.bound, Some((r, _)) if r == reference);
        if !is_bound {
            return;
        }
        let Some((_, previous)) = self.bound.take() else {
            return;
        };

        let candidates = self
            .strategy
            .replacement_order(&set.tracked_references(), set.available_references());
        for candidate in candidates {
            if let Some(service) = set.get_service(&candidate) {
                debug!(
                    "Dependency {} fell back from {} to {}",
                    self.name, reference, candidate
                );
                self.bound = Some((candidate, service.clone()));
                notices.push(self.event(
                    DependencyEventKind::Changed,
                    Some(previous),
                    Some(service),
                ));
                return;
            }
        }

        debug!("Dependency {} is unavailable", self.name);
        notices.push(self.event(DependencyEventKind::Unavailable, Some(previous), None));
    }

    fn stopped(&mut self, _set: &ReferenceSet, notices: &mut Vec<DependencyEvent>) {
        if let Some((_, previous)) = self.bound.take() {
            notices.push(self.event(DependencyEventKind::Unavailable, Some(previous), None));
        }
    }
}

/// Tracks one service for a named dependency
pub struct SingleDependencyTracker {
    name: String,
    descriptor: Descriptor,
    strategy: BindingStrategy,
    references: ReferenceTracker<SingleBinding>,
}

impl SingleDependencyTracker {
    /// Create a tracker; nothing is observed until [`DependencyTracker::start`]
    pub fn new(
        name: impl Into<String>,
        descriptor: Descriptor,
        strategy: BindingStrategy,
        service_type: Option<ServiceType>,
    ) -> Self {
        let name = name.into();
        let mut references = ReferenceTracker::with_hooks(SingleBinding::new(name.clone(), strategy));
        if let Some(service_type) = service_type {
            references = references.expecting(service_type);
        }
        Self {
            name,
            descriptor,
            strategy,
            references,
        }
    }

    /// Binding strategy in use
    pub fn strategy(&self) -> BindingStrategy {
        self.strategy
    }

    /// Reference the dependency is currently bound to
    pub fn tracked_reference(&self) -> Option<ServiceReference> {
        self.references
            .inspect(|binding, _| binding.bound.as_ref().map(|(r, _)| r.clone()))
    }

    /// Underlying reference tracker
    pub fn references(&self) -> &ReferenceTracker<SingleBinding> {
        &self.references
    }
}

impl DependencyTracker for SingleDependencyTracker {
    fn name(&self) -> &str {
        &self.name
    }

    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn start(&self, registry: Arc<dyn Registry>) -> bool {
        self.references.start(registry, self.descriptor.clone())
    }

    fn stop(&self) -> bool {
        self.references.stop()
    }

    fn is_started(&self) -> bool {
        self.references.is_started()
    }

    fn tracked_dependency(&self) -> Option<DependencyValue> {
        self.references.inspect(|binding, _| {
            binding
                .bound
                .as_ref()
                .map(|(_, service)| DependencyValue::Single(service.clone()))
        })
    }

    fn add_listener(&self, listener: Arc<dyn ChangeListener<DependencyEvent>>) -> ListenerId {
        self.references.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.references.remove_listener(id)
    }
}
