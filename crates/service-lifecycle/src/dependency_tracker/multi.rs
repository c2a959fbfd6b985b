//! Multiple-value dependency tracking

use super::DependencyTracker;
use crate::{
    events::{ChangeListener, DependencyEvent, DependencyEventKind},
    reference_tracker::{ReferenceHooks, ReferenceSet, ReferenceTracker},
    types::{DependencyValue, ServiceType},
};
use service_registry::{Descriptor, ListenerId, Registry, ServiceObject, ServiceReference};
use std::sync::Arc;
use tracing::debug;

/// Binding policy for a multiple-value dependency
///
/// Every resolvable reference is bound, in discovery order. The dependency
/// is available while at least one is bound.
pub struct MultiBinding {
    name: String,
    members: Vec<(ServiceReference, ServiceObject)>,
}

impl MultiBinding {
    /// Create an empty policy
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    fn value(&self) -> Option<DependencyValue> {
        if self.members.is_empty() {
            return None;
        }
        Some(DependencyValue::Multiple(
            self.members.iter().map(|(_, s)| s.clone()).collect(),
        ))
    }

    fn transition(&self, old: Option<DependencyValue>) -> DependencyEvent {
        let new = self.value();
        let kind = match (&old, &new) {
            (None, _) => DependencyEventKind::Available,
            (Some(_), None) => DependencyEventKind::Unavailable,
            (Some(_), Some(_)) => DependencyEventKind::Changed,
        };
        DependencyEvent::new(self.name.clone(), kind, old, new)
    }
}

impl ReferenceHooks for MultiBinding {
    type Notice = DependencyEvent;

    fn reference_added(
        &mut self,
        set: &mut ReferenceSet,
        reference: &ServiceReference,
        notices: &mut Vec<DependencyEvent>,
    ) {
        let Some(service) = set.get_service(reference) else {
            return;
        };
        let old = self.value();
        self.members.push((reference.clone(), service));
        debug!("Dependency {} gained {}", self.name, reference);
        notices.push(self.transition(old));
    }

    fn reference_removed(
        &mut self,
        _set: &mut ReferenceSet,
        reference: &ServiceReference,
        notices: &mut Vec<DependencyEvent>,
    ) {
        let Some(index) = self.members.iter().position(|(r, _)| r == reference) else {
            return;
        };
        let old = self.value();
        self.members.remove(index);
        debug!("Dependency {} lost {}", self.name, reference);
        notices.push(self.transition(old));
    }

    fn stopped(&mut self, _set: &ReferenceSet, notices: &mut Vec<DependencyEvent>) {
        let old = self.value();
        self.members.clear();
        if old.is_some() {
            notices.push(self.transition(old));
        }
    }
}

/// Tracks every matching service for a named dependency
pub struct MultiDependencyTracker {
    name: String,
    descriptor: Descriptor,
    references: ReferenceTracker<MultiBinding>,
}

impl MultiDependencyTracker {
    /// Create a tracker; nothing is observed until [`DependencyTracker::start`]
    pub fn new(
        name: impl Into<String>,
        descriptor: Descriptor,
        service_type: Option<ServiceType>,
    ) -> Self {
        let name = name.into();
        let mut references = ReferenceTracker::with_hooks(MultiBinding::new(name.clone()));
        if let Some(service_type) = service_type {
            references = references.expecting(service_type);
        }
        Self {
            name,
            descriptor,
            references,
        }
    }

    /// References currently bound, in discovery order
    pub fn tracked_references(&self) -> Vec<ServiceReference> {
        self.references
            .inspect(|binding, _| binding.members.iter().map(|(r, _)| r.clone()).collect())
    }

    /// Underlying reference tracker
    pub fn references(&self) -> &ReferenceTracker<MultiBinding> {
        &self.references
    }
}

impl DependencyTracker for MultiDependencyTracker {
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
        self.references.inspect(|binding, _| binding.value())
    }

    fn add_listener(&self, listener: Arc<dyn ChangeListener<DependencyEvent>>) -> ListenerId {
        self.references.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.references.remove_listener(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_registry::{MemoryRegistry, Properties};
    use std::sync::Mutex;

    fn publish(registry: &MemoryRegistry, value: u16) -> ServiceReference {
        registry
            .register(vec!["org.example.Sink".to_string()], Arc::new(value), Properties::new())
            .unwrap()
    }

    fn values(tracker: &MultiDependencyTracker) -> Vec<u16> {
        tracker
            .tracked_dependency()
            .map(|v| v.downcast_all::<u16>().into_iter().map(|s| *s).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_membership_transitions() {
        let registry = Arc::new(MemoryRegistry::new());
        let tracker = MultiDependencyTracker::new("sinks", Descriptor::new("org.example.Sink"), None);
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = kinds.clone();
        tracker.add_listener(Arc::new(move |event: &DependencyEvent| {
            sink.lock().unwrap().push(event.kind);
        }));

        let a = publish(&registry, 1);
        tracker.start(registry.clone());
        let b = publish(&registry, 2);
        assert_eq!(values(&tracker), vec![1, 2]);
        assert_eq!(tracker.tracked_references(), vec![a.clone(), b.clone()]);

        registry.unregister(&a).unwrap();
        assert_eq!(values(&tracker), vec![2]);
        registry.unregister(&b).unwrap();
        assert!(tracker.tracked_dependency().is_none());

        assert_eq!(
            *kinds.lock().unwrap(),
            vec![
                DependencyEventKind::Available,
                DependencyEventKind::Changed,
                DependencyEventKind::Changed,
                DependencyEventKind::Unavailable,
            ]
        );
    }

    #[test]
    fn test_wrong_type_is_skipped() {
        let registry = Arc::new(MemoryRegistry::new());
        registry
            .register(vec!["org.example.Sink".to_string()], Arc::new("text"), Properties::new())
            .unwrap();
        let good = publish(&registry, 9);

        let tracker = MultiDependencyTracker::new(
            "sinks",
            Descriptor::new("org.example.Sink"),
            Some(ServiceType::of::<u16>()),
        );
        tracker.start(registry.clone());
        assert_eq!(tracker.tracked_references(), vec![good]);
        assert!(tracker.stop());
        assert!(tracker.tracked_dependency().is_none());
    }
}
