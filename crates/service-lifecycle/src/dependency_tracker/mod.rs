//! Dependency trackers
//!
//! A dependency tracker turns the raw reference membership of a
//! [`ReferenceTracker`](crate::reference_tracker::ReferenceTracker) into
//! dependency state transitions, reported as [`DependencyEvent`]s:
//! `Available` when the first value is bound, `Changed` when the bound value
//! is replaced, `Unavailable` when nothing is left to bind.

mod multi;
mod single;

pub use multi::{MultiBinding, MultiDependencyTracker};
pub use single::{SingleBinding, SingleDependencyTracker};

use crate::{
    binding::{BindingSpec, Cardinality, DependencySpec},
    events::{ChangeListener, DependencyEvent},
    types::DependencyValue,
};
use service_registry::{Descriptor, ListenerId, Registry};
use std::sync::Arc;

/// Tracks one named dependency against a registry
pub trait DependencyTracker: Send + Sync {
    /// Name the dependency is exposed under
    fn name(&self) -> &str;

    /// Registry query being tracked
    fn descriptor(&self) -> &Descriptor;

    /// Start tracking, returns false if already started
    fn start(&self, registry: Arc<dyn Registry>) -> bool;

    /// Stop tracking and release every service, returns false if not started
    fn stop(&self) -> bool;

    /// Check whether the tracker is started
    fn is_started(&self) -> bool;

    /// Currently bound value, if any
    fn tracked_dependency(&self) -> Option<DependencyValue>;

    /// Observe dependency transitions
    fn add_listener(&self, listener: Arc<dyn ChangeListener<DependencyEvent>>) -> ListenerId;

    /// Stop observing
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// Build the tracker matching a dependency's cardinality
pub fn tracker_for(spec: &DependencySpec, binding: &BindingSpec) -> Arc<dyn DependencyTracker> {
    let descriptor = binding.resolve_descriptor(spec);
    match spec.cardinality {
        Cardinality::Single => Arc::new(SingleDependencyTracker::new(
            spec.name.clone(),
            descriptor,
            binding.binding,
            spec.service_type,
        )),
        Cardinality::Multiple => Arc::new(MultiDependencyTracker::new(
            spec.name.clone(),
            descriptor,
            spec.service_type,
        )),
    }
}
