//! Property-change notifications
//!
//! Observers are kept in registration order and called synchronously on the
//! thread that fires the event. The observer list lock is never held while a
//! listener runs, so listeners may add or remove listeners themselves.

use crate::{lock, types::DependencyValue};
use serde::{Deserialize, Serialize};
use service_registry::ListenerId;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Receives change events of type `E`
pub trait ChangeListener<E>: Send + Sync {
    /// Handle a change event
    fn changed(&self, event: &E);
}

impl<E, F> ChangeListener<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn changed(&self, event: &E) {
        self(event)
    }
}

/// Ordered list of change listeners
pub struct ChangeSupport<E: 'static> {
    listeners: Mutex<Vec<(ListenerId, Arc<dyn ChangeListener<E>>)>>,
}

impl<E: 'static> ChangeSupport<E> {
    /// Create an empty listener list
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Add a listener, returning the handle used to remove it
    pub fn add(&self, listener: Arc<dyn ChangeListener<E>>) -> ListenerId {
        let id = ListenerId::new();
        lock(&self.listeners).push((id, listener));
        id
    }

    /// Remove a listener, returns false if it was unknown
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        before != listeners.len()
    }

    /// Remove every listener
    pub fn clear(&self) {
        lock(&self.listeners).clear();
    }

    /// Number of listeners
    pub fn len(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Check whether there are no listeners
    pub fn is_empty(&self) -> bool {
        lock(&self.listeners).is_empty()
    }

    /// Deliver one event to every listener
    pub fn fire(&self, event: &E) {
        let listeners: Vec<_> = lock(&self.listeners)
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener.changed(event);
        }
    }

    /// Deliver events in order
    pub fn fire_all(&self, events: impl IntoIterator<Item = E>) {
        for event in events {
            self.fire(&event);
        }
    }
}

impl<E: 'static> Default for ChangeSupport<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Kind of dependency state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyEventKind {
    /// A dependency went from unbound to bound
    Available,
    /// A bound dependency now resolves to another value
    Changed,
    /// A dependency lost its last value
    Unavailable,
    /// Every required dependency of a manager is satisfied
    AllAvailable,
}

impl DependencyEventKind {
    /// Property name carried by the notification
    pub fn property_name(&self) -> &'static str {
        match self {
            DependencyEventKind::Available => "dependencyAvailable",
            DependencyEventKind::Changed => "dependencyChanged",
            DependencyEventKind::Unavailable => "dependencyUnavailable",
            DependencyEventKind::AllAvailable => "allDependenciesAvailable",
        }
    }
}

impl fmt::Display for DependencyEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.property_name())
    }
}

/// Dependency property-change event
#[derive(Debug, Clone)]
pub struct DependencyEvent {
    /// Name of the dependency that changed
    pub dependency: String,
    /// Transition kind
    pub kind: DependencyEventKind,
    /// Value before the transition
    pub old: Option<DependencyValue>,
    /// Value after the transition
    pub new: Option<DependencyValue>,
}

impl DependencyEvent {
    /// Create an event
    pub fn new(
        dependency: impl Into<String>,
        kind: DependencyEventKind,
        old: Option<DependencyValue>,
        new: Option<DependencyValue>,
    ) -> Self {
        Self {
            dependency: dependency.into(),
            kind,
            old,
            new,
        }
    }
}
