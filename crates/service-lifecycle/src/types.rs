//! Resolved dependency values

use service_registry::ServiceObject;
use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Snapshot of resolved dependencies keyed by dependency name
pub type DependencyMap = BTreeMap<String, DependencyValue>;

/// Runtime type expectation for resolved services
#[derive(Clone, Copy)]
pub struct ServiceType {
    id: TypeId,
    name: &'static str,
}

impl ServiceType {
    /// Expect services of concrete type `T`
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Type name, for diagnostics
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Check whether a service object is of this type
    pub fn accepts(&self, service: &ServiceObject) -> bool {
        let any: &dyn Any = &**service;
        any.type_id() == self.id
    }

    /// Check every service held by a dependency value
    pub fn accepts_value(&self, value: &DependencyValue) -> bool {
        match value {
            DependencyValue::Single(service) => self.accepts(service),
            DependencyValue::Multiple(services) => services.iter().all(|s| self.accepts(s)),
        }
    }
}

impl PartialEq for ServiceType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceType {}

impl fmt::Debug for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Value a dependency tracker reports to its owner
#[derive(Clone)]
pub enum DependencyValue {
    /// The one bound service of a single-cardinality dependency
    Single(ServiceObject),
    /// Every resolved service of a multiple-cardinality dependency
    Multiple(Vec<ServiceObject>),
}

impl DependencyValue {
    /// Identity comparison: same service instances in the same order
    pub fn same_as(&self, other: &DependencyValue) -> bool {
        match (self, other) {
            (DependencyValue::Single(a), DependencyValue::Single(b)) => Arc::ptr_eq(a, b),
            (DependencyValue::Multiple(a), DependencyValue::Multiple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
            }
            _ => false,
        }
    }

    /// The bound service of a single dependency
    pub fn single(&self) -> Option<&ServiceObject> {
        match self {
            DependencyValue::Single(service) => Some(service),
            DependencyValue::Multiple(_) => None,
        }
    }

    /// All services held by this value
    pub fn services(&self) -> &[ServiceObject] {
        match self {
            DependencyValue::Single(service) => std::slice::from_ref(service),
            DependencyValue::Multiple(services) => services,
        }
    }

    /// Typed access to a single dependency
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.single()?.clone().downcast::<T>().ok()
    }

    /// Typed access to every service of type `T`
    pub fn downcast_all<T: Any + Send + Sync>(&self) -> Vec<Arc<T>> {
        self.services()
            .iter()
            .filter_map(|s| s.clone().downcast::<T>().ok())
            .collect()
    }
}

impl fmt::Debug for DependencyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyValue::Single(service) => {
                write!(f, "Single({:p})", Arc::as_ptr(service))
            }
            DependencyValue::Multiple(services) => f
                .debug_list()
                .entries(services.iter().map(Arc::as_ptr))
                .finish(),
        }
    }
}

/// Identity comparison of two snapshots
pub fn same_snapshot(a: &DependencyMap, b: &DependencyMap) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|((ka, va), (kb, vb))| ka == kb && va.same_as(vb))
}
