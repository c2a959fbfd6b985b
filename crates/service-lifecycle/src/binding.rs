//! Dependency and binding specifications

use crate::types::ServiceType;
use serde::{Deserialize, Serialize};
use service_registry::{Descriptor, Properties, ServiceReference};

/// Policy for choosing among several candidate references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingStrategy {
    /// Most recently added candidate wins
    Eager,
    /// First bound candidate stays until it goes away
    #[default]
    Lazy,
}

impl BindingStrategy {
    /// Whether a newly resolved candidate displaces the current binding
    pub fn replaces_bound(&self) -> bool {
        matches!(self, BindingStrategy::Eager)
    }

    /// Order in which candidates are tried when the bound reference goes away
    ///
    /// Already tracked references come first. Eager scans newest to oldest,
    /// lazy scans oldest to newest.
    pub fn replacement_order(
        &self,
        tracked: &[ServiceReference],
        available: &[ServiceReference],
    ) -> Vec<ServiceReference> {
        let mut order: Vec<ServiceReference> = Vec::with_capacity(available.len());
        let mut push = |reference: &ServiceReference| {
            if !order.contains(reference) {
                order.push(reference.clone());
            }
        };
        match self {
            BindingStrategy::Eager => {
                tracked.iter().rev().for_each(&mut push);
                available.iter().rev().for_each(&mut push);
            }
            BindingStrategy::Lazy => {
                tracked.iter().for_each(&mut push);
                available.iter().for_each(&mut push);
            }
        }
        order
    }
}

/// How a managed service reacts to a dependency change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    /// Rebuild the service from a fresh snapshot
    #[default]
    Static,
    /// Hand the change to the lifecycle's change hook
    Dynamic,
}

/// Number of values a dependency resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Exactly one bound service
    #[default]
    Single,
    /// Every matching service
    Multiple,
}

fn default_required() -> bool {
    true
}

/// A named dependency declared by a service lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Name the resolved value is exposed under
    pub name: String,

    /// Class name the dependency is published under
    pub class_name: String,

    /// Property constraints
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,

    /// Single or multiple
    #[serde(default)]
    pub cardinality: Cardinality,

    /// Whether the service can be built without it
    #[serde(default = "default_required")]
    pub required: bool,

    /// Expected concrete type of resolved services
    #[serde(skip)]
    pub service_type: Option<ServiceType>,
}

impl DependencySpec {
    /// Declare a required single dependency
    pub fn required(name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_name: class_name.into(),
            properties: Properties::new(),
            cardinality: Cardinality::Single,
            required: true,
            service_type: None,
        }
    }

    /// Declare an optional single dependency
    pub fn optional(name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, class_name)
        }
    }

    /// Track every matching service instead of one
    pub fn multiple(mut self) -> Self {
        self.cardinality = Cardinality::Multiple;
        self
    }

    /// Add a property constraint
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Require resolved services to be of type `T`
    pub fn of_type<T: std::any::Any>(mut self) -> Self {
        self.service_type = Some(ServiceType::of::<T>());
        self
    }

    /// Registry query for this dependency
    pub fn descriptor(&self) -> Descriptor {
        Descriptor {
            class_name: self.class_name.clone(),
            properties: self.properties.clone(),
        }
    }
}

/// How a declared dependency is bound and how changes are applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSpec {
    /// Name of the dependency this binding applies to
    pub dependency: String,

    /// Query overriding the one derived from the dependency spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,

    /// Candidate selection policy
    #[serde(default)]
    pub binding: BindingStrategy,

    /// Change handling policy
    #[serde(default)]
    pub update: UpdateStrategy,
}

impl BindingSpec {
    /// Lazy, static binding for `dependency`
    pub fn new(dependency: impl Into<String>) -> Self {
        Self {
            dependency: dependency.into(),
            descriptor: None,
            binding: BindingStrategy::Lazy,
            update: UpdateStrategy::Static,
        }
    }

    /// Eager, static binding for `dependency`
    pub fn eager(dependency: impl Into<String>) -> Self {
        Self::new(dependency).with_binding(BindingStrategy::Eager)
    }

    /// Set the binding strategy
    pub fn with_binding(mut self, binding: BindingStrategy) -> Self {
        self.binding = binding;
        self
    }

    /// Set the update strategy
    pub fn with_update(mut self, update: UpdateStrategy) -> Self {
        self.update = update;
        self
    }

    /// Override the registry query
    pub fn with_descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Query to track, falling back to the dependency's own
    pub fn resolve_descriptor(&self, spec: &DependencySpec) -> Descriptor {
        self.descriptor.clone().unwrap_or_else(|| spec.descriptor())
    }
}
