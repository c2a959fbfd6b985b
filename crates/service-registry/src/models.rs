//! Data models for the service registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

/// A live service instance as held by the registry
pub type ServiceObject = Arc<dyn Any + Send + Sync>;

/// String-keyed service properties
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Opaque handle to a registered service
///
/// Equality and hashing only consider the registry-assigned id, so two
/// snapshots of the same registration taken before and after a property
/// change compare equal.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceReference {
    /// Registry-assigned identifier
    pub id: u64,

    /// Class names the service was published under
    pub class_names: Vec<String>,

    /// Properties at the time the snapshot was taken
    pub properties: Properties,

    /// When the service was registered
    pub registered_at: DateTime<Utc>,
}

impl ServiceReference {
    /// Create a reference snapshot
    pub fn new(id: u64, class_names: Vec<String>, properties: Properties) -> Self {
        Self {
            id,
            class_names,
            properties,
            registered_at: Utc::now(),
        }
    }

    /// Check whether the service was published under `class_name`
    pub fn provides(&self, class_name: &str) -> bool {
        self.class_names.iter().any(|c| c == class_name)
    }

    /// Get a property value
    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceReference {}

impl Hash for ServiceReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("id", &self.id)
            .field("class_names", &self.class_names)
            .field("properties", &self.properties)
            .finish()
    }
}

impl fmt::Display for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} [{}]", self.id, self.class_names.join(", "))
    }
}

/// Query used to find matching references
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Class name the service must be published under
    pub class_name: String,

    /// Property constraints, all of which must be equal
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

impl Descriptor {
    /// Create a descriptor matching every service of `class_name`
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            properties: Properties::new(),
        }
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

    /// Check whether a reference satisfies this descriptor
    pub fn matches(&self, reference: &ServiceReference) -> bool {
        reference.provides(&self.class_name) && self.matches_properties(&reference.properties)
    }

    /// Check only the property constraints
    pub fn matches_properties(&self, properties: &Properties) -> bool {
        self.properties
            .iter()
            .all(|(key, value)| properties.get(key) == Some(value))
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.properties.is_empty() {
            return write!(f, "{}", self.class_name);
        }
        let constraints: Vec<String> = self
            .properties
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{}({})", self.class_name, constraints.join(", "))
    }
}

/// Registry event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryEventKind {
    /// A matching service was registered
    Registered,
    /// A matching service had its properties changed and still matches
    Modified,
    /// A service had its properties changed and no longer matches
    ModifiedEndMatch,
    /// A matching service is being unregistered
    Unregistering,
}

/// Event delivered to registry listeners
#[derive(Debug, Clone)]
pub struct RegistryEvent {
    /// What happened
    pub kind: RegistryEventKind,
    /// The affected reference
    pub reference: ServiceReference,
}

impl RegistryEvent {
    /// Create a new event
    pub fn new(kind: RegistryEventKind, reference: ServiceReference) -> Self {
        Self { kind, reference }
    }
}

/// Handle returned when adding a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Allocate a fresh listener id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
