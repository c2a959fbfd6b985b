//! Dependency tracking and managed service lifecycles
//!
//! This crate watches a [`service_registry::Registry`] for the services a
//! component depends on, binds them according to a configurable policy and
//! drives the component's own service through creation, update, publication
//! and disposal as those dependencies come and go.
//!
//! # Layers
//!
//! - [`ReferenceTracker`]: raw membership of the references matching a query
//! - [`DependencyTracker`]: one named dependency, single or multiple
//! - [`Manager`]: a service built from several dependencies
//! - [`LifecycleProvider`] and [`ServiceDependenciesTracker`]: a provider
//!   whose dependency set can grow at runtime
//!
//! # Example
//!
//! ```rust
//! use service_lifecycle::prelude::*;
//! use service_registry::{MemoryRegistry, Properties, Registry};
//! use std::sync::Arc;
//!
//! struct Greeter {
//!     name: Arc<String>,
//! }
//!
//! struct GreeterLifecycle;
//!
//! impl ServiceLifecycle for GreeterLifecycle {
//!     type Service = Greeter;
//!
//!     fn dependency_specs(&self) -> Vec<DependencySpec> {
//!         vec![DependencySpec::required("name", "org.example.Name").of_type::<String>()]
//!     }
//!
//!     fn service_class_names(&self) -> Vec<String> {
//!         vec!["org.example.Greeter".to_string()]
//!     }
//!
//!     fn create_service(&self, deps: &DependencyMap) -> anyhow::Result<Option<Arc<Greeter>>> {
//!         Ok(deps
//!             .get("name")
//!             .and_then(|v| v.downcast::<String>())
//!             .map(|name| Arc::new(Greeter { name })))
//!     }
//!
//!     fn dispose_service(&self, _: Arc<Greeter>, _: &DependencyMap) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> service_lifecycle::Result<()> {
//! let registry = Arc::new(MemoryRegistry::new());
//! let manager = Manager::new(GreeterLifecycle, vec![])?;
//! manager.start(registry.clone())?;
//! assert!(!manager.is_available());
//!
//! registry.register(
//!     vec!["org.example.Name".to_string()],
//!     Arc::new("world".to_string()),
//!     Properties::new(),
//! )?;
//! assert_eq!(manager.service().map(|g| (*g.name).clone()).as_deref(), Some("world"));
//! manager.stop()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod binding;
pub mod config;
pub mod dependency_tracker;
pub mod events;
pub mod lifecycle;
pub mod manager;
pub mod provider;
pub mod reference_tracker;
pub mod registration;
pub mod service_tracker;
pub mod types;

pub use binding::{BindingSpec, BindingStrategy, Cardinality, DependencySpec, UpdateStrategy};
pub use config::{ManagerConfig, ManagerPolicy, UnsatisfiedPolicy};
pub use dependency_tracker::{
    DependencyTracker, MultiDependencyTracker, SingleDependencyTracker, tracker_for,
};
pub use events::{ChangeListener, ChangeSupport, DependencyEvent, DependencyEventKind};
pub use lifecycle::ServiceLifecycle;
pub use manager::Manager;
pub use provider::{DependencyDescriptor, LifecycleProvider, ProviderEvent, ProviderHooks};
pub use reference_tracker::{
    MembershipChange, MembershipHooks, ReferenceHooks, ReferenceSet, ReferenceTracker,
};
pub use registration::{RegistrationStrategy, RegistryRegistration};
pub use service_tracker::ServiceDependenciesTracker;
pub use types::{DependencyMap, DependencyValue, ServiceType, same_snapshot};

use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Errors raised by trackers, managers and providers
#[derive(Error, Debug)]
pub enum Error {
    /// Registry operation failed
    #[error("Registry error: {0}")]
    Registry(#[from] service_registry::Error),

    /// A binding names an undeclared dependency or is given twice
    #[error("Invalid binding: {0}")]
    InvalidBinding(String),

    /// Two dependencies share a name
    #[error("Duplicate dependency: {0}")]
    DuplicateDependency(String),

    /// No dependency with that name
    #[error("Dependency not found: {0}")]
    DependencyNotFound(String),

    /// A dependency descriptor cannot be accepted
    #[error("Invalid dependency descriptor: {0}")]
    InvalidDescriptor(String),

    /// Configuration is malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A lifecycle hook returned an error
    #[error("Lifecycle hook failed: {0}")]
    Hook(#[from] anyhow::Error),
}

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Lock a mutex, carrying on with the inner value if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Prelude for common imports
pub mod prelude {
    pub use crate::{
        BindingSpec, BindingStrategy, DependencyEvent, DependencyEventKind, DependencyMap,
        DependencySpec, DependencyValue, Error, Manager, ManagerConfig, Result, ServiceLifecycle,
        UpdateStrategy,
    };
}
