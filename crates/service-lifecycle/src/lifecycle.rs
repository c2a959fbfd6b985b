//! Managed service lifecycle hooks

use crate::{
    binding::DependencySpec,
    events::DependencyEventKind,
    types::{DependencyMap, DependencyValue},
};
use service_registry::Properties;
use std::sync::Arc;

/// Creates, updates and disposes a managed service
///
/// Hooks are called by a [`Manager`](crate::Manager) while it holds its own
/// lock, on whichever thread delivered the triggering registry event. They
/// must not wait on anything that needs the same manager.
pub trait ServiceLifecycle: Send + Sync + 'static {
    /// The managed service type
    type Service: Send + Sync + 'static;

    /// Dependencies the service is built from
    fn dependency_specs(&self) -> Vec<DependencySpec>;

    /// Class names the service is published under
    fn service_class_names(&self) -> Vec<String>;

    /// Build the service from a snapshot of its dependencies
    ///
    /// Returning `Ok(None)` declines construction; the manager retries on the
    /// next dependency event.
    fn create_service(&self, dependencies: &DependencyMap) -> anyhow::Result<Option<Arc<Self::Service>>>;

    /// Tear the service down
    fn dispose_service(
        &self,
        service: Arc<Self::Service>,
        dependencies: &DependencyMap,
    ) -> anyhow::Result<()>;

    /// Apply a single dependency change to a running service
    ///
    /// Used by dynamic bindings. Return the same instance to keep it, a new
    /// instance to replace it, or `None` to withdraw it. The default keeps
    /// the service as is.
    fn handle_dependency_change(
        &self,
        service: &Arc<Self::Service>,
        _change: DependencyEventKind,
        _dependency: &str,
        _new_value: Option<&DependencyValue>,
        _dependencies: &DependencyMap,
    ) -> anyhow::Result<Option<Arc<Self::Service>>> {
        Ok(Some(service.clone()))
    }

    /// Properties the service is published with
    fn registration_properties(&self, _service: &Self::Service) -> Properties {
        Properties::new()
    }
}
