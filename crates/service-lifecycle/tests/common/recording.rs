//! A lifecycle and registration strategy that journal every call

use service_lifecycle::{
    DependencyEventKind, DependencyMap, DependencySpec, DependencyValue, RegistrationStrategy,
    ServiceLifecycle,
};
use service_registry::Properties;
use std::sync::{Arc, Mutex};

/// Service built by [`WidgetLifecycle`]
#[derive(Debug)]
pub struct Widget {
    pub label: String,
}

/// Journaled call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(String),
    Dispose(String),
    Change(DependencyEventKind, String),
    Register(String),
    Update(String),
    Unregister,
}

/// Shared, ordered call journal
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Call>>>);

impl Journal {
    pub fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    /// Drain the journal
    pub fn take(&self) -> Vec<Call> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

/// What the change hook does with a running widget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeMode {
    Keep,
    Replace,
    Withdraw,
}

/// Builds widgets labelled with the string values of their dependencies
pub struct WidgetLifecycle {
    pub journal: Journal,
    pub specs: Vec<DependencySpec>,
    pub mode: ChangeMode,
    pub fail_create: bool,
}

impl WidgetLifecycle {
    pub fn new(journal: Journal, specs: Vec<DependencySpec>) -> Self {
        Self {
            journal,
            specs,
            mode: ChangeMode::Keep,
            fail_create: false,
        }
    }

    pub fn with_mode(mut self, mode: ChangeMode) -> Self {
        self.mode = mode;
        self
    }

    fn label(dependencies: &DependencyMap) -> String {
        dependencies
            .values()
            .flat_map(DependencyValue::downcast_all::<String>)
            .map(|s| (*s).clone())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl ServiceLifecycle for WidgetLifecycle {
    type Service = Widget;

    fn dependency_specs(&self) -> Vec<DependencySpec> {
        self.specs.clone()
    }

    fn service_class_names(&self) -> Vec<String> {
        vec!["org.example.Widget".to_string()]
    }

    fn create_service(&self, dependencies: &DependencyMap) -> anyhow::Result<Option<Arc<Widget>>> {
        if self.fail_create {
            anyhow::bail!("widget factory is broken");
        }
        let label = Self::label(dependencies);
        self.journal.push(Call::Create(label.clone()));
        Ok(Some(Arc::new(Widget { label })))
    }

    fn dispose_service(&self, service: Arc<Widget>, _: &DependencyMap) -> anyhow::Result<()> {
        self.journal.push(Call::Dispose(service.label.clone()));
        Ok(())
    }

    fn handle_dependency_change(
        &self,
        service: &Arc<Widget>,
        change: DependencyEventKind,
        dependency: &str,
        _new_value: Option<&DependencyValue>,
        dependencies: &DependencyMap,
    ) -> anyhow::Result<Option<Arc<Widget>>> {
        self.journal
            .push(Call::Change(change, dependency.to_string()));
        match self.mode {
            ChangeMode::Keep => Ok(Some(service.clone())),
            ChangeMode::Replace => self.create_service(dependencies),
            ChangeMode::Withdraw => Ok(None),
        }
    }

    fn registration_properties(&self, service: &Widget) -> Properties {
        let mut properties = Properties::new();
        properties.insert("label".to_string(), service.label.clone().into());
        properties
    }
}

/// Registration strategy that only journals
pub struct RecordingRegistration {
    journal: Journal,
    registered: bool,
    accepted: usize,
    limit: Option<usize>,
}

impl RecordingRegistration {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            registered: false,
            accepted: 0,
            limit: None,
        }
    }

    /// Refuse every `register` after the first `limit`
    pub fn accepting(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl RegistrationStrategy<Widget> for RecordingRegistration {
    fn register(&mut self, service: Arc<Widget>) -> service_lifecycle::Result<()> {
        if self.limit.is_some_and(|limit| self.accepted >= limit) {
            return Err(anyhow::anyhow!("registry refused widget {}", service.label).into());
        }
        self.accepted += 1;
        self.journal.push(Call::Register(service.label.clone()));
        self.registered = true;
        Ok(())
    }

    fn update_registration(&mut self, service: &Arc<Widget>) -> service_lifecycle::Result<()> {
        self.journal.push(Call::Update(service.label.clone()));
        Ok(())
    }

    fn unregister(&mut self) -> service_lifecycle::Result<()> {
        if self.registered {
            self.journal.push(Call::Unregister);
            self.registered = false;
        }
        Ok(())
    }

    fn is_registered(&self) -> bool {
        self.registered
    }
}
