//! Manager configuration

use crate::{Error, Result, binding::BindingSpec};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What a manager does with its service when a required dependency goes away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsatisfiedPolicy {
    /// Keep the service; only the update strategy decides what happens
    #[default]
    Retain,
    /// Unregister and dispose the service until dependencies return
    Dispose,
}

/// Behavioural switches of a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ManagerPolicy {
    /// Reaction to losing a required dependency
    #[serde(default)]
    pub unsatisfied: UnsatisfiedPolicy,
}

/// Manager configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Explicit bindings; undeclared dependencies get a lazy static binding
    #[serde(default)]
    pub bindings: Vec<BindingSpec>,
    /// Policy switches
    #[serde(default)]
    pub policy: ManagerPolicy,
}

impl ManagerConfig {
    /// Load configuration from file, YAML for `.yaml`/`.yml`, JSON otherwise
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&contents),
            _ => Self::from_json_str(&contents),
        }
    }

    /// Parse YAML configuration
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse JSON configuration
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Add a binding
    pub fn with_binding(mut self, binding: BindingSpec) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Set the policy
    pub fn with_policy(mut self, policy: ManagerPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn validate(&self) -> Result<()> {
        for binding in &self.bindings {
            if binding.dependency.trim().is_empty() {
                return Err(Error::Config(
                    "Binding dependency name cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}
