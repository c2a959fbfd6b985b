//! Service registry abstraction for dependency tracking
//!
//! This crate defines the registry contract the lifecycle core is written
//! against: services are published under class names with properties,
//! found through [`Descriptor`] queries, resolved through opaque
//! [`ServiceReference`] handles, and observed through [`RegistryListener`]s.
//!
//! [`MemoryRegistry`] is an in-process implementation that delivers events
//! synchronously on the thread that changed the registry.
//!
//! # Example
//!
//! ```
//! use service_registry::{Descriptor, MemoryRegistry, Properties, Registry};
//! use std::sync::Arc;
//!
//! # fn example() -> service_registry::Result<()> {
//! let registry = MemoryRegistry::new();
//! let reference = registry.register(
//!     vec!["org.example.Clock".to_string()],
//!     Arc::new(42u32),
//!     Properties::new(),
//! )?;
//!
//! let found = registry.find_all(&Descriptor::new("org.example.Clock"));
//! assert_eq!(found, vec![reference]);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod models;
pub mod registry;

pub use backend::MemoryRegistry;
pub use error::{Error, Result};
pub use models::*;
pub use registry::{Registry, RegistryListener};

/// Re-export key types for convenience
pub mod prelude {
    pub use crate::{
        Descriptor, Error, ListenerId, MemoryRegistry, Properties, Registry, RegistryEvent,
        RegistryEventKind, RegistryListener, Result, ServiceObject, ServiceReference,
    };
}
