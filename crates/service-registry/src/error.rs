//! Error types for the service registry

use thiserror::Error;

/// Service registry error type
#[derive(Error, Debug)]
pub enum Error {
    /// Service not found
    #[error("Service not found: #{0}")]
    ServiceNotFound(u64),

    /// Registration request rejected
    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
