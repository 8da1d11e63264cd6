//! Error types for companion-core
//!
//! Errors fall into the categories the engine exposes to its callers:
//!
//! - **Configuration errors**: bad config files, bad simulation parameters (exit code 1)
//! - **Broker errors**: publish/consume/health-check/topology fetch failures (exit code 2)
//! - **Not found**: unknown simulation ids, untraceable messages (exit code 3)
//! - **Cancelled**: a tracer scan stopped by its cancellation token (exit code 2)
//!
//! Topology validation failures are NOT errors. They are reported as data in a
//! [`crate::validator::ValidationReport`].

use thiserror::Error;

/// Core error type for companion operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Invalid configuration file or value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Simulation rejected before any worker started
    #[error("Invalid simulation: {0}")]
    InvalidSimulation(String),

    /// Resource not found (simulation id, message id, dead-letter target)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Broker I/O failure
    #[error("Broker error: {0}")]
    Broker(String),

    /// Parse error when reading configuration or broker payloads
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Filesystem failure
    #[error("IO error: {0}")]
    IoError(String),

    /// Broker work abandoned on request
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    /// Create a not found error for an entity
    #[must_use]
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{entity} '{id}'"))
    }

    /// Create a broker error
    #[must_use]
    pub fn broker(msg: impl Into<String>) -> Self {
        Self::Broker(msg.into())
    }

    /// Whether this error is the explicit not-found condition.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns the appropriate exit code for this error type.
    ///
    /// - 1: User error (invalid config, invalid simulation, parse failure)
    /// - 2: System error (broker, IO, cancelled broker work)
    /// - 3: Not found
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidConfig(_) | Self::InvalidSimulation(_) | Self::ParseError(_) => 1,
            Self::Broker(_) | Self::IoError(_) | Self::Cancelled(_) => 2,
            Self::NotFound(_) => 3,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::ParseError(format!("Failed to parse config: {err}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Broker(err.to_string())
    }
}

/// Result type alias for companion-core operations
pub type Result<T> = std::result::Result<T, Error>;
