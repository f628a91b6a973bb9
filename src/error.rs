//! Error types for the tiered cache engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tiered cache engine
///
/// Only misuse and configuration problems surface from foreground calls.
/// Store and remote failures are absorbed by the background paths and show up
/// here only when a caller talks to a store directly.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parse error
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller supplied an unusable argument (empty key and the like)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Key pattern could not be compiled
    #[error("Invalid key pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Auxiliary store failure
    #[error("Auxiliary store '{store}' failed: {reason}")]
    Store { store: String, reason: String },

    /// Remote server could not be reached
    #[error("Remote server {location} unavailable: {reason}")]
    RemoteUnavailable { location: String, reason: String },

    /// Event queue no longer accepts work
    #[error("Event queue for listener {listener} is not accepting events")]
    QueueClosed { listener: u64 },

    // =========================================================================
    // Worker Pool Errors
    // =========================================================================
    /// Pool boundary reached and the policy is to abort
    #[error("Worker pool '{pool}' is saturated ({queued} jobs queued)")]
    PoolSaturated { pool: String, queued: usize },

    /// Pool has been shut down
    #[error("Worker pool '{0}' has been shut down")]
    PoolShutdown(String),

    // =========================================================================
    // Region Errors
    // =========================================================================
    /// Region already registered
    #[error("Region already exists: {0}")]
    RegionExists(String),

    /// Region has been disposed
    #[error("Region has been disposed: {0}")]
    RegionDisposed(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a store error from any displayable cause
    pub fn store(store: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Store {
            store: store.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error belongs to the transient store/remote class
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Store { .. } | Error::RemoteUnavailable { .. }
        )
    }
}
