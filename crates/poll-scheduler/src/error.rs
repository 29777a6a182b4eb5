//! Scheduler Error Types

use thiserror::Error;

/// Errors surfaced by the polling scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Diagnostic transport failure that exhausted its retries
    #[error("Transport error: {0}")]
    Transport(#[from] uds_protocol::UdsError),

    /// Request list or result persistence failure (fatal for the
    /// operation that invoked it)
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration values are inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A session needs at least one request to schedule
    #[error("Registry contains no requests")]
    EmptyRegistry,
}
