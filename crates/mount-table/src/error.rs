//! Error types for the refresh core

/// Errors from orchestrator construction and cache lifecycle operations.
///
/// Per-router refresh failures are not errors at this level: they are
/// recorded as task outcomes and never escape a refresh cycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("client cache lifecycle already started")]
    AlreadyStarted,

    #[error("invalid refresh configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias for refresh core operations.
pub type Result<T> = std::result::Result<T, Error>;
