//! Router admin collaborators for mount table refresh
//!
//! Defines the seams the refresh core talks to: a `MountTableManager` that
//! pushes a mount table refresh to one router admin endpoint, and a
//! `ManagerFactory` that builds managers for a target address. The HTTP
//! implementation (`HttpMountTableManager`) drives a cached `RouterClient`.

pub mod client;
pub mod http;

pub use client::RouterClient;
pub use http::HttpMountTableManager;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Target handed to the manager factory for tasks that refresh this router's
/// own admin interface.
pub const LOCAL_TARGET: &str = "local";

/// Errors from router admin operations.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("admin request to {address} failed: {message}")]
    Request { address: String, message: String },

    #[error("admin endpoint {address} returned {status}: {body}")]
    Status {
        address: String,
        status: u16,
        body: String,
    },

    #[error("invalid refresh response from {address}: {message}")]
    InvalidResponse { address: String, message: String },

    #[error("router client for {0} is closed")]
    Closed(String),
}

impl AdminError {
    /// Variant name, used to tag failure descriptions.
    pub fn kind(&self) -> &'static str {
        match self {
            AdminError::Request { .. } => "Request",
            AdminError::Status { .. } => "Status",
            AdminError::InvalidResponse { .. } => "InvalidResponse",
            AdminError::Closed(_) => "Closed",
        }
    }
}

/// Result alias for router admin operations.
pub type Result<T> = std::result::Result<T, AdminError>;

/// Pushes a mount table refresh to one router admin endpoint.
///
/// `refresh` resolves to `Ok(true)` when the router reports its cache was
/// updated, `Ok(false)` when it declined, and `Err` on transport or protocol
/// failure. Implementations may take as long as the remote system allows;
/// the caller applies its own deadline.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn MountTableManager>`).
pub trait MountTableManager: Send + Sync {
    /// Address or sentinel this manager was built for.
    fn target(&self) -> &str;

    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;
}

/// Builds managers for a target address (or `LOCAL_TARGET`).
pub trait ManagerFactory: Send + Sync {
    fn manager(&self, target: &str) -> Arc<dyn MountTableManager>;
}
