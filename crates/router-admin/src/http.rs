//! HTTP mount table manager
//!
//! Pushes the refresh through a shared `RouterClient`. The client comes from
//! the caller (normally the client cache), so a manager never owns the
//! connection state it uses.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{MountTableManager, Result, RouterClient};

/// Manager that refreshes a router's mount table over its admin HTTP API.
pub struct HttpMountTableManager {
    target: String,
    client: Arc<RouterClient>,
}

impl HttpMountTableManager {
    pub fn new(target: impl Into<String>, client: Arc<RouterClient>) -> Self {
        Self {
            target: target.into(),
            client,
        }
    }
}

impl MountTableManager for HttpMountTableManager {
    fn target(&self) -> &str {
        &self.target
    }

    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(self.client.refresh_mount_table())
    }
}
