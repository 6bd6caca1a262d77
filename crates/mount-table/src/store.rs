//! Router endpoint discovery
//!
//! The orchestrator reads a fresh snapshot of known router admin addresses at
//! the start of every cycle. Where the list comes from is up to the store.

use std::sync::{PoisonError, RwLock};

use tracing::info;

/// One router admin target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub admin_address: String,
}

impl Endpoint {
    pub fn new(admin_address: impl Into<String>) -> Self {
        Self {
            admin_address: admin_address.into(),
        }
    }
}

/// Source of the current router list.
pub trait RouterStore: Send + Sync {
    /// Snapshot of known routers. May be empty; order carries no meaning.
    fn list_endpoints(&self) -> Vec<Endpoint>;
}

/// In-memory router list, seeded from configuration and replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticRouterStore {
    endpoints: RwLock<Vec<Endpoint>>,
}

impl StaticRouterStore {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints: RwLock::new(endpoints),
        }
    }

    pub fn from_addresses<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(addresses.into_iter().map(Endpoint::new).collect())
    }

    /// Swap in a new router list. Takes effect from the next cycle.
    pub fn replace(&self, endpoints: Vec<Endpoint>) {
        let count = endpoints.len();
        *self.endpoints.write().unwrap_or_else(PoisonError::into_inner) = endpoints;
        info!(routers = count, "router list replaced");
    }
}

impl RouterStore for StaticRouterStore {
    fn list_endpoints(&self) -> Vec<Endpoint> {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_configured_endpoints_in_order() {
        let store = StaticRouterStore::from_addresses(["123", "local6", "789", "local"]);
        let addresses: Vec<String> = store
            .list_endpoints()
            .into_iter()
            .map(|e| e.admin_address)
            .collect();
        assert_eq!(addresses, vec!["123", "local6", "789", "local"]);
    }

    #[test]
    fn replace_swaps_snapshot() {
        let store = StaticRouterStore::from_addresses(["r1"]);
        let before = store.list_endpoints();

        store.replace(vec![Endpoint::new("r2"), Endpoint::new("r3")]);

        assert_eq!(before, vec![Endpoint::new("r1")]);
        assert_eq!(store.list_endpoints().len(), 2);
    }

    #[test]
    fn default_store_is_empty() {
        assert!(StaticRouterStore::default().list_endpoints().is_empty());
    }
}
