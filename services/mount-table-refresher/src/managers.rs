//! HTTP-backed `ManagerFactory`
//!
//! Remote targets take their `RouterClient` from the shared client cache, so
//! repeated cycles reuse the same handle until it expires or a failure
//! invalidates it. The `local` sentinel maps to this router's own admin URL
//! through a dedicated client that never enters the cache.

use std::sync::Arc;

use mount_table::ClientCache;
use router_admin::{
    HttpMountTableManager, LOCAL_TARGET, ManagerFactory, MountTableManager, RouterClient,
};
use tracing::debug;

/// Build the client cache whose loader creates HTTP clients sharing `http`.
pub fn client_cache(
    max_live: std::time::Duration,
    http: reqwest::Client,
) -> ClientCache<RouterClient> {
    ClientCache::new(max_live, move |address: &str| {
        RouterClient::for_address(address, http.clone())
    })
}

pub struct HttpManagerFactory {
    cache: Arc<ClientCache<RouterClient>>,
    local: Arc<RouterClient>,
}

impl HttpManagerFactory {
    pub fn new(
        cache: Arc<ClientCache<RouterClient>>,
        local_admin_url: &str,
        http: reqwest::Client,
    ) -> Self {
        Self {
            cache,
            local: Arc::new(RouterClient::new(LOCAL_TARGET, local_admin_url, http)),
        }
    }
}

impl ManagerFactory for HttpManagerFactory {
    fn manager(&self, target: &str) -> Arc<dyn MountTableManager> {
        let client = if target == LOCAL_TARGET {
            self.local.clone()
        } else {
            self.cache.get(target)
        };
        debug!(target, base_url = client.base_url(), "mount table manager created");
        Arc::new(HttpMountTableManager::new(target, client))
    }
}
