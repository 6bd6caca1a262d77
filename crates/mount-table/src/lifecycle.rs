//! Client cache lifecycle: startup population and the background cleaner
//!
//! `start` primes the cache with one client per known router and spawns a
//! cleaner that sweeps expired entries with a fixed delay of `max_live`
//! between sweeps. `stop` ends the cleaner and releases every client.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CachedClient, ClientCache};
use crate::error::{Error, Result};
use crate::store::RouterStore;

struct Cleaner {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the client cache's startup and shutdown.
pub struct CacheLifecycle<C: CachedClient> {
    store: Arc<dyn RouterStore>,
    cache: Arc<ClientCache<C>>,
    cleaner: Mutex<Option<Cleaner>>,
}

impl<C: CachedClient> CacheLifecycle<C> {
    pub fn new(store: Arc<dyn RouterStore>, cache: Arc<ClientCache<C>>) -> Self {
        Self {
            store,
            cache,
            cleaner: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<ClientCache<C>> {
        &self.cache
    }

    pub async fn is_running(&self) -> bool {
        self.cleaner.lock().await.is_some()
    }

    /// Populate the cache from the router store and start the cleaner.
    ///
    /// Returns the number of clients added. Fails if already started.
    pub async fn start(&self) -> Result<usize> {
        let mut cleaner = self.cleaner.lock().await;
        if cleaner.is_some() {
            return Err(Error::AlreadyStarted);
        }

        let mut seen = HashSet::new();
        let mut populated = 0;
        for endpoint in self.store.list_endpoints() {
            let address = endpoint.admin_address;
            if address.is_empty() || !seen.insert(address.clone()) {
                continue;
            }
            if self.cache.add(&address, self.cache.load(&address)) {
                populated += 1;
            }
        }

        *cleaner = Some(spawn_cleaner(self.cache.clone()));
        info!(
            populated,
            max_live_ms = self.cache.max_live().as_millis() as u64,
            "client cache started"
        );
        Ok(populated)
    }

    /// Stop the cleaner and release every cached client.
    ///
    /// No sweep runs after this returns. Safe to call when not started.
    /// Returns the number of clients released.
    pub async fn stop(&self) -> usize {
        let cleaner = self.cleaner.lock().await.take();
        if let Some(Cleaner { shutdown, handle }) = cleaner {
            let _ = shutdown.send(true);
            if let Err(e) = handle.await {
                warn!(error = %e, "client cache cleaner ended abnormally");
            }
        }

        let released = self.cache.clear();
        info!(released, "client cache stopped");
        released
    }
}

/// Sweep expired entries every `max_live`, measured from the end of the
/// previous sweep. The first sweep runs one full delay after spawning.
fn spawn_cleaner<C: CachedClient>(cache: Arc<ClientCache<C>>) -> Cleaner {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let delay = cache.max_live();

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let evicted = cache.clean_up();
                    if evicted > 0 {
                        debug!(evicted, "expired router clients evicted");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("stopping client cache cleaner");
                        break;
                    }
                }
            }
        }
    });

    Cleaner { shutdown, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Endpoint, StaticRouterStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingClient {
        closes: Arc<AtomicUsize>,
    }

    impl CachedClient for CountingClient {
        type CloseError = std::convert::Infallible;

        fn close(&self) -> std::result::Result<(), Self::CloseError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        lifecycle: CacheLifecycle<CountingClient>,
        store: Arc<StaticRouterStore>,
        closes: Arc<AtomicUsize>,
    }

    fn fixture(addresses: &[&str], max_live: Duration) -> Fixture {
        let closes = Arc::new(AtomicUsize::new(0));
        let loader_closes = closes.clone();
        let cache = Arc::new(ClientCache::new(max_live, move |_: &str| CountingClient {
            closes: loader_closes.clone(),
        }));
        let store = Arc::new(StaticRouterStore::from_addresses(addresses.iter().copied()));
        Fixture {
            lifecycle: CacheLifecycle::new(store.clone(), cache),
            store,
            closes,
        }
    }

    #[tokio::test]
    async fn start_populates_one_entry_per_known_address() {
        let f = fixture(&["r1", "r2", "", "r1"], Duration::from_secs(60));

        let populated = f.lifecycle.start().await.unwrap();

        assert_eq!(populated, 2);
        assert_eq!(f.lifecycle.cache().len(), 2);
        assert!(f.lifecycle.cache().peek("r1").is_some());
        assert!(f.lifecycle.cache().peek("").is_none());
        assert!(f.lifecycle.is_running().await);
        f.lifecycle.stop().await;
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let f = fixture(&["r1"], Duration::from_secs(60));
        f.lifecycle.start().await.unwrap();

        let err = f.lifecycle.start().await.unwrap_err();

        assert!(matches!(err, Error::AlreadyStarted));
        f.lifecycle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cleaner_evicts_entries_older_than_max_live() {
        let f = fixture(&["r1", "r2"], Duration::from_millis(100));
        f.lifecycle.start().await.unwrap();

        // First sweep at 100ms finds entries exactly max_live old and keeps them.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(f.lifecycle.cache().len(), 2);

        // Second sweep at 200ms evicts them.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.lifecycle.cache().is_empty());
        assert_eq!(f.closes.load(Ordering::SeqCst), 2);

        f.lifecycle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn entries_refreshed_by_get_survive_sweep() {
        let f = fixture(&["r1", "r2"], Duration::from_millis(100));
        f.lifecycle.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        // r1 is expired now; get replaces it with a fresh client.
        f.lifecycle.cache().get("r1");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(f.lifecycle.cache().peek("r1").is_some());
        assert!(f.lifecycle.cache().peek("r2").is_none());
        f.lifecycle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_all_and_halts_cleaner() {
        let f = fixture(&["r1", "r2", "r3"], Duration::from_millis(100));
        f.lifecycle.start().await.unwrap();

        let released = f.lifecycle.stop().await;

        assert_eq!(released, 3);
        assert!(f.lifecycle.cache().is_empty());
        assert_eq!(f.closes.load(Ordering::SeqCst), 3);
        assert!(!f.lifecycle.is_running().await);

        // With the cleaner gone, nothing expires on its own.
        f.lifecycle.cache().get("late");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(f.lifecycle.cache().peek("late").is_some());
    }

    #[tokio::test]
    async fn stop_without_start_still_clears() {
        let f = fixture(&[], Duration::from_secs(60));
        f.lifecycle.cache().get("r1");

        assert_eq!(f.lifecycle.stop().await, 1);
        assert_eq!(f.lifecycle.stop().await, 0);
    }

    #[tokio::test]
    async fn restart_after_stop_reads_current_router_list() {
        let f = fixture(&["r1"], Duration::from_secs(60));
        f.lifecycle.start().await.unwrap();
        f.lifecycle.stop().await;

        f.store.replace(vec![Endpoint::new("r2"), Endpoint::new("r3")]);
        let populated = f.lifecycle.start().await.unwrap();

        assert_eq!(populated, 2);
        assert!(f.lifecycle.cache().peek("r1").is_none());
        f.lifecycle.stop().await;
    }
}
