//! Address-keyed cache of router admin clients with per-entry expiry
//!
//! Entries live in a `DashMap`, so every check-then-act on one address runs
//! under that address's shard lock: an entry is either fully present or fully
//! gone to any observer. The request path (`invalidate`, `get`) and the timer
//! path (`clean_up`) never need a cache-wide lock.
//!
//! Removal always closes the handle after the shard lock is released. Close
//! failures are logged and counted, never propagated, so a bad handle cannot
//! abort a sweep or an invalidation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A handle that can be stored in the client cache and released on eviction.
pub trait CachedClient: Send + Sync + 'static {
    type CloseError: fmt::Display;

    fn close(&self) -> Result<(), Self::CloseError>;
}

impl CachedClient for router_admin::RouterClient {
    type CloseError = router_admin::AdminError;

    fn close(&self) -> router_admin::Result<()> {
        router_admin::RouterClient::close(self)
    }
}

/// Forces the next use of an address to build a fresh handle.
///
/// The orchestrator only needs this slice of the cache, which keeps it
/// independent of the handle type.
pub trait Invalidate: Send + Sync {
    fn invalidate(&self, address: &str);
}

struct CacheEntry<C> {
    client: Arc<C>,
    created_at: Instant,
}

impl<C> CacheEntry<C> {
    fn new(client: C) -> Self {
        Self {
            client: Arc::new(client),
            created_at: Instant::now(),
        }
    }

    fn is_expired(&self, now: Instant, max_live: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > max_live
    }
}

type Loader<C> = dyn Fn(&str) -> C + Send + Sync;

/// Cache of router clients keyed by admin address.
///
/// The loader builds a client for an address on demand. It runs while the
/// address's shard is locked and must not call back into the cache.
pub struct ClientCache<C: CachedClient> {
    entries: DashMap<String, CacheEntry<C>>,
    max_live: Duration,
    loader: Box<Loader<C>>,
}

impl<C: CachedClient> ClientCache<C> {
    pub fn new(max_live: Duration, loader: impl Fn(&str) -> C + Send + Sync + 'static) -> Self {
        Self {
            entries: DashMap::new(),
            max_live,
            loader: Box::new(loader),
        }
    }

    /// Lifetime of an entry, also the cleaner's sweep delay.
    pub fn max_live(&self) -> Duration {
        self.max_live
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a client for `address` with the configured loader, without caching it.
    pub fn load(&self, address: &str) -> C {
        (self.loader)(address)
    }

    /// Insert `client` for `address` unless an entry already exists.
    ///
    /// Returns whether the client was stored. The first writer wins for the
    /// lifetime of the entry.
    pub fn add(&self, address: &str, client: C) -> bool {
        let inserted = match self.entries.entry(address.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(client));
                true
            }
        };
        if inserted {
            self.record_size();
        }
        inserted
    }

    /// Return the live client for `address`, loading one if the address is
    /// absent or its entry has expired. An expired entry is replaced in place
    /// and its handle closed.
    pub fn get(&self, address: &str) -> Arc<C> {
        let now = Instant::now();
        let mut stale = None;

        let client = match self.entries.entry(address.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now, self.max_live) {
                    let fresh = CacheEntry::new(self.load(address));
                    let client = fresh.client.clone();
                    stale = Some(occupied.insert(fresh));
                    client
                } else {
                    occupied.get().client.clone()
                }
            }
            Entry::Vacant(vacant) => {
                let fresh = CacheEntry::new(self.load(address));
                let client = fresh.client.clone();
                vacant.insert(fresh);
                client
            }
        };

        match stale {
            Some(entry) => self.release(address, entry.client, "expired"),
            None => self.record_size(),
        }
        client
    }

    /// Look up the cached client without loading or checking expiry.
    pub fn peek(&self, address: &str) -> Option<Arc<C>> {
        self.entries.get(address).map(|entry| entry.client.clone())
    }

    /// Remove and close the entry for `address`. Idempotent.
    ///
    /// Returns whether an entry was removed.
    pub fn remove(&self, address: &str) -> bool {
        match self.entries.remove(address) {
            Some((_, entry)) => {
                self.release(address, entry.client, "invalidated");
                true
            }
            None => false,
        }
    }

    /// Remove and close every entry older than `max_live`.
    ///
    /// Age is re-checked under the shard lock at removal time, so an entry
    /// replaced by `get` between the scan and the removal survives.
    pub fn clean_up(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now, self.max_live))
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for address in expired {
            let removed = self
                .entries
                .remove_if(&address, |_, entry| entry.is_expired(now, self.max_live));
            if let Some((_, entry)) = removed {
                self.release(&address, entry.client, "expired");
                evicted += 1;
            }
        }

        debug!(
            evicted,
            remaining = self.entries.len(),
            "client cache sweep finished"
        );
        evicted
    }

    /// Remove and close every entry regardless of age.
    pub fn clear(&self) -> usize {
        let addresses: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();

        let mut released = 0;
        for address in addresses {
            if let Some((_, entry)) = self.entries.remove(&address) {
                self.release(&address, entry.client, "shutdown");
                released += 1;
            }
        }
        released
    }

    fn release(&self, address: &str, client: Arc<C>, reason: &'static str) {
        metrics::counter!("router_client_cache_evictions_total", "reason" => reason).increment(1);
        self.record_size();

        match client.close() {
            Ok(()) => debug!(address, reason, "router client released"),
            Err(e) => {
                metrics::counter!("router_client_cache_close_failures_total").increment(1);
                warn!(address, reason, error = %e, "failed to close router client");
            }
        }
    }

    fn record_size(&self) {
        metrics::gauge!("router_client_cache_entries").set(self.entries.len() as f64);
    }
}

impl<C: CachedClient> Invalidate for ClientCache<C> {
    fn invalidate(&self, address: &str) {
        if self.remove(address) {
            debug!(address, "router client invalidated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Client that counts close calls and can be told to fail them.
    struct TestClient {
        address: String,
        generation: usize,
        closes: Arc<AtomicUsize>,
        fail_close: bool,
    }

    impl CachedClient for TestClient {
        type CloseError = String;

        fn close(&self) -> Result<(), String> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                Err(format!("close failed for {}", self.address))
            } else {
                Ok(())
            }
        }
    }

    /// Cache whose loader numbers each client it builds.
    fn test_cache(max_live: Duration) -> (ClientCache<TestClient>, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let loads = Arc::new(AtomicUsize::new(0));
        let loader_closes = closes.clone();
        let cache = ClientCache::new(max_live, move |address: &str| TestClient {
            address: address.to_string(),
            generation: loads.fetch_add(1, Ordering::SeqCst),
            closes: loader_closes.clone(),
            fail_close: false,
        });
        (cache, closes)
    }

    fn client(address: &str, closes: &Arc<AtomicUsize>, fail_close: bool) -> TestClient {
        TestClient {
            address: address.to_string(),
            generation: usize::MAX,
            closes: closes.clone(),
            fail_close,
        }
    }

    #[tokio::test]
    async fn add_keeps_first_writer() {
        let (cache, closes) = test_cache(Duration::from_secs(60));

        assert!(cache.add("r1", client("r1", &closes, false)));
        let first = cache.peek("r1").unwrap();
        assert!(!cache.add("r1", client("r1", &closes, false)));

        assert_eq!(cache.len(), 1);
        assert!(Arc::ptr_eq(&first, &cache.peek("r1").unwrap()));
    }

    #[tokio::test]
    async fn get_loads_on_demand_and_reuses() {
        let (cache, _closes) = test_cache(Duration::from_secs(60));

        let a = cache.get("r1");
        let b = cache.get("r1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.address, "r1");
        assert_eq!(a.generation, 0);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn get_replaces_expired_entry_and_closes_it() {
        let (cache, closes) = test_cache(Duration::from_millis(100));

        let old = cache.get("r1");
        tokio::time::advance(Duration::from_millis(150)).await;
        let fresh = cache.get("r1");

        assert!(!Arc::ptr_eq(&old, &fresh));
        assert_eq!(fresh.generation, 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn invalidate_removes_and_closes_once() {
        let (cache, closes) = test_cache(Duration::from_secs(60));
        cache.get("r1");
        cache.get("r2");

        cache.invalidate("r1");
        cache.invalidate("r1");
        cache.invalidate("never-cached");

        assert!(cache.peek("r1").is_none());
        assert!(cache.peek("r2").is_some());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_up_evicts_only_expired_entries() {
        let (cache, closes) = test_cache(Duration::from_millis(100));
        cache.get("old-1");
        cache.get("old-2");
        tokio::time::advance(Duration::from_millis(60)).await;
        cache.get("young");
        tokio::time::advance(Duration::from_millis(60)).await;

        let evicted = cache.clean_up();

        assert_eq!(evicted, 2);
        assert_eq!(closes.load(Ordering::SeqCst), 2);
        assert!(cache.peek("young").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_at_exact_max_live_is_kept() {
        let (cache, _closes) = test_cache(Duration::from_millis(100));
        cache.get("r1");
        tokio::time::advance(Duration::from_millis(100)).await;

        assert_eq!(cache.clean_up(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_failure_does_not_abort_sweep() {
        let (cache, closes) = test_cache(Duration::from_millis(10));
        cache.add("bad", client("bad", &closes, true));
        cache.add("good-1", client("good-1", &closes, false));
        cache.add("good-2", client("good-2", &closes, false));
        tokio::time::advance(Duration::from_millis(20)).await;

        assert_eq!(cache.clean_up(), 3);
        assert_eq!(closes.load(Ordering::SeqCst), 3);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn close_failure_on_invalidate_is_swallowed() {
        let (cache, closes) = test_cache(Duration::from_secs(60));
        cache.add("bad", client("bad", &closes, true));

        cache.invalidate("bad");

        assert!(cache.is_empty());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_releases_everything() {
        let (cache, closes) = test_cache(Duration::from_secs(60));
        for address in ["r1", "r2", "r3"] {
            cache.get(address);
        }

        assert_eq!(cache.clear(), 3);
        assert!(cache.is_empty());
        assert_eq!(closes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn concurrent_removal_closes_each_entry_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(ClientCache::new(Duration::from_secs(60), {
            let closes = closes.clone();
            move |address: &str| TestClient {
                address: address.to_string(),
                generation: 0,
                closes: closes.clone(),
                fail_close: false,
            }
        }));
        let addresses: Vec<String> = (0..500).map(|i| format!("10.0.{}.{}:8111", i / 250, i % 250)).collect();
        for address in &addresses {
            cache.get(address);
        }

        let invalidator = {
            let cache = cache.clone();
            let addresses = addresses.clone();
            std::thread::spawn(move || {
                for address in &addresses {
                    cache.invalidate(address);
                }
            })
        };
        let sweeper = {
            let cache = cache.clone();
            std::thread::spawn(move || cache.clear())
        };
        invalidator.join().unwrap();
        sweeper.join().unwrap();

        assert!(cache.is_empty());
        assert_eq!(closes.load(Ordering::SeqCst), addresses.len());
    }

    #[test]
    fn sweep_races_invalidate_and_get_without_double_close() {
        const ROUTERS: usize = 300;
        let registry: Arc<std::sync::Mutex<Vec<Arc<AtomicUsize>>>> = Arc::default();
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(ClientCache::new(Duration::from_millis(50), {
            let registry = registry.clone();
            let loads = loads.clone();
            move |address: &str| {
                let closes = Arc::new(AtomicUsize::new(0));
                registry.lock().unwrap().push(closes.clone());
                TestClient {
                    address: address.to_string(),
                    generation: loads.fetch_add(1, Ordering::SeqCst),
                    closes,
                    fail_close: false,
                }
            }
        }));
        let addresses: Vec<String> = (0..ROUTERS).map(|i| format!("10.1.0.{i}:8111")).collect();
        for address in &addresses {
            cache.get(address);
        }
        // Every primed entry is now past max_live
        std::thread::sleep(Duration::from_millis(80));

        let sweeper = {
            let cache = cache.clone();
            std::thread::spawn(move || (0..5).map(|_| cache.clean_up()).sum::<usize>())
        };
        let invalidator = {
            let cache = cache.clone();
            let addresses = addresses.clone();
            std::thread::spawn(move || {
                for address in addresses.iter().step_by(2) {
                    cache.invalidate(address);
                }
            })
        };
        let getter = {
            let cache = cache.clone();
            let addresses = addresses.clone();
            std::thread::spawn(move || {
                for address in addresses.iter().skip(1).step_by(2) {
                    let client = cache.get(address);
                    assert!(client.generation >= ROUTERS, "get returned an expired client");
                }
            })
        };
        sweeper.join().unwrap();
        invalidator.join().unwrap();
        getter.join().unwrap();

        for (i, address) in addresses.iter().enumerate() {
            if let Some(client) = cache.peek(address) {
                assert!(i % 2 == 1, "invalidated address {address} survived");
                assert!(client.generation >= ROUTERS, "expired entry for {address} survived");
                assert_eq!(client.closes.load(Ordering::SeqCst), 0);
            }
        }

        cache.clear();
        let registry = registry.lock().unwrap();
        assert!(registry.len() >= ROUTERS + ROUTERS / 2);
        for (i, closes) in registry.iter().enumerate() {
            assert_eq!(closes.load(Ordering::SeqCst), 1, "client {i} closed wrong number of times");
        }
    }
}
