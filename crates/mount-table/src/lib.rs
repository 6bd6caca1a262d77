//! Mount table refresh core
//!
//! Pushes mount table refreshes to every known router admin in parallel under
//! a shared deadline, and keeps a time-bounded cache of router admin clients.
//!
//! Cycle:
//! 1. `RouterStore` lists the current router admin addresses
//! 2. `UpdateTaskFactory` builds one `RefreshTask` per address (local or remote)
//! 3. `RefreshOrchestrator` runs them concurrently, waits up to `refresh_timeout`
//! 4. Failed routers (negative answer, error, or timeout) are invalidated in the cache
//! 5. A summary line reports `successCount`/`failureCount`
//!
//! Independently, `CacheLifecycle` primes the `ClientCache` at startup and runs
//! a cleaner that evicts clients older than `max_live`.

pub mod cache;
pub mod error;
pub mod lifecycle;
pub mod log;
pub mod orchestrator;
pub mod refresh;
pub mod store;
pub mod task;

pub use cache::{CachedClient, ClientCache, Invalidate};
pub use error::{Error, Result};
pub use lifecycle::CacheLifecycle;
pub use log::{LogSink, TracingLogSink};
pub use orchestrator::{CycleResult, NOT_ALL_UPDATED, RefreshConfig, RefreshOrchestrator, TimeoutPolicy};
pub use refresh::spawn_refresh_loop;
pub use store::{Endpoint, RouterStore, StaticRouterStore};
pub use task::{ClassifyingTaskFactory, FailureReason, RefreshTask, TaskOutcome, UpdateTaskFactory};
