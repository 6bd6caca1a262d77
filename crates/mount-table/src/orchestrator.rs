//! Mount table refresh orchestration
//!
//! One cycle builds a task per known router, spawns them all onto the tokio
//! runtime and waits for them under a single deadline. Every launched task
//! lands in exactly one of the success/failure buckets; failures invalidate
//! the router's cached client so the next use builds a fresh one.
//!
//! Deadline semantics: a task still running at the deadline is counted as a
//! timeout, but under `TimeoutPolicy::Detach` (the default) the underlying
//! admin call keeps running in the background until it finishes on its own.
//! The cycle's report never waits for it. This is a known resource leak for
//! routers that hang indefinitely; `TimeoutPolicy::Abort` cancels the spawned
//! task instead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, Level, debug, info_span};
use uuid::Uuid;

use crate::cache::Invalidate;
use crate::error::{Error, Result};
use crate::log::{LogSink, TracingLogSink};
use crate::store::RouterStore;
use crate::task::{FailureReason, RefreshTask, TaskOutcome, UpdateTaskFactory};

/// Warning emitted before the summary when any router failed to refresh.
pub const NOT_ALL_UPDATED: &str = "Not all router admins updated their cache";

/// What happens to a refresh still running at the cycle deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Stop waiting; the call runs to completion in the background.
    #[default]
    Detach,
    /// Abort the spawned task at the deadline.
    Abort,
}

/// Orchestrator settings, fixed at construction.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Deadline for all tasks of one cycle, measured from launch.
    pub refresh_timeout: Duration,
    /// Upper bound on admin calls in flight, shared across cycles.
    pub max_concurrent_refreshes: Option<usize>,
    pub timeout_policy: TimeoutPolicy,
}

impl RefreshConfig {
    pub fn new(refresh_timeout: Duration) -> Self {
        Self {
            refresh_timeout,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.refresh_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "refresh_timeout must be greater than 0".into(),
            ));
        }
        if self.max_concurrent_refreshes == Some(0) {
            return Err(Error::InvalidConfig(
                "max_concurrent_refreshes must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_timeout: Duration::from_secs(10),
            max_concurrent_refreshes: None,
            timeout_policy: TimeoutPolicy::Detach,
        }
    }
}

/// Per-cycle counts. Derived from the cycle's tasks, never stored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleResult {
    pub success_count: usize,
    pub failure_count: usize,
}

impl CycleResult {
    pub fn total(&self) -> usize {
        self.success_count + self.failure_count
    }

    pub fn all_succeeded(&self) -> bool {
        self.failure_count == 0
    }

    /// Summary line logged at the end of every cycle that launched a task.
    pub fn summary(&self) -> String {
        format!(
            "Mount table entries cache refresh successCount={},failureCount={}",
            self.success_count, self.failure_count
        )
    }
}

/// Pushes mount table refreshes to every known router admin.
pub struct RefreshOrchestrator {
    store: Arc<dyn RouterStore>,
    tasks: Arc<dyn UpdateTaskFactory>,
    cache: Arc<dyn Invalidate>,
    log: Arc<dyn LogSink>,
    config: RefreshConfig,
    permits: Option<Arc<Semaphore>>,
}

impl RefreshOrchestrator {
    pub fn new(
        store: Arc<dyn RouterStore>,
        tasks: Arc<dyn UpdateTaskFactory>,
        cache: Arc<dyn Invalidate>,
        config: RefreshConfig,
    ) -> Result<Self> {
        config.validate()?;
        let permits = config
            .max_concurrent_refreshes
            .map(|limit| Arc::new(Semaphore::new(limit)));
        Ok(Self {
            store,
            tasks,
            cache,
            log: Arc::new(TracingLogSink),
            config,
            permits,
        })
    }

    /// Replace the default `tracing` log sink.
    pub fn with_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    /// Run one refresh cycle over the routers currently known to the store.
    ///
    /// Returns `None` without logging anything when there is no router with
    /// a non-empty admin address. Otherwise returns once every task resolved
    /// or `refresh_timeout` elapsed, whichever comes first.
    pub async fn refresh(&self) -> Option<CycleResult> {
        let mut tasks: Vec<RefreshTask> = self
            .store
            .list_endpoints()
            .into_iter()
            .filter(|endpoint| !endpoint.admin_address.is_empty())
            .map(|endpoint| self.tasks.update_task(&endpoint.admin_address))
            .collect();

        if tasks.is_empty() {
            debug!("no router admins to refresh");
            return None;
        }

        let span = info_span!("mount_table_refresh", cycle_id = %Uuid::new_v4(), tasks = tasks.len());
        Some(self.invoke_refresh(&mut tasks).instrument(span).await)
    }

    async fn invoke_refresh(&self, tasks: &mut [RefreshTask]) -> CycleResult {
        let started = Instant::now();
        let deadline = started + self.config.refresh_timeout;

        let handles: Vec<JoinHandle<TaskOutcome>> = tasks
            .iter()
            .map(|task| {
                let call = task.invocation();
                let permits = self.permits.clone();
                tokio::spawn(
                    async move {
                        let _permit = match permits {
                            Some(semaphore) => semaphore.acquire_owned().await.ok(),
                            None => None,
                        };
                        call.await
                    }
                    .in_current_span(),
                )
            })
            .collect();

        for (task, mut handle) in tasks.iter_mut().zip(handles) {
            let outcome = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(join_error)) => {
                    let kind = if join_error.is_panic() { "Panic" } else { "Cancelled" };
                    TaskOutcome::Failure(FailureReason::Remote(format!("{kind}: {join_error}")))
                }
                Err(_) => {
                    match self.config.timeout_policy {
                        TimeoutPolicy::Abort => {
                            handle.abort();
                            debug!(address = task.address(), "refresh aborted at deadline");
                        }
                        TimeoutPolicy::Detach => {
                            debug!(
                                address = task.address(),
                                "refresh still running at deadline, detached"
                            );
                        }
                    }
                    TaskOutcome::Failure(FailureReason::Timeout)
                }
            };
            task.resolve(outcome);
        }

        let result = self.log_result(tasks);

        metrics::counter!("mount_table_refresh_cycles_total").increment(1);
        metrics::histogram!("mount_table_refresh_cycle_seconds")
            .record(started.elapsed().as_secs_f64());
        result
    }

    /// Count outcomes, invalidate failed routers and emit the cycle report.
    fn log_result(&self, tasks: &[RefreshTask]) -> CycleResult {
        let mut result = CycleResult::default();

        for task in tasks {
            metrics::counter!("mount_table_refresh_tasks_total", "outcome" => task.outcome().label())
                .increment(1);

            if task.is_success() {
                result.success_count += 1;
                continue;
            }

            result.failure_count += 1;
            if let TaskOutcome::Failure(FailureReason::Remote(description)) = task.outcome() {
                self.log.log(
                    Level::ERROR,
                    &format!("Mount table refresh of {} failed: {description}", task.address()),
                );
            }
            debug!(
                address = task.address(),
                local = task.is_local(),
                outcome = task.outcome().label(),
                "router admin not updated, invalidating client"
            );
            self.cache.invalidate(task.address());
        }

        if result.failure_count != 0 {
            self.log.log(Level::WARN, NOT_ALL_UPDATED);
        }
        self.log.log(Level::INFO, &result.summary());
        result
    }
}
