//! Per-router refresh tasks and the factory seam that builds them
//!
//! A `RefreshTask` pairs the router's admin address (used for logging and
//! cache invalidation) with the manager that performs the refresh. It starts
//! `Pending` and is resolved exactly once by the orchestrator.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use router_admin::{LOCAL_TARGET, ManagerFactory, MountTableManager};

/// Why a refresh task did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Not resolved before the cycle deadline.
    Timeout,
    /// The manager returned an error (or its task panicked); carries its description.
    Remote(String),
    /// The manager answered but reported the refresh was not applied.
    Rejected,
}

impl FailureReason {
    /// Metric/log label.
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::Remote(_) => "remote_error",
            FailureReason::Rejected => "rejected",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timed out"),
            FailureReason::Remote(description) => write!(f, "{description}"),
            FailureReason::Rejected => write!(f, "refresh not applied"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Pending,
    Success,
    Failure(FailureReason),
}

impl TaskOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Pending => "pending",
            TaskOutcome::Success => "success",
            TaskOutcome::Failure(reason) => reason.label(),
        }
    }
}

/// One router's refresh attempt within a cycle.
pub struct RefreshTask {
    address: String,
    is_local: bool,
    manager: Arc<dyn MountTableManager>,
    outcome: TaskOutcome,
}

impl RefreshTask {
    /// Task refreshing a remote router through `manager`.
    pub fn new(manager: Arc<dyn MountTableManager>, address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            is_local: false,
            manager,
            outcome: TaskOutcome::Pending,
        }
    }

    /// Task refreshing this router's own admin interface. `address` is still
    /// the endpoint's address as listed by the store.
    pub fn local(manager: Arc<dyn MountTableManager>, address: impl Into<String>) -> Self {
        Self {
            is_local: true,
            ..Self::new(manager, address)
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn manager(&self) -> &Arc<dyn MountTableManager> {
        &self.manager
    }

    pub fn outcome(&self) -> &TaskOutcome {
        &self.outcome
    }

    pub fn is_success(&self) -> bool {
        self.outcome == TaskOutcome::Success
    }

    /// Record the outcome. A resolved task keeps its first outcome.
    pub(crate) fn resolve(&mut self, outcome: TaskOutcome) {
        if self.outcome == TaskOutcome::Pending {
            self.outcome = outcome;
        }
    }

    /// Future performing the refresh, independent of the task's lifetime so it
    /// can outlive the cycle when detached at the deadline.
    pub(crate) fn invocation(&self) -> impl Future<Output = TaskOutcome> + Send + 'static {
        let manager = self.manager.clone();
        async move {
            match manager.refresh().await {
                Ok(true) => TaskOutcome::Success,
                Ok(false) => TaskOutcome::Failure(FailureReason::Rejected),
                Err(e) => {
                    TaskOutcome::Failure(FailureReason::Remote(format!("{}: {e}", e.kind())))
                }
            }
        }
    }
}

impl fmt::Debug for RefreshTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshTask")
            .field("address", &self.address)
            .field("is_local", &self.is_local)
            .field("target", &self.manager.target())
            .field("outcome", &self.outcome)
            .finish()
    }
}

/// Builds the refresh task for one admin address.
///
/// Injected into the orchestrator so task construction can be replaced
/// without touching the fan-out and aggregation logic.
pub trait UpdateTaskFactory: Send + Sync {
    fn update_task(&self, address: &str) -> RefreshTask;
}

/// Default factory: classifies addresses as local or remote and asks a
/// `ManagerFactory` for the matching manager.
///
/// An address is local when it *contains* the marker. This substring rule
/// also matches addresses such as `local6`; see DESIGN.md.
pub struct ClassifyingTaskFactory {
    managers: Arc<dyn ManagerFactory>,
    local_marker: String,
}

impl ClassifyingTaskFactory {
    pub fn new(managers: Arc<dyn ManagerFactory>, local_marker: impl Into<String>) -> Self {
        Self {
            managers,
            local_marker: local_marker.into(),
        }
    }

    pub fn is_local_admin(&self, address: &str) -> bool {
        address.contains(self.local_marker.as_str())
    }
}

impl UpdateTaskFactory for ClassifyingTaskFactory {
    fn update_task(&self, address: &str) -> RefreshTask {
        if self.is_local_admin(address) {
            RefreshTask::local(self.managers.manager(LOCAL_TARGET), address)
        } else {
            RefreshTask::new(self.managers.manager(address), address)
        }
    }
}
