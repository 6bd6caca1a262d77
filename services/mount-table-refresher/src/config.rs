//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The router list can be overridden with `MOUNT_TABLE_ROUTERS`
//! (comma-separated admin addresses), which replaces `[[routers]]` entirely.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mount_table::{RefreshConfig, TimeoutPolicy};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub refresher: RefresherConfig,
    pub admin: AdminConfig,
    #[serde(default)]
    pub routers: Vec<RouterEntry>,
}

/// Refresh cycle and client cache settings
#[derive(Debug, Deserialize)]
pub struct RefresherConfig {
    /// Deadline for all routers of one cycle
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
    /// Lifetime of a cached router client, also the cleaner's sweep delay
    #[serde(default = "default_client_max_live_ms")]
    pub client_max_live_ms: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default)]
    pub max_concurrent_refreshes: Option<usize>,
    /// Abort refreshes still running at the deadline instead of detaching them
    #[serde(default)]
    pub abort_on_timeout: bool,
    #[serde(default = "default_local_marker")]
    pub local_marker: String,
}

/// Admin API and local router settings
#[derive(Debug, Deserialize)]
pub struct AdminConfig {
    pub listen_addr: SocketAddr,
    /// Base URL of this router's own admin interface
    pub local_admin_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Concurrent admin API requests served before callers queue
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// A router admin endpoint to refresh
#[derive(Debug, Clone, Deserialize)]
pub struct RouterEntry {
    pub admin_address: String,
}

fn default_refresh_timeout_ms() -> u64 {
    10_000
}

fn default_client_max_live_ms() -> u64 {
    15_000
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_local_marker() -> String {
    "local".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_connections() -> usize {
    64
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            refresh_timeout_ms: default_refresh_timeout_ms(),
            client_max_live_ms: default_client_max_live_ms(),
            refresh_interval_secs: default_refresh_interval_secs(),
            max_concurrent_refreshes: None,
            abort_on_timeout: false,
            local_marker: default_local_marker(),
        }
    }
}

impl RefresherConfig {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn client_max_live(&self) -> Duration {
        Duration::from_millis(self.client_max_live_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Orchestrator settings derived from this section.
    pub fn to_refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            refresh_timeout: self.refresh_timeout(),
            max_concurrent_refreshes: self.max_concurrent_refreshes,
            timeout_policy: if self.abort_on_timeout {
                TimeoutPolicy::Abort
            } else {
                TimeoutPolicy::Detach
            },
        }
    }
}

impl AdminConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(routers) = std::env::var("MOUNT_TABLE_ROUTERS") {
            config.routers = routers
                .split(',')
                .map(str::trim)
                .filter(|address| !address.is_empty())
                .map(|address| RouterEntry {
                    admin_address: address.to_string(),
                })
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let refresher = &self.refresher;
        if refresher.refresh_timeout_ms == 0 {
            return Err(common::Error::Config(
                "refresh_timeout_ms must be greater than 0".into(),
            ));
        }
        if refresher.client_max_live_ms == 0 {
            return Err(common::Error::Config(
                "client_max_live_ms must be greater than 0".into(),
            ));
        }
        if refresher.refresh_interval_secs == 0 {
            return Err(common::Error::Config(
                "refresh_interval_secs must be greater than 0".into(),
            ));
        }
        if refresher.max_concurrent_refreshes == Some(0) {
            return Err(common::Error::Config(
                "max_concurrent_refreshes must be greater than 0".into(),
            ));
        }
        if refresher.local_marker.is_empty() {
            return Err(common::Error::Config("local_marker must not be empty".into()));
        }

        if !self.admin.local_admin_url.starts_with("http://")
            && !self.admin.local_admin_url.starts_with("https://")
        {
            return Err(common::Error::InvalidUrl {
                field: "local_admin_url",
                value: self.admin.local_admin_url.clone(),
            });
        }
        if self.admin.request_timeout_secs == 0 {
            return Err(common::Error::Config(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.admin.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.routers.iter().any(|r| r.admin_address.trim().is_empty()) {
            return Err(common::Error::Config(
                "routers.admin_address must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Router admin addresses in configuration order.
    pub fn router_addresses(&self) -> Vec<String> {
        self.routers.iter().map(|r| r.admin_address.clone()).collect()
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("mount-table-refresher.toml")
    }
}
