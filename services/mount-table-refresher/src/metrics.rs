//! Prometheus metrics exposition
//!
//! Besides the counters recorded by the `mount-table` crate
//! (`mount_table_refresh_tasks_total`, `mount_table_refresh_cycles_total`,
//! `mount_table_refresh_cycle_seconds`, `router_client_cache_*`), the service
//! publishes:
//!
//! - `mount_table_last_cycle_successes` (gauge)
//! - `mount_table_last_cycle_failures` (gauge)
//! - `mount_table_last_cycle_timestamp_seconds` (gauge): unix time of the last cycle
//! - `mount_table_known_routers` (gauge): size of the router list

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use mount_table::CycleResult;

/// Bucket boundaries for cycle duration, from 5ms up to 60s.
const CYCLE_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> anyhow::Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("mount_table_refresh_cycle_seconds".to_string()),
            CYCLE_BUCKETS,
        )
        .context("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `mount_table_refresh_cycle_seconds` gets explicit buckets so it renders as
/// a histogram rather than a summary.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Publish the outcome of the latest completed cycle.
pub fn record_last_cycle(result: &CycleResult) {
    metrics::gauge!("mount_table_last_cycle_successes").set(result.success_count as f64);
    metrics::gauge!("mount_table_last_cycle_failures").set(result.failure_count as f64);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    metrics::gauge!("mount_table_last_cycle_timestamp_seconds").set(now);
}

pub fn set_known_routers(count: usize) {
    metrics::gauge!("mount_table_known_routers").set(count as f64);
}
