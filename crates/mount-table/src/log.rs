//! Line-oriented log sink for refresh cycle reports

use tracing::Level;

/// Receives the cycle report lines (error details, the partial-update
/// warning and the summary). Must not fail.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str);
}

/// Forwards report lines to `tracing` at the given level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, level: Level, message: &str) {
        if level == Level::ERROR {
            tracing::error!("{message}");
        } else if level == Level::WARN {
            tracing::warn!("{message}");
        } else if level == Level::INFO {
            tracing::info!("{message}");
        } else {
            tracing::debug!("{message}");
        }
    }
}
