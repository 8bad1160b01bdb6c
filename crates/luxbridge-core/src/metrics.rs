//! Metrics sink trait
//!
//! The core emits counters and durations through this seam; the concrete
//! sink (Prometheus exporter, statsd, ...) is wired by the host process.

use std::sync::Arc;

pub trait Metrics: Send + Sync {
    /// Increment a named counter
    fn incr(&self, name: &str);

    /// Increment a named counter with a classification label
    fn incr_labeled(&self, name: &str, label: &str) {
        let _ = label;
        self.incr(name);
    }

    /// Record a duration observation in seconds
    fn observe(&self, name: &str, seconds: f64);
}

/// Discards everything; the default when no sink is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn incr(&self, _name: &str) {}

    fn observe(&self, _name: &str, _seconds: f64) {}
}

/// Shared handle type used throughout the services
pub type MetricsHandle = Arc<dyn Metrics>;

/// Convenience constructor for the no-op sink
pub fn noop() -> MetricsHandle {
    Arc::new(NoopMetrics)
}
