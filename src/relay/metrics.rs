//! Session metrics
//!
//! # Metrics
//!
//! - `relay_sessions_started_total`: Counter of sessions by task
//! - `relay_sessions_finished_total`: Counter of finished sessions by task and outcome
//! - `relay_session_duration_seconds`: Histogram of session duration
//! - `relay_fragments_total`: Counter of forwarded fragments
//! - `relay_active_sessions`: Gauge of sessions in flight

use metrics::{counter, decrement_gauge, histogram, increment_counter, increment_gauge};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Answer streamed, persisted and confirmed with a terminal event
    Completed,
    /// Stream ended without any content
    Empty,
    /// Provider answered with a non-200 status
    Rejected,
    /// Provider answered 200 without a body
    NoBody,
    /// Cancelled before the response arrived or while reading it
    Cancelled,
    /// Transport or storage failure
    Failed,
}

impl SessionOutcome {
    /// Label used in metrics
    pub fn as_str(self) -> &'static str {
        match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::Empty => "empty",
            SessionOutcome::Rejected => "rejected",
            SessionOutcome::NoBody => "no_body",
            SessionOutcome::Cancelled => "cancelled",
            SessionOutcome::Failed => "failed",
        }
    }
}

/// Metrics for one session
///
/// Records at most one outcome; dropping without recording still
/// releases the active gauge.
#[derive(Debug)]
pub struct SessionMetrics {
    task: &'static str,
    start: Instant,
    recorded: AtomicBool,
}

impl SessionMetrics {
    /// Start tracking a session for `task`
    pub fn new(task: &'static str) -> Self {
        increment_counter!("relay_sessions_started_total", "task" => task);
        increment_gauge!("relay_active_sessions", 1.0);

        Self {
            task,
            start: Instant::now(),
            recorded: AtomicBool::new(false),
        }
    }

    /// Count `n` forwarded fragments
    pub fn record_fragments(&self, n: u64) {
        counter!("relay_fragments_total", n, "task" => self.task);
    }

    /// Record how the session ended
    pub fn record_outcome(&self, outcome: SessionOutcome) {
        if self.recorded.swap(true, Ordering::SeqCst) {
            return;
        }

        histogram!(
            "relay_session_duration_seconds",
            self.start.elapsed().as_secs_f64(),
            "task" => self.task,
            "outcome" => outcome.as_str()
        );
        increment_counter!(
            "relay_sessions_finished_total",
            "task" => self.task,
            "outcome" => outcome.as_str()
        );
        decrement_gauge!("relay_active_sessions", 1.0);
    }
}

impl Drop for SessionMetrics {
    fn drop(&mut self) {
        if !self.recorded.load(Ordering::SeqCst) {
            decrement_gauge!("relay_active_sessions", 1.0);
        }
    }
}

/// Install the Prometheus exporter when built with the `prometheus` feature
///
/// A no-op otherwise.
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        if let Err(e) = PrometheusBuilder::new().install() {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcome_once() {
        let metrics = SessionMetrics::new("chatgpt-translate");
        metrics.record_fragments(3);
        metrics.record_outcome(SessionOutcome::Completed);
        metrics.record_outcome(SessionOutcome::Failed);
        assert!(metrics.recorded.load(Ordering::SeqCst));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(SessionOutcome::NoBody.as_str(), "no_body");
        assert_eq!(SessionOutcome::Cancelled.as_str(), "cancelled");
    }
}
