use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    type_overrides: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished run; `overridden` marks runs where validation replaced the retrieved type.
    pub fn record_success(&self, overridden: bool) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        if overridden {
            self.type_overrides.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a run that ended in an error.
    pub fn record_failure(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            type_overrides: self.type_overrides.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Runs that produced an extraction result.
    pub runs_completed: u64,
    /// Runs that surfaced an error to the caller.
    pub runs_failed: u64,
    /// Completed runs whose document type came from validation rather than retrieval.
    pub type_overrides: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_runs_and_overrides() {
        let metrics = PipelineMetrics::new();
        metrics.record_success(false);
        metrics.record_success(true);
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.runs_completed, 2);
        assert_eq!(snapshot.runs_failed, 1);
        assert_eq!(snapshot.type_overrides, 1);
    }

    #[test]
    fn snapshot_starts_empty() {
        let metrics = PipelineMetrics::new();
        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                runs_completed: 0,
                runs_failed: 0,
                type_overrides: 0,
            }
        );
    }
}
