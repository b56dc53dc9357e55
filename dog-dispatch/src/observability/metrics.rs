use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters for one dispatcher
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    items_enqueued: AtomicU64,
    items_processed: AtomicU64,
    consumer_invocations: AtomicU64,
    consumer_failures: AtomicU64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_items_enqueued(&self, count: u64) {
        self.items_enqueued.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_items_processed(&self) {
        self.items_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_consumer_invocations(&self) {
        self.consumer_invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_consumer_failures(&self) {
        self.consumer_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn items_enqueued(&self) -> u64 {
        self.items_enqueued.load(Ordering::Relaxed)
    }

    pub fn items_processed(&self) -> u64 {
        self.items_processed.load(Ordering::Relaxed)
    }

    pub fn consumer_invocations(&self) -> u64 {
        self.consumer_invocations.load(Ordering::Relaxed)
    }

    pub fn consumer_failures(&self) -> u64 {
        self.consumer_failures.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_enqueued: self.items_enqueued(),
            items_processed: self.items_processed(),
            consumer_invocations: self.consumer_invocations(),
            consumer_failures: self.consumer_failures(),
        }
    }
}

/// Counter values at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub items_enqueued: u64,
    /// Leases the pool finished after running every consumer
    pub items_processed: u64,
    pub consumer_invocations: u64,
    pub consumer_failures: u64,
}

impl MetricsSnapshot {
    /// Share of consumer runs that succeeded, as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.consumer_invocations == 0 {
            100.0
        } else {
            let succeeded = self.consumer_invocations.saturating_sub(self.consumer_failures);
            (succeeded as f64 / self.consumer_invocations as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_snapshot() {
        let metrics = DispatchMetrics::new();
        metrics.increment_items_enqueued(3);
        metrics.increment_items_processed();
        for _ in 0..4 {
            metrics.increment_consumer_invocations();
        }
        metrics.increment_consumer_failures();

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot,
            MetricsSnapshot {
                items_enqueued: 3,
                items_processed: 1,
                consumer_invocations: 4,
                consumer_failures: 1,
            }
        );
        assert_eq!(snapshot.success_rate(), 75.0);
    }

    #[test]
    fn idle_dispatcher_reports_full_success() {
        assert_eq!(MetricsSnapshot::default().success_rate(), 100.0);
    }

    #[cfg(feature = "json")]
    #[test]
    fn snapshot_serializes() {
        let json = serde_json::to_value(MetricsSnapshot::default()).unwrap();
        assert_eq!(json["consumer_failures"], 0);
    }
}
