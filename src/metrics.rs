use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Observability seam (§6.4, §9 "metrics exporter... out of scope, sink
/// interface is in scope"). An external exporter is a collaborator the
/// caller attaches by implementing this trait; `AtomicMetricsSink` is the
/// always-on in-process default so the counters are recorded even with
/// nothing attached downstream.
pub trait MetricsSink: Send + Sync {
    fn incr_counter(&self, name: &'static str, value: u64);
    fn observe_histogram(&self, name: &'static str, value: f64);
    fn set_gauge(&self, name: &'static str, value: i64);
}

/// Backs the counters named in §6.4 with `std::sync::atomic` fields —
/// cheap enough to update on every dispatch without contention, and
/// trivially `Send + Sync` for sharing across the engine thread and the
/// repository flusher thread.
#[derive(Default)]
pub struct AtomicMetricsSink {
    queue_length: AtomicI64,
    event_latency_ms_sum: AtomicU64,
    event_latency_ms_count: AtomicU64,
    batch_commit_errors_total: AtomicU64,
    actions_total: AtomicU64,
    simulations_active: AtomicI64,
    queue_full_total: AtomicU64,
}

impl AtomicMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_length(&self) -> i64 {
        self.queue_length.load(Ordering::Relaxed)
    }

    pub fn mean_event_latency_ms(&self) -> f64 {
        let count = self.event_latency_ms_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.event_latency_ms_sum.load(Ordering::Relaxed) as f64 / count as f64
    }

    pub fn batch_commit_errors_total(&self) -> u64 {
        self.batch_commit_errors_total.load(Ordering::Relaxed)
    }

    pub fn actions_total(&self) -> u64 {
        self.actions_total.load(Ordering::Relaxed)
    }

    pub fn queue_full_total(&self) -> u64 {
        self.queue_full_total.load(Ordering::Relaxed)
    }

    pub fn simulations_active(&self) -> i64 {
        self.simulations_active.load(Ordering::Relaxed)
    }
}

impl MetricsSink for AtomicMetricsSink {
    fn incr_counter(&self, name: &'static str, value: u64) {
        match name {
            "batch_commit_errors_total" => {
                self.batch_commit_errors_total.fetch_add(value, Ordering::Relaxed);
            }
            "actions_total" => {
                self.actions_total.fetch_add(value, Ordering::Relaxed);
            }
            "queue_full_total" => {
                self.queue_full_total.fetch_add(value, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn observe_histogram(&self, name: &'static str, value: f64) {
        if name == "event_latency_ms" {
            self.event_latency_ms_sum.fetch_add(value.max(0.0) as u64, Ordering::Relaxed);
            self.event_latency_ms_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn set_gauge(&self, name: &'static str, value: i64) {
        match name {
            "queue_length" => self.queue_length.store(value, Ordering::Relaxed),
            "simulations_active" => self.simulations_active.store(value, Ordering::Relaxed),
            _ => {}
        }
    }
}

/// Discards everything. Useful for tests and benchmarks that don't care
/// about observability overhead.
#[derive(Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn incr_counter(&self, _name: &'static str, _value: u64) {}
    fn observe_histogram(&self, _name: &'static str, _value: f64) {}
    fn set_gauge(&self, _name: &'static str, _value: i64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let sink = AtomicMetricsSink::new();
        sink.incr_counter("actions_total", 3);
        sink.incr_counter("actions_total", 2);
        assert_eq!(sink.actions_total(), 5);
    }

    #[test]
    fn gauge_overwrites() {
        let sink = AtomicMetricsSink::new();
        sink.set_gauge("queue_length", 10);
        sink.set_gauge("queue_length", 4);
        assert_eq!(sink.queue_length(), 4);
    }

    #[test]
    fn histogram_tracks_mean() {
        let sink = AtomicMetricsSink::new();
        sink.observe_histogram("event_latency_ms", 10.0);
        sink.observe_histogram("event_latency_ms", 20.0);
        assert_eq!(sink.mean_event_latency_ms(), 15.0);
    }

    #[test]
    fn queue_full_total_accumulates() {
        let sink = AtomicMetricsSink::new();
        sink.incr_counter("queue_full_total", 1);
        sink.incr_counter("queue_full_total", 1);
        assert_eq!(sink.queue_full_total(), 2);
    }

    #[test]
    fn unknown_names_are_ignored_not_panicking() {
        let sink = AtomicMetricsSink::new();
        sink.incr_counter("not_a_real_metric", 1);
        sink.set_gauge("also_not_real", 1);
    }
}
