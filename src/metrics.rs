//! Ad hoc metrics counters.
//!
//! No registry or exporter crate — exposition is left to the host process,
//! same as the rest of this codebase never pulls in a metrics crate and
//! instead exposes a plain struct (see `server::http::metrics`).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Metrics {
    pub bytes_total: AtomicU64,
    pub messages_total: AtomicU64,
    pub failures_total: AtomicU64,
    pub is_leader: AtomicBool,
    pub agents_total: AtomicU64,
    pub frameworks_total: AtomicU64,
    pub tasks_total: AtomicU64,
    pub waiting_tasks_total: AtomicU64,
    pubsub_duration: PubSubDurationSamples,
}

#[derive(Debug, Default)]
struct PubSubDurationSamples {
    count: AtomicU64,
    total_micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub bytes_total: u64,
    pub messages_total: u64,
    pub failures_total: u64,
    pub is_leader: bool,
    pub agents_total: u64,
    pub frameworks_total: u64,
    pub tasks_total: u64,
    pub waiting_tasks_total: u64,
    pub pubsub_duration_seconds_avg: f64,
}

impl Metrics {
    pub fn record_bytes(&self, n: u64) {
        self.bytes_total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_message(&self) {
        self.messages_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_leader(&self, leader: bool) {
        self.is_leader.store(leader, Ordering::Relaxed);
    }

    pub fn set_gauges(&self, agents: u64, frameworks: u64, tasks: u64, waiting: u64) {
        self.agents_total.store(agents, Ordering::Relaxed);
        self.frameworks_total.store(frameworks, Ordering::Relaxed);
        self.tasks_total.store(tasks, Ordering::Relaxed);
        self.waiting_tasks_total.store(waiting, Ordering::Relaxed);
    }

    pub fn record_pubsub_duration(&self, d: Duration) {
        self.pubsub_duration.count.fetch_add(1, Ordering::Relaxed);
        self.pubsub_duration
            .total_micros
            .fetch_add(d.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let count = self.pubsub_duration.count.load(Ordering::Relaxed);
        let total_micros = self.pubsub_duration.total_micros.load(Ordering::Relaxed);
        let avg_seconds = if count == 0 {
            0.0
        } else {
            (total_micros as f64 / count as f64) / 1_000_000.0
        };

        MetricsSnapshot {
            bytes_total: self.bytes_total.load(Ordering::Relaxed),
            messages_total: self.messages_total.load(Ordering::Relaxed),
            failures_total: self.failures_total.load(Ordering::Relaxed),
            is_leader: self.is_leader.load(Ordering::Relaxed),
            agents_total: self.agents_total.load(Ordering::Relaxed),
            frameworks_total: self.frameworks_total.load(Ordering::Relaxed),
            tasks_total: self.tasks_total.load(Ordering::Relaxed),
            waiting_tasks_total: self.waiting_tasks_total.load(Ordering::Relaxed),
            pubsub_duration_seconds_avg: avg_seconds,
        }
    }
}
