use crate::broadcast::ObserverHub;
use crate::models::TransportStatus;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub memory_usage_mb: f32,
    pub mqtt_status: TransportStatus,
    pub mqtt_reconnects: u64,
    pub observers: usize,
    pub messages_ingested: u64,
    pub messages_discarded: u64,
    pub rows_persisted: u64,
    pub persist_failures: u64,
}

#[derive(Default)]
struct Counters {
    mqtt_reconnects: AtomicU64,
    messages_ingested: AtomicU64,
    messages_discarded: AtomicU64,
    rows_persisted: AtomicU64,
    persist_failures: AtomicU64,
}

/// Puits d'observabilité du kernel : compteurs + log des échecs d'écriture
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    counters: Arc<Counters>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn increment_reconnects(&self) {
        self.counters.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ingested(&self) {
        self.counters.messages_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.counters.messages_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persisted(&self) {
        self.counters.rows_persisted.fetch_add(1, Ordering::Relaxed);
    }

    /// Un insert raté est signalé ici, jamais remonté au pipeline
    pub fn record_persist_failure(&self, table: &str, err: &dyn std::fmt::Display) {
        self.counters.persist_failures.fetch_add(1, Ordering::Relaxed);
        error!(table, error = %err, "insert failed");
    }

    pub fn persist_failures(&self) -> u64 {
        self.counters.persist_failures.load(Ordering::Relaxed)
    }

    pub fn rows_persisted(&self) -> u64 {
        self.counters.rows_persisted.load(Ordering::Relaxed)
    }

    pub fn get_health(&self, mqtt_status: TransportStatus, hub: &ObserverHub) -> KernelHealth {
        let c = &self.counters;
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            memory_usage_mb: get_memory_usage_mb(),
            mqtt_status,
            mqtt_reconnects: c.mqtt_reconnects.load(Ordering::Relaxed),
            observers: hub.observer_count(),
            messages_ingested: c.messages_ingested.load(Ordering::Relaxed),
            messages_discarded: c.messages_discarded.load(Ordering::Relaxed),
            rows_persisted: self.rows_persisted(),
            persist_failures: self.persist_failures(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    if let Some(Ok(kb)) = rest.split_whitespace().next().map(str::parse::<u64>) {
                        return kb as f32 / 1024.0;
                    }
                }
            }
        }
    }
    0.0
}
