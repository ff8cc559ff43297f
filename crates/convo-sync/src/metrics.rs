//! Prometheus counters for store writes, the mirror outbox and history replay.
//!
//! One [`Metrics`] handle is created at startup and shared by the components
//! that record into it. Each handle owns its registry.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    store_writes: IntCounterVec,
    outbox_pending: IntGauge,
    replayed_turns: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let store_writes = IntCounterVec::new(
            prometheus::opts!("store_writes_total", "Store writes by operation, store and outcome"),
            &["operation", "store", "outcome"],
        )?;
        let outbox_pending = IntGauge::new("outbox_pending", "Mirror operations waiting for redelivery")?;
        let replayed_turns = IntCounter::new(
            "replayed_turns_total",
            "Conversation turns replayed into agent context",
        )?;

        registry.register(Box::new(store_writes.clone()))?;
        registry.register(Box::new(outbox_pending.clone()))?;
        registry.register(Box::new(replayed_turns.clone()))?;

        Ok(Self {
            registry,
            store_writes,
            outbox_pending,
            replayed_turns,
        })
    }

    pub fn record_write(&self, operation: &str, store: &str, outcome: &str) {
        self.store_writes
            .with_label_values(&[operation, store, outcome])
            .inc();
    }

    pub fn set_outbox_pending(&self, pending: i64) {
        self.outbox_pending.set(pending);
    }

    pub fn add_replayed_turns(&self, turns: usize) {
        self.replayed_turns.inc_by(turns as u64);
    }

    pub fn writes(&self, operation: &str, store: &str, outcome: &str) -> u64 {
        self.store_writes
            .with_label_values(&[operation, store, outcome])
            .get()
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}
