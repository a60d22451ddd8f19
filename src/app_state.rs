// =============================================================================
// Central application state — scanner worker
// =============================================================================
//
// Ties together the symbol state store, the compiled ruleset (owned by the
// scan engine), the cooldown tracker, the partitioner, and every consumer's
// health flag into one `Arc`-shared handle passed to the HTTP server and
// every background task. Mirrors the teacher's `AppState` role: the single
// source of truth a request handler or a spawned task reaches into, never a
// collection of loose globals.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::alert::AlertEmitter;
use crate::cooldown::CooldownTracker;
use crate::partitioner::Partitioner;
use crate::runtime_config::RuntimeConfig;
use crate::scan::ScanEngine;
use crate::state::SymbolStateStore;

/// One ingest task's liveness, tracked independently so `/health` can report
/// exactly which subsystem is degraded rather than a single boolean.
#[derive(Default)]
pub struct ConsumerHealth {
    pub healthy: Arc<AtomicBool>,
    pub processed: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
}

impl ConsumerHealth {
    pub fn new() -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(false)),
            processed: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

pub struct ScannerState {
    pub config: RuntimeConfig,
    pub state_store: Arc<SymbolStateStore>,
    pub partitioner: Arc<Partitioner>,
    pub cooldown: Arc<CooldownTracker>,
    pub alerts: Arc<AlertEmitter>,
    pub scan_engine: Arc<ScanEngine>,
    pub metrics_handle: PrometheusHandle,
    pub start_time: Instant,

    pub tick_consumer_health: ConsumerHealth,
    pub bar_consumer_health: ConsumerHealth,
    pub indicator_consumer_health: ConsumerHealth,
}

impl ScannerState {
    /// The service is ready exactly when the state store holds at least one
    /// symbol — there is no separate "rehydration done" flag, since a worker
    /// that rehydrates zero symbols (an empty partition, or nothing in the
    /// bar store yet) has nothing to scan either way.
    pub fn is_ready(&self) -> bool {
        !self.state_store.is_empty()
    }

    /// Overall health is "healthy" only while every consumer that has had a
    /// chance to run reports healthy; a consumer that hasn't started yet
    /// (still backing off from its first connection attempt) doesn't count
    /// against readiness, only against `/health`'s detail.
    pub fn is_degraded(&self) -> bool {
        !self.tick_consumer_health.is_healthy()
            || !self.bar_consumer_health.is_healthy()
            || !self.indicator_consumer_health.is_healthy()
    }

    pub fn build_health_report(&self) -> HealthReport {
        HealthReport {
            status: if !self.is_ready() {
                "starting"
            } else if self.is_degraded() {
                "degraded"
            } else {
                "healthy"
            },
            uptime_seconds: self.start_time.elapsed().as_secs(),
            ready: self.is_ready(),
            symbols_tracked: self.state_store.len(),
            cooldown_entries: self.cooldown.len(),
            scan_cycles: self.scan_engine.stats.count(),
            scan_last_ms: self.scan_engine.stats.last_ms(),
            scan_avg_ms: self.scan_engine.stats.avg_ms(),
            scan_max_ms: self.scan_engine.stats.max_ms(),
            scan_overruns: self.scan_engine.stats.overruns(),
            rules_active: self.scan_engine.current_ruleset().len(),
            tick_consumer: ConsumerHealthReport::from(&self.tick_consumer_health),
            bar_consumer: ConsumerHealthReport::from(&self.bar_consumer_health),
            indicator_consumer: ConsumerHealthReport::from(&self.indicator_consumer_health),
            alerts_emitted: self.alerts.emitted_count(),
            alerts_published: self.alerts.published_count(),
            alerts_failed: self.alerts.failed_count(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConsumerHealthReport {
    pub healthy: bool,
    pub processed: u64,
    pub failed: u64,
}

impl From<&ConsumerHealth> for ConsumerHealthReport {
    fn from(h: &ConsumerHealth) -> Self {
        Self {
            healthy: h.is_healthy(),
            processed: h.processed.load(Ordering::Relaxed),
            failed: h.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub ready: bool,
    pub symbols_tracked: usize,
    pub cooldown_entries: usize,
    pub scan_cycles: u64,
    pub scan_last_ms: u64,
    pub scan_avg_ms: f64,
    pub scan_max_ms: u64,
    pub scan_overruns: u64,
    pub rules_active: usize,
    pub tick_consumer: ConsumerHealthReport,
    pub bar_consumer: ConsumerHealthReport,
    pub indicator_consumer: ConsumerHealthReport,
    pub alerts_emitted: u64,
    pub alerts_published: u64,
    pub alerts_failed: u64,
}
