// =============================================================================
// Scan loop — periodic rule evaluation over the symbol state store
// =============================================================================
//
// Each cycle: snapshot the store, derive exactly the metrics the current
// ruleset requires per symbol, pre-filter, evaluate compiled rules, check
// cooldown, emit. The whole cycle is wrapped in a deadline (spec.md §4.6's
// `max_time_ms`, default 800ms within a 1s period) — an overrun is logged
// and counted, never aborted mid-symbol, since partial evaluation within one
// cycle is harmless and abandoning it would just re-derive the same metrics
// next cycle anyway.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::RuleStore;
use crate::cooldown::CooldownTracker;
use crate::rules::registry::derive_required;
use crate::rules::{compile_rules, passes_prefilter, RuleSet};
use crate::state::SymbolStateStore;
use crate::types::Alert;

#[derive(Debug, Default, Clone, Copy)]
pub struct ScanCycleReport {
    pub symbols_scanned: usize,
    pub rules_evaluated: u64,
    pub rules_matched: u64,
    pub alerts_emitted: u64,
    pub evaluation_errors: u64,
}

/// Running statistics over every completed scan cycle, exposed to the
/// `/health` endpoint and the metrics recorder.
#[derive(Default)]
pub struct ScanStats {
    count: AtomicU64,
    total_ms: AtomicU64,
    max_ms: AtomicU64,
    min_ms: AtomicU64,
    last_ms: AtomicU64,
    overruns: AtomicU64,
}

impl ScanStats {
    fn record(&self, elapsed: Duration, overran: bool) {
        let ms = elapsed.as_millis() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.last_ms.store(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);
        self.min_ms
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(if cur == 0 { ms } else { cur.min(ms) })
            })
            .ok();
        if overran {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
    pub fn last_ms(&self) -> u64 {
        self.last_ms.load(Ordering::Relaxed)
    }
    pub fn max_ms(&self) -> u64 {
        self.max_ms.load(Ordering::Relaxed)
    }
    pub fn min_ms(&self) -> u64 {
        self.min_ms.load(Ordering::Relaxed)
    }
    pub fn avg_ms(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.total_ms.load(Ordering::Relaxed) as f64 / count as f64
        }
    }
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

pub struct ScanEngine {
    pub state: Arc<SymbolStateStore>,
    pub ruleset: Arc<ArcSwap<RuleSet>>,
    pub cooldown: Arc<CooldownTracker>,
    pub alerts: Arc<crate::alert::AlertEmitter>,
    pub rule_store: Arc<dyn RuleStore>,
    pub max_scan_time: Duration,
    pub stats: ScanStats,
}

impl ScanEngine {
    pub fn new(
        state: Arc<SymbolStateStore>,
        cooldown: Arc<CooldownTracker>,
        alerts: Arc<crate::alert::AlertEmitter>,
        rule_store: Arc<dyn RuleStore>,
        max_scan_time: Duration,
    ) -> Self {
        Self {
            state,
            ruleset: Arc::new(ArcSwap::from_pointee(RuleSet::empty())),
            cooldown,
            alerts,
            rule_store,
            max_scan_time,
            stats: ScanStats::default(),
        }
    }

    pub fn current_ruleset(&self) -> Arc<RuleSet> {
        self.ruleset.load_full()
    }

    /// Fetch rules from the store, compile them, and atomically swap them in
    /// as the current generation. Compile failures are logged per-rule but
    /// never block the rest of the set from taking effect.
    pub async fn reload_rules(&self) -> Result<usize, crate::errors::ScannerError> {
        let rules = self.rule_store.get_all_rules().await?;
        let (set, failures) = compile_rules(rules);
        for f in &failures {
            warn!(rule_id = %f.rule_id, reason = %f.reason, "rule failed to compile, skipping");
            metrics::counter!(crate::metrics::RULE_COMPILE_FAILURES, 1);
        }
        let count = set.len();
        self.ruleset.store(Arc::new(set));
        metrics::counter!(crate::metrics::RULE_RELOADS, 1);
        info!(rules = count, failures = failures.len(), "ruleset reloaded");
        Ok(count)
    }

    /// Run one scan cycle within `max_scan_time`; an overrun is logged, not
    /// aborted (the in-flight cycle runs to completion regardless).
    pub async fn run_scan_cycle(&self) -> ScanCycleReport {
        let start = Instant::now();
        let report = self.scan_once().await;
        let elapsed = start.elapsed();
        let overran = elapsed > self.max_scan_time;
        if overran {
            warn!(elapsed_ms = elapsed.as_millis(), budget_ms = self.max_scan_time.as_millis(), "scan cycle exceeded its deadline");
        }
        self.stats.record(elapsed, overran);
        metrics::counter!(crate::metrics::SCAN_CYCLES, 1);
        if overran {
            metrics::counter!(crate::metrics::SCAN_CYCLE_OVERRUNS, 1);
        }
        metrics::histogram!(crate::metrics::SCAN_CYCLE_DURATION_MS, elapsed.as_millis() as f64);
        report
    }

    async fn scan_once(&self) -> ScanCycleReport {
        let ruleset = self.ruleset.load();
        let mut report = ScanCycleReport::default();
        if ruleset.is_empty() {
            return report;
        }

        let snapshot = self.state.snapshot();
        report.symbols_scanned = snapshot.len();

        for (symbol, snap) in &snapshot.symbols {
            let metrics_for_symbol = derive_required(&ruleset.required_metrics, snap);

            for entry in ruleset.entries.values() {
                if !entry.rule.enabled {
                    continue;
                }
                if !passes_prefilter(entry, snap.session, snap.current_volume) {
                    continue;
                }

                report.rules_evaluated += 1;
                metrics::counter!(crate::metrics::RULES_EVALUATED, 1);

                let matched = match (entry.compiled)(symbol, &metrics_for_symbol) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(rule_id = %entry.rule.id, symbol = %symbol, error = %e, "rule evaluation error");
                        report.evaluation_errors += 1;
                        metrics::counter!(crate::metrics::EVALUATION_ERRORS, 1);
                        continue;
                    }
                };

                if !matched {
                    continue;
                }
                report.rules_matched += 1;
                metrics::counter!(crate::metrics::RULES_MATCHED, 1);

                if self.cooldown.is_on_cooldown(&entry.rule.id, symbol) {
                    continue;
                }

                let price = metrics_for_symbol.get("price").copied().unwrap_or(0.0);
                let alert = Alert::new(&entry.rule.id, &entry.rule.name, symbol, price, metrics_for_symbol.clone());

                match self.alerts.emit(&alert).await {
                    Ok(()) => {
                        report.alerts_emitted += 1;
                        self.cooldown.record(&entry.rule.id, symbol, entry.rule.cooldown_seconds);
                    }
                    Err(e) => {
                        warn!(rule_id = %entry.rule.id, symbol = %symbol, error = %e, "alert emission failed");
                    }
                }
            }
        }

        report
    }

    /// Runs scan cycles on `interval` until `cancel` fires.
    pub async fn run_scan_loop(self: Arc<Self>, interval: Duration, mut cancel: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_scan_cycle().await;
                    debug!(
                        symbols = report.symbols_scanned,
                        matched = report.rules_matched,
                        alerts = report.alerts_emitted,
                        "scan cycle complete"
                    );
                }
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        info!("scan loop exiting on shutdown signal");
                        return;
                    }
                }
            }
        }
    }

    /// Periodically refreshes the ruleset until `cancel` fires.
    pub async fn run_rule_refresh_loop(self: Arc<Self>, interval: Duration, mut cancel: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reload_rules().await {
                        warn!(error = %e, "rule reload failed, keeping previous ruleset");
                        metrics::counter!(crate::metrics::RULE_RELOAD_FAILURES, 1);
                    }
                }
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        info!("rule refresh loop exiting on shutdown signal");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{DurableStream, PubSub, StreamMessage};
    use crate::errors::ScannerError;
    use crate::types::{Condition, Operator, Rule, SessionFilter, Tick, TickType};
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    struct FakeRuleStore {
        rules: Vec<Rule>,
    }

    #[async_trait]
    impl RuleStore for FakeRuleStore {
        async fn get_all_rules(&self) -> Result<Vec<Rule>, ScannerError> {
            Ok(self.rules.clone())
        }
        async fn get_rule(&self, id: &str) -> Result<Option<Rule>, ScannerError> {
            Ok(self.rules.iter().find(|r| r.id == id).cloned())
        }
    }

    struct RecordingPubSub {
        published: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl PubSub for RecordingPubSub {
        async fn subscribe(&self, _channel: &str) -> Result<tokio::sync::mpsc::Receiver<Vec<u8>>, ScannerError> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
        async fn publish(&self, _channel: &str, payload: &[u8]) -> Result<(), ScannerError> {
            self.published.lock().push(payload.to_vec());
            Ok(())
        }
    }

    struct NoopStream;

    #[async_trait]
    impl DurableStream for NoopStream {
        async fn consume_group(
            &self,
            _stream: &str,
            _group: &str,
            _batch_size: usize,
            _timeout: Duration,
        ) -> Result<Vec<StreamMessage>, ScannerError> {
            Ok(Vec::new())
        }
        async fn ack(&self, _stream: &str, _group: &str, _ids: &[String]) -> Result<(), ScannerError> {
            Ok(())
        }
        async fn publish(&self, _stream: &str, _key: &str, _payload: &[u8]) -> Result<(), ScannerError> {
            Ok(())
        }
    }

    fn rule(id: &str, metric: &str, op: Operator, value: f64, cooldown: i64) -> Rule {
        Rule {
            id: id.to_string(),
            name: format!("rule-{id}"),
            enabled: true,
            cooldown_seconds: cooldown,
            conditions: vec![Condition {
                metric: metric.to_string(),
                operator: op,
                value,
                volume_threshold: None,
                session_filter: SessionFilter::All,
            }],
        }
    }

    async fn engine_with_rules(rules: Vec<Rule>) -> (Arc<ScanEngine>, Arc<RecordingPubSub>) {
        let state = Arc::new(SymbolStateStore::new(10));
        let cooldown = Arc::new(CooldownTracker::new());
        let pubsub = Arc::new(RecordingPubSub { published: Mutex::new(Vec::new()) });
        let alerts = Arc::new(crate::alert::AlertEmitter::new(
            pubsub.clone(),
            Some(Arc::new(NoopStream)),
            "alerts",
            Some("alerts".to_string()),
        ));
        let rule_store = Arc::new(FakeRuleStore { rules });
        let engine = Arc::new(ScanEngine::new(state, cooldown, alerts, rule_store, Duration::from_millis(800)));
        engine.reload_rules().await.unwrap();
        (engine, pubsub)
    }

    #[tokio::test]
    async fn matched_rule_emits_alert_and_sets_cooldown() {
        let (engine, pubsub) = engine_with_rules(vec![rule("r1", "price", Operator::Gt, 100.0, 60)]).await;
        engine.state.update_live_bar(&Tick {
            symbol: "AAPL".into(),
            price: 150.0,
            size: 1.0,
            timestamp: Utc::now(),
            tick_type: TickType::Trade,
            bid: None,
            ask: None,
        });

        let report = engine.run_scan_cycle().await;
        assert_eq!(report.rules_matched, 1);
        assert_eq!(report.alerts_emitted, 1);
        assert_eq!(pubsub.published.lock().len(), 1);
        assert!(engine.cooldown.is_on_cooldown("r1", "AAPL"));
    }

    #[tokio::test]
    async fn cooldown_suppresses_repeat_alert_next_cycle() {
        let (engine, pubsub) = engine_with_rules(vec![rule("r1", "price", Operator::Gt, 100.0, 600)]).await;
        engine.state.update_live_bar(&Tick {
            symbol: "AAPL".into(),
            price: 150.0,
            size: 1.0,
            timestamp: Utc::now(),
            tick_type: TickType::Trade,
            bid: None,
            ask: None,
        });

        engine.run_scan_cycle().await;
        let second = engine.run_scan_cycle().await;
        assert_eq!(second.rules_matched, 1);
        assert_eq!(second.alerts_emitted, 0);
        assert_eq!(pubsub.published.lock().len(), 1);
    }

    #[tokio::test]
    async fn empty_ruleset_scans_nothing() {
        let (engine, _pubsub) = engine_with_rules(vec![]).await;
        engine.state.update_live_bar(&Tick {
            symbol: "AAPL".into(),
            price: 150.0,
            size: 1.0,
            timestamp: Utc::now(),
            tick_type: TickType::Trade,
            bid: None,
            ask: None,
        });
        let report = engine.run_scan_cycle().await;
        assert_eq!(report.rules_evaluated, 0);
    }

    #[tokio::test]
    async fn stats_track_cycle_count_and_timing() {
        let (engine, _pubsub) = engine_with_rules(vec![rule("r1", "price", Operator::Gt, 100.0, 60)]).await;
        engine.run_scan_cycle().await;
        engine.run_scan_cycle().await;
        assert_eq!(engine.stats.count(), 2);
    }

}
