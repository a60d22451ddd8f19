// =============================================================================
// Rehydrator — startup backfill of bars and indicators
// =============================================================================
//
// Before the worker is considered ready, every symbol it owns is seeded from
// historical storage: the latest finalized bars (applied oldest-first, same
// path as the live bar consumer) and the current indicator blob. A single
// symbol's failure is logged and skipped, not fatal — the worker would
// rather come up partially warm than not at all. The whole pass is bounded
// by a deadline; whatever hasn't finished by then is abandoned and streaming
// ingest takes over from there (spec.md §4.9).
// =============================================================================

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::bus::{BarStore, KeyValueStore};
use crate::partitioner::Partitioner;
use crate::state::SymbolStateStore;

pub struct Rehydrator {
    bar_store: Arc<dyn BarStore>,
    kv_store: Arc<dyn KeyValueStore>,
    state: Arc<SymbolStateStore>,
    partitioner: Arc<Partitioner>,
    indicator_prefix: String,
    max_bars: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RehydrationReport {
    pub symbols_attempted: usize,
    pub symbols_succeeded: usize,
    pub symbols_failed: usize,
    pub timed_out: bool,
}

impl Rehydrator {
    pub fn new(
        bar_store: Arc<dyn BarStore>,
        kv_store: Arc<dyn KeyValueStore>,
        state: Arc<SymbolStateStore>,
        partitioner: Arc<Partitioner>,
        indicator_prefix: impl Into<String>,
        max_bars: usize,
    ) -> Self {
        Self {
            bar_store,
            kv_store,
            state,
            partitioner,
            indicator_prefix: indicator_prefix.into(),
            max_bars,
        }
    }

    /// Rehydrate every symbol in `symbols` that this worker owns, bounded by
    /// `deadline`. Returns once every owned symbol has been attempted or the
    /// deadline elapses, whichever comes first.
    pub async fn run(&self, symbols: &[String], deadline: Duration) -> RehydrationReport {
        let owned: Vec<&String> = symbols.iter().filter(|s| self.partitioner.owns(s)).collect();
        info!(owned = owned.len(), total = symbols.len(), "starting rehydration");

        let succeeded = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        let work = async {
            for symbol in &owned {
                match self.rehydrate_symbol(symbol).await {
                    Ok(()) => {
                        succeeded.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!(crate::metrics::REHYDRATED_SYMBOLS, 1);
                    }
                    Err(e) => {
                        failed.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!(crate::metrics::REHYDRATION_FAILURES, 1);
                        warn!(symbol = %symbol, error = %e, "rehydration failed for symbol, skipping");
                    }
                }
            }
        };

        let timed_out = tokio::time::timeout(deadline, work).await.is_err();
        if timed_out {
            warn!(deadline_ms = deadline.as_millis(), "rehydration deadline exceeded, proceeding with partial state");
        }

        let report = RehydrationReport {
            symbols_attempted: owned.len(),
            symbols_succeeded: succeeded.load(Ordering::Relaxed),
            symbols_failed: failed.load(Ordering::Relaxed),
            timed_out,
        };
        info!(
            succeeded = report.symbols_succeeded,
            failed = report.symbols_failed,
            timed_out = report.timed_out,
            "rehydration complete"
        );
        report
    }

    async fn rehydrate_symbol(&self, symbol: &str) -> Result<(), crate::errors::ScannerError> {
        let bars = self.bar_store.get_latest_bars(symbol, self.max_bars).await?;
        for bar in bars {
            self.state.update_finalized_bar(bar);
        }

        let key = format!("{}{}", self.indicator_prefix, symbol);
        if let Some(bytes) = self.kv_store.get(&key).await? {
            #[derive(serde::Deserialize)]
            struct IndicatorBlob {
                values: std::collections::HashMap<String, f64>,
            }
            match serde_json::from_slice::<IndicatorBlob>(&bytes) {
                Ok(blob) => self.state.update_indicators(symbol, blob.values),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "malformed indicator blob during rehydration, skipping indicators");
                }
            }
        }

        Ok(())
    }
}
