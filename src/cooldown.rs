// =============================================================================
// Cooldown tracker — per-(rule, symbol) alert suppression
// =============================================================================
//
// A single coarse mutex over the map is fine here: operations are O(1) and
// this is not on the per-symbol metric hot path (the scan loop consults it
// once per matched rule, not once per symbol per cycle).
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub struct CooldownTracker {
    expiries: Mutex<HashMap<(String, String), Instant>>,
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self {
            expiries: Mutex::new(HashMap::new()),
        }
    }

    /// True iff an unexpired cooldown entry exists for (rule_id, symbol).
    /// Expired entries are removed opportunistically on read.
    pub fn is_on_cooldown(&self, rule_id: &str, symbol: &str) -> bool {
        let now = Instant::now();
        let mut map = self.expiries.lock();
        let key = (rule_id.to_string(), symbol.to_string());
        match map.get(&key) {
            Some(&expiry) if expiry > now => true,
            Some(_) => {
                map.remove(&key);
                false
            }
            None => false,
        }
    }

    /// Record a fresh cooldown window. A non-positive `seconds` is a no-op
    /// (cooldown <= 0 means "no cooldown" — the rule may fire every cycle).
    pub fn record(&self, rule_id: &str, symbol: &str, seconds: i64) {
        if seconds <= 0 {
            return;
        }
        let expiry = Instant::now() + Duration::from_secs(seconds as u64);
        self.expiries
            .lock()
            .insert((rule_id.to_string(), symbol.to_string()), expiry);
    }

    /// Remove every entry whose expiry has already passed. Intended to be
    /// called periodically by a background sweeper.
    pub fn clear_expired(&self) {
        let now = Instant::now();
        self.expiries.lock().retain(|_, &mut expiry| expiry > now);
    }

    /// Current number of tracked (rule, symbol) entries, expired or not.
    /// Exposed for metrics/tests.
    pub fn len(&self) -> usize {
        self.expiries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs `tracker.clear_expired()` on `interval` until `shutdown` fires.
pub async fn run_sweeper(
    tracker: std::sync::Arc<CooldownTracker>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tracker.clear_expired();
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("cooldown sweeper exiting on shutdown signal");
                    return;
                }
            }
        }
    }
}
