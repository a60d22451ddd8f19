use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use super::{SymbolState, SymbolStateSnapshot, StateSnapshot, DEFAULT_MAX_FINAL_BARS};
use crate::types::{Bar1m, Tick};

/// In-memory map of per-symbol state. The outer lock guards only
/// lookup/insert/remove of the map itself; each symbol's record has its own
/// lock so writers to different symbols never contend with each other.
pub struct SymbolStateStore {
    symbols: RwLock<HashMap<String, Arc<RwLock<SymbolState>>>>,
    max_final_bars: usize,
}

impl SymbolStateStore {
    pub fn new(max_final_bars: usize) -> Self {
        Self {
            symbols: RwLock::new(HashMap::new()),
            max_final_bars: max_final_bars.max(1),
        }
    }

    fn entry(&self, symbol: &str) -> Arc<RwLock<SymbolState>> {
        if let Some(existing) = self.symbols.read().get(symbol) {
            return existing.clone();
        }
        let mut map = self.symbols.write();
        map.entry(symbol.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(SymbolState::new(symbol, self.max_final_bars))))
            .clone()
    }

    /// A tick with non-positive price/size (for trades) or an empty symbol
    /// is dropped here rather than applied; the caller should treat this as
    /// a `ValidationFailure`, not panic.
    pub fn update_live_bar(&self, tick: &Tick) -> bool {
        if !tick.is_valid() {
            return false;
        }
        let cell = self.entry(&tick.symbol);
        cell.write().update_live_bar(tick);
        true
    }

    pub fn update_finalized_bar(&self, bar: Bar1m) {
        let cell = self.entry(&bar.symbol);
        cell.write().update_finalized_bar(bar);
    }

    pub fn update_indicators(&self, symbol: &str, values: HashMap<String, f64>) {
        let cell = self.entry(symbol);
        cell.write().update_indicators(values);
    }

    /// Deep-copy every tracked symbol's state. The returned snapshot shares
    /// nothing with the store; the scan loop may hold it across its entire
    /// cycle without ever touching a lock again.
    pub fn snapshot(&self) -> StateSnapshot {
        let map = self.symbols.read();
        let mut symbols = HashMap::with_capacity(map.len());
        for (symbol, cell) in map.iter() {
            let guard = cell.read();
            symbols.insert(symbol.clone(), SymbolStateSnapshot::from(&*guard));
        }
        StateSnapshot {
            symbols,
            taken_at: Some(Utc::now()),
        }
    }

    pub fn remove(&self, symbol: &str) {
        self.symbols.write().remove(symbol);
    }

    pub fn clear(&self) {
        self.symbols.write().clear();
    }

    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.read().contains_key(symbol)
    }
}

impl Default for SymbolStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FINAL_BARS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TickType;

    fn tick(symbol: &str, price: f64, size: f64) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            price,
            size,
            timestamp: Utc::now(),
            tick_type: TickType::Trade,
            bid: None,
            ask: None,
        }
    }

    #[test]
    fn invalid_tick_is_rejected_and_never_creates_state() {
        let store = SymbolStateStore::new(10);
        let applied = store.update_live_bar(&tick("AAPL", 0.0, 1.0));
        assert!(!applied);
        assert!(!store.contains("AAPL"));
    }

    #[test]
    fn valid_tick_creates_symbol_and_is_visible_in_snapshot() {
        let store = SymbolStateStore::new(10);
        assert!(store.update_live_bar(&tick("AAPL", 100.0, 1.0)));
        let snap = store.snapshot();
        assert_eq!(snap.len(), 1);
        assert!(snap.symbols.contains_key("AAPL"));
    }

    #[test]
    fn remove_and_clear() {
        let store = SymbolStateStore::new(10);
        store.update_live_bar(&tick("AAPL", 100.0, 1.0));
        store.update_live_bar(&tick("MSFT", 200.0, 1.0));
        assert_eq!(store.len(), 2);
        store.remove("AAPL");
        assert_eq!(store.len(), 1);
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn applying_same_finalized_bar_twice_is_idempotent_for_state_content() {
        let store = SymbolStateStore::new(10);
        let b = Bar1m {
            symbol: "AAPL".into(),
            timestamp: Utc::now(),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 10.0,
            vwap: 100.2,
        };
        store.update_finalized_bar(b.clone());
        store.update_finalized_bar(b.clone());
        let snap = store.snapshot();
        let s = &snap.symbols["AAPL"];
        assert_eq!(s.last_final_bars.len(), 1);
        assert_eq!(s.last_final_bars[0], b);
    }

    #[test]
    fn independent_symbols_do_not_block_each_other() {
        let store = Arc::new(SymbolStateStore::new(10));
        let s1 = store.clone();
        let s2 = store.clone();
        let h1 = std::thread::spawn(move || {
            for _ in 0..100 {
                s1.update_live_bar(&tick("AAPL", 100.0, 1.0));
            }
        });
        let h2 = std::thread::spawn(move || {
            for _ in 0..100 {
                s2.update_live_bar(&tick("MSFT", 200.0, 1.0));
            }
        });
        h1.join().unwrap();
        h2.join().unwrap();
        assert_eq!(store.len(), 2);
    }
}
