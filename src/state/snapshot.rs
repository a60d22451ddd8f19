// =============================================================================
// Point-in-time state snapshot
// =============================================================================
//
// A deep, fully disconnected copy of the store's symbol map. The scan loop
// holds no lock while consuming it — all of the structure sharing that would
// otherwise tie a reader to a writer (Arc<RwLock<_>> aliasing) is removed by
// the clone performed in `SymbolStateStore::snapshot`.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use super::SymbolState;
use crate::types::{Bar1m, LiveBar, Session};

#[derive(Debug, Clone)]
pub struct SymbolStateSnapshot {
    pub symbol: String,
    pub live_bar: Option<LiveBar>,
    pub last_final_bars: VecDeque<Bar1m>,
    pub indicators: HashMap<String, f64>,
    pub session: Session,
    pub current_volume: f64,

    pub last_tick_time: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub yesterday_close: Option<f64>,
    pub today_open: Option<f64>,
    pub today_close: Option<f64>,
    pub trade_count: u64,
    pub trade_count_history: VecDeque<u64>,
    pub candle_direction_history: VecDeque<bool>,
}

impl From<&SymbolState> for SymbolStateSnapshot {
    fn from(s: &SymbolState) -> Self {
        Self {
            symbol: s.symbol.clone(),
            live_bar: s.live_bar.clone(),
            last_final_bars: s.last_final_bars.clone(),
            indicators: s.indicators.clone(),
            session: s.current_session,
            current_volume: s.current_session_volume(),
            last_tick_time: s.last_tick_time,
            last_update: s.last_update,
            yesterday_close: s.yesterday_close,
            today_open: s.today_open,
            today_close: s.today_close,
            trade_count: s.trade_count,
            trade_count_history: s.trade_count_history.clone(),
            candle_direction_history: s.candle_direction_history.clone(),
        }
    }
}

/// Deep copy of the entire store at one instant, keyed by symbol.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub symbols: HashMap<String, SymbolStateSnapshot>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl StateSnapshot {
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_from_symbol_state_copies_session_volume() {
        let mut st = SymbolState::new("AAPL", 10);
        st.market_volume = 42.0;
        st.current_session = Session::Market;
        let snap: SymbolStateSnapshot = (&st).into();
        assert_eq!(snap.current_volume, 42.0);
        assert_eq!(snap.symbol, "AAPL");
    }

    #[test]
    fn empty_state_snapshot_reports_empty() {
        let snap = StateSnapshot::default();
        assert!(snap.is_empty());
        assert_eq!(snap.len(), 0);
    }
}
