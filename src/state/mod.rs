// =============================================================================
// Symbol state store
// =============================================================================
//
// Per-symbol mutable state lives behind its own `RwLock`; the top-level map
// is guarded by a separate lock held only for lookup/insert/remove, so a
// consumer registering a brand-new symbol never blocks a snapshot read of
// symbols that already exist. Mirrors the two-tier locking Aurora uses
// between `app_state.trade_processors` (outer map lock) and each processor's
// own interior mutability.
// =============================================================================

mod session;
pub mod snapshot;
mod store;

pub use session::session_for;
pub use snapshot::{StateSnapshot, SymbolStateSnapshot};
pub use store::SymbolStateStore;

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::types::{Bar1m, LiveBar, Session, Tick, TickType};

// spec.md §4.4 allows an optional per-symbol metric cache to coalesce
// repeated derivations within one scan cycle. Not implemented here: the
// scan loop (`scan.rs::scan_once`) already derives each symbol's required
// metrics exactly once per cycle, upfront, and reuses that map across every
// rule's pre-filter and evaluation — so there is no repeated derivation
// within a cycle left for a cache to coalesce. See DESIGN.md.

pub const DEFAULT_MAX_FINAL_BARS: usize = 200;
const MAX_TRADE_COUNT_HISTORY: usize = DEFAULT_MAX_FINAL_BARS;
const MAX_CANDLE_DIRECTION_HISTORY: usize = 100;

/// Per-symbol record. Every field here is owned exclusively by the state
/// store; a `SymbolStateSnapshot` is a deep, disconnected copy.
#[derive(Debug, Clone)]
pub struct SymbolState {
    pub symbol: String,
    pub live_bar: Option<LiveBar>,
    pub last_final_bars: VecDeque<Bar1m>,
    pub indicators: HashMap<String, f64>,

    pub last_tick_time: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,

    pub current_session: Session,
    pub session_start_time: Option<DateTime<Utc>>,

    pub yesterday_close: Option<f64>,
    pub today_open: Option<f64>,
    pub today_close: Option<f64>,

    pub premarket_volume: f64,
    pub market_volume: f64,
    pub postmarket_volume: f64,

    pub trade_count: u64,
    pub trade_count_history: VecDeque<u64>,
    pub candle_direction_history: VecDeque<bool>,

    max_final_bars: usize,
}

impl SymbolState {
    pub fn new(symbol: impl Into<String>, max_final_bars: usize) -> Self {
        Self {
            symbol: symbol.into(),
            live_bar: None,
            last_final_bars: VecDeque::with_capacity(max_final_bars),
            indicators: HashMap::new(),
            last_tick_time: None,
            last_update: None,
            current_session: Session::Closed,
            session_start_time: None,
            yesterday_close: None,
            today_open: None,
            today_close: None,
            premarket_volume: 0.0,
            market_volume: 0.0,
            postmarket_volume: 0.0,
            trade_count: 0,
            trade_count_history: VecDeque::new(),
            candle_direction_history: VecDeque::new(),
            max_final_bars: max_final_bars.max(1),
        }
    }

    /// Volume accumulated so far in the symbol's current session.
    pub fn current_session_volume(&self) -> f64 {
        match self.current_session {
            Session::Premarket => self.premarket_volume,
            Session::Market => self.market_volume,
            Session::Postmarket => self.postmarket_volume,
            Session::Closed => 0.0,
        }
    }

    fn session_volume_mut(&mut self, session: Session) -> Option<&mut f64> {
        match session {
            Session::Premarket => Some(&mut self.premarket_volume),
            Session::Market => Some(&mut self.market_volume),
            Session::Postmarket => Some(&mut self.postmarket_volume),
            Session::Closed => None,
        }
    }

    /// Apply the session-transition rules of spec §4.7: entering a new
    /// session resets that session's volume accumulator and the trade
    /// count; entering premarket (day boundary) also rolls today_close
    /// into yesterday_close and clears today_open/today_close.
    fn transition_session(&mut self, new_session: Session) {
        if new_session == self.current_session {
            return;
        }
        if new_session == Session::Premarket {
            self.yesterday_close = self.today_close.or(self.yesterday_close);
            self.today_open = None;
            self.today_close = None;
        }
        if let Some(v) = self.session_volume_mut(new_session) {
            *v = 0.0;
        }
        self.trade_count = 0;
        self.current_session = new_session;
        self.session_start_time = self.last_tick_time.or(self.last_update);
    }

    /// A tick with non-positive price or non-positive size is dropped by
    /// the caller before this is ever invoked; see `Tick::is_valid`.
    pub fn update_live_bar(&mut self, tick: &Tick) {
        debug_assert!(tick.is_valid());
        let now = Utc::now();
        let session = session_for(tick.timestamp);
        if session != self.current_session {
            self.transition_session(session);
        }

        let minute = tick.minute();
        match &mut self.live_bar {
            Some(lb) if lb.minute == minute => {
                lb.apply_tick(tick.price, tick.size);
            }
            _ => {
                let mut lb = LiveBar::start(self.symbol.clone(), minute, tick.price);
                lb.apply_tick(tick.price, tick.size);
                self.live_bar = Some(lb);
            }
        }

        if tick.tick_type == TickType::Trade {
            if let Some(v) = self.session_volume_mut(session) {
                *v += tick.size;
            }
            self.trade_count += 1;
        }

        self.last_tick_time = Some(tick.timestamp);
        self.last_update = Some(now);
    }

    /// Appends `bar` to `last_final_bars`, unless it repeats the most
    /// recently appended bar's timestamp (at-least-once redelivery can hand
    /// the consumer the same finalized bar twice). A repeat replaces the
    /// existing tail entry in place instead of appending a second one, so
    /// invariant (i) (strictly timestamp-ascending) holds and re-applying a
    /// bar is idempotent for state content, per spec.
    pub fn update_finalized_bar(&mut self, bar: Bar1m) {
        let session = session_for(bar.timestamp);
        if session != self.current_session {
            self.transition_session(session);
        }

        if let Some(lb) = &self.live_bar {
            if lb.minute == bar.timestamp {
                self.live_bar = None;
            }
        }

        if self.today_open.is_none() {
            self.today_open = Some(bar.open);
        }
        self.today_close = Some(bar.close);

        let is_repeat = matches!(self.last_final_bars.back(), Some(last) if last.timestamp == bar.timestamp);
        let direction = bar.close > bar.open;

        if is_repeat {
            if let Some(last) = self.last_final_bars.back_mut() {
                *last = bar;
            }
            if let Some(d) = self.candle_direction_history.back_mut() {
                *d = direction;
            }
        } else {
            self.candle_direction_history.push_back(direction);
            while self.candle_direction_history.len() > MAX_CANDLE_DIRECTION_HISTORY {
                self.candle_direction_history.pop_front();
            }

            self.last_final_bars.push_back(bar);
            while self.last_final_bars.len() > self.max_final_bars {
                self.last_final_bars.pop_front();
            }

            self.trade_count_history.push_back(self.trade_count);
            while self.trade_count_history.len() > MAX_TRADE_COUNT_HISTORY {
                self.trade_count_history.pop_front();
            }
            self.trade_count = 0;
        }

        self.last_update = Some(Utc::now());
    }

    pub fn update_indicators(&mut self, values: HashMap<String, f64>) {
        for (k, v) in values {
            self.indicators.insert(k, v);
        }
        self.last_update = Some(Utc::now());
    }
}
