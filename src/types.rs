// =============================================================================
// Core data model — ticks, bars, rules, alerts
// =============================================================================
//
// These types are the wire-level and in-memory shapes shared across every
// subsystem. None of them are ever mutated after construction; callers that
// need an updated value build a new one.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Market session, derived from a symbol's current US/Eastern local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Session {
    Premarket,
    Market,
    Postmarket,
    Closed,
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Premarket => write!(f, "premarket"),
            Self::Market => write!(f, "market"),
            Self::Postmarket => write!(f, "postmarket"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Session filter attached to a rule condition. `All` matches any session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionFilter {
    All,
    Premarket,
    Market,
    Postmarket,
}

impl SessionFilter {
    /// Whether the given current session satisfies this filter.
    pub fn matches(&self, session: Session) -> bool {
        match self {
            SessionFilter::All => true,
            SessionFilter::Premarket => session == Session::Premarket,
            SessionFilter::Market => session == Session::Market,
            SessionFilter::Postmarket => session == Session::Postmarket,
        }
    }
}

/// One trade or quote observation for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub size: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub tick_type: TickType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickType {
    Trade,
    Quote,
}

impl Tick {
    /// A tick is valid input iff the symbol is non-empty and, for trades,
    /// price and size are strictly positive. Quote ticks only require a
    /// non-negative size.
    pub fn is_valid(&self) -> bool {
        if self.symbol.trim().is_empty() {
            return false;
        }
        match self.tick_type {
            TickType::Trade => self.price > 0.0 && self.size > 0.0,
            TickType::Quote => self.size >= 0.0,
        }
    }

    /// The UTC minute this tick belongs to (seconds/nanos truncated).
    pub fn minute(&self) -> DateTime<Utc> {
        truncate_to_minute(self.timestamp)
    }
}

/// Truncate a timestamp down to the start of its minute.
pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    use chrono::Timelike;
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// One finalized one-minute OHLCV bar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar1m {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub vwap: f64,
}

/// The currently-building minute bar for a symbol, fed by ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveBar {
    pub symbol: String,
    pub minute: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub vwap_num: f64,
    pub vwap_denom: f64,
}

impl LiveBar {
    pub fn start(symbol: impl Into<String>, minute: DateTime<Utc>, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            minute,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
            vwap_num: 0.0,
            vwap_denom: 0.0,
        }
    }

    pub fn apply_tick(&mut self, price: f64, size: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += size;
        self.vwap_num += price * size;
        self.vwap_denom += size;
    }

    pub fn vwap(&self) -> Option<f64> {
        if self.vwap_denom > 0.0 {
            Some(self.vwap_num / self.vwap_denom)
        } else {
            None
        }
    }
}

// =============================================================================
// Rules
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Operator {
    /// IEEE-754 float comparison. NaN compares false against every operator.
    pub fn apply(&self, lhs: f64, rhs: f64) -> bool {
        if lhs.is_nan() || rhs.is_nan() {
            return false;
        }
        match self {
            Operator::Lt => lhs < rhs,
            Operator::Le => lhs <= rhs,
            Operator::Gt => lhs > rhs,
            Operator::Ge => lhs >= rhs,
            Operator::Eq => lhs == rhs,
            Operator::Ne => lhs != rhs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub metric: String,
    pub operator: Operator,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_threshold: Option<f64>,
    #[serde(default = "default_session_filter")]
    pub session_filter: SessionFilter,
}

fn default_session_filter() -> SessionFilter {
    SessionFilter::All
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub cooldown_seconds: i64,
    pub conditions: Vec<Condition>,
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Alerts
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub message: String,
    pub trace_id: String,
    pub metadata: std::collections::HashMap<String, f64>,
}

impl Alert {
    /// Construct a fresh alert, filling in id/timestamp/trace_id and a
    /// human-readable message from the match metadata.
    pub fn new(
        rule_id: impl Into<String>,
        rule_name: impl Into<String>,
        symbol: impl Into<String>,
        price: f64,
        metadata: std::collections::HashMap<String, f64>,
    ) -> Self {
        let rule_id = rule_id.into();
        let rule_name = rule_name.into();
        let symbol = symbol.into();
        let message = format!("rule '{rule_name}' matched for {symbol}");
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            trace_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            rule_id,
            rule_name,
            symbol,
            price,
            message,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_tick_requires_positive_price_and_size() {
        let mut t = sample_tick(10.0, 1.0);
        assert!(t.is_valid());
        t.price = 0.0;
        assert!(!t.is_valid());
        t.price = 10.0;
        t.size = 0.0;
        assert!(!t.is_valid());
    }

    #[test]
    fn empty_symbol_is_invalid() {
        let mut t = sample_tick(10.0, 1.0);
        t.symbol = "".into();
        assert!(!t.is_valid());
    }

    #[test]
    fn operator_nan_compares_false() {
        assert!(!Operator::Gt.apply(f64::NAN, 1.0));
        assert!(!Operator::Eq.apply(1.0, f64::NAN));
        assert!(!Operator::Ne.apply(f64::NAN, f64::NAN));
    }

    #[test]
    fn minute_truncation() {
        let ts = Utc::now();
        let m = truncate_to_minute(ts);
        assert_eq!(m.timestamp() % 60, 0);
    }

    #[test]
    fn live_bar_tracks_ohlcv_and_vwap() {
        let minute = Utc::now();
        let mut lb = LiveBar::start("AAPL", minute, 100.0);
        lb.apply_tick(101.0, 2.0);
        lb.apply_tick(99.0, 1.0);
        assert_eq!(lb.open, 100.0);
        assert_eq!(lb.high, 101.0);
        assert_eq!(lb.low, 99.0);
        assert_eq!(lb.close, 99.0);
        assert_eq!(lb.volume, 3.0);
        assert!((lb.vwap().unwrap() - (101.0 * 2.0 + 99.0 * 1.0) / 3.0).abs() < 1e-9);
    }

    fn sample_tick(price: f64, size: f64) -> Tick {
        Tick {
            symbol: "AAPL".into(),
            price,
            size,
            timestamp: Utc::now(),
            tick_type: TickType::Trade,
            bid: None,
            ask: None,
        }
    }
}
