// =============================================================================
// Metric registry — named derivations over a SymbolStateSnapshot
// =============================================================================
//
// A closed set of built-in derivations (price, volume, vwap, price-change
// windows) plus a pass-through for any externally-supplied indicator name.
// Every derivation returns `Option<f64>`; a `None` means "undefined for this
// symbol right now" (insufficient history, zero divisor, missing indicator),
// and the scan loop simply omits that key rather than erroring.
// =============================================================================

use crate::state::SymbolStateSnapshot;

/// Price change lookback windows, in minutes, that the registry derives
/// `price_change_{W}m_pct` metrics for.
pub const PRICE_CHANGE_WINDOWS_MIN: &[u64] = &[1, 5, 15];

/// Derive a single named metric from a symbol's snapshot. Returns `None` if
/// the metric is unknown to the built-in set *and* not present in the
/// symbol's indicator map.
pub fn derive(name: &str, snap: &SymbolStateSnapshot) -> Option<f64> {
    match name {
        "price" => price(snap),
        "close" => last_final(snap).map(|b| b.close),
        "open" => last_final(snap).map(|b| b.open),
        "high" => last_final(snap).map(|b| b.high),
        "low" => last_final(snap).map(|b| b.low),
        "volume" => last_final(snap).map(|b| b.volume),
        "vwap" => last_final(snap).map(|b| b.vwap),
        "vwap_live" => snap.live_bar.as_ref().and_then(|lb| lb.vwap()),
        "volume_live" => snap.live_bar.as_ref().map(|lb| lb.volume),
        _ => {
            if let Some(pct) = parse_price_change_metric(name) {
                return price_change_pct(snap, pct);
            }
            snap.indicators.get(name).copied()
        }
    }
}

/// Derive exactly the metrics named in `required`, omitting any that are
/// currently undefined. Used by the scan loop so it only computes what the
/// active ruleset actually needs.
pub fn derive_required(
    required: &std::collections::HashSet<String>,
    snap: &SymbolStateSnapshot,
) -> std::collections::HashMap<String, f64> {
    let mut out = std::collections::HashMap::with_capacity(required.len());
    for name in required {
        if let Some(v) = derive(name, snap) {
            out.insert(name.clone(), v);
        }
    }
    out
}

fn last_final(snap: &SymbolStateSnapshot) -> Option<&crate::types::Bar1m> {
    snap.last_final_bars.back()
}

/// `price` falls back from the live bar's close to the last finalized bar's
/// close when there is no live bar yet.
fn price(snap: &SymbolStateSnapshot) -> Option<f64> {
    snap.live_bar
        .as_ref()
        .map(|lb| lb.close)
        .or_else(|| last_final(snap).map(|b| b.close))
}

/// Parses `price_change_{W}m_pct` into the window W, if `name` matches that
/// shape and W is one of the supported windows.
fn parse_price_change_metric(name: &str) -> Option<u64> {
    let rest = name.strip_prefix("price_change_")?;
    let rest = rest.strip_suffix("m_pct")?;
    let window: u64 = rest.parse().ok()?;
    if PRICE_CHANGE_WINDOWS_MIN.contains(&window) {
        Some(window)
    } else {
        None
    }
}

/// `100 * (bar_last.close - bar_last-W.close) / bar_last-W.close`, using the
/// last finalized bar and the bar W positions back from it. Undefined
/// (returns `None`) when there isn't enough history or the divisor is zero.
fn price_change_pct(snap: &SymbolStateSnapshot, window_minutes: u64) -> Option<f64> {
    let bars = &snap.last_final_bars;
    let len = bars.len();
    let back = window_minutes as usize;
    if len == 0 || back >= len {
        return None;
    }
    let last = bars.get(len - 1)?;
    let anchor = bars.get(len - 1 - back)?;
    if anchor.close == 0.0 {
        return None;
    }
    Some(100.0 * (last.close - anchor.close) / anchor.close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SymbolStateSnapshot;
    use crate::types::{Bar1m, LiveBar, Session};
    use chrono::Utc;
    use std::collections::{HashMap, VecDeque};

    fn bar(close: f64) -> Bar1m {
        Bar1m {
            symbol: "AAPL".into(),
            timestamp: Utc::now(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
            vwap: close,
        }
    }

    fn snap_with_bars(closes: &[f64]) -> SymbolStateSnapshot {
        SymbolStateSnapshot {
            symbol: "AAPL".into(),
            live_bar: None,
            last_final_bars: closes.iter().map(|&c| bar(c)).collect::<VecDeque<_>>(),
            indicators: HashMap::new(),
            session: Session::Market,
            current_volume: 1000.0,
            last_tick_time: None,
            last_update: None,
            yesterday_close: None,
            today_open: None,
            today_close: None,
            trade_count: 0,
            trade_count_history: VecDeque::new(),
            candle_direction_history: VecDeque::new(),
        }
    }

    #[test]
    fn price_falls_back_to_last_final_close() {
        let snap = snap_with_bars(&[10.0, 11.0, 12.0]);
        assert_eq!(derive("price", &snap), Some(12.0));
    }

    #[test]
    fn price_prefers_live_bar_close() {
        let mut snap = snap_with_bars(&[10.0]);
        let mut lb = LiveBar::start("AAPL", Utc::now(), 10.0);
        lb.apply_tick(15.0, 1.0);
        snap.live_bar = Some(lb);
        assert_eq!(derive("price", &snap), Some(15.0));
    }

    #[test]
    fn price_change_pct_undefined_without_enough_history() {
        let snap = snap_with_bars(&[10.0, 11.0]);
        assert_eq!(derive("price_change_5m_pct", &snap), None);
    }

    #[test]
    fn price_change_pct_matches_spec_formula() {
        // 6 bars: indices 0..5, last close = bars[5], 5m-ago close = bars[0].
        let closes = vec![100.0, 101.0, 102.0, 103.0, 104.0, 110.0];
        let snap = snap_with_bars(&closes);
        let pct = derive("price_change_5m_pct", &snap).unwrap();
        assert!((pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn price_change_pct_zero_divisor_is_undefined() {
        let closes = vec![0.0, 101.0, 102.0, 103.0, 104.0, 110.0];
        let snap = snap_with_bars(&closes);
        assert_eq!(derive("price_change_5m_pct", &snap), None);
    }

    #[test]
    fn unknown_metric_falls_through_to_indicators() {
        let mut snap = snap_with_bars(&[10.0]);
        snap.indicators.insert("rsi_14".to_string(), 42.0);
        assert_eq!(derive("rsi_14", &snap), Some(42.0));
        assert_eq!(derive("ema_20", &snap), None);
    }

    #[test]
    fn derive_required_omits_undefined_keys() {
        let mut snap = snap_with_bars(&[10.0]);
        snap.indicators.insert("rsi_14".to_string(), 25.0);
        let required: std::collections::HashSet<String> =
            ["rsi_14", "price_change_5m_pct", "price"]
                .iter()
                .map(|s| s.to_string())
                .collect();
        let derived = derive_required(&required, &snap);
        assert_eq!(derived.get("rsi_14"), Some(&25.0));
        assert!(!derived.contains_key("price_change_5m_pct"));
        assert!(derived.contains_key("price"));
    }
}
