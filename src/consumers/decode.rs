// =============================================================================
// Wire decoding — provider flavors for ticks and finalized bars
// =============================================================================
//
// Per spec.md §9's design note on "dynamic dispatch over provider formats":
// the mapping from raw external JSON to our in-memory types is
// provider-specific, so it's modeled as a tagged enum chosen once at
// consumer construction (from config), never re-dispatched per message.
// `Canonical` expects the exact field names from spec.md §3; `GenericFallback`
// searches a fixed list of candidate field names, mirroring the multi-shape
// tolerance the teacher's candle/orderbook decoders show for combined-stream
// vs. single-stream envelopes.
// =============================================================================

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::errors::ScannerError;
use crate::types::{Bar1m, Tick, TickType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFlavor {
    Canonical,
    GenericFallback,
}

fn decode_failure(what: &str, e: impl std::fmt::Display) -> ScannerError {
    ScannerError::DecodeFailure(format!("{what}: {e}"))
}

/// Extract the named envelope field (`tick` or `bar`) from a message's raw
/// bytes. Both fields are structured JSON objects, not doubly-encoded
/// strings — only the indicator pubsub payload tolerates that (spec.md §9).
fn envelope_field<'a>(raw: &'a Value, field: &str) -> Result<&'a Value, ScannerError> {
    raw.get(field)
        .ok_or_else(|| ScannerError::DecodeFailure(format!("envelope missing '{field}' field")))
}

pub fn decode_tick(flavor: ProviderFlavor, bytes: &[u8]) -> Result<Tick, ScannerError> {
    let envelope: Value =
        serde_json::from_slice(bytes).map_err(|e| decode_failure("tick envelope", e))?;
    let tick_value = envelope_field(&envelope, "tick")?;

    match flavor {
        ProviderFlavor::Canonical => serde_json::from_value(tick_value.clone())
            .map_err(|e| decode_failure("canonical tick", e)),
        ProviderFlavor::GenericFallback => decode_tick_generic(tick_value),
    }
}

pub fn decode_bar(flavor: ProviderFlavor, bytes: &[u8]) -> Result<Bar1m, ScannerError> {
    let envelope: Value =
        serde_json::from_slice(bytes).map_err(|e| decode_failure("bar envelope", e))?;
    let bar_value = envelope_field(&envelope, "bar")?;

    match flavor {
        ProviderFlavor::Canonical => serde_json::from_value(bar_value.clone())
            .map_err(|e| decode_failure("canonical bar", e)),
        ProviderFlavor::GenericFallback => decode_bar_generic(bar_value),
    }
}

const SYMBOL_KEYS: &[&str] = &["symbol", "sym", "s", "ticker"];
const PRICE_KEYS: &[&str] = &["price", "px", "p", "last"];
const SIZE_KEYS: &[&str] = &["size", "qty", "q", "sz", "volume"];
const TS_KEYS: &[&str] = &["timestamp", "ts", "t", "time", "T"];
const BID_KEYS: &[&str] = &["bid", "b", "bidPrice"];
const ASK_KEYS: &[&str] = &["ask", "a", "askPrice"];
const TYPE_KEYS: &[&str] = &["type", "tick_type", "side"];

fn find_str(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| v.get(*k))
        .and_then(|v| v.as_str().map(str::to_string))
}

fn find_f64(v: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| v.get(*k)).and_then(value_as_f64)
}

fn value_as_f64(v: &Value) -> Option<f64> {
    if let Some(n) = v.as_f64() {
        return Some(n);
    }
    v.as_str().and_then(|s| s.parse::<f64>().ok())
}

fn find_timestamp(v: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    let raw = keys.iter().find_map(|k| v.get(*k))?;
    if let Some(s) = raw.as_str() {
        return DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }
    if let Some(millis) = raw.as_i64() {
        return Utc.timestamp_millis_opt(millis).single();
    }
    if let Some(millis) = raw.as_f64() {
        return Utc.timestamp_millis_opt(millis as i64).single();
    }
    None
}

fn decode_tick_generic(v: &Value) -> Result<Tick, ScannerError> {
    let symbol = find_str(v, SYMBOL_KEYS)
        .ok_or_else(|| ScannerError::DecodeFailure("no symbol field found".to_string()))?
        .to_uppercase();
    let price = find_f64(v, PRICE_KEYS)
        .ok_or_else(|| ScannerError::DecodeFailure("no price field found".to_string()))?;
    let size = find_f64(v, SIZE_KEYS).unwrap_or(0.0);
    let timestamp = find_timestamp(v, TS_KEYS).unwrap_or_else(Utc::now);
    let tick_type = match find_str(v, TYPE_KEYS).as_deref() {
        Some("quote") | Some("Quote") | Some("QUOTE") => TickType::Quote,
        _ => TickType::Trade,
    };

    Ok(Tick {
        symbol,
        price,
        size,
        timestamp,
        tick_type,
        bid: find_f64(v, BID_KEYS),
        ask: find_f64(v, ASK_KEYS),
    })
}

fn decode_bar_generic(v: &Value) -> Result<Bar1m, ScannerError> {
    let symbol = find_str(v, SYMBOL_KEYS)
        .ok_or_else(|| ScannerError::DecodeFailure("no symbol field found".to_string()))?
        .to_uppercase();
    let timestamp = find_timestamp(v, TS_KEYS)
        .ok_or_else(|| ScannerError::DecodeFailure("no timestamp field found".to_string()))?;
    let open = find_f64(v, &["open", "o"])
        .ok_or_else(|| ScannerError::DecodeFailure("no open field found".to_string()))?;
    let high = find_f64(v, &["high", "h"]).unwrap_or(open);
    let low = find_f64(v, &["low", "l"]).unwrap_or(open);
    let close = find_f64(v, &["close", "c"]).unwrap_or(open);
    let volume = find_f64(v, &["volume", "v"]).unwrap_or(0.0);
    let vwap = find_f64(v, &["vwap", "vw"]).unwrap_or(close);

    Ok(Bar1m {
        symbol,
        timestamp,
        open,
        high,
        low,
        close,
        volume,
        vwap,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_tick_round_trips_through_envelope() {
        let tick = Tick {
            symbol: "AAPL".into(),
            price: 150.0,
            size: 10.0,
            timestamp: Utc::now(),
            tick_type: TickType::Trade,
            bid: None,
            ask: None,
        };
        let envelope = serde_json::json!({ "tick": tick });
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let decoded = decode_tick(ProviderFlavor::Canonical, &bytes).unwrap();
        assert_eq!(decoded.symbol, "AAPL");
        assert_eq!(decoded.price, 150.0);
    }

    #[test]
    fn generic_fallback_finds_alternate_field_names() {
        let envelope = serde_json::json!({
            "tick": { "s": "msft", "p": "301.5", "q": 12, "T": 1_700_000_000_000i64 }
        });
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let decoded = decode_tick(ProviderFlavor::GenericFallback, &bytes).unwrap();
        assert_eq!(decoded.symbol, "MSFT");
        assert_eq!(decoded.price, 301.5);
        assert_eq!(decoded.size, 12.0);
    }

    #[test]
    fn missing_envelope_field_is_decode_failure() {
        let bytes = serde_json::to_vec(&serde_json::json!({ "not_tick": {} })).unwrap();
        assert!(decode_tick(ProviderFlavor::Canonical, &bytes).is_err());
    }

    #[test]
    fn generic_bar_fills_missing_ohlc_from_open() {
        let envelope = serde_json::json!({
            "bar": { "symbol": "AAPL", "ts": "2026-06-15T14:30:00Z", "o": 100.0 }
        });
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let decoded = decode_bar(ProviderFlavor::GenericFallback, &bytes).unwrap();
        assert_eq!(decoded.open, 100.0);
        assert_eq!(decoded.high, 100.0);
        assert_eq!(decoded.close, 100.0);
    }
}
