// =============================================================================
// Indicator consumer
// =============================================================================
//
// Listens on a pubsub channel carrying only `{"symbol": "<S>"}` notifications
// (spec.md §4.5/§6); on each one, fetches the current indicator blob for that
// symbol from the key-value store and applies it. The notification payload
// may be singly or doubly JSON-encoded — tolerated per spec.md §9's Open
// Question resolution: try a direct parse first, then a string-unwrap and
// re-parse, incrementing a counter when the second path is the one that
// actually worked.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{is_cancelled, Backoff, Consumer};
use crate::bus::{KeyValueStore, PubSub};
use crate::errors::ScannerError;
use crate::partitioner::Partitioner;
use crate::state::SymbolStateStore;

#[derive(Debug, Deserialize)]
struct SymbolNotification {
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct IndicatorBlob {
    #[allow(dead_code)]
    symbol: String,
    #[allow(dead_code)]
    timestamp: Option<DateTime<Utc>>,
    values: HashMap<String, f64>,
}

pub struct IndicatorConsumer {
    pub pubsub: Arc<dyn PubSub>,
    pub kv: Arc<dyn KeyValueStore>,
    pub store: Arc<SymbolStateStore>,
    pub partitioner: Arc<Partitioner>,
    pub channel: String,
    pub prefix: String,
    pub healthy: Arc<AtomicBool>,
    pub processed: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
    pub double_encoded: Arc<AtomicU64>,
}

/// Parses a notification payload, tolerating a doubly-JSON-encoded string.
/// Returns `(notification, was_double_encoded)`.
fn parse_notification(bytes: &[u8]) -> Result<(SymbolNotification, bool), ScannerError> {
    if let Ok(n) = serde_json::from_slice::<SymbolNotification>(bytes) {
        return Ok((n, false));
    }
    // Direct parse failed or produced a bare string; try unwrapping one
    // layer of JSON-string encoding and re-parsing.
    let as_string: String = serde_json::from_slice(bytes)
        .map_err(|e| ScannerError::DecodeFailure(format!("indicator notification: {e}")))?;
    let n: SymbolNotification = serde_json::from_str(&as_string)
        .map_err(|e| ScannerError::DecodeFailure(format!("indicator notification (unwrapped): {e}")))?;
    Ok((n, true))
}

#[async_trait]
impl Consumer for IndicatorConsumer {
    async fn run(mut self, mut cancel: watch::Receiver<bool>) -> Result<(), ScannerError> {
        let mut backoff = Backoff::default();
        info!(channel = %self.channel, "indicator consumer starting");

        loop {
            if is_cancelled(&cancel) {
                info!("indicator consumer exiting on shutdown signal");
                return Ok(());
            }

            let mut rx = match self.pubsub.subscribe(&self.channel).await {
                Ok(rx) => {
                    self.healthy.store(true, Ordering::Relaxed);
                    backoff.reset();
                    rx
                }
                Err(e) => {
                    self.healthy.store(false, Ordering::Relaxed);
                    warn!(error = %e, "indicator consumer failed to subscribe, retrying");
                    backoff.wait().await;
                    continue;
                }
            };

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            info!("indicator consumer exiting on shutdown signal");
                            return Ok(());
                        }
                    }
                    msg = rx.recv() => {
                        match msg {
                            Some(payload) => self.handle_notification(&payload).await,
                            None => {
                                warn!("indicator pubsub channel closed, resubscribing");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }
}

impl IndicatorConsumer {
    async fn handle_notification(&self, payload: &[u8]) {
        let (notification, double_encoded) = match parse_notification(payload) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "dropping undecodable indicator notification");
                self.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(crate::metrics::INDICATOR_FAILED, 1);
                return;
            }
        };
        if double_encoded {
            self.double_encoded.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(crate::metrics::INDICATOR_DOUBLE_ENCODED, 1);
        }

        let symbol = notification.symbol.to_uppercase();
        if !self.partitioner.owns(&symbol) {
            return;
        }

        let key = format!("{}{}", self.prefix, symbol);
        let blob_bytes = match self.kv.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(symbol = %symbol, key = %key, "no indicator blob present yet");
                return;
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "indicator key-value fetch failed");
                self.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(crate::metrics::INDICATOR_FAILED, 1);
                return;
            }
        };

        let blob: IndicatorBlob = match serde_json::from_slice(&blob_bytes) {
            Ok(b) => b,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "malformed indicator blob");
                self.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(crate::metrics::INDICATOR_FAILED, 1);
                return;
            }
        };

        self.store.update_indicators(&symbol, blob.values);
        self.processed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(crate::metrics::INDICATOR_UPDATES, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singly_encoded_notification_parses_directly() {
        let bytes = serde_json::to_vec(&serde_json::json!({ "symbol": "AAPL" })).unwrap();
        let (n, double) = parse_notification(&bytes).unwrap();
        assert_eq!(n.symbol, "AAPL");
        assert!(!double);
    }

    #[test]
    fn doubly_encoded_notification_is_tolerated() {
        let inner = serde_json::json!({ "symbol": "AAPL" }).to_string();
        let bytes = serde_json::to_vec(&inner).unwrap();
        let (n, double) = parse_notification(&bytes).unwrap();
        assert_eq!(n.symbol, "AAPL");
        assert!(double);
    }
}
