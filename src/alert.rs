// =============================================================================
// Alert emitter
// =============================================================================
//
// Publishes a matched rule as an `Alert` to the outbound pubsub channel
// (best-effort — a publish failure is logged, never propagated) and,
// if configured, appends it to the durable alerts stream (spec.md §4.8),
// whose failure IS propagated since it is the system's only durable alert
// record and the caller needs to know it was dropped.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::bus::{DurableStream, PubSub};
use crate::errors::ScannerError;
use crate::types::Alert;

pub struct AlertEmitter {
    pubsub: Arc<dyn PubSub>,
    stream: Option<Arc<dyn DurableStream>>,
    channel: String,
    stream_name: Option<String>,
    emitted: Arc<AtomicU64>,
    published: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl AlertEmitter {
    pub fn new(
        pubsub: Arc<dyn PubSub>,
        stream: Option<Arc<dyn DurableStream>>,
        channel: impl Into<String>,
        stream_name: Option<String>,
    ) -> Self {
        Self {
            pubsub,
            stream,
            channel: channel.into(),
            stream_name,
            emitted: Arc::new(AtomicU64::new(0)),
            published: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn emitted_count(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Emit one alert: publish (best-effort) to the pubsub channel, then
    /// append (failure-propagating) to the durable stream if one is
    /// configured. Returns `Err` only when the durable append fails.
    pub async fn emit(&self, alert: &Alert) -> Result<(), ScannerError> {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(crate::metrics::ALERTS_EMITTED, 1);

        let payload = serde_json::to_vec(alert)
            .map_err(|e| ScannerError::EmitFailure(format!("alert serialization: {e}")))?;

        match self.pubsub.publish(&self.channel, &payload).await {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(crate::metrics::ALERTS_PUBLISHED, 1);
            }
            Err(e) => {
                warn!(
                    rule_id = %alert.rule_id,
                    symbol = %alert.symbol,
                    error = %e,
                    "alert pubsub publish failed, continuing"
                );
            }
        }

        if let (Some(stream), Some(stream_name)) = (&self.stream, &self.stream_name) {
            if let Err(e) = stream.publish(stream_name, "alert", &payload).await {
                self.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(crate::metrics::ALERTS_FAILED, 1);
                return Err(ScannerError::EmitFailure(format!(
                    "durable alert stream append failed: {e}"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    struct FakePubSub {
        published: Mutex<Vec<(String, Vec<u8>)>>,
        fail: bool,
    }

    #[async_trait]
    impl PubSub for FakePubSub {
        async fn subscribe(&self, _channel: &str) -> Result<mpsc::Receiver<Vec<u8>>, ScannerError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
        async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), ScannerError> {
            if self.fail {
                return Err(ScannerError::BusUnavailable("fake failure".to_string()));
            }
            self.published
                .lock()
                .push((channel.to_string(), payload.to_vec()));
            Ok(())
        }
    }

    struct FakeStream {
        fail: bool,
        appended: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl DurableStream for FakeStream {
        async fn consume_group(
            &self,
            _stream: &str,
            _group: &str,
            _batch_size: usize,
            _timeout: std::time::Duration,
        ) -> Result<Vec<crate::bus::StreamMessage>, ScannerError> {
            Ok(Vec::new())
        }
        async fn ack(&self, _stream: &str, _group: &str, _ids: &[String]) -> Result<(), ScannerError> {
            Ok(())
        }
        async fn publish(&self, _stream: &str, _key: &str, payload: &[u8]) -> Result<(), ScannerError> {
            if self.fail {
                return Err(ScannerError::BusUnavailable("fake stream failure".to_string()));
            }
            self.appended.lock().push(payload.to_vec());
            Ok(())
        }
    }

    fn alert() -> Alert {
        Alert::new("r1", "rule one", "AAPL", 150.0, HashMap::new())
    }

    #[tokio::test]
    async fn publishes_to_pubsub_and_stream_on_success() {
        let pubsub = Arc::new(FakePubSub {
            published: Mutex::new(Vec::new()),
            fail: false,
        });
        let stream = Arc::new(FakeStream {
            fail: false,
            appended: Mutex::new(Vec::new()),
        });
        let emitter = AlertEmitter::new(
            pubsub.clone(),
            Some(stream.clone()),
            "alerts",
            Some("alerts".to_string()),
        );
        emitter.emit(&alert()).await.unwrap();
        assert_eq!(pubsub.published.lock().len(), 1);
        assert_eq!(stream.appended.lock().len(), 1);
        assert_eq!(emitter.published_count(), 1);
    }

    #[tokio::test]
    async fn pubsub_failure_is_swallowed_and_does_not_fail_emit() {
        let pubsub = Arc::new(FakePubSub {
            published: Mutex::new(Vec::new()),
            fail: true,
        });
        let stream = Arc::new(FakeStream {
            fail: false,
            appended: Mutex::new(Vec::new()),
        });
        let emitter = AlertEmitter::new(
            pubsub,
            Some(stream.clone()),
            "alerts",
            Some("alerts".to_string()),
        );
        emitter.emit(&alert()).await.unwrap();
        assert_eq!(stream.appended.lock().len(), 1);
    }

    #[tokio::test]
    async fn durable_stream_failure_propagates() {
        let pubsub = Arc::new(FakePubSub {
            published: Mutex::new(Vec::new()),
            fail: false,
        });
        let stream = Arc::new(FakeStream {
            fail: true,
            appended: Mutex::new(Vec::new()),
        });
        let emitter = AlertEmitter::new(
            pubsub,
            Some(stream),
            "alerts",
            Some("alerts".to_string()),
        );
        assert!(emitter.emit(&alert()).await.is_err());
        assert_eq!(emitter.failed_count(), 1);
    }

    #[tokio::test]
    async fn no_durable_stream_configured_is_pubsub_only() {
        let pubsub = Arc::new(FakePubSub {
            published: Mutex::new(Vec::new()),
            fail: false,
        });
        let emitter = AlertEmitter::new(pubsub.clone(), None, "alerts", None);
        emitter.emit(&alert()).await.unwrap();
        assert_eq!(pubsub.published.lock().len(), 1);
    }
}
