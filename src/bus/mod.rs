// =============================================================================
// Bus boundary — pubsub, durable streams, key-value store, rule/bar stores
// =============================================================================
//
// The ingest service, bar aggregator, indicator service, bar storage, and
// the message-bus implementation are all deliberately out of scope (spec.md
// §1); this module defines only the trait boundary the scanner core talks
// to, plus one concrete Redis-backed implementation of each so the binary
// actually runs against something real. Every trait method is async and
// object-safe so `Arc<dyn Trait>` can be shared across every consumer/loop.
// =============================================================================

pub mod redis_bus;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::ScannerError;
use crate::types::{Bar1m, Rule};

/// One undelivered message read from a durable stream's consumer group.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: String,
    pub payload: Vec<u8>,
}

/// Real-time best-effort publish/subscribe. Used for the outbound alert
/// channel and the inbound `indicators.updated` notification channel.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Subscribe to `channel`, returning a receiver of raw message payloads.
    /// The subscription lives as long as the returned receiver is held.
    async fn subscribe(&self, channel: &str) -> Result<tokio::sync::mpsc::Receiver<Vec<u8>>, ScannerError>;

    /// Best-effort publish. Failure is the caller's to log; it must never
    /// fail the call that triggered it (spec.md §4.8).
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), ScannerError>;
}

/// At-least-once durable stream with consumer-group semantics. Used for the
/// inbound `ticks`/`bars.finalized` streams and the optional durable
/// `alerts` stream.
#[async_trait]
pub trait DurableStream: Send + Sync {
    /// Read up to `batch_size` unacknowledged messages for `group`, waiting
    /// at most `timeout` for the first message to arrive.
    async fn consume_group(
        &self,
        stream: &str,
        group: &str,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<Vec<StreamMessage>, ScannerError>;

    /// Acknowledge successfully processed message ids. Un-acked ids are
    /// eligible for redelivery by the bus.
    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<(), ScannerError>;

    /// Append a message to a durable stream (used for the optional durable
    /// alerts stream). `key` is the message's field name, per spec.md §6.
    async fn publish(&self, stream: &str, key: &str, payload: &[u8]) -> Result<(), ScannerError>;
}

/// Simple async key-value fetch, used for indicator blobs (`<prefix><symbol>`).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ScannerError>;
}

/// External rule store. Polled periodically by the rule refresher.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn get_all_rules(&self) -> Result<Vec<Rule>, ScannerError>;
    async fn get_rule(&self, id: &str) -> Result<Option<Rule>, ScannerError>;
}

/// Persistent finalized-bar storage, consulted only during rehydration.
#[async_trait]
pub trait BarStore: Send + Sync {
    /// Most recent `limit` bars for `symbol`, ascending by timestamp.
    async fn get_latest_bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar1m>, ScannerError>;
}
