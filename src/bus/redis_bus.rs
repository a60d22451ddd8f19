// =============================================================================
// Redis-backed bus — concrete implementation of the pubsub/stream/kv traits
// =============================================================================
//
// Grounded in the teacher's `order-gateway/src/cache.rs`, which already uses
// `redis::aio::ConnectionManager` for request/reply caching; this extends
// the same connection-manager idiom to pubsub (a dedicated subscriber
// connection forwarding into an mpsc channel) and to Redis Streams
// (XADD/XREADGROUP/XACK) for the durable, at-least-once inbound streams.
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use tracing::{debug, warn};

use super::{BarStore, DurableStream, KeyValueStore, PubSub, RuleStore, StreamMessage};
use crate::errors::ScannerError;
use crate::types::{Bar1m, Rule};

fn bus_err(e: impl std::fmt::Display) -> ScannerError {
    ScannerError::BusUnavailable(e.to_string())
}

/// Shared Redis connection; cheap to clone (it's a multiplexed connection
/// manager under the hood), so every bus trait below holds its own copy.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    conn: redis::aio::ConnectionManager,
}

impl RedisBus {
    pub async fn connect(url: &str) -> Result<Self, ScannerError> {
        let client = Client::open(url).map_err(bus_err)?;
        let conn = redis::aio::ConnectionManager::new(client.clone())
            .await
            .map_err(bus_err)?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl PubSub for RedisBus {
    async fn subscribe(&self, channel: &str) -> Result<tokio::sync::mpsc::Receiver<Vec<u8>>, ScannerError> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(bus_err)?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await.map_err(bus_err)?;

        let (tx, rx) = tokio::sync::mpsc::channel(1024);
        let channel_owned = channel.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            use futures_util::StreamExt;
            while let Some(msg) = stream.next().await {
                let payload = msg.get_payload_bytes().to_vec();
                if tx.send(payload).await.is_err() {
                    debug!(channel = %channel_owned, "pubsub receiver dropped, ending subscription");
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), ScannerError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| {
                warn!(channel, error = %e, "pubsub publish failed");
                bus_err(e)
            })
    }
}

#[async_trait]
impl DurableStream for RedisBus {
    async fn consume_group(
        &self,
        stream: &str,
        group: &str,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<Vec<StreamMessage>, ScannerError> {
        let mut conn = self.conn.clone();

        // Consumer groups are idempotent to (re-)create; ignore BUSYGROUP.
        let _: Result<(), _> = conn
            .xgroup_create_mkstream::<_, _, _, ()>(stream, group, "$")
            .await;

        let opts = redis::streams::StreamReadOptions::default()
            .group(group, "scanner-worker")
            .count(batch_size)
            .block(timeout.as_millis() as usize);

        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[stream], &[">"], &opts)
            .await
            .map_err(bus_err)?;

        let mut out = Vec::new();
        for stream_key in reply.keys {
            for id_entry in stream_key.ids {
                if let Some(redis::Value::Data(bytes)) = id_entry.map.get("payload") {
                    out.push(StreamMessage {
                        id: id_entry.id,
                        payload: bytes.clone(),
                    });
                }
            }
        }
        Ok(out)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<(), ScannerError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.xack::<_, _, _, ()>(stream, group, ids)
            .await
            .map_err(bus_err)
    }

    async fn publish(&self, stream: &str, key: &str, payload: &[u8]) -> Result<(), ScannerError> {
        let mut conn = self.conn.clone();
        conn.xadd::<_, _, _, _, ()>(stream, "*", &[(key, payload)])
            .await
            .map_err(bus_err)
    }
}

#[async_trait]
impl KeyValueStore for RedisBus {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ScannerError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(bus_err)?;
        Ok(value)
    }
}

/// Rules live as a single JSON-array Redis key, refreshed by whatever
/// external process owns rule authoring; the scanner only ever reads it.
pub struct RedisRuleStore {
    bus: RedisBus,
    key: String,
}

impl RedisRuleStore {
    pub fn new(bus: RedisBus, key: impl Into<String>) -> Self {
        Self { bus, key: key.into() }
    }
}

#[async_trait]
impl RuleStore for RedisRuleStore {
    async fn get_all_rules(&self) -> Result<Vec<Rule>, ScannerError> {
        let raw = self.bus.get(&self.key).await?;
        match raw {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| ScannerError::DecodeFailure(format!("rule store payload: {e}"))),
            None => Ok(Vec::new()),
        }
    }

    async fn get_rule(&self, id: &str) -> Result<Option<Rule>, ScannerError> {
        let rules = self.get_all_rules().await?;
        Ok(rules.into_iter().find(|r| r.id == id))
    }
}

/// Finalized bars live as a Redis list per symbol, oldest-first, appended to
/// by the (out-of-scope) bar aggregator. Rehydration reads the tail.
pub struct RedisBarStore {
    bus: RedisBus,
    key_prefix: String,
}

impl RedisBarStore {
    pub fn new(bus: RedisBus, key_prefix: impl Into<String>) -> Self {
        Self {
            bus,
            key_prefix: key_prefix.into(),
        }
    }

    fn key(&self, symbol: &str) -> String {
        format!("{}{}", self.key_prefix, symbol)
    }
}

#[async_trait]
impl BarStore for RedisBarStore {
    async fn get_latest_bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar1m>, ScannerError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.bus.conn.clone();
        let key = self.key(symbol);
        let start = -(limit as isize);
        let raw: Vec<Vec<u8>> = conn.lrange(&key, start, -1).await.map_err(bus_err)?;

        let mut bars = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_slice::<Bar1m>(&entry) {
                Ok(bar) => bars.push(bar),
                Err(e) => warn!(symbol, error = %e, "skipping malformed bar during rehydration"),
            }
        }
        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }
}
