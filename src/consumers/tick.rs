// =============================================================================
// Tick consumer
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::decode::{decode_tick, ProviderFlavor};
use super::{is_cancelled, log_bus_error, Backoff, Consumer};
use crate::bus::DurableStream;
use crate::errors::ScannerError;
use crate::partitioner::Partitioner;
use crate::state::SymbolStateStore;

pub struct TickConsumer {
    pub bus: Arc<dyn DurableStream>,
    pub store: Arc<SymbolStateStore>,
    pub partitioner: Arc<Partitioner>,
    pub stream: String,
    pub group: String,
    pub batch_size: usize,
    pub ack_timeout: Duration,
    pub flavor: ProviderFlavor,
    pub healthy: Arc<AtomicBool>,
    pub processed: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
}

#[async_trait]
impl Consumer for TickConsumer {
    async fn run(mut self, mut cancel: watch::Receiver<bool>) -> Result<(), ScannerError> {
        let mut backoff = Backoff::default();
        info!(stream = %self.stream, group = %self.group, "tick consumer starting");

        loop {
            if is_cancelled(&cancel) {
                info!(stream = %self.stream, "tick consumer exiting on shutdown signal");
                return Ok(());
            }

            tokio::select! {
                biased;
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        info!(stream = %self.stream, "tick consumer exiting on shutdown signal");
                        return Ok(());
                    }
                }
                batch = self.bus.consume_group(&self.stream, &self.group, self.batch_size, self.ack_timeout) => {
                    match batch {
                        Ok(messages) => {
                            self.healthy.store(true, Ordering::Relaxed);
                            backoff.reset();
                            if !messages.is_empty() {
                                let mut acked = Vec::with_capacity(messages.len());
                                for msg in &messages {
                                    if self.process_one(&msg.payload) {
                                        acked.push(msg.id.clone());
                                    }
                                }
                                if let Err(e) = self.bus.ack(&self.stream, &self.group, &acked).await {
                                    warn!(stream = %self.stream, error = %e, "failed to ack processed tick batch");
                                }
                            }
                        }
                        Err(e) => {
                            self.healthy.store(false, Ordering::Relaxed);
                            log_bus_error("tick consumer", &e);
                            backoff.wait().await;
                        }
                    }
                }
            }
        }
    }
}

impl TickConsumer {
    /// Decodes, validates, and applies one message. Returns `true` iff the
    /// message should be acknowledged (decoded and either applied or
    /// correctly recognized as not owned by this worker).
    fn process_one(&self, payload: &[u8]) -> bool {
        let tick = match decode_tick(self.flavor, payload) {
            Ok(t) => t,
            Err(e) => {
                debug!(error = %e, "dropping undecodable tick, leaving unacked for redelivery");
                self.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(crate::metrics::TICKS_FAILED, 1);
                return false;
            }
        };

        if !self.partitioner.owns(&tick.symbol) {
            return true;
        }

        if !tick.is_valid() {
            debug!(symbol = %tick.symbol, "invalid tick (non-positive price/size), dropping");
            self.failed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(crate::metrics::TICKS_FAILED, 1);
            // ValidationFailure carries the same policy as DecodeFailure
            // (spec.md §7): leave unacked so bounded bus-side retries apply,
            // and rely on the bus's dead-letter facility for poison messages.
            return false;
        }

        self.store.update_live_bar(&tick);
        self.processed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(crate::metrics::TICKS_CONSUMED, 1);
        true
    }
}
