// =============================================================================
// Consumers — tick, finalized-bar, and indicator ingest
// =============================================================================
//
// Each consumer owns one logical inbound stream, decodes and validates every
// message, applies it to the shared `SymbolStateStore`, and acknowledges
// only the processed subset — exactly spec.md §4.5's at-least-once,
// batch-then-ack contract. A message for a symbol this worker doesn't own is
// still acknowledged (it was handled, just discarded); only genuine
// decode/validation failures are left unacked so the bus redelivers them.
// =============================================================================

pub mod bar;
pub mod decode;
pub mod indicator;
pub mod tick;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::warn;

use crate::errors::ScannerError;

pub use bar::BarConsumer;
pub use decode::ProviderFlavor;
pub use indicator::IndicatorConsumer;
pub use tick::TickConsumer;

/// A long-running ingest task that drains until `cancel` fires, then returns
/// once any in-flight batch has been acknowledged.
#[async_trait]
pub trait Consumer: Send {
    async fn run(mut self, cancel: watch::Receiver<bool>) -> Result<(), ScannerError>;
}

/// Exponential backoff with the shape spec.md §7 requires for `BusUnavailable`:
/// base, doubling, capped at max.
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    pub async fn wait(&mut self) {
        tokio::time::sleep(self.current).await;
        self.current = (self.current * 2).min(self.max);
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_secs(30))
    }
}

/// Returns `true` if the cancellation signal has already been tripped.
pub fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

pub(crate) fn log_bus_error(context: &str, e: &ScannerError) {
    warn!(context, error = %e, "bus error, backing off");
}
