// =============================================================================
// Partitioner — deterministic symbol -> worker assignment
// =============================================================================
//
// Ownership is a pure function of (symbol, total_workers): FNV1a-32 the
// symbol's bytes, mod total_workers. Independent worker processes reach the
// same assignment without coordinating, as long as they agree on
// total_workers.
// =============================================================================

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a 32-bit hash of `bytes`.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Maps symbols to worker ids via a stable hash, and tracks which symbols
/// this worker has locally registered as "assigned" (e.g. subscribed to).
pub struct Partitioner {
    worker_id: usize,
    total_workers: AtomicUsize,
    assigned: RwLock<HashSet<String>>,
}

impl Partitioner {
    pub fn new(worker_id: usize, total_workers: usize) -> Self {
        assert!(total_workers > 0, "total_workers must be > 0");
        Self {
            worker_id,
            total_workers: AtomicUsize::new(total_workers),
            assigned: RwLock::new(HashSet::new()),
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn total_workers(&self) -> usize {
        self.total_workers.load(Ordering::Relaxed)
    }

    /// The partition a symbol hashes to under the current worker count.
    /// An empty symbol always maps to partition 0.
    pub fn partition_of(&self, symbol: &str) -> usize {
        if symbol.is_empty() {
            return 0;
        }
        let total = self.total_workers.load(Ordering::Relaxed);
        (fnv1a_32(symbol.as_bytes()) as usize) % total
    }

    /// Whether this worker owns `symbol`. Empty symbols are never owned.
    pub fn owns(&self, symbol: &str) -> bool {
        if symbol.is_empty() {
            return false;
        }
        self.partition_of(symbol) == self.worker_id
    }

    /// Record that this worker has locally registered `symbol` as assigned
    /// (e.g. subscribed on a partitioned stream).
    pub fn mark_assigned(&self, symbol: &str) {
        self.assigned.write().insert(symbol.to_string());
    }

    /// Atomically replace the worker count and prune any locally-tracked
    /// assigned symbols that no longer hash to this worker.
    pub fn update_worker_count(&self, total_workers: usize) {
        assert!(total_workers > 0, "total_workers must be > 0");
        self.total_workers.store(total_workers, Ordering::Relaxed);

        let mut assigned = self.assigned.write();
        assigned.retain(|symbol| self.owns(symbol));
    }

    pub fn assigned_symbols(&self) -> Vec<String> {
        self.assigned.read().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_symbol_never_owned() {
        let p = Partitioner::new(0, 4);
        assert_eq!(p.partition_of(""), 0);
        assert!(!p.owns(""));

        let p0 = Partitioner::new(0, 4);
        assert!(!p0.owns(""));
    }

    #[test]
    fn partition_is_deterministic() {
        let p = Partitioner::new(1, 4);
        let first = p.owns("AAPL");
        for _ in 0..100 {
            assert_eq!(p.owns("AAPL"), first);
        }
    }

    #[test]
    fn partition_of_is_pure_function_of_symbol_and_total() {
        let p1 = Partitioner::new(0, 4);
        let p2 = Partitioner::new(3, 4);
        // Same symbol, same total_workers => same partition regardless of
        // which worker_id asks.
        assert_eq!(p1.partition_of("MSFT"), p2.partition_of("MSFT"));
    }

    #[test]
    fn update_worker_count_prunes_symbols_no_longer_owned() {
        let p = Partitioner::new(1, 4);
        let symbols = ["AAPL", "MSFT", "GOOG", "TSLA", "AMZN", "META"];
        for s in &symbols {
            if p.owns(s) {
                p.mark_assigned(s);
            }
        }
        let before = p.assigned_symbols();

        p.update_worker_count(2);

        for s in p.assigned_symbols() {
            assert!(p.owns(&s));
        }
        // Every retained symbol must have also been owned before the change.
        for s in p.assigned_symbols() {
            assert!(before.contains(&s));
        }
    }

    #[test]
    fn every_symbol_owned_by_exactly_one_worker() {
        let total = 4;
        let workers: Vec<Partitioner> = (0..total).map(|i| Partitioner::new(i, total)).collect();
        let symbols = [
            "AAPL", "MSFT", "GOOG", "TSLA", "AMZN", "META", "NFLX", "NVDA", "AMD", "INTC",
        ];
        for s in symbols {
            let owners: Vec<_> = workers.iter().filter(|w| w.owns(s)).collect();
            assert_eq!(owners.len(), 1, "symbol {s} owned by {} workers", owners.len());
        }
    }
}
