//! Processor pool: idle processors kept per operation kind for reuse.
//!
//! # Invariants
//! - Only closed processors are stored; a reused processor is rebound with
//!   `reset` before it is handed out, so nothing leaks between uses.
//! - At most `capacity` idle processors are kept per kind; extras are dropped.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::core::operation::OperationKind;
use crate::core::processor::{OperationProcessor, ProcessContext, Stage};

#[derive(Default)]
pub struct ProcessorPool {
    idle: Mutex<BTreeMap<OperationKind, Vec<Box<dyn OperationProcessor>>>>,
    capacity: usize,
}

impl ProcessorPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(BTreeMap::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pops an idle processor of `kind`, bound to `ctx`.
    pub fn take(&self, kind: OperationKind, ctx: ProcessContext) -> Option<Box<dyn OperationProcessor>> {
        let mut processor = self.idle.lock().get_mut(&kind).and_then(Vec::pop)?;
        processor.reset(ctx);
        Some(processor)
    }

    /// Returns a processor to the pool. Processors not yet closed are closed
    /// first. Returns false when the pool for its kind is full.
    pub fn put(&self, mut processor: Box<dyn OperationProcessor>) -> bool {
        if processor.stage() != Stage::Closed {
            processor.close();
        }
        let mut idle = self.idle.lock();
        let slot = idle.entry(processor.kind()).or_default();
        if slot.len() >= self.capacity {
            return false;
        }
        slot.push(processor);
        true
    }

    /// Idle processors of `kind`.
    pub fn idle(&self, kind: OperationKind) -> usize {
        self.idle.lock().get(&kind).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.idle.lock().clear();
    }
}

impl std::fmt::Debug for ProcessorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let idle: BTreeMap<OperationKind, usize> = self
            .idle
            .lock()
            .iter()
            .map(|(kind, v)| (*kind, v.len()))
            .collect();
        f.debug_struct("ProcessorPool")
            .field("idle", &idle)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::processor::{MintProcessor, TransfersProcessor};
    use crate::core::state::Height;
    use crate::core::store::MemoryStore;
    use crate::core::suffrage::Threshold;

    fn ctx(height: u64) -> ProcessContext {
        ProcessContext::new(
            Height::new(height),
            Arc::new(MemoryStore::new()),
            Threshold::default(),
        )
    }

    #[test]
    fn test_take_from_empty_pool() {
        let pool = ProcessorPool::new(2);
        assert!(pool.take(OperationKind::Transfers, ctx(1)).is_none());
    }

    #[test]
    fn test_put_closes_and_take_resets() {
        let pool = ProcessorPool::new(2);
        assert!(pool.put(TransfersProcessor::boxed(ctx(1))));
        assert_eq!(pool.idle(OperationKind::Transfers), 1);
        assert_eq!(pool.idle(OperationKind::Mint), 0);

        let p = pool.take(OperationKind::Transfers, ctx(2)).unwrap();
        assert_eq!(p.kind(), OperationKind::Transfers);
        assert_eq!(p.stage(), Stage::Created);
        assert_eq!(pool.idle(OperationKind::Transfers), 0);
    }

    #[test]
    fn test_capacity_per_kind() {
        let pool = ProcessorPool::new(1);
        assert!(pool.put(TransfersProcessor::boxed(ctx(1))));
        assert!(!pool.put(TransfersProcessor::boxed(ctx(1))));
        assert!(pool.put(MintProcessor::boxed(ctx(1))));
        assert_eq!(pool.idle(OperationKind::Transfers), 1);
        assert_eq!(pool.idle(OperationKind::Mint), 1);

        pool.clear();
        assert_eq!(pool.idle(OperationKind::Mint), 0);
    }
}
