//! Processing dispatcher and batch conflict detector.
//!
//! The dispatcher owns an explicit [`ProcessorRegistry`] (operation kind to
//! processor constructor), a [`ProcessorPool`] and the per-height
//! duplication set. `pre_process` and `process` look the kind up, borrow a
//! processor from the pool and delegate.
//!
//! Every operation is checked for validity (fact content, hash and
//! signatures under the network id) before it reaches a processor. An
//! invalid operation is rejected with `InvalidOperation`; it never stops a
//! batch.
//!
//! # Duplication
//! Before `process` runs, every address the operation would create is
//! registered in the per-height set under one lock. An address already
//! registered by an earlier operation of the same height rejects the
//! operation with `DuplicatedAddress`. The check-and-register step is atomic
//! per operation: either all of its keys are registered or none are.
//!
//! With `one_operation_per_sender`, senders (CreateAccounts, Transfers,
//! KeyUpdater) and currencies (CurrencyRegister, CurrencyPolicyUpdater) are
//! registered too.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::core::address::Address;
use crate::core::amount::CurrencyId;
use crate::core::operation::{Fact, Operation, OperationKind};
use crate::core::pool::ProcessorPool;
use crate::core::processor::{
    CreateAccountsProcessor, CurrencyPolicyUpdaterProcessor, CurrencyRegisterProcessor,
    GenesisCurrenciesProcessor, KeyUpdaterProcessor, MintProcessor, OperationProcessor,
    ProcessContext, ProcessOutcome, ProcessReason, SuffrageCandidateProcessor,
    SuffrageDisjoinProcessor, SuffrageJoinProcessor, TransfersProcessor,
};
use crate::core::state::{GetState, Height, StateMergeValue};
use crate::error::{CurrencyError, Result};
use crate::utils::Hash;

/// Builds a processor bound to a height and read capability.
pub type ProcessorConstructor = fn(ProcessContext) -> Box<dyn OperationProcessor>;

/// Operation kind to processor constructor.
#[derive(Clone)]
pub struct ProcessorRegistry {
    constructors: BTreeMap<OperationKind, ProcessorConstructor>,
}

impl ProcessorRegistry {
    /// Registry with no kinds.
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registry with a processor for every known kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(OperationKind::CreateAccounts, CreateAccountsProcessor::boxed);
        registry.register(OperationKind::Transfers, TransfersProcessor::boxed);
        registry.register(OperationKind::KeyUpdater, KeyUpdaterProcessor::boxed);
        registry.register(OperationKind::CurrencyRegister, CurrencyRegisterProcessor::boxed);
        registry.register(
            OperationKind::CurrencyPolicyUpdater,
            CurrencyPolicyUpdaterProcessor::boxed,
        );
        registry.register(OperationKind::Mint, MintProcessor::boxed);
        registry.register(OperationKind::SuffrageCandidate, SuffrageCandidateProcessor::boxed);
        registry.register(OperationKind::SuffrageJoin, SuffrageJoinProcessor::boxed);
        registry.register(OperationKind::SuffrageDisjoin, SuffrageDisjoinProcessor::boxed);
        registry.register(OperationKind::GenesisCurrencies, GenesisCurrenciesProcessor::boxed);
        registry
    }

    /// Registers `constructor` for `kind`, returning the one it replaces.
    pub fn register(
        &mut self,
        kind: OperationKind,
        constructor: ProcessorConstructor,
    ) -> Option<ProcessorConstructor> {
        self.constructors.insert(kind, constructor)
    }

    pub fn remove(&mut self, kind: OperationKind) -> Option<ProcessorConstructor> {
        self.constructors.remove(&kind)
    }

    pub fn get(&self, kind: OperationKind) -> Option<ProcessorConstructor> {
        self.constructors.get(&kind).copied()
    }

    pub fn contains(&self, kind: OperationKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = OperationKind> + '_ {
        self.constructors.keys().copied()
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.constructors.keys()).finish()
    }
}

/// Processor borrowed from the pool. Dropping it closes the processor and
/// returns it to the pool, on the failure path too.
pub struct PooledProcessor<'a> {
    processor: Option<Box<dyn OperationProcessor>>,
    pool: &'a ProcessorPool,
}

impl<'a> PooledProcessor<'a> {
    fn new(processor: Box<dyn OperationProcessor>, pool: &'a ProcessorPool) -> Self {
        Self {
            processor: Some(processor),
            pool,
        }
    }

    fn inner(&mut self) -> Result<&mut Box<dyn OperationProcessor>> {
        self.processor
            .as_mut()
            .ok_or_else(|| CurrencyError::State("pooled processor already released".to_string()))
    }

    pub fn kind(&self) -> Option<OperationKind> {
        self.processor.as_ref().map(|p| p.kind())
    }

    pub fn pre_process(&mut self, op: &Operation) -> Result<ProcessOutcome> {
        let processor = self.inner()?;
        ProcessOutcome::from_result(processor.pre_process(op).map(|()| Vec::new()))
    }

    pub fn process(&mut self, op: &Operation) -> Result<ProcessOutcome> {
        let processor = self.inner()?;
        ProcessOutcome::from_result(processor.process(op))
    }
}

impl Drop for PooledProcessor<'_> {
    fn drop(&mut self) {
        if let Some(mut processor) = self.processor.take() {
            processor.close();
            self.pool.put(processor);
        }
    }
}

/// Keys an operation claims for the current height.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct DuplicationKeys {
    addresses: Vec<Address>,
    sender: Option<Address>,
    currencies: Vec<CurrencyId>,
}

fn duplication_keys(op: &Operation, strict: bool) -> Result<DuplicationKeys> {
    let mut keys = DuplicationKeys::default();
    match op.fact() {
        Fact::CreateAccounts(fact) => {
            keys.addresses = fact
                .targets()
                .map_err(|e| CurrencyError::Validation(e.to_string()))?;
            if strict {
                keys.sender = Some(fact.sender.clone());
            }
        }
        Fact::Transfers(fact) if strict => keys.sender = Some(fact.sender.clone()),
        Fact::KeyUpdater(fact) if strict => keys.sender = Some(fact.target.clone()),
        Fact::CurrencyRegister(fact) => {
            let currency = fact.design.currency();
            keys.addresses.push(Address::zero(currency));
            if strict {
                keys.currencies.push(currency.clone());
            }
        }
        Fact::CurrencyPolicyUpdater(fact) if strict => {
            keys.currencies.push(fact.currency.clone())
        }
        Fact::GenesisCurrencies(fact) => {
            keys.addresses.push(fact.genesis_address());
            keys.addresses
                .extend(fact.designs.iter().map(|d| Address::zero(d.currency())));
        }
        _ => {}
    }
    Ok(keys)
}

#[derive(Debug, Default)]
struct DuplicationSet {
    addresses: BTreeSet<Address>,
    senders: BTreeSet<Address>,
    currencies: BTreeSet<CurrencyId>,
}

impl DuplicationSet {
    fn check(&self, keys: &DuplicationKeys) -> Option<ProcessReason> {
        if let Some(addr) = keys.addresses.iter().find(|a| self.addresses.contains(*a)) {
            return Some(ProcessReason::DuplicatedAddress(addr.clone()));
        }
        if let Some(sender) = keys.sender.as_ref().filter(|s| self.senders.contains(*s)) {
            return Some(ProcessReason::DuplicatedSender(sender.clone()));
        }
        keys.currencies
            .iter()
            .find(|c| self.currencies.contains(*c))
            .map(|c| ProcessReason::DuplicatedCurrency(c.clone()))
    }

    fn insert(&mut self, keys: DuplicationKeys) {
        self.addresses.extend(keys.addresses);
        self.senders.extend(keys.sender);
        self.currencies.extend(keys.currencies);
    }

    fn clear(&mut self) {
        self.addresses.clear();
        self.senders.clear();
        self.currencies.clear();
    }
}

/// Accepted and rejected operations of one batch, in operation order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub accepted: Vec<(Hash, Vec<StateMergeValue>)>,
    pub rejected: Vec<(Hash, ProcessReason)>,
}

pub struct Dispatcher {
    registry: ProcessorRegistry,
    pool: ProcessorPool,
    ctx: ProcessContext,
    network_id: Vec<u8>,
    duplicates: Mutex<DuplicationSet>,
    strict: bool,
}

impl Dispatcher {
    /// Dispatcher with the default registry, configured by `config`.
    pub fn new(
        config: &EngineConfig,
        height: Height,
        get_state: Arc<dyn GetState + Send + Sync>,
    ) -> Result<Self> {
        config.validate()?;
        let ctx = ProcessContext::new(height, get_state, config.threshold()?);
        Ok(Self::with_registry(
            ProcessorRegistry::with_defaults(),
            ctx,
            config.network_id(),
            config.pool_capacity,
            config.one_operation_per_sender,
        ))
    }

    pub fn with_registry(
        registry: ProcessorRegistry,
        ctx: ProcessContext,
        network_id: &[u8],
        pool_capacity: usize,
        one_operation_per_sender: bool,
    ) -> Self {
        Self {
            registry,
            pool: ProcessorPool::new(pool_capacity),
            ctx,
            network_id: network_id.to_vec(),
            duplicates: Mutex::new(DuplicationSet::default()),
            strict: one_operation_per_sender,
        }
    }

    pub fn height(&self) -> Height {
        self.ctx.height()
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &ProcessorPool {
        &self.pool
    }

    pub fn network_id(&self) -> &[u8] {
        &self.network_id
    }

    /// Moves to a new height: rebinds the read capability and forgets the
    /// duplication set. Pooled processors are kept.
    pub fn next_height(&mut self, height: Height, get_state: Arc<dyn GetState + Send + Sync>) {
        self.ctx = ProcessContext::new(height, get_state, self.ctx.threshold());
        self.duplicates.lock().clear();
        debug!(height = %height, "dispatcher moved to height");
    }

    /// Borrows a processor for `kind`, from the pool when one is idle.
    pub fn processor(&self, kind: OperationKind) -> std::result::Result<PooledProcessor<'_>, ProcessReason> {
        let constructor = self
            .registry
            .get(kind)
            .ok_or(ProcessReason::UnknownOperation(kind))?;
        let processor = self
            .pool
            .take(kind, self.ctx.clone())
            .unwrap_or_else(|| constructor(self.ctx.clone()));
        Ok(PooledProcessor::new(processor, &self.pool))
    }

    /// Checks fact content, hash and signatures of `op`. Malformed content
    /// or a bad signature is a reason; a codec failure stays fatal.
    pub fn check_validity(&self, op: &Operation) -> Result<Option<ProcessReason>> {
        match op.is_valid(&self.network_id) {
            Ok(()) => Ok(None),
            Err(
                e @ (CurrencyError::Validation(_)
                | CurrencyError::Signature(_)
                | CurrencyError::Crypto(_)),
            ) => Ok(Some(ProcessReason::InvalidOperation(e.to_string()))),
            Err(e) => Err(self.fatal(op, e)),
        }
    }

    /// Read-only validation of `op` against the bound state.
    pub fn pre_process(&self, op: &Operation) -> Result<ProcessOutcome> {
        let mut processor = match self.processor(op.kind()) {
            Ok(p) => p,
            Err(reason) => return Ok(self.rejected(op, reason)),
        };
        if let Some(reason) = self.check_validity(op)? {
            return Ok(self.rejected(op, reason));
        }
        let outcome = processor.pre_process(op).map_err(|e| self.fatal(op, e))?;
        Ok(self.logged(op, outcome))
    }

    /// Duplication check, then validation and merge values of `op`.
    pub fn process(&self, op: &Operation) -> Result<ProcessOutcome> {
        let mut processor = match self.processor(op.kind()) {
            Ok(p) => p,
            Err(reason) => return Ok(self.rejected(op, reason)),
        };
        if let Some(reason) = self.check_validity(op)? {
            return Ok(self.rejected(op, reason));
        }
        if let Some(reason) = self.check_duplication(op)? {
            warn!(op = %op.hash(), kind = %op.kind(), reason = %reason, "duplication found");
            return Ok(ProcessOutcome::Rejected(reason));
        }
        let outcome = processor.process(op).map_err(|e| self.fatal(op, e))?;
        Ok(self.logged(op, outcome))
    }

    /// Registers the keys `op` claims for this height, or returns the reason
    /// one of them is already taken. Registrations stay even if `process`
    /// later rejects the operation.
    pub fn check_duplication(&self, op: &Operation) -> Result<Option<ProcessReason>> {
        let keys = duplication_keys(op, self.strict)?;
        let mut duplicates = self.duplicates.lock();
        if let Some(reason) = duplicates.check(&keys) {
            return Ok(Some(reason));
        }
        duplicates.insert(keys);
        Ok(None)
    }

    /// Pre-processes then processes each operation in order. A fatal error
    /// stops the batch.
    pub fn process_batch(&self, ops: &[Operation]) -> Result<BatchResult> {
        let mut result = BatchResult::default();
        for op in ops {
            let outcome = match self.pre_process(op)? {
                ProcessOutcome::Accepted(_) => self.process(op)?,
                rejected => rejected,
            };
            match outcome {
                ProcessOutcome::Accepted(values) => result.accepted.push((*op.hash(), values)),
                ProcessOutcome::Rejected(reason) => result.rejected.push((*op.hash(), reason)),
            }
        }
        info!(
            height = %self.height(),
            accepted = result.accepted.len(),
            rejected = result.rejected.len(),
            "batch processed"
        );
        Ok(result)
    }

    fn rejected(&self, op: &Operation, reason: ProcessReason) -> ProcessOutcome {
        info!(op = %op.hash(), kind = %op.kind(), reason = %reason, "operation rejected");
        ProcessOutcome::Rejected(reason)
    }

    fn logged(&self, op: &Operation, outcome: ProcessOutcome) -> ProcessOutcome {
        match outcome {
            ProcessOutcome::Rejected(reason) => self.rejected(op, reason),
            accepted => {
                debug!(
                    op = %op.hash(),
                    kind = %op.kind(),
                    values = accepted.merge_values().len(),
                    "operation processed"
                );
                accepted
            }
        }
    }

    fn fatal(&self, op: &Operation, err: CurrencyError) -> CurrencyError {
        warn!(op = %op.hash(), kind = %op.kind(), error = %err, "fatal processing error");
        err
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("height", &self.ctx.height())
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .field("network_id", &String::from_utf8_lossy(&self.network_id))
            .field("strict", &self.strict)
            .finish()
    }
}
