//! Operation processors.
//!
//! Every operation kind has one processor. A processor is bound to a block
//! height and a read capability and runs a two-phase lifecycle:
//!
//! `Created -> PreProcessed -> Processed -> Closed`
//!
//! `pre_process` validates against the pre-batch state and writes nothing.
//! `process` re-runs the same validations and emits the ordered merge values.
//! `close` releases the bound context so the instance can be pooled.
//!
//! # Outcomes
//! - `ProcessReason`: the operation is excluded, the batch continues.
//! - `CurrencyError`: a state invariant is broken; processing of the height
//!   must stop.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::core::account::{check_threshold, Account};
use crate::core::address::Address;
use crate::core::amount::{Amount, Big, CurrencyId};
use crate::core::fee::{CurrencyDesign, FeeError};
use crate::core::operation::{Fact, Operation, OperationKind};
use crate::core::state::{
    account_state_key, balance_state_key, currency_design_state_key,
    new_balance_state_merge_value, new_currency_design_state_merge_value, GetState, Height, State,
    StateError, StateMergeValue, NETWORK_POLICY_STATE_KEY, SUFFRAGE_CANDIDATE_STATE_KEY, SUFFRAGE_STATE_KEY,
};
use crate::core::suffrage::{
    check_node_signs, NetworkPolicy, SuffrageCandidatesStateValue, SuffrageNodesStateValue,
    Threshold,
};
use crate::error::CurrencyError;

pub mod create_accounts;
pub mod currency_policy_updater;
pub mod currency_register;
pub mod genesis;
pub mod key_updater;
pub mod mint;
pub mod suffrage;
pub mod transfers;

pub use create_accounts::CreateAccountsProcessor;
pub use currency_policy_updater::CurrencyPolicyUpdaterProcessor;
pub use currency_register::CurrencyRegisterProcessor;
pub use genesis::GenesisCurrenciesProcessor;
pub use key_updater::KeyUpdaterProcessor;
pub use mint::MintProcessor;
pub use suffrage::{SuffrageCandidateProcessor, SuffrageDisjoinProcessor, SuffrageJoinProcessor};
pub use transfers::TransfersProcessor;

/// Expected, batch-survivable rejection of a single operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessReason {
    #[error("Account {0} does not exist")]
    AccountNotFound(Address),

    #[error("Receiver {0} does not exist")]
    ReceiverNotFound(Address),

    #[error("Account {0} already exists")]
    AccountAlreadyExists(Address),

    #[error("Currency {0} does not exist")]
    CurrencyNotFound(CurrencyId),

    #[error("Currency {0} already registered")]
    CurrencyAlreadyRegistered(CurrencyId),

    #[error("Fee receiver {0} does not exist")]
    FeeReceiverNotFound(Address),

    #[error("Insufficient balance of {address} in {currency}: required {required}, available {available}, short {shortfall}")]
    InsufficientBalance {
        address: Address,
        currency: CurrencyId,
        required: Big,
        available: Big,
        shortfall: Big,
    },

    #[error("Amount {amount} of {currency} under new account minimum {min}")]
    BelowMinimumBalance {
        currency: CurrencyId,
        amount: Big,
        min: Big,
    },

    #[error("Insufficient signature: required {required}, got {got}")]
    InsufficientSignature { required: u32, got: u32 },

    #[error("Duplicated signer {0}")]
    DuplicatedSigner(String),

    #[error("Account {0} already has the same keys")]
    SameKeys(Address),

    #[error("Zero account {0} cannot sign")]
    ZeroAccount(Address),

    #[error("Address {0} already created in this block")]
    DuplicatedAddress(Address),

    #[error("Sender {0} already has an operation in this block")]
    DuplicatedSender(Address),

    #[error("Currency {0} already handled in this block")]
    DuplicatedCurrency(CurrencyId),

    #[error("Node {0} is not in the suffrage")]
    NotSuffrageNode(Address),

    #[error("Node {0} is already in the suffrage")]
    AlreadySuffrageNode(Address),

    #[error("Candidate {0} does not exist")]
    CandidateNotFound(Address),

    #[error("Candidate {0} already exists")]
    CandidateExists(Address),

    #[error("Candidate {address} expired at {deadline}")]
    CandidateExpired { address: Address, deadline: Height },

    #[error("Start height of {address} mismatch: expected {expected}, got {got}")]
    StartMismatch {
        address: Address,
        expected: Height,
        got: Height,
    },

    #[error("Suffrage is full ({0} nodes)")]
    SuffrageFull(u64),

    #[error("Suffrage cannot become empty")]
    SuffrageEmpty,

    #[error("Not signed by candidate {0}")]
    MissingCandidateSign(Address),

    #[error("Genesis operation at height {0}")]
    NotGenesisHeight(Height),

    #[error("Unknown operation {0}")]
    UnknownOperation(OperationKind),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Processor-internal error: a reason travels by value, a fatal error stops the height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    Reason(ProcessReason),
    Fatal(CurrencyError),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::Reason(r) => write!(f, "{}", r),
            ProcessError::Fatal(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ProcessError {}

impl From<ProcessReason> for ProcessError {
    fn from(r: ProcessReason) -> Self {
        ProcessError::Reason(r)
    }
}

impl From<CurrencyError> for ProcessError {
    fn from(e: CurrencyError) -> Self {
        ProcessError::Fatal(e)
    }
}

impl From<StateError> for ProcessError {
    fn from(e: StateError) -> Self {
        ProcessError::Fatal(e.into())
    }
}

impl From<FeeError> for ProcessError {
    fn from(e: FeeError) -> Self {
        ProcessError::Fatal(e.into())
    }
}

pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

/// Result of one dispatcher step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Merge values in application order; empty after a successful pre-process.
    Accepted(Vec<StateMergeValue>),
    Rejected(ProcessReason),
}

impl ProcessOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ProcessOutcome::Accepted(_))
    }

    pub fn reason(&self) -> Option<&ProcessReason> {
        match self {
            ProcessOutcome::Rejected(r) => Some(r),
            ProcessOutcome::Accepted(_) => None,
        }
    }

    pub fn merge_values(&self) -> &[StateMergeValue] {
        match self {
            ProcessOutcome::Accepted(values) => values,
            ProcessOutcome::Rejected(_) => &[],
        }
    }

    pub fn into_merge_values(self) -> Vec<StateMergeValue> {
        match self {
            ProcessOutcome::Accepted(values) => values,
            ProcessOutcome::Rejected(_) => Vec::new(),
        }
    }

    /// Splits a processor result into outcome (reason by value) or fatal error.
    pub fn from_result(
        result: ProcessResult<Vec<StateMergeValue>>,
    ) -> Result<Self, CurrencyError> {
        match result {
            Ok(values) => Ok(ProcessOutcome::Accepted(values)),
            Err(ProcessError::Reason(r)) => Ok(ProcessOutcome::Rejected(r)),
            Err(ProcessError::Fatal(e)) => Err(e),
        }
    }
}

/// Height, read capability and quorum a processor is bound to.
#[derive(Clone)]
pub struct ProcessContext {
    height: Height,
    get_state: Arc<dyn GetState + Send + Sync>,
    threshold: Threshold,
}

impl ProcessContext {
    pub fn new(
        height: Height,
        get_state: Arc<dyn GetState + Send + Sync>,
        threshold: Threshold,
    ) -> Self {
        Self {
            height,
            get_state,
            threshold,
        }
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    pub fn get_state(&self, key: &str) -> ProcessResult<Option<State>> {
        Ok(self.get_state.get_state(key)?)
    }
}

impl fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("height", &self.height)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Created,
    PreProcessed,
    Processed,
    Closed,
}

/// Object-safe processor surface used by the dispatcher and the pool.
pub trait OperationProcessor: Send {
    fn kind(&self) -> OperationKind;

    fn stage(&self) -> Stage;

    /// Binds a (pooled) instance to a new height and read capability.
    fn reset(&mut self, ctx: ProcessContext);

    fn pre_process(&mut self, op: &Operation) -> ProcessResult<()>;

    fn process(&mut self, op: &Operation) -> ProcessResult<Vec<StateMergeValue>>;

    /// Releases the bound context. Calling it twice is a no-op.
    fn close(&mut self);
}

/// Per-kind validation and effect rules.
pub trait Rules: Default + Send + 'static {
    const KIND: OperationKind;

    fn pre_process(&mut self, ctx: &ProcessContext, op: &Operation) -> ProcessResult<()>;

    /// Effects of an operation that passed `pre_process` against the same state.
    fn process(
        &mut self,
        ctx: &ProcessContext,
        op: &Operation,
    ) -> ProcessResult<Vec<StateMergeValue>>;

    /// Drops anything cached from the last operation.
    fn clear(&mut self) {}
}

/// Lifecycle wrapper shared by every processor kind.
pub struct Processor<R: Rules> {
    ctx: Option<ProcessContext>,
    stage: Stage,
    rules: R,
}

impl<R: Rules> Processor<R> {
    pub fn new(ctx: ProcessContext) -> Self {
        Self {
            ctx: Some(ctx),
            stage: Stage::Created,
            rules: R::default(),
        }
    }

    /// Registry constructor.
    pub fn boxed(ctx: ProcessContext) -> Box<dyn OperationProcessor> {
        Box::new(Self::new(ctx))
    }

    fn bound(&self) -> ProcessResult<ProcessContext> {
        self.ctx.clone().ok_or_else(|| {
            ProcessError::Fatal(CurrencyError::State(format!(
                "{} processor used after close",
                R::KIND
            )))
        })
    }

    /// Kind mismatch is a wiring fault; malformed fact content only
    /// rejects the operation.
    fn check_kind(&self, op: &Operation) -> ProcessResult<()> {
        if op.kind() != R::KIND {
            return Err(ProcessError::Fatal(CurrencyError::Validation(format!(
                "{} processor given {} operation",
                R::KIND,
                op.kind()
            ))));
        }
        op.fact()
            .is_valid()
            .map_err(|e| ProcessReason::InvalidOperation(e.to_string()))?;
        Ok(())
    }
}

impl<R: Rules> OperationProcessor for Processor<R> {
    fn kind(&self) -> OperationKind {
        R::KIND
    }

    fn stage(&self) -> Stage {
        self.stage
    }

    fn reset(&mut self, ctx: ProcessContext) {
        self.rules.clear();
        self.ctx = Some(ctx);
        self.stage = Stage::Created;
    }

    fn pre_process(&mut self, op: &Operation) -> ProcessResult<()> {
        if self.stage != Stage::Created {
            return Err(ProcessError::Fatal(CurrencyError::State(format!(
                "{} processor pre-processed in stage {:?}",
                R::KIND,
                self.stage
            ))));
        }
        self.check_kind(op)?;
        let ctx = self.bound()?;
        self.rules.pre_process(&ctx, op)?;
        self.stage = Stage::PreProcessed;
        Ok(())
    }

    fn process(&mut self, op: &Operation) -> ProcessResult<Vec<StateMergeValue>> {
        if !matches!(self.stage, Stage::Created | Stage::PreProcessed) {
            return Err(ProcessError::Fatal(CurrencyError::State(format!(
                "{} processor processed in stage {:?}",
                R::KIND,
                self.stage
            ))));
        }
        self.check_kind(op)?;
        let ctx = self.bound()?;
        self.rules.pre_process(&ctx, op)?;
        let values = self.rules.process(&ctx, op)?;
        self.stage = Stage::Processed;
        Ok(values)
    }

    fn close(&mut self) {
        self.rules.clear();
        self.ctx = None;
        self.stage = Stage::Closed;
    }
}

pub(crate) fn wrong_fact(kind: OperationKind, fact: &Fact) -> ProcessError {
    ProcessError::Fatal(CurrencyError::Validation(format!(
        "expected {} fact, got {}",
        kind,
        fact.kind()
    )))
}

/// Account at `address`, or the reason built by `not_found`.
pub(crate) fn load_account(
    ctx: &ProcessContext,
    address: &Address,
    not_found: impl FnOnce(Address) -> ProcessReason,
) -> ProcessResult<Account> {
    match ctx.get_state(&account_state_key(address))? {
        Some(st) => Ok(st.account()?.clone()),
        None => Err(not_found(address.clone()).into()),
    }
}

pub(crate) fn account_exists(ctx: &ProcessContext, address: &Address) -> ProcessResult<bool> {
    match ctx.get_state(&account_state_key(address))? {
        Some(st) => {
            st.account()?;
            Ok(true)
        }
        None => Ok(false),
    }
}

pub(crate) fn check_not_exists_account(
    ctx: &ProcessContext,
    address: &Address,
) -> ProcessResult<()> {
    if account_exists(ctx, address)? {
        return Err(ProcessReason::AccountAlreadyExists(address.clone()).into());
    }
    Ok(())
}

pub(crate) fn load_currency_design(
    ctx: &ProcessContext,
    currency: &CurrencyId,
) -> ProcessResult<CurrencyDesign> {
    match ctx.get_state(&currency_design_state_key(currency))? {
        Some(st) => Ok(st.currency_design()?.clone()),
        None => Err(ProcessReason::CurrencyNotFound(currency.clone()).into()),
    }
}

pub(crate) fn load_balance(
    ctx: &ProcessContext,
    address: &Address,
    currency: &CurrencyId,
) -> ProcessResult<Option<Amount>> {
    match ctx.get_state(&balance_state_key(address, currency))? {
        Some(st) => Ok(Some(st.balance()?.clone())),
        None => Ok(None),
    }
}

pub(crate) fn load_suffrage(ctx: &ProcessContext) -> ProcessResult<SuffrageNodesStateValue> {
    match ctx.get_state(SUFFRAGE_STATE_KEY)? {
        Some(st) => Ok(st.suffrage()?.clone()),
        None => Err(StateError::Missing(SUFFRAGE_STATE_KEY.to_string()).into()),
    }
}

pub(crate) fn load_candidates(
    ctx: &ProcessContext,
) -> ProcessResult<SuffrageCandidatesStateValue> {
    match ctx.get_state(SUFFRAGE_CANDIDATE_STATE_KEY)? {
        Some(st) => Ok(st.suffrage_candidates()?.clone()),
        None => Ok(SuffrageCandidatesStateValue::default()),
    }
}

pub(crate) fn load_network_policy(ctx: &ProcessContext) -> ProcessResult<NetworkPolicy> {
    match ctx.get_state(NETWORK_POLICY_STATE_KEY)? {
        Some(st) => Ok(*st.network_policy()?),
        None => Err(StateError::Missing(NETWORK_POLICY_STATE_KEY.to_string()).into()),
    }
}

/// Loads `address` (reason `AccountNotFound`) and checks the operation signs
/// against its keys. Zero accounts never satisfy a signature check.
pub(crate) fn check_account_signs(
    ctx: &ProcessContext,
    address: &Address,
    op: &Operation,
) -> ProcessResult<Account> {
    let account = load_account(ctx, address, ProcessReason::AccountNotFound)?;
    let keys = account
        .keys()
        .ok_or_else(|| ProcessReason::ZeroAccount(address.clone()))?;
    check_threshold(&op.signers(), keys)?;
    Ok(account)
}

/// Node-signature quorum over the current suffrage.
pub(crate) fn check_node_quorum(ctx: &ProcessContext, op: &Operation) -> ProcessResult<()> {
    let suffrage = load_suffrage(ctx)?;
    check_node_signs(op.signs(), &suffrage, ctx.threshold())?;
    Ok(())
}

/// Per-currency totals of an amount-bearing fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemsFee {
    pub currency: CurrencyId,
    /// Sum of the item amounts.
    pub amount: Big,
    pub fee: Big,
    pub receiver: Option<Address>,
}

impl ItemsFee {
    /// What the sender must hold: amount plus fee.
    pub fn required(&self) -> Big {
        &self.amount + &self.fee
    }
}

/// Groups `amounts` by currency and asks each currency's feeer for the fee on
/// the summed amount. The fee receiver, if any, must exist.
pub(crate) fn calculate_items_fee<'a>(
    ctx: &ProcessContext,
    amounts: impl IntoIterator<Item = &'a Amount>,
) -> ProcessResult<BTreeMap<CurrencyId, ItemsFee>> {
    let mut sums: BTreeMap<CurrencyId, Big> = BTreeMap::new();
    for am in amounts {
        let entry = sums.entry(am.currency().clone()).or_default();
        let total = &*entry + am.big();
        *entry = total;
    }

    let mut fees = BTreeMap::new();
    for (currency, amount) in sums {
        let design = load_currency_design(ctx, &currency)?;
        let feeer = design.policy().feeer();
        let fee = feeer.fee(&amount)?;
        let receiver = feeer.receiver().cloned();
        if let Some(receiver) = &receiver {
            if !account_exists(ctx, receiver)? {
                return Err(ProcessReason::FeeReceiverNotFound(receiver.clone()).into());
            }
        }
        fees.insert(
            currency.clone(),
            ItemsFee {
                currency,
                amount,
                fee,
                receiver,
            },
        );
    }
    Ok(fees)
}

/// Sender balance per currency after checking it covers amount plus fee.
///
/// A missing balance counts as insufficient unless nothing is required, in
/// which case the currency is left out of the result.
pub(crate) fn check_enough_balance(
    ctx: &ProcessContext,
    sender: &Address,
    fees: &BTreeMap<CurrencyId, ItemsFee>,
) -> ProcessResult<BTreeMap<CurrencyId, Big>> {
    let mut balances = BTreeMap::new();
    for (currency, f) in fees {
        let required = f.required();
        let available = match load_balance(ctx, sender, currency)? {
            Some(b) => b.big().clone(),
            None if required.is_zero() => continue,
            None => Big::zero(),
        };
        if available < required {
            let shortfall = &required - &available;
            return Err(ProcessReason::InsufficientBalance {
                address: sender.clone(),
                currency: currency.clone(),
                required,
                available,
                shortfall,
            }
            .into());
        }
        balances.insert(currency.clone(), available);
    }
    Ok(balances)
}

/// Receiver and amount of a non-zero fee in `currency`.
fn fee_to<'a>(
    fees: &'a BTreeMap<CurrencyId, ItemsFee>,
    currency: &CurrencyId,
) -> Option<(&'a Address, &'a Big)> {
    fees.get(currency)
        .filter(|f| f.fee.over_zero())
        .and_then(|f| f.receiver.as_ref().map(|r| (r, &f.fee)))
}

/// Emits receiver credits, fee credits, sender debits and the aggregate of
/// each currency that collected a fee, in that order.
///
/// Overlapping keys are resolved explicitly so every balance key appears once:
/// - fee receiver is the sender: the fee is netted out of the sender debit;
/// - fee receiver is also a credited receiver in that currency: the fee is
///   folded into that credit;
/// - otherwise the fee receiver gets its own credit.
pub(crate) fn settle_balances(
    ctx: &ProcessContext,
    sender: &Address,
    sender_balances: &BTreeMap<CurrencyId, Big>,
    fees: &BTreeMap<CurrencyId, ItemsFee>,
    credits: &[(Address, Amount)],
) -> ProcessResult<Vec<StateMergeValue>> {
    let mut values = Vec::with_capacity(credits.len() + fees.len() * 2);

    for (receiver, amount) in credits {
        let currency = amount.currency();
        let current = load_balance(ctx, receiver, currency)?
            .map(|b| b.big().clone())
            .unwrap_or_default();
        let mut credit = amount.big().clone();
        if let Some((fee_receiver, fee)) = fee_to(fees, currency) {
            if fee_receiver == receiver && fee_receiver != sender {
                credit = &credit + fee;
            }
        }
        values.push(new_balance_state_merge_value(
            receiver,
            amount.with_big(&current + &credit),
        ));
    }

    for currency in fees.keys() {
        let Some((fee_receiver, fee)) = fee_to(fees, currency) else {
            continue;
        };
        if fee_receiver == sender {
            continue;
        }
        let folded = credits
            .iter()
            .any(|(r, am)| r == fee_receiver && am.currency() == currency);
        if folded {
            continue;
        }
        let current = load_balance(ctx, fee_receiver, currency)?
            .map(|b| b.big().clone())
            .unwrap_or_default();
        values.push(new_balance_state_merge_value(
            fee_receiver,
            Amount::new(&current + fee, currency.clone()),
        ));
    }

    for (currency, f) in fees {
        let debit = match fee_to(fees, currency) {
            Some((fee_receiver, _)) if fee_receiver == sender => f.amount.clone(),
            _ => f.required(),
        };
        let Some(balance) = sender_balances.get(currency) else {
            if debit.is_zero() {
                continue;
            }
            return Err(ProcessError::Fatal(CurrencyError::State(format!(
                "no checked balance of {} in {}",
                sender, currency
            ))));
        };
        values.push(new_balance_state_merge_value(
            sender,
            Amount::new(balance - &debit, currency.clone()),
        ));
    }

    // collected fees are added to the currency aggregate
    for (currency, f) in fees {
        if !f.fee.over_zero() || f.receiver.is_none() {
            continue;
        }
        let design = load_currency_design(ctx, currency)?;
        values.push(new_currency_design_state_merge_value(
            design.add_aggregate(&f.fee),
        ));
    }

    Ok(values)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the processor tests.

    use std::sync::Arc;

    use super::*;
    use crate::core::account::{AccountKey, AccountKeys};
    use crate::core::address::new_address_from_keys;
    use crate::core::fee::{CurrencyPolicy, Feeer};
    use crate::core::store::MemoryStore;
    use crate::core::suffrage::SuffrageNode;
    use crate::key_generator::{KeyKind, PrivateKey};

    pub const NET: &[u8] = b"test-net";

    pub fn key(seed: &str) -> PrivateKey {
        PrivateKey::from_seed(seed.as_bytes(), KeyKind::Native).unwrap()
    }

    pub fn keys_of(k: &PrivateKey) -> AccountKeys {
        AccountKeys::new(vec![AccountKey::new(k.public_key(), 100).unwrap()], 100).unwrap()
    }

    pub fn address_of(k: &PrivateKey) -> Address {
        new_address_from_keys(&keys_of(k))
    }

    pub fn mcc() -> CurrencyId {
        CurrencyId::new("MCC").unwrap()
    }

    pub fn amount(n: i64) -> Amount {
        Amount::new(Big::new(n), mcc())
    }

    pub fn node_address(i: u8) -> Address {
        Address::new(format!("node{}mca", i)).unwrap()
    }

    pub fn node_key(i: u8) -> PrivateKey {
        key(&format!("node-{}", i))
    }

    pub fn ctx(store: &Arc<MemoryStore>, height: u64) -> ProcessContext {
        ProcessContext::new(Height::new(height), store.clone(), Threshold::default())
    }

    /// Store holding `accounts` with MCC balances, an MCC design with
    /// `feeer`, a suffrage of `nodes` members and a network policy.
    pub fn store_with(
        accounts: &[(&PrivateKey, i64)],
        feeer: Feeer,
        nodes: u8,
    ) -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        for (k, balance) in accounts {
            let addr = address_of(k);
            store.set_account(Account::new(addr.clone(), keys_of(k))).unwrap();
            store.set_balance(&addr, amount(*balance)).unwrap();
        }
        let genesis = accounts
            .first()
            .map(|(k, _)| address_of(k))
            .unwrap_or_else(|| Address::new("genesismca").unwrap());
        let design = CurrencyDesign::new(
            amount(1_000_000),
            genesis,
            CurrencyPolicy::new(Big::new(1), feeer).unwrap(),
        )
        .unwrap();
        store.set_currency_design(design).unwrap();
        let members = (0..nodes)
            .map(|i| SuffrageNode::new(node_address(i), node_key(i).public_key(), Height::new(0)))
            .collect();
        store.set_suffrage(SuffrageNodesStateValue::new(members)).unwrap();
        store.set_network_policy(NetworkPolicy::new(4, 10).unwrap()).unwrap();
        Arc::new(store)
    }

    pub fn node_signers(n: u8) -> Vec<(PrivateKey, Address)> {
        (0..n).map(|i| (node_key(i), node_address(i))).collect()
    }

    pub fn node_op(fact: Fact, signers: &[(PrivateKey, Address)]) -> Operation {
        let refs: Vec<(&PrivateKey, Address)> =
            signers.iter().map(|(k, a)| (k, a.clone())).collect();
        Operation::new_node_signed(fact, &refs, NET).unwrap()
    }

    pub fn balance_in(values: &[StateMergeValue], address: &Address) -> Option<Big> {
        let key = balance_state_key(address, &mcc());
        values
            .iter()
            .find(|v| v.key() == key)
            .and_then(|v| v.value().as_balance())
            .map(|am| am.big().clone())
    }

    pub fn aggregate_in(values: &[StateMergeValue]) -> Option<Big> {
        values
            .iter()
            .find_map(|v| v.value().as_currency_design())
            .map(|d| d.aggregate().clone())
    }

    pub fn reason(err: ProcessError) -> ProcessReason {
        match err {
            ProcessError::Reason(r) => r,
            ProcessError::Fatal(e) => panic!("fatal: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::core::fee::Feeer;
    use crate::core::operation::{TransfersFact, TransfersItem};

    #[test]
    fn test_items_fee_sums_per_currency() {
        let alice = key("alice");
        let r = key("receiver");
        let feeer = Feeer::fixed(address_of(&r), Big::new(5)).unwrap();
        let store = store_with(&[(&alice, 100), (&r, 0)], feeer, 1);
        let ctx = ctx(&store, 1);

        let amounts = [amount(10), amount(20)];
        let fees = calculate_items_fee(&ctx, amounts.iter()).unwrap();
        let f = &fees[&mcc()];
        assert_eq!(f.amount, Big::new(30));
        assert_eq!(f.fee, Big::new(5));
        assert_eq!(f.required(), Big::new(35));
    }

    #[test]
    fn test_items_fee_missing_receiver() {
        let alice = key("alice");
        let feeer = Feeer::fixed(Address::new("ghostmca").unwrap(), Big::new(5)).unwrap();
        let store = store_with(&[(&alice, 100)], feeer, 1);
        let err = calculate_items_fee(&ctx(&store, 1), [amount(1)].iter()).unwrap_err();
        assert!(matches!(reason(err), ProcessReason::FeeReceiverNotFound(_)));
    }

    #[test]
    fn test_check_enough_balance_shortfall() {
        let alice = key("alice");
        let store = store_with(&[(&alice, 10)], Feeer::Nil, 1);
        let ctx = ctx(&store, 1);
        let fees = calculate_items_fee(&ctx, [amount(15)].iter()).unwrap();
        let err = check_enough_balance(&ctx, &address_of(&alice), &fees).unwrap_err();
        assert_eq!(
            reason(err),
            ProcessReason::InsufficientBalance {
                address: address_of(&alice),
                currency: mcc(),
                required: Big::new(15),
                available: Big::new(10),
                shortfall: Big::new(5),
            }
        );
    }

    #[test]
    fn test_settle_fee_receiver_is_sender() {
        let alice = key("alice");
        let bob = key("bob");
        let feeer = Feeer::fixed(address_of(&alice), Big::new(5)).unwrap();
        let store = store_with(&[(&alice, 100), (&bob, 0)], feeer, 1);
        let ctx = ctx(&store, 1);
        let sender = address_of(&alice);
        let credits = vec![(address_of(&bob), amount(40))];
        let fees = calculate_items_fee(&ctx, credits.iter().map(|(_, a)| a)).unwrap();
        let balances = check_enough_balance(&ctx, &sender, &fees).unwrap();
        let values = settle_balances(&ctx, &sender, &balances, &fees, &credits).unwrap();

        assert_eq!(values.len(), 3);
        assert_eq!(balance_in(&values, &address_of(&bob)), Some(Big::new(40)));
        assert_eq!(balance_in(&values, &sender), Some(Big::new(60)));
        assert_eq!(aggregate_in(&values), Some(Big::new(1_000_005)));
    }

    #[test]
    fn test_settle_fee_folded_into_receiver_credit() {
        let alice = key("alice");
        let bob = key("bob");
        let feeer = Feeer::fixed(address_of(&bob), Big::new(5)).unwrap();
        let store = store_with(&[(&alice, 100), (&bob, 7)], feeer, 1);
        let ctx = ctx(&store, 1);
        let sender = address_of(&alice);
        let credits = vec![(address_of(&bob), amount(40))];
        let fees = calculate_items_fee(&ctx, credits.iter().map(|(_, a)| a)).unwrap();
        let balances = check_enough_balance(&ctx, &sender, &fees).unwrap();
        let values = settle_balances(&ctx, &sender, &balances, &fees, &credits).unwrap();

        assert_eq!(values.len(), 3);
        assert_eq!(balance_in(&values, &address_of(&bob)), Some(Big::new(52)));
        assert_eq!(balance_in(&values, &sender), Some(Big::new(55)));
        // design value comes last
        assert_eq!(values[2].key(), currency_design_state_key(&mcc()));
        assert_eq!(aggregate_in(&values), Some(Big::new(1_000_005)));
    }

    #[test]
    fn test_nil_fee_leaves_aggregate() {
        let alice = key("alice");
        let bob = key("bob");
        let store = store_with(&[(&alice, 100), (&bob, 0)], Feeer::Nil, 1);
        let ctx = ctx(&store, 1);
        let sender = address_of(&alice);
        let credits = vec![(address_of(&bob), amount(40))];
        let fees = calculate_items_fee(&ctx, credits.iter().map(|(_, a)| a)).unwrap();
        let balances = check_enough_balance(&ctx, &sender, &fees).unwrap();
        let values = settle_balances(&ctx, &sender, &balances, &fees, &credits).unwrap();

        assert_eq!(values.len(), 2);
        assert_eq!(aggregate_in(&values), None);
    }

    #[test]
    fn test_malformed_fact_is_a_reason() {
        let alice = key("alice");
        let bob = key("bob");
        let store = store_with(&[(&alice, 100), (&bob, 100)], Feeer::Nil, 1);
        let fact = Fact::Transfers(TransfersFact {
            token: b"t".to_vec(),
            sender: address_of(&alice),
            items: vec![TransfersItem {
                receiver: address_of(&bob),
                amounts: vec![Amount::new(Big::new(-5), mcc())],
            }],
        });
        let op = Operation::new_signed(fact, &[&alice], NET).unwrap();

        let mut p = TransfersProcessor::new(ctx(&store, 1));
        assert!(matches!(
            reason(p.pre_process(&op).unwrap_err()),
            ProcessReason::InvalidOperation(_)
        ));
        p.reset(ctx(&store, 1));
        assert!(matches!(
            reason(p.process(&op).unwrap_err()),
            ProcessReason::InvalidOperation(_)
        ));
    }

    #[test]
    fn test_processor_lifecycle() {
        let alice = key("alice");
        let bob = key("bob");
        let store = store_with(&[(&alice, 100), (&bob, 0)], Feeer::Nil, 1);
        let fact = Fact::Transfers(TransfersFact {
            token: b"t".to_vec(),
            sender: address_of(&alice),
            items: vec![TransfersItem {
                receiver: address_of(&bob),
                amounts: vec![amount(1)],
            }],
        });
        let op = Operation::new_signed(fact, &[&alice], NET).unwrap();

        let mut p = TransfersProcessor::new(ctx(&store, 1));
        assert_eq!(p.stage(), Stage::Created);
        p.pre_process(&op).unwrap();
        assert_eq!(p.stage(), Stage::PreProcessed);
        assert!(p.pre_process(&op).is_err());
        p.process(&op).unwrap();
        assert_eq!(p.stage(), Stage::Processed);
        p.close();
        p.close();
        assert_eq!(p.stage(), Stage::Closed);
        assert!(matches!(p.process(&op), Err(ProcessError::Fatal(_))));

        p.reset(ctx(&store, 2));
        assert_eq!(p.stage(), Stage::Created);
        assert!(p.process(&op).is_ok());
    }
}
