//! Versioned ledger state and write-intents.
//!
//! # Model
//! A `State` is one versioned record: a deterministic key, a typed payload,
//! the height it was written at, the hash of the record it replaced and the
//! operations that produced it. Processors never write `State` directly; they
//! emit `StateMergeValue`s which the store folds into the previous record
//! through a `StateMerger`.
//!
//! # Invariants
//! - State keys are pure functions of addresses and currency ids.
//! - The merger never computes balances; processors emit already-summed amounts.
//! - `Insert` and `Remove` only apply to membership sets (suffrage, candidates).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::account::Account;
use crate::core::address::Address;
use crate::core::amount::{Amount, CurrencyId};
use crate::core::fee::CurrencyDesign;
use crate::core::suffrage::{
    NetworkPolicy, SuffrageCandidate, SuffrageCandidatesStateValue, SuffrageNode,
    SuffrageNodesStateValue,
};
use crate::error::{CurrencyError, Result};
use crate::signature::{hash_message, STATE_DOMAIN};
use crate::utils::Hash;

pub const ACCOUNT_STATE_KEY_SUFFIX: &str = ":account";
pub const BALANCE_STATE_KEY_SUFFIX: &str = ":balance";
pub const CURRENCY_DESIGN_STATE_KEY_PREFIX: &str = "currencydesign:";
pub const SUFFRAGE_STATE_KEY: &str = "suffrage";
pub const SUFFRAGE_CANDIDATE_STATE_KEY: &str = "suffrage_candidate";
pub const NETWORK_POLICY_STATE_KEY: &str = "network_policy";

pub fn account_state_key(address: &Address) -> String {
    format!("{}{}", address, ACCOUNT_STATE_KEY_SUFFIX)
}

pub fn balance_state_key(address: &Address, currency: &CurrencyId) -> String {
    format!("{}-{}{}", address, currency, BALANCE_STATE_KEY_SUFFIX)
}

pub fn currency_design_state_key(currency: &CurrencyId) -> String {
    format!("{}{}", CURRENCY_DESIGN_STATE_KEY_PREFIX, currency)
}

pub fn is_account_state_key(key: &str) -> bool {
    key.ends_with(ACCOUNT_STATE_KEY_SUFFIX)
}

pub fn is_balance_state_key(key: &str) -> bool {
    key.ends_with(BALANCE_STATE_KEY_SUFFIX)
}

pub fn is_currency_design_state_key(key: &str) -> bool {
    key.starts_with(CURRENCY_DESIGN_STATE_KEY_PREFIX)
}

/// Block height.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Height(u64);

impl Height {
    pub const GENESIS: Height = Height(0);

    pub const fn new(height: u64) -> Self {
        Self(height)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn saturating_add(&self, delta: u64) -> Self {
        Self(self.0.saturating_add(delta))
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fatal state-invariant violations. Continuing past one of these would
/// produce a ledger other nodes cannot reproduce.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("State {key}: expected {expected} payload, found {found}")]
    WrongPayload {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Required state {0} not found")]
    Missing(String),

    #[error("Cannot merge into {key}: {reason}")]
    InvalidMerge { key: String, reason: String },
}

impl From<StateError> for CurrencyError {
    fn from(err: StateError) -> Self {
        CurrencyError::State(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStateValue {
    account: Account,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceStateValue {
    amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyDesignStateValue {
    design: CurrencyDesign,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicyStateValue {
    policy: NetworkPolicy,
}

/// Typed payload of a state record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_hint")]
pub enum StateValue {
    #[serde(rename = "account-state-value-v0.0.1")]
    Account(AccountStateValue),
    #[serde(rename = "balance-state-value-v0.0.1")]
    Balance(BalanceStateValue),
    #[serde(rename = "currency-design-state-value-v0.0.1")]
    CurrencyDesign(CurrencyDesignStateValue),
    #[serde(rename = "suffrage-nodes-state-value-v0.0.1")]
    Suffrage(SuffrageNodesStateValue),
    #[serde(rename = "suffrage-candidates-state-value-v0.0.1")]
    SuffrageCandidates(SuffrageCandidatesStateValue),
    #[serde(rename = "network-policy-state-value-v0.0.1")]
    NetworkPolicy(NetworkPolicyStateValue),
}

impl StateValue {
    pub fn account(account: Account) -> Self {
        StateValue::Account(AccountStateValue { account })
    }

    pub fn balance(amount: Amount) -> Self {
        StateValue::Balance(BalanceStateValue { amount })
    }

    pub fn currency_design(design: CurrencyDesign) -> Self {
        StateValue::CurrencyDesign(CurrencyDesignStateValue { design })
    }

    pub fn network_policy(policy: NetworkPolicy) -> Self {
        StateValue::NetworkPolicy(NetworkPolicyStateValue { policy })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StateValue::Account(_) => "account",
            StateValue::Balance(_) => "balance",
            StateValue::CurrencyDesign(_) => "currency design",
            StateValue::Suffrage(_) => "suffrage",
            StateValue::SuffrageCandidates(_) => "suffrage candidates",
            StateValue::NetworkPolicy(_) => "network policy",
        }
    }

    pub fn as_account(&self) -> Option<&Account> {
        match self {
            StateValue::Account(v) => Some(&v.account),
            _ => None,
        }
    }

    pub fn as_balance(&self) -> Option<&Amount> {
        match self {
            StateValue::Balance(v) => Some(&v.amount),
            _ => None,
        }
    }

    pub fn as_currency_design(&self) -> Option<&CurrencyDesign> {
        match self {
            StateValue::CurrencyDesign(v) => Some(&v.design),
            _ => None,
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            StateValue::Account(_) => "account-state-value-v0.0.1",
            StateValue::Balance(_) => "balance-state-value-v0.0.1",
            StateValue::CurrencyDesign(_) => "currency-design-state-value-v0.0.1",
            StateValue::Suffrage(_) => "suffrage-nodes-state-value-v0.0.1",
            StateValue::SuffrageCandidates(_) => "suffrage-candidates-state-value-v0.0.1",
            StateValue::NetworkPolicy(_) => "network-policy-state-value-v0.0.1",
        }
    }
}

/// Committed, versioned ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    hash: Hash,
    key: String,
    value: StateValue,
    height: Height,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous: Option<Hash>,
    operations: Vec<Hash>,
}

#[derive(Serialize)]
struct StateBody<'a> {
    key: &'a str,
    value: &'a StateValue,
    height: Height,
    previous: &'a Option<Hash>,
    operations: &'a [Hash],
}

impl State {
    pub fn new(
        key: impl Into<String>,
        value: StateValue,
        height: Height,
        previous: Option<Hash>,
        operations: Vec<Hash>,
    ) -> Result<Self> {
        let key = key.into();
        let hash = Self::compute_hash(&key, &value, height, &previous, &operations)?;
        Ok(Self {
            hash,
            key,
            value,
            height,
            previous,
            operations,
        })
    }

    fn compute_hash(
        key: &str,
        value: &StateValue,
        height: Height,
        previous: &Option<Hash>,
        operations: &[Hash],
    ) -> Result<Hash> {
        hash_message(
            STATE_DOMAIN,
            &StateBody {
                key,
                value,
                height,
                previous,
                operations,
            },
        )
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &StateValue {
        &self.value
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn previous(&self) -> Option<&Hash> {
        self.previous.as_ref()
    }

    pub fn operations(&self) -> &[Hash] {
        &self.operations
    }

    /// Recomputes the hash; a decoded record must match what it claims.
    pub fn is_valid(&self) -> Result<()> {
        let expected = Self::compute_hash(
            &self.key,
            &self.value,
            self.height,
            &self.previous,
            &self.operations,
        )?;
        if expected != self.hash {
            return Err(CurrencyError::State(format!(
                "state {} hash mismatch",
                self.key
            )));
        }
        Ok(())
    }

    fn wrong(&self, expected: &'static str) -> StateError {
        StateError::WrongPayload {
            key: self.key.clone(),
            expected,
            found: self.value.kind(),
        }
    }

    pub fn account(&self) -> std::result::Result<&Account, StateError> {
        match &self.value {
            StateValue::Account(v) => Ok(&v.account),
            _ => Err(self.wrong("account")),
        }
    }

    pub fn balance(&self) -> std::result::Result<&Amount, StateError> {
        match &self.value {
            StateValue::Balance(v) => Ok(&v.amount),
            _ => Err(self.wrong("balance")),
        }
    }

    pub fn currency_design(&self) -> std::result::Result<&CurrencyDesign, StateError> {
        match &self.value {
            StateValue::CurrencyDesign(v) => Ok(&v.design),
            _ => Err(self.wrong("currency design")),
        }
    }

    pub fn suffrage(&self) -> std::result::Result<&SuffrageNodesStateValue, StateError> {
        match &self.value {
            StateValue::Suffrage(v) => Ok(v),
            _ => Err(self.wrong("suffrage")),
        }
    }

    pub fn suffrage_candidates(
        &self,
    ) -> std::result::Result<&SuffrageCandidatesStateValue, StateError> {
        match &self.value {
            StateValue::SuffrageCandidates(v) => Ok(v),
            _ => Err(self.wrong("suffrage candidates")),
        }
    }

    pub fn network_policy(&self) -> std::result::Result<&NetworkPolicy, StateError> {
        match &self.value {
            StateValue::NetworkPolicy(v) => Ok(&v.policy),
            _ => Err(self.wrong("network policy")),
        }
    }
}

/// How a write-intent combines with the existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// New payload replaces the old one.
    Replace,
    /// Listed members are added to the existing set.
    Insert,
    /// Listed members are removed from the existing set.
    Remove,
}

/// Pending, uncommitted write produced by a processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMergeValue {
    key: String,
    value: StateValue,
    strategy: MergeStrategy,
}

impl StateMergeValue {
    pub fn new(key: impl Into<String>, value: StateValue, strategy: MergeStrategy) -> Self {
        Self {
            key: key.into(),
            value,
            strategy,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &StateValue {
        &self.value
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }
}

pub fn new_balance_state_merge_value(address: &Address, amount: Amount) -> StateMergeValue {
    StateMergeValue::new(
        balance_state_key(address, amount.currency()),
        StateValue::balance(amount),
        MergeStrategy::Replace,
    )
}

pub fn new_account_state_merge_value(account: Account) -> StateMergeValue {
    StateMergeValue::new(
        account_state_key(account.address()),
        StateValue::account(account),
        MergeStrategy::Replace,
    )
}

pub fn new_currency_design_state_merge_value(design: CurrencyDesign) -> StateMergeValue {
    StateMergeValue::new(
        currency_design_state_key(design.currency()),
        StateValue::currency_design(design),
        MergeStrategy::Replace,
    )
}

pub fn new_network_policy_state_merge_value(policy: NetworkPolicy) -> StateMergeValue {
    StateMergeValue::new(
        NETWORK_POLICY_STATE_KEY,
        StateValue::network_policy(policy),
        MergeStrategy::Replace,
    )
}

pub fn insert_suffrage_node_merge_value(node: SuffrageNode) -> StateMergeValue {
    StateMergeValue::new(
        SUFFRAGE_STATE_KEY,
        StateValue::Suffrage(SuffrageNodesStateValue::new(vec![node])),
        MergeStrategy::Insert,
    )
}

pub fn remove_suffrage_node_merge_value(node: SuffrageNode) -> StateMergeValue {
    StateMergeValue::new(
        SUFFRAGE_STATE_KEY,
        StateValue::Suffrage(SuffrageNodesStateValue::new(vec![node])),
        MergeStrategy::Remove,
    )
}

pub fn insert_suffrage_candidate_merge_value(candidate: SuffrageCandidate) -> StateMergeValue {
    StateMergeValue::new(
        SUFFRAGE_CANDIDATE_STATE_KEY,
        StateValue::SuffrageCandidates(SuffrageCandidatesStateValue::new(vec![candidate])),
        MergeStrategy::Insert,
    )
}

pub fn remove_suffrage_candidate_merge_value(candidate: SuffrageCandidate) -> StateMergeValue {
    StateMergeValue::new(
        SUFFRAGE_CANDIDATE_STATE_KEY,
        StateValue::SuffrageCandidates(SuffrageCandidatesStateValue::new(vec![candidate])),
        MergeStrategy::Remove,
    )
}

/// Folds the merge values of one height into the record that existed before.
///
/// Values are applied in the order given; the resulting state lists every
/// contributing operation once, in first-seen order.
#[derive(Debug)]
pub struct StateMerger {
    height: Height,
    key: String,
    previous: Option<State>,
    value: Option<StateValue>,
    operations: Vec<Hash>,
}

impl StateMerger {
    pub fn new(height: Height, key: impl Into<String>, previous: Option<State>) -> Self {
        Self {
            height,
            key: key.into(),
            previous,
            value: None,
            operations: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn current(&self) -> Option<&StateValue> {
        self.value
            .as_ref()
            .or_else(|| self.previous.as_ref().map(|s| s.value()))
    }

    fn invalid(&self, reason: impl Into<String>) -> StateError {
        StateError::InvalidMerge {
            key: self.key.clone(),
            reason: reason.into(),
        }
    }

    pub fn merge(
        &mut self,
        value: &StateMergeValue,
        operation: Hash,
    ) -> std::result::Result<(), StateError> {
        if value.key() != self.key {
            return Err(self.invalid(format!("merge value for {}", value.key())));
        }

        let next = match value.strategy() {
            MergeStrategy::Replace => value.value().clone(),
            MergeStrategy::Insert | MergeStrategy::Remove => {
                self.merge_set(value.value(), value.strategy())?
            }
        };
        self.value = Some(next);
        if !self.operations.contains(&operation) {
            self.operations.push(operation);
        }
        Ok(())
    }

    fn merge_set(
        &self,
        delta: &StateValue,
        strategy: MergeStrategy,
    ) -> std::result::Result<StateValue, StateError> {
        let insert = strategy == MergeStrategy::Insert;
        match (self.current(), delta) {
            (None, StateValue::Suffrage(d)) => {
                let base = SuffrageNodesStateValue::new(Vec::new());
                Ok(StateValue::Suffrage(apply_nodes(&base, d, insert)))
            }
            (Some(StateValue::Suffrage(base)), StateValue::Suffrage(d)) => {
                Ok(StateValue::Suffrage(apply_nodes(base, d, insert)))
            }
            (None, StateValue::SuffrageCandidates(d)) => Ok(StateValue::SuffrageCandidates(
                apply_candidates(&SuffrageCandidatesStateValue::default(), d, insert),
            )),
            (Some(StateValue::SuffrageCandidates(base)), StateValue::SuffrageCandidates(d)) => Ok(
                StateValue::SuffrageCandidates(apply_candidates(base, d, insert)),
            ),
            (current, delta) => Err(self.invalid(format!(
                "{:?} of {} into {}",
                strategy,
                delta.kind(),
                current.map(|v| v.kind()).unwrap_or("nothing")
            ))),
        }
    }

    /// New record, or `None` when nothing was merged.
    pub fn close(self) -> Result<Option<State>> {
        let Some(value) = self.value else {
            return Ok(None);
        };
        let previous = self.previous.as_ref().map(|s| *s.hash());
        State::new(self.key, value, self.height, previous, self.operations).map(Some)
    }
}

fn apply_nodes(
    base: &SuffrageNodesStateValue,
    delta: &SuffrageNodesStateValue,
    insert: bool,
) -> SuffrageNodesStateValue {
    delta.nodes().iter().fold(base.clone(), |acc, n| {
        if insert {
            acc.insert(n.clone())
        } else {
            acc.remove(n.address())
        }
    })
}

fn apply_candidates(
    base: &SuffrageCandidatesStateValue,
    delta: &SuffrageCandidatesStateValue,
    insert: bool,
) -> SuffrageCandidatesStateValue {
    delta.nodes().iter().fold(base.clone(), |acc, c| {
        if insert {
            acc.insert(c.clone())
        } else {
            acc.remove(c.address())
        }
    })
}

/// Read capability supplied by the store. Must reflect committed state only.
pub trait GetState {
    fn get_state(&self, key: &str) -> Result<Option<State>>;
}

impl<F> GetState for F
where
    F: Fn(&str) -> Result<Option<State>>,
{
    fn get_state(&self, key: &str) -> Result<Option<State>> {
        self(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::amount::Big;
    use crate::key_generator::{KeyKind, PrivateKey};
    use crate::utils::sha256;

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    fn cid() -> CurrencyId {
        CurrencyId::new("MCC").unwrap()
    }

    fn op(n: u8) -> Hash {
        sha256(&[&[n]])
    }

    #[test]
    fn test_state_keys() {
        let a = addr("alicemca");
        assert_eq!(account_state_key(&a), "alicemca:account");
        assert_eq!(balance_state_key(&a, &cid()), "alicemca-MCC:balance");
        assert_eq!(currency_design_state_key(&cid()), "currencydesign:MCC");
        assert!(is_account_state_key("alicemca:account"));
        assert!(is_balance_state_key("alicemca-MCC:balance"));
        assert!(is_currency_design_state_key("currencydesign:MCC"));
    }

    #[test]
    fn test_merger_replace_advances_height_and_operations() {
        let a = addr("alicemca");
        let first = new_balance_state_merge_value(&a, Amount::new(Big::new(10), cid()));
        let mut merger = StateMerger::new(Height::new(1), first.key(), None);
        merger.merge(&first, op(1)).unwrap();
        let s1 = merger.close().unwrap().unwrap();
        assert_eq!(s1.height(), Height::new(1));
        assert_eq!(s1.previous(), None);
        assert_eq!(s1.operations(), &[op(1)]);
        assert_eq!(s1.balance().unwrap().big(), &Big::new(10));
        assert!(s1.is_valid().is_ok());

        let second = new_balance_state_merge_value(&a, Amount::new(Big::new(25), cid()));
        let mut merger = StateMerger::new(Height::new(2), second.key(), Some(s1.clone()));
        merger.merge(&second, op(2)).unwrap();
        let s2 = merger.close().unwrap().unwrap();
        assert_eq!(s2.previous(), Some(s1.hash()));
        assert_eq!(s2.operations(), &[op(2)]);
        assert_eq!(s2.balance().unwrap().big(), &Big::new(25));
    }

    #[test]
    fn test_merger_rejects_foreign_key() {
        let v = new_balance_state_merge_value(&addr("alicemca"), Amount::zero(cid()));
        let mut merger = StateMerger::new(Height::new(1), "othermca:account", None);
        assert!(matches!(
            merger.merge(&v, op(1)),
            Err(StateError::InvalidMerge { .. })
        ));
        assert!(merger.close().unwrap().is_none());
    }

    #[test]
    fn test_merger_suffrage_insert_remove() {
        let pk = PrivateKey::from_seed(b"n0", KeyKind::Native).unwrap().public_key();
        let node = SuffrageNode::new(addr("node0mca"), pk, Height::new(1));
        let mut merger = StateMerger::new(Height::new(1), SUFFRAGE_STATE_KEY, None);
        merger
            .merge(&insert_suffrage_node_merge_value(node.clone()), op(1))
            .unwrap();
        let s = merger.close().unwrap().unwrap();
        assert_eq!(s.suffrage().unwrap().len(), 1);

        let mut merger = StateMerger::new(Height::new(2), SUFFRAGE_STATE_KEY, Some(s));
        merger
            .merge(&remove_suffrage_node_merge_value(node), op(2))
            .unwrap();
        let s = merger.close().unwrap().unwrap();
        assert!(s.suffrage().unwrap().is_empty());
    }

    #[test]
    fn test_merger_insert_into_balance_is_error() {
        let a = addr("alicemca");
        let key = balance_state_key(&a, &cid());
        let previous = State::new(
            key.clone(),
            StateValue::balance(Amount::zero(cid())),
            Height::new(1),
            None,
            vec![],
        )
        .unwrap();
        let bogus = StateMergeValue::new(
            key.clone(),
            StateValue::Suffrage(SuffrageNodesStateValue::new(vec![])),
            MergeStrategy::Insert,
        );
        let mut merger = StateMerger::new(Height::new(2), key, Some(previous));
        assert!(merger.merge(&bogus, op(1)).is_err());
    }

    #[test]
    fn test_wrong_payload_is_state_error() {
        let s = State::new(
            "alicemca:account",
            StateValue::balance(Amount::zero(cid())),
            Height::new(1),
            None,
            vec![],
        )
        .unwrap();
        let err = s.account().unwrap_err();
        assert!(matches!(err, StateError::WrongPayload { expected: "account", .. }));
        assert!(matches!(CurrencyError::from(err), CurrencyError::State(_)));
    }

    #[test]
    fn test_closure_get_state() {
        let getter = |key: &str| -> Result<Option<State>> {
            if key == "x" {
                Ok(None)
            } else {
                Err(CurrencyError::State("boom".to_string()))
            }
        };
        assert!(getter.get_state("x").unwrap().is_none());
        assert!(getter.get_state("y").is_err());
    }
}
