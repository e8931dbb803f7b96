//! In-memory state store.
//!
//! Reference implementation of the store side of the engine: it answers
//! `GetState` reads and commits the merge values of a height through
//! `StateMerger`. Readers get immutable snapshots; a snapshot taken before a
//! batch keeps answering with the pre-batch state while the batch runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::core::account::Account;
use crate::core::address::Address;
use crate::core::amount::Amount;
use crate::core::fee::CurrencyDesign;
use crate::core::state::{
    account_state_key, balance_state_key, currency_design_state_key, GetState, Height, State,
    StateMergeValue, StateMerger, StateValue, NETWORK_POLICY_STATE_KEY,
    SUFFRAGE_CANDIDATE_STATE_KEY, SUFFRAGE_STATE_KEY,
};
use crate::core::suffrage::{NetworkPolicy, SuffrageCandidatesStateValue, SuffrageNodesStateValue};
use crate::error::Result;
use crate::utils::Hash;

type States = BTreeMap<String, State>;

/// Immutable view of the store at one point in time. Cloning is O(1).
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    states: Arc<States>,
}

impl StoreSnapshot {
    pub fn get(&self, key: &str) -> Option<&State> {
        self.states.get(key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// States in key order.
    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.states.values()
    }
}

impl GetState for StoreSnapshot {
    fn get_state(&self, key: &str) -> Result<Option<State>> {
        Ok(self.states.get(key).cloned())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    states: RwLock<Arc<States>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding `states`, keyed by their own keys.
    pub fn from_states(states: impl IntoIterator<Item = State>) -> Result<Self> {
        let mut map = States::new();
        for st in states {
            st.is_valid()?;
            map.insert(st.key().to_string(), st);
        }
        Ok(Self {
            states: RwLock::new(Arc::new(map)),
        })
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            states: self.states.read().clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<State> {
        self.states.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    /// Inserts a prepared state as-is.
    pub fn set_state(&self, state: State) {
        let mut states = self.states.write();
        Arc::make_mut(&mut states).insert(state.key().to_string(), state);
    }

    /// Seeds `value` under `key` at the genesis height, chaining onto any
    /// existing record.
    pub fn set_value(&self, key: &str, value: StateValue) -> Result<()> {
        let mut states = self.states.write();
        let previous = states.get(key).map(|st| *st.hash());
        let state = State::new(key, value, Height::GENESIS, previous, Vec::new())?;
        Arc::make_mut(&mut states).insert(key.to_string(), state);
        Ok(())
    }

    pub fn set_account(&self, account: Account) -> Result<()> {
        let key = account_state_key(account.address());
        self.set_value(&key, StateValue::account(account))
    }

    pub fn set_balance(&self, address: &Address, amount: Amount) -> Result<()> {
        let key = balance_state_key(address, amount.currency());
        self.set_value(&key, StateValue::balance(amount))
    }

    pub fn set_currency_design(&self, design: CurrencyDesign) -> Result<()> {
        let key = currency_design_state_key(design.currency());
        self.set_value(&key, StateValue::currency_design(design))
    }

    pub fn set_suffrage(&self, suffrage: SuffrageNodesStateValue) -> Result<()> {
        self.set_value(SUFFRAGE_STATE_KEY, StateValue::Suffrage(suffrage))
    }

    pub fn set_suffrage_candidates(&self, candidates: SuffrageCandidatesStateValue) -> Result<()> {
        self.set_value(
            SUFFRAGE_CANDIDATE_STATE_KEY,
            StateValue::SuffrageCandidates(candidates),
        )
    }

    pub fn set_network_policy(&self, policy: NetworkPolicy) -> Result<()> {
        self.set_value(NETWORK_POLICY_STATE_KEY, StateValue::network_policy(policy))
    }

    /// Commits the merge values of accepted operations at `height`.
    ///
    /// Values are merged per key in the order given (operation order, then
    /// emission order). Nothing is written if any merge fails. Returns the new
    /// states in key order.
    pub fn commit(
        &self,
        height: Height,
        operations: &[(Hash, Vec<StateMergeValue>)],
    ) -> Result<Vec<State>> {
        let mut states = self.states.write();

        let mut mergers: BTreeMap<&str, StateMerger> = BTreeMap::new();
        for (op, values) in operations {
            for value in values {
                let merger = mergers.entry(value.key()).or_insert_with(|| {
                    StateMerger::new(height, value.key(), states.get(value.key()).cloned())
                });
                merger.merge(value, *op)?;
            }
        }

        let mut committed = Vec::with_capacity(mergers.len());
        for (_, merger) in mergers {
            if let Some(st) = merger.close()? {
                committed.push(st);
            }
        }

        let map = Arc::make_mut(&mut states);
        for st in &committed {
            map.insert(st.key().to_string(), st.clone());
        }
        debug!(height = %height, states = committed.len(), "committed merge values");
        Ok(committed)
    }
}

impl GetState for MemoryStore {
    fn get_state(&self, key: &str) -> Result<Option<State>> {
        Ok(self.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::amount::{Big, CurrencyId};
    use crate::core::state::{new_balance_state_merge_value, MergeStrategy};
    use crate::utils::sha256;

    fn addr(s: &str) -> Address {
        Address::new(format!("{}mca", s)).unwrap()
    }

    fn mcc(n: i64) -> Amount {
        Amount::new(Big::new(n), CurrencyId::new("MCC").unwrap())
    }

    #[test]
    fn test_snapshot_is_isolated_from_commit() {
        let store = MemoryStore::new();
        store.set_balance(&addr("alice"), mcc(10)).unwrap();
        let before = store.snapshot();

        let op = sha256(&[b"op"]);
        store
            .commit(
                Height::new(1),
                &[(op, vec![new_balance_state_merge_value(&addr("alice"), mcc(3))])],
            )
            .unwrap();

        let key = balance_state_key(&addr("alice"), mcc(0).currency());
        assert_eq!(before.get(&key).unwrap().balance().unwrap(), &mcc(10));
        assert_eq!(store.get(&key).unwrap().balance().unwrap(), &mcc(3));
    }

    #[test]
    fn test_commit_chains_previous_and_operations() {
        let store = MemoryStore::new();
        store.set_balance(&addr("alice"), mcc(10)).unwrap();
        let key = balance_state_key(&addr("alice"), mcc(0).currency());
        let seeded = store.get(&key).unwrap();

        let a = sha256(&[b"a"]);
        let b = sha256(&[b"b"]);
        let committed = store
            .commit(
                Height::new(4),
                &[
                    (a, vec![new_balance_state_merge_value(&addr("alice"), mcc(7))]),
                    (b, vec![new_balance_state_merge_value(&addr("alice"), mcc(5))]),
                ],
            )
            .unwrap();

        assert_eq!(committed.len(), 1);
        let st = &committed[0];
        assert_eq!(st.height(), Height::new(4));
        assert_eq!(st.previous(), Some(seeded.hash()));
        assert_eq!(st.operations(), &[a, b]);
        assert_eq!(st.balance().unwrap(), &mcc(5));
    }

    #[test]
    fn test_failed_commit_writes_nothing() {
        let store = MemoryStore::new();
        store.set_balance(&addr("alice"), mcc(10)).unwrap();
        let key = balance_state_key(&addr("alice"), mcc(0).currency());

        let op = sha256(&[b"op"]);
        let bad = StateMergeValue::new(
            key.clone(),
            StateValue::balance(mcc(1)),
            MergeStrategy::Insert,
        );
        let ok = new_balance_state_merge_value(&addr("bob"), mcc(1));
        assert!(store.commit(Height::new(1), &[(op, vec![ok, bad])]).is_err());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key).unwrap().balance().unwrap(), &mcc(10));
    }

    #[test]
    fn test_from_states_roundtrip() {
        let store = MemoryStore::new();
        store.set_balance(&addr("alice"), mcc(10)).unwrap();
        store.set_account(Account::zero(mcc(0).currency())).unwrap();

        let dump: Vec<State> = store.snapshot().states().cloned().collect();
        let restored = MemoryStore::from_states(dump.clone()).unwrap();
        assert_eq!(restored.snapshot().states().cloned().collect::<Vec<_>>(), dump);
    }
}
