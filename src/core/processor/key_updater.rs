//! KeyUpdater: key rotation of an existing account.
//!
//! The address never changes. The rotation fee is the currency feeer's fee on
//! a zero amount, paid by the target itself.

use std::collections::BTreeMap;

use crate::core::account::Account;
use crate::core::amount::{Amount, Big, CurrencyId};
use crate::core::operation::{Fact, KeyUpdaterFact, Operation, OperationKind};
use crate::core::state::{new_account_state_merge_value, StateMergeValue};

use super::{
    calculate_items_fee, check_account_signs, check_enough_balance, settle_balances, wrong_fact,
    ItemsFee, ProcessContext, ProcessReason, ProcessResult, Processor, Rules,
};

pub type KeyUpdaterProcessor = Processor<KeyUpdaterRules>;

#[derive(Debug, Default)]
pub struct KeyUpdaterRules;

fn fact_of(op: &Operation) -> ProcessResult<&KeyUpdaterFact> {
    match op.fact() {
        Fact::KeyUpdater(fact) => Ok(fact),
        other => Err(wrong_fact(OperationKind::KeyUpdater, other)),
    }
}

type Checked = (
    Account,
    BTreeMap<CurrencyId, ItemsFee>,
    BTreeMap<CurrencyId, Big>,
);

/// Signature, key and fee checks shared by both phases.
fn check(ctx: &ProcessContext, op: &Operation) -> ProcessResult<Checked> {
    let fact = fact_of(op)?;
    let account = check_account_signs(ctx, &fact.target, op)?;
    if account.keys().is_some_and(|k| k.equal(&fact.keys)) {
        return Err(ProcessReason::SameKeys(fact.target.clone()).into());
    }

    let zero = [Amount::zero(fact.currency.clone())];
    let fees = calculate_items_fee(ctx, zero.iter())?;
    let balances = check_enough_balance(ctx, &fact.target, &fees)?;
    Ok((account, fees, balances))
}

impl Rules for KeyUpdaterRules {
    const KIND: OperationKind = OperationKind::KeyUpdater;

    fn pre_process(&mut self, ctx: &ProcessContext, op: &Operation) -> ProcessResult<()> {
        check(ctx, op)?;
        Ok(())
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
        op: &Operation,
    ) -> ProcessResult<Vec<StateMergeValue>> {
        let fact = fact_of(op)?;
        let (account, fees, balances) = check(ctx, op)?;

        let mut values = vec![new_account_state_merge_value(
            account.with_keys(fact.keys.clone()),
        )];
        values.extend(settle_balances(ctx, &fact.target, &balances, &fees, &[])?);
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::OperationProcessor;
    use super::*;
    use crate::core::fee::Feeer;
    use crate::core::state::account_state_key;
    use crate::key_generator::PrivateKey;

    fn rotate(target: &PrivateKey, new_key: &PrivateKey, signer: &PrivateKey) -> Operation {
        let fact = Fact::KeyUpdater(KeyUpdaterFact {
            token: b"rotate".to_vec(),
            target: address_of(target),
            keys: keys_of(new_key),
            currency: mcc(),
        });
        Operation::new_signed(fact, &[signer], NET).unwrap()
    }

    #[test]
    fn test_rotate_keys_pays_fee() {
        let alice = key("alice");
        let r = key("fee-receiver");
        let feeer = Feeer::fixed(address_of(&r), Big::new(2)).unwrap();
        let store = store_with(&[(&alice, 10), (&r, 0)], feeer, 1);

        let op = rotate(&alice, &key("alice-2"), &alice);
        let mut p = KeyUpdaterProcessor::new(ctx(&store, 1));
        p.pre_process(&op).unwrap();
        let values = p.process(&op).unwrap();

        assert_eq!(values[0].key(), account_state_key(&address_of(&alice)));
        let updated = values[0].value().as_account().unwrap();
        assert_eq!(updated.address(), &address_of(&alice));
        assert!(updated.keys().unwrap().equal(&keys_of(&key("alice-2"))));
        assert_eq!(balance_in(&values, &address_of(&alice)), Some(Big::new(8)));
        assert_eq!(balance_in(&values, &address_of(&r)), Some(Big::new(2)));
    }

    #[test]
    fn test_rotate_same_keys() {
        let alice = key("alice");
        let store = store_with(&[(&alice, 10)], Feeer::Nil, 1);

        let op = rotate(&alice, &alice, &alice);
        let mut p = KeyUpdaterProcessor::new(ctx(&store, 1));
        assert_eq!(
            reason(p.pre_process(&op).unwrap_err()),
            ProcessReason::SameKeys(address_of(&alice))
        );
    }

    #[test]
    fn test_rotate_requires_current_keys() {
        let alice = key("alice");
        let store = store_with(&[(&alice, 10)], Feeer::Nil, 1);

        let op = rotate(&alice, &key("alice-2"), &key("alice-2"));
        let mut p = KeyUpdaterProcessor::new(ctx(&store, 1));
        assert!(matches!(
            reason(p.pre_process(&op).unwrap_err()),
            ProcessReason::InsufficientSignature { .. }
        ));
    }

    #[test]
    fn test_rotate_nil_fee_on_empty_balance() {
        let alice = key("alice");
        let store = store_with(&[(&alice, 0)], Feeer::Nil, 1);

        let op = rotate(&alice, &key("alice-2"), &alice);
        let mut p = KeyUpdaterProcessor::new(ctx(&store, 1));
        let values = p.process(&op).unwrap();
        // account first, then an unchanged sender balance
        assert_eq!(values.len(), 2);
        assert_eq!(balance_in(&values, &address_of(&alice)), Some(Big::zero()));
    }
}
