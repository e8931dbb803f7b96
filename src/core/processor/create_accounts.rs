//! CreateAccounts: new accounts funded by the sender.

use crate::core::account::Account;
use crate::core::amount::Amount;
use crate::core::operation::{CreateAccountsFact, Fact, Operation, OperationKind};
use crate::core::state::{
    new_account_state_merge_value, new_balance_state_merge_value, StateMergeValue,
};

use super::{
    calculate_items_fee, check_account_signs, check_enough_balance, check_not_exists_account,
    load_currency_design, settle_balances, wrong_fact, ProcessContext, ProcessReason,
    ProcessResult, Processor, Rules,
};

pub type CreateAccountsProcessor = Processor<CreateAccountsRules>;

#[derive(Debug, Default)]
pub struct CreateAccountsRules;

fn fact_of(op: &Operation) -> ProcessResult<&CreateAccountsFact> {
    match op.fact() {
        Fact::CreateAccounts(fact) => Ok(fact),
        other => Err(wrong_fact(OperationKind::CreateAccounts, other)),
    }
}

fn amounts(fact: &CreateAccountsFact) -> impl Iterator<Item = &Amount> {
    fact.items.iter().flat_map(|it| it.amounts.iter())
}

impl Rules for CreateAccountsRules {
    const KIND: OperationKind = OperationKind::CreateAccounts;

    fn pre_process(&mut self, ctx: &ProcessContext, op: &Operation) -> ProcessResult<()> {
        let fact = fact_of(op)?;
        check_account_signs(ctx, &fact.sender, op)?;

        for item in &fact.items {
            let target = item
                .address()
                .map_err(|e| ProcessReason::InvalidOperation(e.to_string()))?;
            check_not_exists_account(ctx, &target)?;

            for am in &item.amounts {
                let design = load_currency_design(ctx, am.currency())?;
                let min = design.policy().new_account_min_balance();
                if am.big() < min {
                    return Err(ProcessReason::BelowMinimumBalance {
                        currency: am.currency().clone(),
                        amount: am.big().clone(),
                        min: min.clone(),
                    }
                    .into());
                }
            }
        }

        let fees = calculate_items_fee(ctx, amounts(fact))?;
        check_enough_balance(ctx, &fact.sender, &fees)?;
        Ok(())
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
        op: &Operation,
    ) -> ProcessResult<Vec<StateMergeValue>> {
        let fact = fact_of(op)?;
        let fees = calculate_items_fee(ctx, amounts(fact))?;
        let balances = check_enough_balance(ctx, &fact.sender, &fees)?;

        let mut values = Vec::new();
        for item in &fact.items {
            let target = item
                .address()
                .map_err(|e| ProcessReason::InvalidOperation(e.to_string()))?;
            values.push(new_account_state_merge_value(Account::new(
                target.clone(),
                item.keys.clone(),
            )));
            for am in &item.amounts {
                values.push(new_balance_state_merge_value(&target, am.clone()));
            }
        }

        // new accounts are funded by the sender debit alone
        values.extend(settle_balances(ctx, &fact.sender, &balances, &fees, &[])?);
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::OperationProcessor;
    use super::*;
    use crate::core::address::AddressKind;
    use crate::core::amount::{Big, CurrencyId};
    use crate::core::fee::{CurrencyDesign, CurrencyPolicy, Feeer};
    use crate::core::operation::CreateAccountsItem;
    use crate::core::state::account_state_key;
    use crate::key_generator::PrivateKey;

    fn create(sender: &PrivateKey, new_key: &PrivateKey, amounts: Vec<Amount>) -> Operation {
        let fact = Fact::CreateAccounts(CreateAccountsFact {
            token: b"create".to_vec(),
            sender: address_of(sender),
            items: vec![CreateAccountsItem {
                keys: keys_of(new_key),
                amounts,
                address_type: AddressKind::Native,
            }],
        });
        Operation::new_signed(fact, &[sender], NET).unwrap()
    }

    #[test]
    fn test_create_account_with_fee() {
        let alice = key("alice");
        let r = key("fee-receiver");
        let feeer = Feeer::fixed(address_of(&r), Big::new(5)).unwrap();
        let store = store_with(&[(&alice, 100), (&r, 0)], feeer, 1);
        let carol = key("carol");

        let op = create(&alice, &carol, vec![amount(60)]);
        let mut p = CreateAccountsProcessor::new(ctx(&store, 1));
        p.pre_process(&op).unwrap();
        let values = p.process(&op).unwrap();

        assert_eq!(values[0].key(), account_state_key(&address_of(&carol)));
        assert_eq!(balance_in(&values, &address_of(&carol)), Some(Big::new(60)));
        assert_eq!(balance_in(&values, &address_of(&alice)), Some(Big::new(35)));
        assert_eq!(balance_in(&values, &address_of(&r)), Some(Big::new(5)));
    }

    #[test]
    fn test_create_existing_account() {
        let alice = key("alice");
        let bob = key("bob");
        let store = store_with(&[(&alice, 100), (&bob, 0)], Feeer::Nil, 1);

        let op = create(&alice, &bob, vec![amount(10)]);
        let mut p = CreateAccountsProcessor::new(ctx(&store, 1));
        assert_eq!(
            reason(p.pre_process(&op).unwrap_err()),
            ProcessReason::AccountAlreadyExists(address_of(&bob))
        );
    }

    #[test]
    fn test_create_below_minimum_balance() {
        let alice = key("alice");
        let store = store_with(&[(&alice, 100)], Feeer::Nil, 1);

        let design = CurrencyDesign::new(
            amount(1_000_000),
            address_of(&alice),
            CurrencyPolicy::new(Big::new(50), Feeer::Nil).unwrap(),
        )
        .unwrap();
        store.set_currency_design(design).unwrap();

        let op = create(&alice, &key("carol"), vec![amount(10)]);
        let mut p = CreateAccountsProcessor::new(ctx(&store, 1));
        assert!(matches!(
            reason(p.pre_process(&op).unwrap_err()),
            ProcessReason::BelowMinimumBalance { .. }
        ));
    }

    #[test]
    fn test_create_unknown_currency() {
        let alice = key("alice");
        let store = store_with(&[(&alice, 100)], Feeer::Nil, 1);
        let xyz = CurrencyId::new("XYZ").unwrap();

        let op = create(&alice, &key("carol"), vec![Amount::new(Big::new(1), xyz.clone())]);
        let mut p = CreateAccountsProcessor::new(ctx(&store, 1));
        assert_eq!(
            reason(p.pre_process(&op).unwrap_err()),
            ProcessReason::CurrencyNotFound(xyz)
        );
    }
}
