//! CurrencyRegister: a new currency backed by a suffrage quorum.

use crate::core::account::Account;
use crate::core::address::Address;
use crate::core::amount::Amount;
use crate::core::fee::CurrencyDesign;
use crate::core::operation::{CurrencyRegisterFact, Fact, Operation, OperationKind};
use crate::core::state::{
    currency_design_state_key, new_account_state_merge_value, new_balance_state_merge_value,
    new_currency_design_state_merge_value, StateMergeValue,
};

use super::{
    account_exists, check_node_quorum, check_not_exists_account, load_balance, wrong_fact,
    ProcessContext, ProcessReason, ProcessResult, Processor, Rules,
};

pub type CurrencyRegisterProcessor = Processor<CurrencyRegisterRules>;

#[derive(Debug, Default)]
pub struct CurrencyRegisterRules;

fn fact_of(op: &Operation) -> ProcessResult<&CurrencyRegisterFact> {
    match op.fact() {
        Fact::CurrencyRegister(fact) => Ok(fact),
        other => Err(wrong_fact(OperationKind::CurrencyRegister, other)),
    }
}

/// Checks a design about to be registered: the currency and its zero account
/// are free, the fee receiver (if any) exists or is `created` by the same
/// operation.
pub(crate) fn check_new_design(
    ctx: &ProcessContext,
    design: &CurrencyDesign,
    created: Option<&Address>,
) -> ProcessResult<()> {
    let currency = design.currency();
    if ctx.get_state(&currency_design_state_key(currency))?.is_some() {
        return Err(ProcessReason::CurrencyAlreadyRegistered(currency.clone()).into());
    }
    if let Some(receiver) = design.policy().feeer().receiver() {
        if Some(receiver) != created && !account_exists(ctx, receiver)? {
            return Err(ProcessReason::FeeReceiverNotFound(receiver.clone()).into());
        }
    }
    check_not_exists_account(ctx, &Address::zero(currency))
}

/// Design, genesis balance, then the zero account and its empty balance.
pub(crate) fn register_design(
    ctx: &ProcessContext,
    design: &CurrencyDesign,
) -> ProcessResult<Vec<StateMergeValue>> {
    let currency = design.currency();
    let genesis = design.genesis_account();
    let current = load_balance(ctx, genesis, currency)?
        .map(|b| b.big().clone())
        .unwrap_or_default();
    let issued = design.amount().with_big(&current + design.amount().big());
    let zero = Account::zero(currency);

    Ok(vec![
        new_currency_design_state_merge_value(design.clone()),
        new_balance_state_merge_value(genesis, issued),
        new_balance_state_merge_value(zero.address(), Amount::zero(currency.clone())),
        new_account_state_merge_value(zero),
    ])
}

impl Rules for CurrencyRegisterRules {
    const KIND: OperationKind = OperationKind::CurrencyRegister;

    fn pre_process(&mut self, ctx: &ProcessContext, op: &Operation) -> ProcessResult<()> {
        let fact = fact_of(op)?;
        check_new_design(ctx, &fact.design, None)?;
        let genesis = fact.design.genesis_account();
        if !account_exists(ctx, genesis)? {
            return Err(ProcessReason::AccountNotFound(genesis.clone()).into());
        }
        check_node_quorum(ctx, op)
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
        op: &Operation,
    ) -> ProcessResult<Vec<StateMergeValue>> {
        register_design(ctx, &fact_of(op)?.design)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::OperationProcessor;
    use super::*;
    use crate::core::amount::{Big, CurrencyId};
    use crate::core::fee::{CurrencyPolicy, Feeer};
    use crate::core::state::account_state_key;

    fn design(id: &str, genesis: Address, feeer: Feeer) -> CurrencyDesign {
        CurrencyDesign::new(
            Amount::new(Big::new(500), CurrencyId::new(id).unwrap()),
            genesis,
            CurrencyPolicy::new(Big::new(1), feeer).unwrap(),
        )
        .unwrap()
    }

    fn register(d: CurrencyDesign, signers: u8) -> Operation {
        let fact = Fact::CurrencyRegister(CurrencyRegisterFact {
            token: b"register".to_vec(),
            design: d,
        });
        node_op(fact, &node_signers(signers))
    }

    #[test]
    fn test_register_currency() {
        let alice = key("alice");
        let store = store_with(&[(&alice, 0)], Feeer::Nil, 3);
        let d = design("ABC", address_of(&alice), Feeer::Nil);
        let abc = d.currency().clone();

        let op = register(d, 3);
        let mut p = CurrencyRegisterProcessor::new(ctx(&store, 1));
        p.pre_process(&op).unwrap();
        let values = p.process(&op).unwrap();

        assert_eq!(values.len(), 4);
        assert_eq!(values[0].key(), currency_design_state_key(&abc));
        assert_eq!(
            values[1].value().as_balance(),
            Some(&Amount::new(Big::new(500), abc.clone()))
        );
        assert_eq!(values[3].key(), account_state_key(&Address::zero(&abc)));
        assert!(values[3].value().as_account().unwrap().keys().is_none());
    }

    #[test]
    fn test_register_existing_currency() {
        let alice = key("alice");
        let store = store_with(&[(&alice, 0)], Feeer::Nil, 1);

        let op = register(design("MCC", address_of(&alice), Feeer::Nil), 1);
        let mut p = CurrencyRegisterProcessor::new(ctx(&store, 1));
        assert_eq!(
            reason(p.pre_process(&op).unwrap_err()),
            ProcessReason::CurrencyAlreadyRegistered(mcc())
        );
    }

    #[test]
    fn test_register_unknown_genesis_or_receiver() {
        let alice = key("alice");
        let store = store_with(&[(&alice, 0)], Feeer::Nil, 1);
        let ghost = address_of(&key("ghost"));

        let op = register(design("ABC", ghost.clone(), Feeer::Nil), 1);
        let mut p = CurrencyRegisterProcessor::new(ctx(&store, 1));
        assert_eq!(
            reason(p.pre_process(&op).unwrap_err()),
            ProcessReason::AccountNotFound(ghost.clone())
        );

        let feeer = Feeer::fixed(ghost.clone(), Big::new(1)).unwrap();
        let op = register(design("ABC", address_of(&alice), feeer), 1);
        let mut p = CurrencyRegisterProcessor::new(ctx(&store, 1));
        assert_eq!(
            reason(p.pre_process(&op).unwrap_err()),
            ProcessReason::FeeReceiverNotFound(ghost)
        );
    }

    #[test]
    fn test_register_needs_quorum() {
        let alice = key("alice");
        let store = store_with(&[(&alice, 0)], Feeer::Nil, 3);

        let op = register(design("ABC", address_of(&alice), Feeer::Nil), 2);
        let mut p = CurrencyRegisterProcessor::new(ctx(&store, 1));
        assert_eq!(
            reason(p.pre_process(&op).unwrap_err()),
            ProcessReason::InsufficientSignature {
                required: 3,
                got: 2
            }
        );
    }
}
