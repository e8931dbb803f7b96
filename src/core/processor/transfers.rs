//! Transfers: move amounts from a sender to existing receivers.

use crate::core::address::Address;
use crate::core::amount::Amount;
use crate::core::operation::{Fact, Operation, OperationKind, TransfersFact};
use crate::core::state::StateMergeValue;

use super::{
    account_exists, calculate_items_fee, check_account_signs, check_enough_balance,
    settle_balances, wrong_fact, ProcessContext, ProcessReason, ProcessResult, Processor, Rules,
};

pub type TransfersProcessor = Processor<TransfersRules>;

#[derive(Debug, Default)]
pub struct TransfersRules;

fn fact_of(op: &Operation) -> ProcessResult<&TransfersFact> {
    match op.fact() {
        Fact::Transfers(fact) => Ok(fact),
        other => Err(wrong_fact(OperationKind::Transfers, other)),
    }
}

fn credits(fact: &TransfersFact) -> Vec<(Address, Amount)> {
    fact.items
        .iter()
        .flat_map(|item| item.amounts.iter().map(|am| (item.receiver.clone(), am.clone())))
        .collect()
}

impl Rules for TransfersRules {
    const KIND: OperationKind = OperationKind::Transfers;

    fn pre_process(&mut self, ctx: &ProcessContext, op: &Operation) -> ProcessResult<()> {
        let fact = fact_of(op)?;
        check_account_signs(ctx, &fact.sender, op)?;

        for item in &fact.items {
            if !account_exists(ctx, &item.receiver)? {
                return Err(ProcessReason::ReceiverNotFound(item.receiver.clone()).into());
            }
        }

        let fees = calculate_items_fee(ctx, fact.items.iter().flat_map(|it| it.amounts.iter()))?;
        check_enough_balance(ctx, &fact.sender, &fees)?;
        Ok(())
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
        op: &Operation,
    ) -> ProcessResult<Vec<StateMergeValue>> {
        let fact = fact_of(op)?;
        let fees = calculate_items_fee(ctx, fact.items.iter().flat_map(|it| it.amounts.iter()))?;
        let balances = check_enough_balance(ctx, &fact.sender, &fees)?;
        settle_balances(ctx, &fact.sender, &balances, &fees, &credits(fact))
    }
}
