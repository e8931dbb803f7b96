//! Mint: suffrage inflation of registered currencies.

use std::collections::BTreeMap;

use crate::core::amount::{Big, CurrencyId};
use crate::core::operation::{Fact, MintFact, Operation, OperationKind};
use crate::core::state::{
    new_balance_state_merge_value, new_currency_design_state_merge_value, StateMergeValue,
};

use super::{
    account_exists, check_node_quorum, load_balance, load_currency_design, wrong_fact,
    ProcessContext, ProcessReason, ProcessResult, Processor, Rules,
};

pub type MintProcessor = Processor<MintRules>;

#[derive(Debug, Default)]
pub struct MintRules;

fn fact_of(op: &Operation) -> ProcessResult<&MintFact> {
    match op.fact() {
        Fact::Mint(fact) => Ok(fact),
        other => Err(wrong_fact(OperationKind::Mint, other)),
    }
}

impl Rules for MintRules {
    const KIND: OperationKind = OperationKind::Mint;

    fn pre_process(&mut self, ctx: &ProcessContext, op: &Operation) -> ProcessResult<()> {
        let fact = fact_of(op)?;
        check_node_quorum(ctx, op)?;
        for item in &fact.items {
            if !account_exists(ctx, &item.receiver)? {
                return Err(ProcessReason::ReceiverNotFound(item.receiver.clone()).into());
            }
            load_currency_design(ctx, item.amount.currency())?;
        }
        Ok(())
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
        op: &Operation,
    ) -> ProcessResult<Vec<StateMergeValue>> {
        let fact = fact_of(op)?;

        let mut values = Vec::with_capacity(fact.items.len() + 1);
        let mut issued: BTreeMap<CurrencyId, Big> = BTreeMap::new();
        for item in &fact.items {
            let currency = item.amount.currency();
            let current = load_balance(ctx, &item.receiver, currency)?
                .map(|b| b.big().clone())
                .unwrap_or_default();
            values.push(new_balance_state_merge_value(
                &item.receiver,
                item.amount.with_big(&current + item.amount.big()),
            ));

            let total = issued.entry(currency.clone()).or_default();
            *total = &*total + item.amount.big();
        }

        for (currency, total) in issued {
            let design = load_currency_design(ctx, &currency)?;
            values.push(new_currency_design_state_merge_value(
                design.add_aggregate(&total),
            ));
        }
        Ok(values)
    }
}
