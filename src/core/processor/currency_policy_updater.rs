//! CurrencyPolicyUpdater: replaces the policy of a registered currency.

use crate::core::operation::{CurrencyPolicyUpdaterFact, Fact, Operation, OperationKind};
use crate::core::state::{new_currency_design_state_merge_value, StateMergeValue};

use super::{
    account_exists, check_node_quorum, load_currency_design, wrong_fact, ProcessContext,
    ProcessReason, ProcessResult, Processor, Rules,
};

pub type CurrencyPolicyUpdaterProcessor = Processor<CurrencyPolicyUpdaterRules>;

#[derive(Debug, Default)]
pub struct CurrencyPolicyUpdaterRules;

fn fact_of(op: &Operation) -> ProcessResult<&CurrencyPolicyUpdaterFact> {
    match op.fact() {
        Fact::CurrencyPolicyUpdater(fact) => Ok(fact),
        other => Err(wrong_fact(OperationKind::CurrencyPolicyUpdater, other)),
    }
}

impl Rules for CurrencyPolicyUpdaterRules {
    const KIND: OperationKind = OperationKind::CurrencyPolicyUpdater;

    fn pre_process(&mut self, ctx: &ProcessContext, op: &Operation) -> ProcessResult<()> {
        let fact = fact_of(op)?;
        load_currency_design(ctx, &fact.currency)?;
        if let Some(receiver) = fact.policy.feeer().receiver() {
            if !account_exists(ctx, receiver)? {
                return Err(ProcessReason::FeeReceiverNotFound(receiver.clone()).into());
            }
        }
        check_node_quorum(ctx, op)
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
        op: &Operation,
    ) -> ProcessResult<Vec<StateMergeValue>> {
        let fact = fact_of(op)?;
        let design = load_currency_design(ctx, &fact.currency)?;
        Ok(vec![new_currency_design_state_merge_value(
            design.with_policy(fact.policy.clone()),
        )])
    }
}
