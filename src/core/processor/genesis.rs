//! GenesisCurrencies: the genesis account and its currencies at height 0.

use crate::core::account::Account;
use crate::core::operation::{Fact, GenesisCurrenciesFact, Operation, OperationKind};
use crate::core::state::{new_account_state_merge_value, Height, StateMergeValue};

use super::currency_register::{check_new_design, register_design};
use super::{
    check_not_exists_account, wrong_fact, ProcessContext, ProcessReason, ProcessResult,
    Processor, Rules,
};

pub type GenesisCurrenciesProcessor = Processor<GenesisCurrenciesRules>;

#[derive(Debug, Default)]
pub struct GenesisCurrenciesRules;

fn fact_of(op: &Operation) -> ProcessResult<&GenesisCurrenciesFact> {
    match op.fact() {
        Fact::GenesisCurrencies(fact) => Ok(fact),
        other => Err(wrong_fact(OperationKind::GenesisCurrencies, other)),
    }
}

impl Rules for GenesisCurrenciesRules {
    const KIND: OperationKind = OperationKind::GenesisCurrencies;

    fn pre_process(&mut self, ctx: &ProcessContext, op: &Operation) -> ProcessResult<()> {
        let fact = fact_of(op)?;
        if ctx.height() != Height::GENESIS {
            return Err(ProcessReason::NotGenesisHeight(ctx.height()).into());
        }
        // no suffrage exists yet; the genesis node key alone vouches
        if !op.signers().contains(&fact.genesis_node_key) {
            return Err(ProcessReason::InsufficientSignature {
                required: 1,
                got: 0,
            }
            .into());
        }

        let genesis = fact.genesis_address();
        check_not_exists_account(ctx, &genesis)?;
        for design in &fact.designs {
            check_new_design(ctx, design, Some(&genesis))?;
        }
        Ok(())
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
        op: &Operation,
    ) -> ProcessResult<Vec<StateMergeValue>> {
        let fact = fact_of(op)?;
        let account = Account::new(fact.genesis_address(), fact.keys.clone());

        let mut values = vec![new_account_state_merge_value(account)];
        for design in &fact.designs {
            values.extend(register_design(ctx, design)?);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::testing::*;
    use super::super::OperationProcessor;
    use super::*;
    use crate::core::address::Address;
    use crate::core::amount::{Amount, Big, CurrencyId};
    use crate::core::fee::{CurrencyDesign, CurrencyPolicy, Feeer};
    use crate::core::store::MemoryStore;

    fn genesis_op() -> Operation {
        let genesis = address_of(&key("genesis"));
        let designs = ["MCC", "ABC"]
            .iter()
            .map(|id| {
                CurrencyDesign::new(
                    Amount::new(Big::new(1_000), CurrencyId::new(*id).unwrap()),
                    genesis.clone(),
                    CurrencyPolicy::new(
                        Big::new(1),
                        Feeer::fixed(genesis.clone(), Big::new(1)).unwrap(),
                    )
                    .unwrap(),
                )
                .unwrap()
            })
            .collect();
        let fact = Fact::GenesisCurrencies(GenesisCurrenciesFact {
            token: b"genesis".to_vec(),
            genesis_node_key: node_key(0).public_key(),
            keys: keys_of(&key("genesis")),
            designs,
        });
        node_op(fact, &node_signers(1))
    }

    #[test]
    fn test_genesis_creates_account_and_currencies() {
        let store = Arc::new(MemoryStore::new());
        let op = genesis_op();

        let mut p = GenesisCurrenciesProcessor::new(ctx(&store, 0));
        p.pre_process(&op).unwrap();
        let values = p.process(&op).unwrap();

        assert_eq!(values.len(), 9);
        let genesis = values[0].value().as_account().unwrap().address().clone();
        assert_eq!(balance_in(&values, &genesis), Some(Big::new(1_000)));
        assert!(values
            .iter()
            .any(|v| v.value().as_account().map(|a| a.address())
                == Some(&Address::zero(&CurrencyId::new("ABC").unwrap()))));
    }

    #[test]
    fn test_genesis_only_at_height_zero() {
        let store = Arc::new(MemoryStore::new());
        let mut p = GenesisCurrenciesProcessor::new(ctx(&store, 1));
        assert_eq!(
            reason(p.pre_process(&genesis_op()).unwrap_err()),
            ProcessReason::NotGenesisHeight(Height::new(1))
        );
    }

    #[test]
    fn test_genesis_twice() {
        let store = store_with(&[(&key("genesis"), 0)], Feeer::Nil, 1);
        let mut p = GenesisCurrenciesProcessor::new(ctx(&store, 0));
        assert!(matches!(
            reason(p.pre_process(&genesis_op()).unwrap_err()),
            ProcessReason::AccountAlreadyExists(_)
        ));
    }

    #[test]
    fn test_genesis_needs_node_key() {
        let store = Arc::new(MemoryStore::new());
        let fact = genesis_op().fact().clone();
        let op = node_op(fact, &[(node_key(1), node_address(1))]);
        let mut p = GenesisCurrenciesProcessor::new(ctx(&store, 0));
        assert!(matches!(
            reason(p.pre_process(&op).unwrap_err()),
            ProcessReason::InsufficientSignature { .. }
        ));
    }
}
