//! Suffrage membership: candidacy, join and disjoin.
//!
//! Membership changes are written as set deltas (`Insert` / `Remove`) on the
//! `suffrage` and `suffrage_candidate` keys. Every rule needs the node quorum
//! of the current suffrage; candidacy and join also need a sign by the
//! candidate key itself.

use crate::core::address::Address;
use crate::core::operation::{
    Fact, Operation, OperationKind, SuffrageCandidateFact, SuffrageDisjoinFact, SuffrageJoinFact,
};
use crate::core::state::{
    insert_suffrage_candidate_merge_value, insert_suffrage_node_merge_value,
    remove_suffrage_candidate_merge_value, remove_suffrage_node_merge_value, StateMergeValue,
};
use crate::core::suffrage::{SuffrageCandidate, SuffrageNode};
use crate::key_generator::PublicKey;

use super::{
    check_node_quorum, load_candidates, load_network_policy, load_suffrage, wrong_fact,
    ProcessContext, ProcessReason, ProcessResult, Processor, Rules,
};

pub type SuffrageCandidateProcessor = Processor<SuffrageCandidateRules>;
pub type SuffrageJoinProcessor = Processor<SuffrageJoinRules>;
pub type SuffrageDisjoinProcessor = Processor<SuffrageDisjoinRules>;

fn check_candidate_sign(
    op: &Operation,
    address: &Address,
    key: &PublicKey,
) -> ProcessResult<()> {
    let signed = op
        .signs()
        .iter()
        .any(|s| s.signer() == key && s.node() == Some(address));
    if !signed {
        return Err(ProcessReason::MissingCandidateSign(address.clone()).into());
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct SuffrageCandidateRules;

impl SuffrageCandidateRules {
    fn fact_of(op: &Operation) -> ProcessResult<&SuffrageCandidateFact> {
        match op.fact() {
            Fact::SuffrageCandidate(fact) => Ok(fact),
            other => Err(wrong_fact(OperationKind::SuffrageCandidate, other)),
        }
    }
}

impl Rules for SuffrageCandidateRules {
    const KIND: OperationKind = OperationKind::SuffrageCandidate;

    fn pre_process(&mut self, ctx: &ProcessContext, op: &Operation) -> ProcessResult<()> {
        let fact = Self::fact_of(op)?;
        check_candidate_sign(op, &fact.address, &fact.publickey)?;

        if load_suffrage(ctx)?.exists(&fact.address) {
            return Err(ProcessReason::AlreadySuffrageNode(fact.address.clone()).into());
        }
        if let Some(c) = load_candidates(ctx)?.get(&fact.address) {
            if !c.is_expired(ctx.height()) {
                return Err(ProcessReason::CandidateExists(fact.address.clone()).into());
            }
        }
        check_node_quorum(ctx, op)
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
        op: &Operation,
    ) -> ProcessResult<Vec<StateMergeValue>> {
        let fact = Self::fact_of(op)?;
        let policy = load_network_policy(ctx)?;
        let height = ctx.height();
        let candidate = SuffrageCandidate::new(
            fact.address.clone(),
            fact.publickey,
            height.next(),
            height.saturating_add(policy.suffrage_candidate_lifespan()),
        );
        Ok(vec![insert_suffrage_candidate_merge_value(candidate)])
    }
}

#[derive(Debug, Default)]
pub struct SuffrageJoinRules;

impl SuffrageJoinRules {
    fn fact_of(op: &Operation) -> ProcessResult<&SuffrageJoinFact> {
        match op.fact() {
            Fact::SuffrageJoin(fact) => Ok(fact),
            other => Err(wrong_fact(OperationKind::SuffrageJoin, other)),
        }
    }

    fn candidate(
        ctx: &ProcessContext,
        fact: &SuffrageJoinFact,
    ) -> ProcessResult<SuffrageCandidate> {
        let candidate = load_candidates(ctx)?
            .get(&fact.candidate)
            .cloned()
            .ok_or_else(|| ProcessReason::CandidateNotFound(fact.candidate.clone()))?;
        if candidate.is_expired(ctx.height()) {
            return Err(ProcessReason::CandidateExpired {
                address: fact.candidate.clone(),
                deadline: candidate.deadline(),
            }
            .into());
        }
        if candidate.start() != fact.start {
            return Err(ProcessReason::StartMismatch {
                address: fact.candidate.clone(),
                expected: candidate.start(),
                got: fact.start,
            }
            .into());
        }
        Ok(candidate)
    }
}

impl Rules for SuffrageJoinRules {
    const KIND: OperationKind = OperationKind::SuffrageJoin;

    fn pre_process(&mut self, ctx: &ProcessContext, op: &Operation) -> ProcessResult<()> {
        let fact = Self::fact_of(op)?;
        let candidate = Self::candidate(ctx, fact)?;

        let suffrage = load_suffrage(ctx)?;
        if suffrage.exists(&fact.candidate) {
            return Err(ProcessReason::AlreadySuffrageNode(fact.candidate.clone()).into());
        }
        let max = load_network_policy(ctx)?.max_suffrage_size();
        if suffrage.len() as u64 >= max {
            return Err(ProcessReason::SuffrageFull(max).into());
        }

        check_candidate_sign(op, candidate.address(), candidate.publickey())?;
        check_node_quorum(ctx, op)
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
        op: &Operation,
    ) -> ProcessResult<Vec<StateMergeValue>> {
        let fact = Self::fact_of(op)?;
        let candidate = Self::candidate(ctx, fact)?;
        let node = SuffrageNode::new(
            candidate.address().clone(),
            *candidate.publickey(),
            ctx.height().next(),
        );
        Ok(vec![
            insert_suffrage_node_merge_value(node),
            remove_suffrage_candidate_merge_value(candidate),
        ])
    }
}

#[derive(Debug, Default)]
pub struct SuffrageDisjoinRules;

impl SuffrageDisjoinRules {
    fn fact_of(op: &Operation) -> ProcessResult<&SuffrageDisjoinFact> {
        match op.fact() {
            Fact::SuffrageDisjoin(fact) => Ok(fact),
            other => Err(wrong_fact(OperationKind::SuffrageDisjoin, other)),
        }
    }

    fn member(ctx: &ProcessContext, fact: &SuffrageDisjoinFact) -> ProcessResult<SuffrageNode> {
        let suffrage = load_suffrage(ctx)?;
        let node = suffrage
            .get(&fact.node)
            .cloned()
            .ok_or_else(|| ProcessReason::NotSuffrageNode(fact.node.clone()))?;
        if node.start() != fact.start {
            return Err(ProcessReason::StartMismatch {
                address: fact.node.clone(),
                expected: node.start(),
                got: fact.start,
            }
            .into());
        }
        if suffrage.len() <= 1 {
            return Err(ProcessReason::SuffrageEmpty.into());
        }
        Ok(node)
    }
}

impl Rules for SuffrageDisjoinRules {
    const KIND: OperationKind = OperationKind::SuffrageDisjoin;

    fn pre_process(&mut self, ctx: &ProcessContext, op: &Operation) -> ProcessResult<()> {
        Self::member(ctx, Self::fact_of(op)?)?;
        check_node_quorum(ctx, op)
    }

    fn process(
        &mut self,
        ctx: &ProcessContext,
        op: &Operation,
    ) -> ProcessResult<Vec<StateMergeValue>> {
        let node = Self::member(ctx, Self::fact_of(op)?)?;
        Ok(vec![remove_suffrage_node_merge_value(node)])
    }
}
