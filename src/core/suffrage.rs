//! Suffrage (consensus membership) state and the node-signature quorum check used by node-level operations.
//!
//! The suffrage is the set of nodes allowed to sign node-level operations.
//! A node-level operation is accepted when at least `Threshold` percent of the
//! current suffrage members signed it with their registered keys.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

use crate::core::address::Address;
use crate::core::operation::ValidationError;
use crate::core::processor::ProcessReason;
use crate::core::state::Height;
use crate::key_generator::PublicKey;
use crate::signer::Sign;

/// Default quorum: at least this percentage of suffrage nodes must sign.
pub const DEFAULT_SUFFRAGE_THRESHOLD_PCT: u8 = 67;

/// Quorum percentage in `1..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Threshold(u8);

impl Threshold {
    pub fn new(percent: u8) -> Result<Self, ValidationError> {
        if !(1..=100).contains(&percent) {
            return Err(ValidationError::InvalidThreshold(percent as u32));
        }
        Ok(Self(percent))
    }

    pub fn percent(&self) -> u8 {
        self.0
    }

    /// Signatures required out of `members`: `ceil(members × pct / 100)`, at least one.
    pub fn required(&self, members: usize) -> usize {
        let members = members as u64;
        let required = (members * self.0 as u64 + 99) / 100;
        required.max(1) as usize
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self(DEFAULT_SUFFRAGE_THRESHOLD_PCT)
    }
}

impl TryFrom<u8> for Threshold {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Threshold::new(value)
    }
}

impl From<Threshold> for u8 {
    fn from(t: Threshold) -> u8 {
        t.0
    }
}

/// Suffrage member. `start` is the height from which the node counts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SuffrageNode {
    address: Address,
    publickey: PublicKey,
    start: Height,
}

impl SuffrageNode {
    pub fn new(address: Address, publickey: PublicKey, start: Height) -> Self {
        Self {
            address,
            publickey,
            start,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn publickey(&self) -> &PublicKey {
        &self.publickey
    }

    pub fn start(&self) -> Height {
        self.start
    }
}

/// Current suffrage, stored under the `suffrage` key. Members are kept
/// sorted by address with no address twice, decoded values included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuffrageNodesStateValue {
    nodes: Vec<SuffrageNode>,
}

impl SuffrageNodesStateValue {
    pub fn new(mut nodes: Vec<SuffrageNode>) -> Self {
        nodes.sort_by(|a, b| a.address.cmp(&b.address));
        nodes.dedup_by(|a, b| a.address == b.address);
        Self { nodes }
    }

    pub fn nodes(&self) -> &[SuffrageNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, address: &Address) -> Option<&SuffrageNode> {
        self.nodes.iter().find(|n| &n.address == address)
    }

    pub fn exists(&self, address: &Address) -> bool {
        self.get(address).is_some()
    }

    pub(crate) fn insert(&self, node: SuffrageNode) -> Self {
        let mut nodes: Vec<SuffrageNode> = self
            .nodes
            .iter()
            .filter(|n| n.address != node.address)
            .cloned()
            .collect();
        nodes.push(node);
        Self::new(nodes)
    }

    pub(crate) fn remove(&self, address: &Address) -> Self {
        Self {
            nodes: self
                .nodes
                .iter()
                .filter(|n| &n.address != address)
                .cloned()
                .collect(),
        }
    }
}

impl<'de> Deserialize<'de> for SuffrageNodesStateValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            nodes: Vec<SuffrageNode>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(SuffrageNodesStateValue::new(raw.nodes))
    }
}

/// Node waiting to join the suffrage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuffrageCandidate {
    address: Address,
    publickey: PublicKey,
    start: Height,
    deadline: Height,
}

impl SuffrageCandidate {
    pub fn new(address: Address, publickey: PublicKey, start: Height, deadline: Height) -> Self {
        Self {
            address,
            publickey,
            start,
            deadline,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn publickey(&self) -> &PublicKey {
        &self.publickey
    }

    pub fn start(&self) -> Height {
        self.start
    }

    pub fn deadline(&self) -> Height {
        self.deadline
    }

    pub fn is_expired(&self, height: Height) -> bool {
        self.deadline < height
    }
}

/// Pending candidates, stored under the `suffrage_candidate` key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SuffrageCandidatesStateValue {
    nodes: Vec<SuffrageCandidate>,
}

impl SuffrageCandidatesStateValue {
    pub fn new(mut nodes: Vec<SuffrageCandidate>) -> Self {
        nodes.sort_by(|a, b| a.address.cmp(&b.address));
        nodes.dedup_by(|a, b| a.address == b.address);
        Self { nodes }
    }

    pub fn nodes(&self) -> &[SuffrageCandidate] {
        &self.nodes
    }

    pub fn get(&self, address: &Address) -> Option<&SuffrageCandidate> {
        self.nodes.iter().find(|n| &n.address == address)
    }

    pub(crate) fn insert(&self, candidate: SuffrageCandidate) -> Self {
        let mut nodes: Vec<SuffrageCandidate> = self
            .nodes
            .iter()
            .filter(|n| n.address != candidate.address)
            .cloned()
            .collect();
        nodes.push(candidate);
        Self::new(nodes)
    }

    pub(crate) fn remove(&self, address: &Address) -> Self {
        Self {
            nodes: self
                .nodes
                .iter()
                .filter(|n| &n.address != address)
                .cloned()
                .collect(),
        }
    }
}

impl<'de> Deserialize<'de> for SuffrageCandidatesStateValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            nodes: Vec<SuffrageCandidate>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(SuffrageCandidatesStateValue::new(raw.nodes))
    }
}

/// Network-wide membership limits, stored under the `network_policy` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    max_suffrage_size: u64,
    suffrage_candidate_lifespan: u64,
}

impl NetworkPolicy {
    pub fn new(max_suffrage_size: u64, suffrage_candidate_lifespan: u64) -> Result<Self, ValidationError> {
        if max_suffrage_size == 0 {
            return Err(ValidationError::InvalidNetworkPolicy(
                "max suffrage size must be over zero".to_string(),
            ));
        }
        if suffrage_candidate_lifespan == 0 {
            return Err(ValidationError::InvalidNetworkPolicy(
                "candidate lifespan must be over zero".to_string(),
            ));
        }
        Ok(Self {
            max_suffrage_size,
            suffrage_candidate_lifespan,
        })
    }

    pub fn max_suffrage_size(&self) -> u64 {
        self.max_suffrage_size
    }

    pub fn suffrage_candidate_lifespan(&self) -> u64 {
        self.suffrage_candidate_lifespan
    }
}

/// Checks that node signs from distinct suffrage members reach the quorum.
///
/// A sign counts only when it names a node address whose registered public
/// key is the signer. Signs from non-members are ignored; the same member
/// signing twice is `DuplicatedSigner`.
pub fn check_node_signs(
    signs: &[Sign],
    suffrage: &SuffrageNodesStateValue,
    threshold: Threshold,
) -> Result<(), ProcessReason> {
    let mut counted: BTreeSet<&Address> = BTreeSet::new();
    for sign in signs {
        let Some(node) = sign.node() else {
            continue;
        };
        let Some(member) = suffrage.get(node) else {
            continue;
        };
        if member.publickey() != sign.signer() {
            continue;
        }
        if !counted.insert(node) {
            return Err(ProcessReason::DuplicatedSigner(node.to_string()));
        }
    }

    let required = threshold.required(suffrage.len());
    if counted.len() < required {
        return Err(ProcessReason::InsufficientSignature {
            required: required as u32,
            got: counted.len() as u32,
        });
    }
    Ok(())
}
