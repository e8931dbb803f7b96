//! Operation envelope and facts.
//!
//! **Fact:** the immutable, hash-identified intent of an operation. Every
//! fact kind is one variant of `Fact`, tagged on the wire by `_hint`.
//!
//! **Operation:** a fact plus one or more detached signatures. User-level
//! operations are signed by account keys; node-level operations are signed by
//! suffrage nodes and every sign names the signing node.
//!
//! Construction-time checks live here (`is_valid`). Anything that needs ledger
//! state is checked by the processors.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::account::AccountKeys;
use crate::core::address::{derive_address, new_address_from_keys, Address, AddressKind};
use crate::core::amount::{Amount, CurrencyId};
use crate::core::fee::{CurrencyDesign, CurrencyPolicy};
use crate::core::state::Height;
use crate::error::{CurrencyError, Result};
use crate::key_generator::{PrivateKey, PublicKey};
use crate::signature::{hash_message, FACT_DOMAIN, OPERATION_DOMAIN};
use crate::signer::Sign;
use crate::utils::{hex_bytes, Hash};

/// Maximum items in one fact.
pub const MAX_ITEMS: usize = 10;
/// Maximum amounts in one item.
pub const MAX_AMOUNTS_IN_ITEM: usize = 10;
/// Maximum token length in bytes.
pub const MAX_TOKEN_LEN: usize = 100;

/// Errors produced by construction-time validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid currency id: {0}")]
    InvalidCurrencyId(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid keys: {0}")]
    InvalidKeys(String),

    #[error("Invalid feeer: {0}")]
    InvalidFeeer(String),

    #[error("Invalid currency design: {0}")]
    InvalidCurrencyDesign(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(u32),

    #[error("Invalid network policy: {0}")]
    InvalidNetworkPolicy(String),

    #[error("Invalid fact: {0}")]
    InvalidFact(String),

    #[error("Invalid sign: {0}")]
    InvalidSign(String),

    #[error("Hash mismatch: expected {0}, got {1}")]
    HashMismatch(String, String),
}

impl From<ValidationError> for CurrencyError {
    fn from(err: ValidationError) -> Self {
        CurrencyError::Validation(err.to_string())
    }
}

type ValidationResult = std::result::Result<(), ValidationError>;

/// Closed set of operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    CreateAccounts,
    Transfers,
    KeyUpdater,
    CurrencyRegister,
    CurrencyPolicyUpdater,
    Mint,
    SuffrageCandidate,
    SuffrageJoin,
    SuffrageDisjoin,
    GenesisCurrencies,
}

impl OperationKind {
    pub const ALL: [OperationKind; 10] = [
        OperationKind::CreateAccounts,
        OperationKind::Transfers,
        OperationKind::KeyUpdater,
        OperationKind::CurrencyRegister,
        OperationKind::CurrencyPolicyUpdater,
        OperationKind::Mint,
        OperationKind::SuffrageCandidate,
        OperationKind::SuffrageJoin,
        OperationKind::SuffrageDisjoin,
        OperationKind::GenesisCurrencies,
    ];

    /// Signed by suffrage nodes rather than account keys.
    pub fn is_node_operation(&self) -> bool {
        !matches!(
            self,
            OperationKind::CreateAccounts | OperationKind::Transfers | OperationKind::KeyUpdater
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::CreateAccounts => "create-accounts",
            OperationKind::Transfers => "transfers",
            OperationKind::KeyUpdater => "key-updater",
            OperationKind::CurrencyRegister => "currency-register",
            OperationKind::CurrencyPolicyUpdater => "currency-policy-updater",
            OperationKind::Mint => "mint",
            OperationKind::SuffrageCandidate => "suffrage-candidate",
            OperationKind::SuffrageJoin => "suffrage-join",
            OperationKind::SuffrageDisjoin => "suffrage-disjoin",
            OperationKind::GenesisCurrencies => "genesis-currencies",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn check_amounts(amounts: &[Amount]) -> ValidationResult {
    if amounts.is_empty() || amounts.len() > MAX_AMOUNTS_IN_ITEM {
        return Err(ValidationError::InvalidFact(format!(
            "amounts in item must be 1..={}, got {}",
            MAX_AMOUNTS_IN_ITEM,
            amounts.len()
        )));
    }
    let mut currencies = BTreeSet::new();
    for am in amounts {
        am.is_valid_positive()?;
        if !currencies.insert(am.currency()) {
            return Err(ValidationError::InvalidFact(format!(
                "duplicated currency {} in item",
                am.currency()
            )));
        }
    }
    Ok(())
}

fn check_items_len(len: usize) -> ValidationResult {
    if len == 0 || len > MAX_ITEMS {
        return Err(ValidationError::InvalidFact(format!(
            "items must be 1..={}, got {}",
            MAX_ITEMS, len
        )));
    }
    Ok(())
}

fn check_token(token: &[u8]) -> ValidationResult {
    if token.is_empty() || token.len() > MAX_TOKEN_LEN {
        return Err(ValidationError::InvalidFact(format!(
            "token length must be 1..={}, got {}",
            MAX_TOKEN_LEN,
            token.len()
        )));
    }
    Ok(())
}

/// New account: keys, initial amounts and address scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountsItem {
    pub keys: AccountKeys,
    pub amounts: Vec<Amount>,
    pub address_type: AddressKind,
}

impl CreateAccountsItem {
    pub fn address(&self) -> std::result::Result<Address, ValidationError> {
        derive_address(&self.keys, self.address_type)
    }

    fn is_valid(&self) -> ValidationResult {
        self.keys.is_valid()?;
        self.address()?;
        check_amounts(&self.amounts)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountsFact {
    #[serde(with = "hex_bytes")]
    pub token: Vec<u8>,
    pub sender: Address,
    pub items: Vec<CreateAccountsItem>,
}

impl CreateAccountsFact {
    /// Addresses the fact would create, in item order.
    pub fn targets(&self) -> std::result::Result<Vec<Address>, ValidationError> {
        self.items.iter().map(|it| it.address()).collect()
    }

    fn is_valid(&self) -> ValidationResult {
        check_token(&self.token)?;
        check_items_len(self.items.len())?;
        let mut seen = BTreeSet::new();
        for item in &self.items {
            item.is_valid()?;
            let target = item.address()?;
            if target == self.sender {
                return Err(ValidationError::InvalidFact(format!(
                    "target address same as sender, {}",
                    target
                )));
            }
            if !seen.insert(target.clone()) {
                return Err(ValidationError::InvalidFact(format!(
                    "duplicated target {}",
                    target
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransfersItem {
    pub receiver: Address,
    pub amounts: Vec<Amount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransfersFact {
    #[serde(with = "hex_bytes")]
    pub token: Vec<u8>,
    pub sender: Address,
    pub items: Vec<TransfersItem>,
}

impl TransfersFact {
    fn is_valid(&self) -> ValidationResult {
        check_token(&self.token)?;
        check_items_len(self.items.len())?;
        let mut seen = BTreeSet::new();
        for item in &self.items {
            check_amounts(&item.amounts)?;
            if item.receiver == self.sender {
                return Err(ValidationError::InvalidFact(format!(
                    "receiver same as sender, {}",
                    item.receiver
                )));
            }
            if !seen.insert(&item.receiver) {
                return Err(ValidationError::InvalidFact(format!(
                    "duplicated receiver {}",
                    item.receiver
                )));
            }
        }
        Ok(())
    }
}

/// Replaces the keys of `target`. The fee is charged in `currency`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUpdaterFact {
    #[serde(with = "hex_bytes")]
    pub token: Vec<u8>,
    pub target: Address,
    pub keys: AccountKeys,
    pub currency: CurrencyId,
}

impl KeyUpdaterFact {
    fn is_valid(&self) -> ValidationResult {
        check_token(&self.token)?;
        if self.target.is_zero() {
            return Err(ValidationError::InvalidFact(format!(
                "zero account {} cannot update keys",
                self.target
            )));
        }
        self.keys.is_valid()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyRegisterFact {
    #[serde(with = "hex_bytes")]
    pub token: Vec<u8>,
    pub design: CurrencyDesign,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyPolicyUpdaterFact {
    #[serde(with = "hex_bytes")]
    pub token: Vec<u8>,
    pub currency: CurrencyId,
    pub policy: CurrencyPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintItem {
    pub receiver: Address,
    pub amount: Amount,
}

/// Suffrage inflation: new supply credited to existing accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintFact {
    #[serde(with = "hex_bytes")]
    pub token: Vec<u8>,
    pub items: Vec<MintItem>,
}

impl MintFact {
    fn is_valid(&self) -> ValidationResult {
        check_token(&self.token)?;
        check_items_len(self.items.len())?;
        let mut seen = BTreeSet::new();
        for item in &self.items {
            item.amount.is_valid_positive()?;
            if !seen.insert((&item.receiver, item.amount.currency())) {
                return Err(ValidationError::InvalidFact(format!(
                    "duplicated mint item {} {}",
                    item.receiver,
                    item.amount.currency()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuffrageCandidateFact {
    #[serde(with = "hex_bytes")]
    pub token: Vec<u8>,
    pub address: Address,
    pub publickey: PublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuffrageJoinFact {
    #[serde(with = "hex_bytes")]
    pub token: Vec<u8>,
    pub candidate: Address,
    pub start: Height,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuffrageDisjoinFact {
    #[serde(with = "hex_bytes")]
    pub token: Vec<u8>,
    pub node: Address,
    pub start: Height,
}

/// Genesis account and the currencies it holds at height 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisCurrenciesFact {
    #[serde(with = "hex_bytes")]
    pub token: Vec<u8>,
    pub genesis_node_key: PublicKey,
    pub keys: AccountKeys,
    pub designs: Vec<CurrencyDesign>,
}

impl GenesisCurrenciesFact {
    pub fn genesis_address(&self) -> Address {
        new_address_from_keys(&self.keys)
    }

    fn is_valid(&self) -> ValidationResult {
        check_token(&self.token)?;
        self.keys.is_valid()?;
        check_items_len(self.designs.len())?;
        let genesis = self.genesis_address();
        let mut seen = BTreeSet::new();
        for design in &self.designs {
            design.is_valid()?;
            if design.genesis_account() != &genesis {
                return Err(ValidationError::InvalidFact(format!(
                    "design {} genesis account {} is not {}",
                    design.currency(),
                    design.genesis_account(),
                    genesis
                )));
            }
            if !seen.insert(design.currency()) {
                return Err(ValidationError::InvalidFact(format!(
                    "duplicated currency {}",
                    design.currency()
                )));
            }
        }
        Ok(())
    }
}

/// Every fact kind the engine understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_hint")]
pub enum Fact {
    #[serde(rename = "currency-create-accounts-fact-v0.0.1")]
    CreateAccounts(CreateAccountsFact),
    #[serde(rename = "currency-transfers-fact-v0.0.1")]
    Transfers(TransfersFact),
    #[serde(rename = "currency-key-updater-fact-v0.0.1")]
    KeyUpdater(KeyUpdaterFact),
    #[serde(rename = "currency-register-fact-v0.0.1")]
    CurrencyRegister(CurrencyRegisterFact),
    #[serde(rename = "currency-policy-updater-fact-v0.0.1")]
    CurrencyPolicyUpdater(CurrencyPolicyUpdaterFact),
    #[serde(rename = "currency-mint-fact-v0.0.1")]
    Mint(MintFact),
    #[serde(rename = "suffrage-candidate-fact-v0.0.1")]
    SuffrageCandidate(SuffrageCandidateFact),
    #[serde(rename = "suffrage-join-fact-v0.0.1")]
    SuffrageJoin(SuffrageJoinFact),
    #[serde(rename = "suffrage-disjoin-fact-v0.0.1")]
    SuffrageDisjoin(SuffrageDisjoinFact),
    #[serde(rename = "currency-genesis-currencies-fact-v0.0.1")]
    GenesisCurrencies(GenesisCurrenciesFact),
}

impl Fact {
    pub fn kind(&self) -> OperationKind {
        match self {
            Fact::CreateAccounts(_) => OperationKind::CreateAccounts,
            Fact::Transfers(_) => OperationKind::Transfers,
            Fact::KeyUpdater(_) => OperationKind::KeyUpdater,
            Fact::CurrencyRegister(_) => OperationKind::CurrencyRegister,
            Fact::CurrencyPolicyUpdater(_) => OperationKind::CurrencyPolicyUpdater,
            Fact::Mint(_) => OperationKind::Mint,
            Fact::SuffrageCandidate(_) => OperationKind::SuffrageCandidate,
            Fact::SuffrageJoin(_) => OperationKind::SuffrageJoin,
            Fact::SuffrageDisjoin(_) => OperationKind::SuffrageDisjoin,
            Fact::GenesisCurrencies(_) => OperationKind::GenesisCurrencies,
        }
    }

    pub fn token(&self) -> &[u8] {
        match self {
            Fact::CreateAccounts(f) => &f.token,
            Fact::Transfers(f) => &f.token,
            Fact::KeyUpdater(f) => &f.token,
            Fact::CurrencyRegister(f) => &f.token,
            Fact::CurrencyPolicyUpdater(f) => &f.token,
            Fact::Mint(f) => &f.token,
            Fact::SuffrageCandidate(f) => &f.token,
            Fact::SuffrageJoin(f) => &f.token,
            Fact::SuffrageDisjoin(f) => &f.token,
            Fact::GenesisCurrencies(f) => &f.token,
        }
    }

    /// Domain-separated hash of the canonical JSON encoding.
    pub fn hash(&self) -> Result<Hash> {
        hash_message(FACT_DOMAIN, self)
    }

    pub fn is_valid(&self) -> ValidationResult {
        match self {
            Fact::CreateAccounts(f) => f.is_valid(),
            Fact::Transfers(f) => f.is_valid(),
            Fact::KeyUpdater(f) => f.is_valid(),
            Fact::CurrencyRegister(f) => {
                check_token(&f.token)?;
                f.design.is_valid()
            }
            Fact::CurrencyPolicyUpdater(f) => {
                check_token(&f.token)?;
                f.policy.is_valid()
            }
            Fact::Mint(f) => f.is_valid(),
            Fact::SuffrageCandidate(f) => check_token(&f.token),
            Fact::SuffrageJoin(f) => check_token(&f.token),
            Fact::SuffrageDisjoin(f) => check_token(&f.token),
            Fact::GenesisCurrencies(f) => f.is_valid(),
        }
    }
}

/// Signed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    hash: Hash,
    fact: Fact,
    signs: Vec<Sign>,
}

#[derive(Serialize)]
struct OperationBody<'a> {
    fact_hash: &'a Hash,
    signs: &'a [Sign],
}

impl Operation {
    pub fn new(fact: Fact, signs: Vec<Sign>) -> Result<Self> {
        let fact_hash = fact.hash()?;
        let hash = Self::compute_hash(&fact_hash, &signs)?;
        Ok(Self { hash, fact, signs })
    }

    /// Signs `fact` with each account key.
    pub fn new_signed(fact: Fact, keys: &[&PrivateKey], network_id: &[u8]) -> Result<Self> {
        let fact_hash = fact.hash()?;
        let signs = keys
            .iter()
            .map(|k| Sign::new(k, network_id, &fact_hash))
            .collect::<Result<Vec<_>>>()?;
        Self::new(fact, signs)
    }

    /// Signs `fact` with each node key, naming the node.
    pub fn new_node_signed(
        fact: Fact,
        nodes: &[(&PrivateKey, Address)],
        network_id: &[u8],
    ) -> Result<Self> {
        let fact_hash = fact.hash()?;
        let signs = nodes
            .iter()
            .map(|(k, node)| Sign::new_node(k, node.clone(), network_id, &fact_hash))
            .collect::<Result<Vec<_>>>()?;
        Self::new(fact, signs)
    }

    fn compute_hash(fact_hash: &Hash, signs: &[Sign]) -> Result<Hash> {
        hash_message(OPERATION_DOMAIN, &OperationBody { fact_hash, signs })
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn fact(&self) -> &Fact {
        &self.fact
    }

    pub fn kind(&self) -> OperationKind {
        self.fact.kind()
    }

    pub fn signs(&self) -> &[Sign] {
        &self.signs
    }

    pub fn signers(&self) -> Vec<PublicKey> {
        self.signs.iter().map(|s| *s.signer()).collect()
    }

    /// Full construction-time check: fact, hash and every signature under `network_id`.
    pub fn is_valid(&self, network_id: &[u8]) -> Result<()> {
        self.fact.is_valid()?;

        let fact_hash = self.fact.hash()?;
        let expected = Self::compute_hash(&fact_hash, &self.signs)?;
        if expected != self.hash {
            return Err(
                ValidationError::HashMismatch(expected.to_string(), self.hash.to_string()).into(),
            );
        }

        if self.signs.is_empty() {
            return Err(ValidationError::InvalidSign("empty signs".to_string()).into());
        }
        let node_level = self.kind().is_node_operation();
        let mut signers = BTreeSet::new();
        for sign in &self.signs {
            if !signers.insert(sign.signer()) {
                return Err(ValidationError::InvalidSign(format!(
                    "duplicated signer {}",
                    sign.signer()
                ))
                .into());
            }
            if node_level && sign.node().is_none() {
                return Err(ValidationError::InvalidSign(format!(
                    "node operation sign by {} without node address",
                    sign.signer()
                ))
                .into());
            }
            if !sign.verify(network_id, &fact_hash)? {
                return Err(ValidationError::InvalidSign(format!(
                    "signature by {} does not verify",
                    sign.signer()
                ))
                .into());
            }
        }
        Ok(())
    }
}
