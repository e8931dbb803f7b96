pub mod config;
pub mod core;
pub mod error;
pub mod key_generator;
pub mod logging;
pub mod signature;
pub mod signer;
pub mod utils;

pub use config::EngineConfig;
pub use error::{CurrencyError, Result};
pub use key_generator::{KeyKind, PrivateKey, PublicKey};
pub use signer::Sign;
pub use utils::{sha256, Hash};

// Core API exports
pub use core::account::{check_threshold, Account, AccountKey, AccountKeys};
pub use core::address::{derive_address, new_address_from_keys, Address, AddressKind};
pub use core::amount::{Amount, Big, CurrencyId};
pub use core::codec::{Codec, Hint};
pub use core::dispatcher::{BatchResult, Dispatcher, PooledProcessor, ProcessorRegistry};
pub use core::fee::{CurrencyDesign, CurrencyPolicy, FeeRatio, Feeer};
pub use core::operation::{Fact, Operation, OperationKind, ValidationError};
pub use core::pool::ProcessorPool;
pub use core::processor::{
    OperationProcessor, ProcessContext, ProcessError, ProcessOutcome, ProcessReason, Stage,
};
pub use core::state::{
    GetState, Height, MergeStrategy, State, StateMergeValue, StateMerger, StateValue,
};
pub use core::store::{MemoryStore, StoreSnapshot};
pub use core::suffrage::{
    NetworkPolicy, SuffrageCandidate, SuffrageCandidatesStateValue, SuffrageNode,
    SuffrageNodesStateValue, Threshold,
};
