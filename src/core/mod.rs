// Core module for deterministic operation processing and state merging
//
// DETERMINISM GUARANTEES:
// =======================
// 1. Same pre-batch state and same operation order -> same merge values
// 2. No randomness and no system time in any processing path
// 3. Ordered collections only: every map that reaches a hash or an output
//    is a BTreeMap/BTreeSet
// 4. Merge values of one operation are applied in emission order
//
// INVARIANTS:
// - Processors read only the pre-batch state through `GetState`
// - Processors never write; the store commits merge values per height
// - A reason rejects one operation; a fatal error stops the height

pub mod account;
pub mod address;
pub mod amount;
pub mod codec;
pub mod dispatcher;
pub mod fee;
pub mod operation;
pub mod pool;
pub mod processor;
pub mod state;
pub mod store;
pub mod suffrage;
