//! Block template construction for a node enforcing the sidechain rules.
//!
//! [`BlockAssembler`] selects mempool packages, pays out approved withdrawal
//! bundles and writes the sidechain commitments into the coinbase.  The
//! [`Miner`] then searches for proof of work over the finished template.

pub mod assembler;
pub mod chain;
pub mod errors;
pub mod manager;
pub mod mempool;
pub mod miner;
pub mod package;
pub mod sidechain;
pub mod signer;
pub mod template;

#[cfg(any(test, feature = "stubs"))]
pub mod stubs;

pub use assembler::BlockAssembler;
pub use errors::{AssemblyError, SignError, TemplateError};
pub use manager::BlockTemplateManager;
pub use miner::{MineOutcome, Miner, RestartReason};
pub use template::{BlockTemplate, PowSolution, TemplateId};
