//! Consensus-layer state of the sidechain rules: the sidechain registry, the
//! withdrawal and deposit ledgers, the activation tracker and the wire
//! encodings of the coinbase commitments that drive them.

pub mod activation;
pub mod bundle;
pub mod commitment;
pub mod deposit;
pub mod errors;
pub mod registry;
pub mod scdb_state;
pub mod sidechain;
pub mod update_bytes;
pub mod vote;
pub mod withdrawal;

pub mod prelude;
