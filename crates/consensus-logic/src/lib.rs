//! Connects blocks to the sidechain consensus state.
//!
//! [`SidechainDb`] is driven by block validation: every connected block goes
//! through [`SidechainDb::update`] and every disconnected one through
//! [`SidechainDb::undo`].  The block assembler takes the same lock to read
//! the state and to dry-run its drafts.

use std::sync::Arc;

use parking_lot::Mutex;

pub mod cache;
pub mod commitments;
pub mod errors;
pub mod history;
pub mod sidechain_db;
pub mod undo;

pub use sidechain_db::{
    apply_deposit_tx, pays_active_sidechain, BlockEffects, SidechainDb, UndoOutcome,
};

/// The database as shared between block validation and the block assembler.
pub type SharedScdb = Arc<Mutex<SidechainDb>>;
