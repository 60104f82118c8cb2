use bitcoin::BlockHash;
use drivechain_consensus_logic::errors::ScdbError;
use drivechain_primitives::sidechain::SidechainNumber;
use thiserror::Error;

use crate::template::TemplateId;

/// Errors that abort building a block template.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// Update bytes we generated don't decode to the votes we meant to cast.
    /// This is a bug in the assembler and never a transient condition.
    #[error("generated update bytes are inconsistent: {0}")]
    InconsistentUpdateBytes(String),

    #[error("sidechain db at {scdb:?} but chain tip is {chain}")]
    TipMismatch {
        scdb: Option<BlockHash>,
        chain: BlockHash,
    },

    #[error("fees overflow")]
    FeeOverflow,

    #[error("template fails sidechain checks: {0}")]
    Scdb(#[from] ScdbError),
}

#[derive(Debug, Error)]
pub enum SignError {
    #[error("no key for sidechain {0}")]
    MissingKey(SidechainNumber),

    #[error("input {0} out of range")]
    InputOutOfRange(usize),

    #[error("signature too large to push")]
    PushTooLarge,
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unknown template {0:?}")]
    UnknownTemplate(TemplateId),

    #[error("header {0} doesn't meet its target")]
    InsufficientWork(BlockHash),

    #[error("template {0:?} was built on a stale tip")]
    Stale(TemplateId),
}
