use bitcoin::BlockHash;
use drivechain_primitives::{buf::Buf32, sidechain::SidechainNumber};
use drivechain_state::errors::{ActivationError, CodecError, DepositError, WithdrawalError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScdbError {
    #[error("block {0} rejected: {1}")]
    BlockRejected(BlockHash, RejectReason),

    #[error("block {block} builds on {prev}, expected tip {tip}")]
    NotOnTip {
        block: BlockHash,
        prev: BlockHash,
        tip: BlockHash,
    },

    #[error("tried to disconnect {0}, which is not the tip")]
    DisconnectNotTip(BlockHash),

    #[error("missing undo data for block {0}")]
    MissingUndo(BlockHash),

    #[error("undo of {0} failed: {1}")]
    Undo(BlockHash, DepositError),

    #[error("history: {0}")]
    History(#[from] HistoryError),
}

/// Why a block is invalid under the sidechain rules.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum RejectReason {
    #[error("block has no coinbase")]
    MissingCoinbase,

    #[error("malformed commitment: {0}")]
    Codec(#[from] CodecError),

    #[error("{0} sidechain proposals in coinbase")]
    MultipleProposals(usize),

    #[error("{0} update bytes commitments in coinbase")]
    MultipleUpdateBytes(usize),

    #[error("more than one new withdrawal for sidechain {0}")]
    MultipleWithdrawalCommits(SidechainNumber),

    #[error("transaction {0} spends the CTIP of sidechain {1} without depositing to it")]
    CtipSpentWithoutDeposit(bitcoin::Txid, SidechainNumber),

    #[error("withdrawal: {0}")]
    Withdrawal(#[from] WithdrawalError),

    #[error("deposit: {0}")]
    Deposit(#[from] DepositError),

    #[error("activation: {0}")]
    Activation(#[from] ActivationError),
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum HistoryError {
    #[error("snapshot for block {0} already written")]
    AlreadyWritten(Buf32),

    #[error("failed to encode snapshot: {0}")]
    Encode(String),

    #[error("failed to decode snapshot for block {0}: {1}")]
    Decode(Buf32, String),
}
