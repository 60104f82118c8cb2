use bitcoin::Txid;
use drivechain_primitives::{buf::Buf32, sidechain::SidechainNumber};
use thiserror::Error;

/// Errors decoding commitment scripts and update bytes.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum CodecError {
    #[error("commitment payload truncated ({0} bytes)")]
    Truncated(usize),

    #[error("malformed sidechain proposal: {0}")]
    MalformedProposal(String),

    #[error("ack commitment has wrong payload length {0}")]
    InvalidAckLength(usize),

    #[error("withdrawal commitment has wrong payload length {0}")]
    InvalidWithdrawalCommitLength(usize),

    #[error("update bytes are empty")]
    MissingVersion,

    #[error("unsupported update bytes version {0}")]
    UnsupportedVersion(u8),

    #[error("update bytes token area has odd length {0}")]
    OddTokenLength(usize),

    #[error("expected {expected} vote tokens, found {found}")]
    TokenCountMismatch { expected: usize, found: usize },

    #[error("vote index {index} out of range for sidechain {slot}")]
    IndexOutOfRange { slot: SidechainNumber, index: u16 },
}

/// Reasons a withdrawal bundle may not be added or spent.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum WithdrawalError {
    #[error("sidechain {0} is not active")]
    SidechainInactive(SidechainNumber),

    #[error("withdrawal {1} already known on sidechain {0}")]
    Duplicate(SidechainNumber, Buf32),

    #[error("bundle has {0} outputs, need at least 3")]
    TooFewOutputs(usize),

    #[error("withdrawal {0} does not have enough workscore")]
    InsufficientWorkScore(Buf32),

    #[error("bundle has {0} return destination outputs, need exactly 1")]
    ReturnDestCount(usize),

    #[error("bundle has {0} sidechain outputs, need exactly 1")]
    SidechainOutputCount(usize),

    #[error("bundle change output is not the last output")]
    MisplacedChange,

    #[error("bundle fee output is malformed")]
    InvalidFeeOutput,

    #[error("sidechain {0} has no CTIP")]
    MissingCtip(SidechainNumber),

    #[error("bundle does not spend the CTIP of sidechain {0}")]
    CtipNotSpent(SidechainNumber),

    #[error("bundle amounts do not reconcile against the CTIP")]
    Unbalanced,

    #[error("bundle change deposit: {0}")]
    Deposit(#[from] DepositError),
}

/// Reasons a list of deposits cannot be added.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum DepositError {
    #[error("deposit output index {1} out of range in {0}")]
    InvalidOutputIndex(Txid, u32),

    #[error("deposit {0} pays to {1} sidechain outputs")]
    MultipleSidechainOutputs(Txid, usize),

    #[error("deposit {0} does not exceed the CTIP value")]
    ValueNotAboveCtip(Txid),

    #[error("deposits of sidechain {0} have no chain head")]
    NoChainHead(SidechainNumber),

    #[error("deposits of sidechain {slot} have {count} chain heads")]
    MultipleChainHeads { slot: SidechainNumber, count: usize },

    #[error("deposits of sidechain {slot} break the spend chain ({unplaced} unplaced)")]
    BrokenChain {
        slot: SidechainNumber,
        unplaced: usize,
    },
}

/// Reasons a block's activation commitments are invalid.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ActivationError {
    #[error("block has {0} sidechain proposals")]
    MultipleProposals(usize),

    #[error("block acks more than one proposal for sidechain {0}")]
    DuplicateAckSlot(SidechainNumber),
}
