pub use crate::{
    activation::{ActivationOutcome, ActivationStatus, ActivationTracker},
    commitment::Commitment,
    deposit::{Ctip, Deposit, DepositLedger},
    registry::SidechainRegistry,
    scdb_state::ScdbState,
    sidechain::{Sidechain, SidechainProposal},
    vote::{Vote, VoteVector},
    withdrawal::{FailedWithdrawal, SpentWithdrawal, WithdrawalLedger, WithdrawalState},
};
