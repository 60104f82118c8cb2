use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use drivechain_primitives::{buf::Buf32, sidechain::SidechainNumber};
use serde::{Deserialize, Serialize};

/// A miner's vote on the withdrawals of one sidechain.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub enum Vote {
    #[default]
    Abstain,
    Downvote,
    Upvote(Buf32),
}

/// Votes for one block, keyed by slot.  Slots that aren't present abstain.
pub type VoteVector = BTreeMap<SidechainNumber, Vote>;
