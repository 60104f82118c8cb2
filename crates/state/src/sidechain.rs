//! Sidechain descriptions, both as proposed on chain and once active.

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};
use drivechain_primitives::{buf::Buf32, hash, sidechain::SidechainNumber};
use serde::{Deserialize, Serialize};

/// A sidechain proposal as committed in a coinbase.
///
/// The borsh encoding of this struct is the proposal commitment payload, so
/// the field order is consensus-critical.
#[derive(
    Clone,
    Debug,
    Eq,
    PartialEq,
    Arbitrary,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct SidechainProposal {
    pub slot: SidechainNumber,
    pub version: i32,
    pub title: String,
    pub description: String,
    pub hash_id_1: Buf32,
    pub hash_id_2: Buf32,
}

impl SidechainProposal {
    /// Hash that acks refer to.
    pub fn identity_hash(&self) -> Buf32 {
        hash::compute_borsh_hash(self)
    }

    /// Builds the active sidechain this proposal turns into.
    pub fn to_sidechain(&self) -> Sidechain {
        Sidechain {
            slot: self.slot,
            active: true,
            version: self.version,
            title: self.title.clone(),
            description: self.description.clone(),
            hash_id_1: self.hash_id_1,
            hash_id_2: self.hash_id_2,
        }
    }
}

/// Sidechain installed in a registry slot.
#[derive(
    Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Sidechain {
    slot: SidechainNumber,
    active: bool,
    version: i32,
    title: String,
    description: String,
    hash_id_1: Buf32,
    hash_id_2: Buf32,
}

impl Sidechain {
    pub fn slot(&self) -> SidechainNumber {
        self.slot
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn hash_id_1(&self) -> &Buf32 {
        &self.hash_id_1
    }

    pub fn hash_id_2(&self) -> &Buf32 {
        &self.hash_id_2
    }
}
