//! Withdrawal bundle tracking and workscore voting.

use std::collections::{BTreeMap, BTreeSet};

use borsh::{BorshDeserialize, BorshSerialize};
use drivechain_primitives::{buf::Buf32, params::SidechainParams, sidechain::SidechainNumber};
use serde::{Deserialize, Serialize};
use tracing::*;

use crate::{
    errors::WithdrawalError,
    registry::SidechainRegistry,
    update_bytes::PendingSlot,
    vote::{Vote, VoteVector},
};

/// A bundle being voted on.
#[derive(
    Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct WithdrawalState {
    slot: SidechainNumber,
    hash: Buf32,

    /// Blocks until the bundle fails.  Only ever decreases.
    blocks_left: u16,

    /// Workscore, bounded by `MAX_WORKSCORE`.
    score: u16,
}

impl WithdrawalState {
    pub fn new(slot: SidechainNumber, hash: Buf32, blocks_left: u16, score: u16) -> Self {
        Self {
            slot,
            hash,
            blocks_left,
            score,
        }
    }

    pub fn slot(&self) -> SidechainNumber {
        self.slot
    }

    pub fn hash(&self) -> &Buf32 {
        &self.hash
    }

    pub fn blocks_left(&self) -> u16 {
        self.blocks_left
    }

    pub fn score(&self) -> u16 {
        self.score
    }

    /// Whether the bundle can no longer reach the workscore it needs.
    fn is_expired(&self, min_workscore: u16) -> bool {
        self.blocks_left == 0 || min_workscore.saturating_sub(self.score) > self.blocks_left
    }
}

/// A bundle that was paid out in a block.
#[derive(
    Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct SpentWithdrawal {
    pub slot: SidechainNumber,
    pub hash: Buf32,
    pub block_hash: Buf32,
}

/// A bundle that ran out of time.
#[derive(
    Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct FailedWithdrawal {
    pub slot: SidechainNumber,
    pub hash: Buf32,

    /// Block in which the bundle failed.
    pub block_hash: Buf32,

    /// State of the bundle right before it failed.
    pub final_state: WithdrawalState,
}

/// Every withdrawal bundle the chain knows about, tracked or finished.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WithdrawalLedger {
    /// Bundles being voted on, in insertion order.
    tracked: Vec<WithdrawalState>,
    spent: Vec<SpentWithdrawal>,
    failed: Vec<FailedWithdrawal>,
}

impl WithdrawalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked(&self) -> &[WithdrawalState] {
        &self.tracked
    }

    pub fn spent(&self) -> &[SpentWithdrawal] {
        &self.spent
    }

    pub fn failed(&self) -> &[FailedWithdrawal] {
        &self.failed
    }

    pub fn get(&self, slot: SidechainNumber, hash: &Buf32) -> Option<&WithdrawalState> {
        self.tracked
            .iter()
            .find(|st| st.slot == slot && st.hash == *hash)
    }

    pub fn is_spent(&self, slot: SidechainNumber, hash: &Buf32) -> bool {
        self.spent.iter().any(|s| s.slot == slot && s.hash == *hash)
    }

    pub fn is_failed(&self, slot: SidechainNumber, hash: &Buf32) -> bool {
        self.failed.iter().any(|f| f.slot == slot && f.hash == *hash)
    }

    /// Whether the bundle is tracked, spent or failed.
    pub fn is_known(&self, slot: SidechainNumber, hash: &Buf32) -> bool {
        self.get(slot, hash).is_some() || self.is_spent(slot, hash) || self.is_failed(slot, hash)
    }

    /// Starts tracking a new bundle.
    pub fn add_withdrawal(
        &mut self,
        registry: &SidechainRegistry,
        params: &SidechainParams,
        slot: SidechainNumber,
        hash: Buf32,
    ) -> Result<(), WithdrawalError> {
        if !registry.is_active(slot) {
            return Err(WithdrawalError::SidechainInactive(slot));
        }
        if self.is_known(slot, &hash) {
            return Err(WithdrawalError::Duplicate(slot, hash));
        }

        debug!(%slot, %hash, "tracking new withdrawal");
        self.tracked.push(WithdrawalState::new(
            slot,
            hash,
            params.initial_blocks_left(),
            1,
        ));
        Ok(())
    }

    /// Whether the bundle has enough workscore to be paid out.
    pub fn check_work_score(
        &self,
        registry: &SidechainRegistry,
        params: &SidechainParams,
        slot: SidechainNumber,
        hash: &Buf32,
    ) -> bool {
        registry.is_active(slot)
            && self
                .get(slot, hash)
                .is_some_and(|st| st.score >= params.min_workscore)
    }

    /// Applies a block's votes.
    ///
    /// Slots in `new_slots` got a new bundle in this block and are left alone.
    /// Everything other than an upvote for exactly this bundle counts against
    /// it, abstaining included.
    pub fn update_scores(&mut self, votes: &VoteVector, new_slots: &BTreeSet<SidechainNumber>) {
        for st in self.tracked.iter_mut() {
            if new_slots.contains(&st.slot) {
                continue;
            }
            match votes.get(&st.slot) {
                Some(Vote::Upvote(hash)) if *hash == st.hash => {
                    st.score = st.score.saturating_add(1);
                }
                _ => st.score = st.score.saturating_sub(1),
            }
        }
    }

    /// Ages every tracked bundle by a block and fails the ones that can't make
    /// it anymore.  Returns the hashes of the bundles that failed.
    pub fn age_and_expire(&mut self, params: &SidechainParams, block_hash: Buf32) -> Vec<Buf32> {
        let mut expired = Vec::new();
        let mut kept = Vec::with_capacity(self.tracked.len());

        for mut st in self.tracked.drain(..) {
            st.blocks_left = st.blocks_left.saturating_sub(1);
            if st.is_expired(params.min_workscore) {
                info!(slot = %st.slot, hash = %st.hash, score = st.score, "withdrawal failed");
                expired.push(st.hash);
                self.failed.push(FailedWithdrawal {
                    slot: st.slot,
                    hash: st.hash,
                    block_hash,
                    final_state: st,
                });
            } else {
                kept.push(st);
            }
        }

        self.tracked = kept;
        expired
    }

    /// Moves a tracked bundle to the spent set.
    pub(crate) fn mark_spent(&mut self, slot: SidechainNumber, hash: Buf32, block_hash: Buf32) {
        self.tracked.retain(|st| !(st.slot == slot && st.hash == hash));
        self.spent.push(SpentWithdrawal {
            slot,
            hash,
            block_hash,
        });
    }

    /// Highest scoring bundle of a slot.  Among equal scores the last one
    /// added wins.
    pub fn select_best(&self, slot: SidechainNumber) -> Option<&WithdrawalState> {
        let mut best: Option<&WithdrawalState> = None;
        for st in self.tracked.iter().rev().filter(|st| st.slot == slot) {
            if best.map_or(true, |b| st.score > b.score) {
                best = Some(st);
            }
        }
        best
    }

    /// Tracked bundle hashes grouped by slot, in ascending slot order.
    pub fn pending_by_slot(&self) -> Vec<PendingSlot> {
        let mut by_slot: BTreeMap<SidechainNumber, Vec<Buf32>> = BTreeMap::new();
        for st in &self.tracked {
            by_slot.entry(st.slot).or_default().push(st.hash);
        }
        by_slot.into_iter().collect()
    }

    /// Scores of every tracked bundle, for comparing vote outcomes.
    pub fn scores(&self) -> Vec<(SidechainNumber, Buf32, u16)> {
        self.tracked
            .iter()
            .map(|st| (st.slot, st.hash, st.score))
            .collect()
    }

    /// Drops the bundles of a slot that got a new sidechain.
    pub fn reset_slot(&mut self, slot: SidechainNumber) {
        self.tracked.retain(|st| st.slot != slot);
    }

    /// Replaces the tracked set, used when disconnecting a block.
    pub fn restore_tracked(&mut self, tracked: Vec<WithdrawalState>) {
        self.tracked = tracked;
    }

    /// Forgets the spent and failed records made in a block.
    pub fn forget_block(&mut self, block_hash: &Buf32) {
        self.spent.retain(|s| s.block_hash != *block_hash);
        self.failed.retain(|f| f.block_hash != *block_hash);
    }
}
