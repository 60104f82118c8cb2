//! Node-local sidechain data that isn't consensus state: the miner's votes,
//! withdrawal bundles received from sidechains and the proposals this node
//! wants to create or ack.

use bitcoin::Transaction;
use drivechain_primitives::{buf::Buf32, sidechain::SidechainNumber};
use drivechain_state::{
    bundle,
    sidechain::SidechainProposal,
    vote::{Vote, VoteVector},
};
use tracing::*;

/// A raw withdrawal bundle handed to us by a sidechain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CachedBundle {
    pub slot: SidechainNumber,
    pub hash: Buf32,
    pub raw: Transaction,
}

#[derive(Clone, Debug, Default)]
pub struct ScdbCache {
    votes: VoteVector,

    /// In the order they were received.
    bundles: Vec<CachedBundle>,
    proposals: Vec<SidechainProposal>,
    acks: Vec<Buf32>,
}

impl ScdbCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn votes(&self) -> &VoteVector {
        &self.votes
    }

    pub fn vote(&self, slot: SidechainNumber) -> Vote {
        self.votes.get(&slot).copied().unwrap_or_default()
    }

    pub fn set_vote(&mut self, slot: SidechainNumber, vote: Vote) {
        if vote == Vote::Abstain {
            self.votes.remove(&slot);
        } else {
            self.votes.insert(slot, vote);
        }
    }

    pub fn clear_votes(&mut self) {
        self.votes.clear();
    }

    /// Caches a raw bundle, returning its hash.  Caching the same bundle again
    /// is a no-op.
    pub fn cache_bundle(&mut self, slot: SidechainNumber, raw: Transaction) -> Buf32 {
        let hash = bundle::raw_bundle_hash(&raw);
        if self.raw_bundle(&hash).is_none() {
            debug!(%slot, %hash, "caching withdrawal bundle");
            self.bundles.push(CachedBundle { slot, hash, raw });
        }
        hash
    }

    pub fn raw_bundle(&self, hash: &Buf32) -> Option<&Transaction> {
        self.bundles
            .iter()
            .find(|b| b.hash == *hash)
            .map(|b| &b.raw)
    }

    pub fn bundles(&self) -> &[CachedBundle] {
        &self.bundles
    }

    pub fn bundles_for(&self, slot: SidechainNumber) -> impl Iterator<Item = &CachedBundle> + '_ {
        self.bundles.iter().filter(move |b| b.slot == slot)
    }

    pub fn remove_bundle(&mut self, hash: &Buf32) -> bool {
        let before = self.bundles.len();
        self.bundles.retain(|b| b.hash != *hash);
        before != self.bundles.len()
    }

    /// Drops every bundle cached for `slot`, used when a new sidechain takes
    /// the slot over.
    pub fn remove_bundles_for(&mut self, slot: SidechainNumber) -> usize {
        let before = self.bundles.len();
        self.bundles.retain(|b| b.slot != slot);
        before - self.bundles.len()
    }

    /// Queues a proposal to be committed by this node.  Returns its hash.
    pub fn add_proposal(&mut self, proposal: SidechainProposal) -> Buf32 {
        let hash = proposal.identity_hash();
        if !self.proposals.iter().any(|p| p.identity_hash() == hash) {
            self.proposals.push(proposal);
        }
        hash
    }

    pub fn proposals(&self) -> &[SidechainProposal] {
        &self.proposals
    }

    pub fn remove_proposal(&mut self, hash: &Buf32) {
        self.proposals.retain(|p| p.identity_hash() != *hash);
    }

    /// Marks a proposal as one this node acks.
    pub fn ack_proposal(&mut self, hash: Buf32) {
        if !self.acks.contains(&hash) {
            self.acks.push(hash);
        }
    }

    pub fn acks(&self) -> &[Buf32] {
        &self.acks
    }

    pub fn remove_ack(&mut self, hash: &Buf32) {
        self.acks.retain(|h| h != hash);
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::Amount;
    use drivechain_test_utils::{bitcoin::payout_output, ArbitraryGenerator};

    use super::*;

    #[test]
    fn test_votes_are_sparse() {
        let mut cache = ScdbCache::new();
        let slot = SidechainNumber(3);
        assert_eq!(cache.vote(slot), Vote::Abstain);

        cache.set_vote(slot, Vote::Downvote);
        assert_eq!(cache.votes().len(), 1);
        cache.set_vote(slot, Vote::Abstain);
        assert!(cache.votes().is_empty());
    }

    #[test]
    fn test_bundle_cache() {
        let mut cache = ScdbCache::new();
        let raw = bundle::build_raw_bundle(Amount::from_sat(10), vec![payout_output(500)]);
        let hash = cache.cache_bundle(SidechainNumber(1), raw.clone());
        assert_eq!(cache.cache_bundle(SidechainNumber(1), raw.clone()), hash);
        assert_eq!(cache.bundles().len(), 1);
        assert_eq!(cache.raw_bundle(&hash), Some(&raw));
        assert_eq!(cache.bundles_for(SidechainNumber(2)).count(), 0);

        assert!(cache.remove_bundle(&hash));
        assert!(!cache.remove_bundle(&hash));
        assert!(cache.raw_bundle(&hash).is_none());
    }

    #[test]
    fn test_remove_bundles_for_slot() {
        let mut cache = ScdbCache::new();
        let raw = |fee| bundle::build_raw_bundle(Amount::from_sat(fee), vec![payout_output(500)]);
        cache.cache_bundle(SidechainNumber(1), raw(10));
        cache.cache_bundle(SidechainNumber(1), raw(20));
        let kept = cache.cache_bundle(SidechainNumber(2), raw(30));

        assert_eq!(cache.remove_bundles_for(SidechainNumber(1)), 2);
        assert_eq!(cache.remove_bundles_for(SidechainNumber(1)), 0);
        assert_eq!(cache.bundles().len(), 1);
        assert!(cache.raw_bundle(&kept).is_some());
    }

    #[test]
    fn test_proposals_and_acks() {
        let mut cache = ScdbCache::new();
        let prop: SidechainProposal = ArbitraryGenerator::new().generate();
        let hash = cache.add_proposal(prop.clone());
        cache.add_proposal(prop);
        assert_eq!(cache.proposals().len(), 1);

        cache.ack_proposal(hash);
        cache.ack_proposal(hash);
        assert_eq!(cache.acks(), &[hash]);

        cache.remove_proposal(&hash);
        cache.remove_ack(&hash);
        assert!(cache.proposals().is_empty());
        assert!(cache.acks().is_empty());
    }
}
