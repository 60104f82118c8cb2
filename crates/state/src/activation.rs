//! Sidechain proposal tracking and activation.

use std::collections::BTreeSet;

use borsh::{BorshDeserialize, BorshSerialize};
use drivechain_primitives::{buf::Buf32, params::SidechainParams, sidechain::SidechainNumber};
use serde::{Deserialize, Serialize};
use tracing::*;

use crate::{errors::ActivationError, registry::SidechainRegistry, sidechain::SidechainProposal};

/// A proposal collecting acks.
#[derive(
    Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct ActivationStatus {
    proposal: SidechainProposal,
    hash: Buf32,

    /// Blocks the proposal has been tracked for.
    age: u32,

    /// Blocks in which nobody acked the proposal.
    fail_count: u32,
}

impl ActivationStatus {
    fn new(proposal: SidechainProposal) -> Self {
        let hash = proposal.identity_hash();
        Self {
            proposal,
            hash,
            age: 0,
            fail_count: 0,
        }
    }

    pub fn proposal(&self) -> &SidechainProposal {
        &self.proposal
    }

    pub fn hash(&self) -> &Buf32 {
        &self.hash
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }
}

/// What happened to the tracked proposals in a block.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ActivationOutcome {
    /// Proposal that started being tracked.
    pub tracked: Option<Buf32>,

    /// Proposals that became active, with their slots.
    pub promoted: Vec<(SidechainNumber, Buf32)>,

    /// Proposals dropped for missing too many acks.
    pub rejected: Vec<Buf32>,

    /// Proposals dropped for outliving their activation period.
    pub expired: Vec<Buf32>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ActivationTracker {
    statuses: Vec<ActivationStatus>,
}

impl ActivationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(&self) -> &[ActivationStatus] {
        &self.statuses
    }

    pub fn get(&self, hash: &Buf32) -> Option<&ActivationStatus> {
        self.statuses.iter().find(|st| st.hash == *hash)
    }

    /// Checks a block's proposals and acks and resolves the acks to the
    /// proposals they name.  Acks for unknown proposals are ignored.
    pub fn resolve_acks(
        &self,
        proposals: &[SidechainProposal],
        acks: &[Buf32],
    ) -> Result<BTreeSet<Buf32>, ActivationError> {
        if proposals.len() > 1 {
            return Err(ActivationError::MultipleProposals(proposals.len()));
        }

        let mut slots = BTreeSet::new();
        let mut acked = BTreeSet::new();
        for hash in acks {
            let Some(status) = self.get(hash) else {
                trace!(%hash, "ignoring ack for unknown proposal");
                continue;
            };
            if !slots.insert(status.proposal.slot) {
                return Err(ActivationError::DuplicateAckSlot(status.proposal.slot));
            }
            acked.insert(*hash);
        }

        Ok(acked)
    }

    /// Advances the tracker by a block, installing any proposal that reaches
    /// its activation period into the registry.
    ///
    /// Fails without changing anything if the block has more than one
    /// proposal or acks two proposals for the same slot.
    pub fn process_block(
        &mut self,
        registry: &mut SidechainRegistry,
        params: &SidechainParams,
        proposals: &[SidechainProposal],
        acks: &[Buf32],
    ) -> Result<ActivationOutcome, ActivationError> {
        let acked = self.resolve_acks(proposals, acks)?;
        let mut outcome = ActivationOutcome::default();

        if let Some(prop) = proposals.first() {
            let status = ActivationStatus::new(prop.clone());
            if self.get(&status.hash).is_none() {
                debug!(slot = %prop.slot, hash = %status.hash, title = %prop.title, "tracking sidechain proposal");
                outcome.tracked = Some(status.hash);
                self.statuses.push(status);
            }
        }

        for status in self.statuses.iter_mut() {
            status.age += 1;
            if status.age != 1 && !acked.contains(&status.hash) {
                status.fail_count += 1;
            }
        }

        let mut promote = Vec::new();
        let mut kept = Vec::with_capacity(self.statuses.len());
        for status in self.statuses.drain(..) {
            let slot = status.proposal.slot;
            let required = if registry.is_active(slot) {
                params.replacement_period
            } else {
                params.activation_period
            };

            if status.fail_count >= params.max_activation_failures {
                debug!(%slot, hash = %status.hash, "sidechain proposal rejected");
                outcome.rejected.push(status.hash);
            } else if status.age > required {
                debug!(%slot, hash = %status.hash, "sidechain proposal expired");
                outcome.expired.push(status.hash);
            } else if status.age == required {
                promote.push(status);
            } else {
                kept.push(status);
            }
        }
        self.statuses = kept;

        for status in promote {
            let slot = status.proposal.slot;
            let replaced = registry.install(status.proposal.to_sidechain());
            info!(%slot, hash = %status.hash, title = %status.proposal.title, replaced = replaced.is_some(), "sidechain activated");
            outcome.promoted.push((slot, status.hash));
        }

        Ok(outcome)
    }
}
