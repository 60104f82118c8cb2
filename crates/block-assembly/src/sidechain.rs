//! Sidechain payouts and coinbase commitments for the next block.
//!
//! Everything here reads the state as of the current tip, which is the
//! pre-block state of the block being assembled.

use std::collections::BTreeSet;

use bitcoin::{
    absolute::LockTime, transaction::Version, Amount, OutPoint, ScriptBuf, Sequence, Transaction,
    TxIn, TxOut, Witness,
};
use drivechain_consensus_logic::SidechainDb;
use drivechain_primitives::{
    buf::Buf32, constants::CRITICAL_FEE_SCRIPT, sidechain::SidechainNumber,
};
use drivechain_state::{
    bundle,
    commitment::Commitment,
    sidechain::SidechainProposal,
    update_bytes::{abstain_all, generate_update_bytes, parse_update_bytes},
    vote::VoteVector,
    withdrawal::WithdrawalLedger,
};
use tracing::*;

use crate::{
    chain::ChainView,
    errors::AssemblyError,
    mempool::MempoolEntry,
    signer::{InputSigner, SidechainKeys},
};

/// A withdrawal bundle ready to go in the block.
#[derive(Clone, Debug)]
pub struct Payout {
    pub slot: SidechainNumber,
    pub hash: Buf32,
    pub tx: Transaction,

    /// Mainchain fee the bundle pays the miner.
    pub fee: Amount,
}

/// Builds a payout for every active sidechain with a bundle that has enough
/// workscore.  Slots where anything is off are skipped for this block.
pub fn build_payouts(
    db: &SidechainDb,
    chain: &impl ChainView,
    keys: &impl SidechainKeys,
    signer: &impl InputSigner,
) -> Vec<Payout> {
    db.state()
        .registry()
        .active_slots()
        .filter_map(|slot| build_payout(db, chain, keys, signer, slot))
        .collect()
}

fn build_payout(
    db: &SidechainDb,
    chain: &impl ChainView,
    keys: &impl SidechainKeys,
    signer: &impl InputSigner,
    slot: SidechainNumber,
) -> Option<Payout> {
    let params = db.params();
    let state = db.state();

    let best = state.withdrawals().select_best(slot)?;
    if best.score() < params.min_workscore {
        return None;
    }
    let hash = *best.hash();

    let Some(raw) = db.cache().raw_bundle(&hash) else {
        warn!(%slot, %hash, "no raw bundle cached for approved withdrawal");
        return None;
    };
    let (Some(fee), Some(payout_total)) = (bundle::bundle_fee(raw), bundle::raw_payout_total(raw))
    else {
        warn!(%slot, %hash, "cached bundle is malformed");
        return None;
    };
    let Some(ctip) = state.deposits().ctip(slot) else {
        warn!(%slot, %hash, "no CTIP to pay withdrawal from");
        return None;
    };
    let Some(change) = payout_total
        .checked_add(fee)
        .and_then(|spent| ctip.amount().checked_sub(spent))
    else {
        warn!(%slot, %hash, ctip = %ctip.amount(), "withdrawal exceeds sidechain funds");
        return None;
    };

    let mut tx = raw.clone();
    tx.input = vec![TxIn {
        previous_output: ctip.outpoint(),
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    }];
    tx.output.push(TxOut {
        value: change,
        script_pubkey: slot.script(),
    });

    let Some(key) = keys.key_for(slot) else {
        warn!(%slot, "no key to sign withdrawal payout");
        return None;
    };
    if let Err(e) = signer.sign_input(&mut tx, 0, &slot.script(), ctip.amount(), &key) {
        warn!(%slot, %hash, err = %e, "failed to sign withdrawal payout");
        return None;
    }

    let txid = tx.compute_txid();
    let replayed =
        (0..tx.output.len() as u32).any(|vout| chain.have_coin(&OutPoint::new(txid, vout)));
    if replayed {
        warn!(%slot, %hash, %txid, "payout outputs already exist, skipping");
        return None;
    }

    let mut scratch = state.clone();
    if let Err(e) = scratch.spend_withdrawal(params, slot, Buf32::zero(), &tx, 0, true) {
        warn!(%slot, %hash, err = %e, "payout fails validation");
        return None;
    }

    debug!(%slot, %hash, %txid, %fee, "built withdrawal payout");
    Some(Payout {
        slot,
        hash,
        tx,
        fee,
    })
}

/// The newest cached bundle per active slot that the chain doesn't know yet.
pub fn withdrawal_commitments(db: &SidechainDb) -> Vec<(SidechainNumber, Buf32)> {
    let state = db.state();
    state
        .registry()
        .active_slots()
        .filter_map(|slot| {
            db.cache()
                .bundles_for(slot)
                .filter(|b| !state.withdrawals().is_known(slot, &b.hash))
                .last()
                .map(|b| (slot, b.hash))
        })
        .collect()
}

/// Update bytes carrying the node's votes, or `None` when leaving them out
/// (which counts as abstaining everywhere) has the same effect.
///
/// `new_slots` are the slots getting a new withdrawal in this block, whose
/// scores don't change.
pub fn update_bytes(
    db: &SidechainDb,
    new_slots: &BTreeSet<SidechainNumber>,
) -> Result<Option<Vec<u8>>, AssemblyError> {
    let ledger = db.state().withdrawals();
    if ledger.tracked().is_empty() {
        return Ok(None);
    }

    let pending = ledger.pending_by_slot();
    let votes = db.cache().votes();
    let intended = simulate_scores(ledger, votes, new_slots);
    if simulate_scores(ledger, &abstain_all(&pending), new_slots) == intended {
        trace!("votes match abstaining, leaving out update bytes");
        return Ok(None);
    }

    let bytes = generate_update_bytes(&pending, votes);
    let parsed = parse_update_bytes(&bytes, &pending).map_err(|e| {
        error!(err = %e, "can't parse our own update bytes");
        AssemblyError::InconsistentUpdateBytes(e.to_string())
    })?;
    if simulate_scores(ledger, &parsed, new_slots) != intended {
        error!(?votes, ?parsed, "update bytes don't reproduce our votes");
        return Err(AssemblyError::InconsistentUpdateBytes(
            "scores differ after re-simulation".to_owned(),
        ));
    }

    Ok(Some(bytes))
}

fn simulate_scores(
    ledger: &WithdrawalLedger,
    votes: &VoteVector,
    new_slots: &BTreeSet<SidechainNumber>,
) -> Vec<(SidechainNumber, Buf32, u16)> {
    let mut ledger = ledger.clone();
    ledger.update_scores(votes, new_slots);
    ledger.scores()
}

/// First locally queued proposal that doesn't clash with one being voted on.
pub fn proposal_commitment(db: &SidechainDb) -> Option<SidechainProposal> {
    let statuses = db.state().activation().statuses();
    db.cache()
        .proposals()
        .iter()
        .find(|prop| {
            let hash = prop.identity_hash();
            !statuses.iter().any(|st| {
                let other = st.proposal();
                *st.hash() == hash
                    || other.title == prop.title
                    || other.hash_id_1 == prop.hash_id_1
                    || other.hash_id_2 == prop.hash_id_2
            })
        })
        .cloned()
}

/// Acks for the proposals this node supports, at most one per slot.
pub fn ack_commitments(db: &SidechainDb) -> Vec<Buf32> {
    let activation = db.state().activation();
    let mut slots = BTreeSet::new();
    db.cache()
        .acks()
        .iter()
        .filter(|hash| {
            activation
                .get(hash)
                .is_some_and(|st| slots.insert(st.proposal().slot))
        })
        .copied()
        .collect()
}

/// Coinbase commitments for the next block.
#[derive(Clone, Debug, Default)]
pub struct SidechainCommitments {
    pub proposal: Option<SidechainProposal>,
    pub acks: Vec<Buf32>,
    pub withdrawals: Vec<(SidechainNumber, Buf32)>,
    pub update_bytes: Option<Vec<u8>>,
}

impl SidechainCommitments {
    /// Works out every commitment, in the order the rules require.
    pub fn assemble(db: &SidechainDb) -> Result<Self, AssemblyError> {
        let withdrawals = withdrawal_commitments(db);
        let new_slots = withdrawals.iter().map(|(slot, _)| *slot).collect();
        let update_bytes = update_bytes(db, &new_slots)?;
        let proposal = proposal_commitment(db);
        let acks = ack_commitments(db);

        Ok(Self {
            proposal,
            acks,
            withdrawals,
            update_bytes,
        })
    }

    pub fn to_scripts(&self) -> Vec<ScriptBuf> {
        let proposal = self.proposal.clone().map(Commitment::Proposal);
        let acks = self.acks.iter().map(|hash| Commitment::Ack(*hash));
        let withdrawals = self
            .withdrawals
            .iter()
            .map(|(slot, hash)| Commitment::WithdrawalHash {
                slot: *slot,
                hash: *hash,
            });
        let update_bytes = self.update_bytes.clone().map(Commitment::UpdateBytes);

        proposal
            .into_iter()
            .chain(acks)
            .chain(withdrawals)
            .chain(update_bytes)
            .map(|c| c.to_script())
            .collect()
    }
}

/// Collects the critical data fee outputs of the selected transactions into
/// one transaction paying `payout_script`.
pub fn critical_fee_sweep(
    selected: &[MempoolEntry],
    payout_script: &ScriptBuf,
) -> Option<Transaction> {
    let mut input = Vec::new();
    let mut total = Amount::ZERO;
    for entry in selected.iter().filter(|e| e.critical.is_some()) {
        let txid = entry.txid();
        for (vout, out) in entry.tx.output.iter().enumerate() {
            if out.script_pubkey.as_bytes() != CRITICAL_FEE_SCRIPT {
                continue;
            }
            total = total.checked_add(out.value)?;
            input.push(TxIn {
                previous_output: OutPoint::new(txid, vout as u32),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            });
        }
    }
    if input.is_empty() || total == Amount::ZERO {
        return None;
    }

    Some(Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output: vec![TxOut {
            value: total,
            script_pubkey: payout_script.clone(),
        }],
    })
}
