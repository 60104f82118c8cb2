//! Block connect/disconnect for the sidechain consensus state.

use std::sync::Arc;

use bitcoin::{Block, BlockHash, Transaction};
use drivechain_config::ScdbConfig;
use drivechain_primitives::{buf::Buf32, params::SidechainParams, sidechain::SidechainNumber};
use drivechain_state::{
    activation::ActivationOutcome,
    bundle,
    deposit::Deposit,
    scdb_state::ScdbState,
    update_bytes::{abstain_all, parse_update_bytes},
};
use tracing::*;

use crate::{
    cache::ScdbCache,
    commitments::{scan_coinbase, BlockCommitments},
    errors::{RejectReason, ScdbError},
    history::{ScdbHistoryStore, ScdbSnapshot},
    undo::{BlockUndo, UndoJournal},
};

/// What connecting a block did to the sidechain state.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockEffects {
    /// Withdrawal bundles paid out.
    pub spent: Vec<Buf32>,

    /// Withdrawal bundles that failed.
    pub failed: Vec<Buf32>,

    /// Withdrawal bundles that started being tracked.
    pub new_withdrawals: Vec<(SidechainNumber, Buf32)>,

    /// Number of deposits recorded, not counting bundle change.
    pub deposits: usize,

    pub activation: ActivationOutcome,
}

/// Result of disconnecting a block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UndoOutcome {
    /// The activation tracker isn't rolled back, the caller has to rebuild
    /// the state with [`SidechainDb::resync`] when this is set.
    pub activation_resync_required: bool,
}

/// Owns the sidechain consensus state and the node's local sidechain caches.
pub struct SidechainDb {
    params: SidechainParams,
    state: ScdbState,
    cache: ScdbCache,
    tip: Option<BlockHash>,
    undo: UndoJournal,
    history: Option<Arc<dyn ScdbHistoryStore>>,
}

impl std::fmt::Debug for SidechainDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidechainDb")
            .field("tip", &self.tip)
            .field("active", &self.state.registry().active_count())
            .field("tracked", &self.state.withdrawals().tracked().len())
            .finish_non_exhaustive()
    }
}

impl SidechainDb {
    pub fn new(params: SidechainParams, undo_depth: usize) -> Self {
        Self {
            params,
            state: ScdbState::new(),
            cache: ScdbCache::new(),
            tip: None,
            undo: UndoJournal::new(undo_depth),
            history: None,
        }
    }

    pub fn from_config(config: &ScdbConfig) -> Self {
        Self::new(config.params(), config.undo_depth)
    }

    pub fn with_history(mut self, store: Arc<dyn ScdbHistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    pub fn params(&self) -> &SidechainParams {
        &self.params
    }

    pub fn state(&self) -> &ScdbState {
        &self.state
    }

    pub fn cache(&self) -> &ScdbCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ScdbCache {
        &mut self.cache
    }

    /// Last block connected.
    pub fn tip(&self) -> Option<BlockHash> {
        self.tip
    }

    /// Connects a block.  With `just_check` set the block is only validated
    /// and nothing is changed.
    pub fn update(&mut self, block: &Block, just_check: bool) -> Result<BlockEffects, ScdbError> {
        self.connect(block, just_check, true)
    }

    fn connect(
        &mut self,
        block: &Block,
        just_check: bool,
        write_history: bool,
    ) -> Result<BlockEffects, ScdbError> {
        let block_hash = block.block_hash();
        let (next, effects) = self.apply_block(block)?;
        if just_check {
            trace!(%block_hash, "block passes sidechain checks");
            return Ok(effects);
        }

        if let Some(store) = self.history.as_ref().filter(|_| write_history) {
            store.put_snapshot(&ScdbSnapshot::from_state(block_hash.into(), &next))?;
        }

        let activation_touched = !self.state.activation().statuses().is_empty()
            || !next.activation().statuses().is_empty()
            || !effects.activation.promoted.is_empty();
        self.undo.push(BlockUndo {
            block_hash,
            prev_tip: self.tip,
            tracked: self.state.withdrawals().tracked().to_vec(),
            activation_touched,
        });

        self.state = next;
        self.tip = Some(block_hash);

        for hash in effects.spent.iter().chain(effects.failed.iter()) {
            self.cache.remove_bundle(hash);
        }
        for (slot, hash) in &effects.activation.promoted {
            let dropped = self.cache.remove_bundles_for(*slot);
            if dropped > 0 {
                debug!(%slot, %dropped, "dropped bundles of replaced sidechain");
            }
            self.cache.remove_proposal(hash);
            self.cache.remove_ack(hash);
        }

        debug!(
            %block_hash,
            spent = effects.spent.len(),
            failed = effects.failed.len(),
            new_withdrawals = effects.new_withdrawals.len(),
            deposits = effects.deposits,
            "connected block"
        );
        Ok(effects)
    }

    /// Validates a block against the current state without changing it.
    pub fn check_block(&self, block: &Block) -> Result<BlockEffects, ScdbError> {
        self.apply_block(block).map(|(_, effects)| effects)
    }

    /// Computes the state after connecting `block`.
    fn apply_block(&self, block: &Block) -> Result<(ScdbState, BlockEffects), ScdbError> {
        let block_hash = block.block_hash();
        if let Some(tip) = self.tip {
            if block.header.prev_blockhash != tip {
                return Err(ScdbError::NotOnTip {
                    block: block_hash,
                    prev: block.header.prev_blockhash,
                    tip,
                });
            }
        }

        let reject = |reason: RejectReason| {
            warn!(%block_hash, %reason, "rejecting block");
            ScdbError::BlockRejected(block_hash, reason)
        };

        let coinbase = block
            .txdata
            .first()
            .ok_or_else(|| reject(RejectReason::MissingCoinbase))?;
        let commits = scan_coinbase(coinbase).map_err(reject)?;

        self.apply_commitments(block, &commits).map_err(reject)
    }

    /// Works on a copy of the state, so a rejected block leaves no trace.
    fn apply_commitments(
        &self,
        block: &Block,
        commits: &BlockCommitments,
    ) -> Result<(ScdbState, BlockEffects), RejectReason> {
        let block_hash: Buf32 = block.block_hash().into();
        let params = &self.params;
        let mut next = self.state.clone();
        let mut effects = BlockEffects::default();

        // Votes refer to the withdrawals pending before this block.
        let pending = self.state.withdrawals().pending_by_slot();
        let votes = match &commits.update_bytes {
            Some(bytes) => parse_update_bytes(bytes, &pending)?,
            None => abstain_all(&pending),
        };

        for (i, tx) in block.txdata.iter().enumerate().skip(1) {
            let tx_index = i as u32;
            let ctip_slot = next.deposits().ctip_spent_by(tx);

            if let Some(slot) = ctip_slot {
                let is_bundle = tx
                    .output
                    .first()
                    .is_some_and(|out| bundle::is_return_dest(&out.script_pubkey));
                if is_bundle {
                    let hash =
                        next.spend_withdrawal(params, slot, block_hash, tx, tx_index, false)?;
                    effects.spent.push(hash);
                    continue;
                }
            }

            if apply_deposit_tx(&mut next, tx, tx_index, block_hash)? {
                effects.deposits += 1;
            }
        }

        next.update_scores(&votes, &commits.withdrawal_slots());
        effects.failed = next.age_and_expire(params, block_hash);

        for (slot, hash) in &commits.withdrawals {
            next.add_withdrawal(params, *slot, *hash)?;
            effects.new_withdrawals.push((*slot, *hash));
        }

        effects.activation = next.process_activation(params, &commits.proposals, &commits.acks)?;

        Ok((next, effects))
    }

    /// Disconnects the tip block.
    pub fn undo(&mut self, block: &Block) -> Result<UndoOutcome, ScdbError> {
        let block_hash = block.block_hash();
        if self.tip != Some(block_hash) {
            return Err(ScdbError::DisconnectNotTip(block_hash));
        }
        let entry = self
            .undo
            .pop(&block_hash)
            .ok_or(ScdbError::MissingUndo(block_hash))?;

        let key: Buf32 = block_hash.into();
        let mut state = self.state.clone();
        state.withdrawals_mut().restore_tracked(entry.tracked);
        state.withdrawals_mut().forget_block(&key);
        if let Err(e) = state.deposits_mut().remove_block_deposits(&key) {
            error!(%block_hash, err = %e, "failed to undo deposits");
            return Err(ScdbError::Undo(block_hash, e));
        }

        self.state = state;
        self.tip = entry.prev_tip;
        debug!(%block_hash, "disconnected block");

        Ok(UndoOutcome {
            activation_resync_required: entry.activation_touched,
        })
    }

    /// Rebuilds the state from scratch by connecting `blocks` in order.  The
    /// local caches are kept.
    pub fn resync<'b>(
        &mut self,
        blocks: impl IntoIterator<Item = &'b Block>,
    ) -> Result<(), ScdbError> {
        self.state = ScdbState::new();
        self.tip = None;
        self.undo.clear();

        let mut count = 0usize;
        for block in blocks {
            self.connect(block, false, false)?;
            count += 1;
        }
        info!(blocks = count, tip = ?self.tip, "resynced sidechain state");
        Ok(())
    }
}

/// Records `tx` as a deposit if it spends a CTIP or pays to an active
/// sidechain.  Returns whether a deposit was added.
///
/// Withdrawal bundles must be handled by the caller before this, they spend
/// the CTIP too.
pub fn apply_deposit_tx(
    state: &mut ScdbState,
    tx: &Transaction,
    tx_index: u32,
    block_hash: Buf32,
) -> Result<bool, RejectReason> {
    let ctip_slot = state.deposits().ctip_spent_by(tx);
    if ctip_slot.is_none() && !pays_active_sidechain(state, tx) {
        return Ok(false);
    }

    let deposit = match Deposit::from_transaction(tx, tx_index, block_hash)? {
        Some(deposit) => deposit,
        None => match ctip_slot {
            Some(slot) => {
                return Err(RejectReason::CtipSpentWithoutDeposit(
                    tx.compute_txid(),
                    slot,
                ))
            }
            None => return Ok(false),
        },
    };
    if let Some(slot) = ctip_slot {
        if slot != deposit.slot() {
            return Err(RejectReason::CtipSpentWithoutDeposit(deposit.txid(), slot));
        }
    }

    state.deposits().check_new_deposit(&deposit)?;
    let slot = deposit.slot();
    let txid = deposit.txid();
    let added = state.add_deposits(vec![deposit])?;
    debug!(%slot, %txid, "recorded deposit");
    Ok(added > 0)
}

/// Whether any output pays to an active sidechain.
pub fn pays_active_sidechain(state: &ScdbState, tx: &Transaction) -> bool {
    tx.output.iter().any(|out| {
        SidechainNumber::from_script(&out.script_pubkey)
            .is_ok_and(|slot| state.registry().is_active(slot))
    })
}
