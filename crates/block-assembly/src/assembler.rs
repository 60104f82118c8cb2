//! Builds block templates carrying the sidechain payouts and commitments.

use std::{collections::BTreeSet, sync::Arc};

use bitcoin::Transaction;
use drivechain_config::AssemblerConfig;
use drivechain_consensus_logic::SharedScdb;
use tracing::*;

use crate::{
    chain::{next_block_time, ChainView},
    errors::AssemblyError,
    mempool::MempoolView,
    package::{select_packages, SelectionPolicy},
    sidechain::{build_payouts, critical_fee_sweep, SidechainCommitments},
    signer::{InputSigner, SidechainKeys},
    template::{build_block, build_coinbase, header_template, BlockTemplate},
};

/// Weight of a commitment output besides its script: value and script
/// length, times the witness scale factor.
const COMMITMENT_OUTPUT_OVERHEAD_WU: u64 = 4 * (8 + 1);

#[derive(Debug)]
pub struct BlockAssembler<M, C, K, S> {
    config: AssemblerConfig,
    scdb: SharedScdb,
    mempool: Arc<M>,
    chain: Arc<C>,
    keys: Arc<K>,
    signer: Arc<S>,
}

impl<M, C, K, S> BlockAssembler<M, C, K, S>
where
    M: MempoolView,
    C: ChainView,
    K: SidechainKeys,
    S: InputSigner,
{
    pub fn new(
        config: AssemblerConfig,
        scdb: SharedScdb,
        mempool: Arc<M>,
        chain: Arc<C>,
        keys: Arc<K>,
        signer: Arc<S>,
    ) -> Self {
        Self {
            config,
            scdb,
            mempool,
            chain,
            keys,
            signer,
        }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Builds a template on top of the current tip.
    ///
    /// The sidechain db stays locked for the whole run, so blocks can't be
    /// connected underneath us.  The finished block is dry-run through the
    /// sidechain rules before it's returned.
    pub fn create_new_block(&self) -> Result<BlockTemplate, AssemblyError> {
        let mut db = self.scdb.lock();

        let prev = self.chain.tip_hash();
        if db.tip().is_some_and(|tip| tip != prev) {
            return Err(AssemblyError::TipMismatch {
                scdb: db.tip(),
                chain: prev,
            });
        }
        let height = self.chain.height() + 1;
        let transactions_updated = self.mempool.transactions_updated();
        let critical_txn_added = self.mempool.critical_txn_added();

        self.mempool.expire_stale_critical_requests(height);
        self.mempool.select_bmm_requests(prev);

        let payouts = build_payouts(&db, &*self.chain, &*self.keys, &*self.signer);
        let excluded_slots: BTreeSet<_> = payouts.iter().map(|p| p.slot).collect();

        let commitments = SidechainCommitments::assemble(&db)?;
        let commitment_scripts = commitments.to_scripts();

        let reserved_weight = payouts
            .iter()
            .map(|p| p.tx.weight().to_wu())
            .chain(
                commitment_scripts
                    .iter()
                    .map(|s| COMMITMENT_OUTPUT_OVERHEAD_WU + 4 * s.len() as u64),
            )
            .sum();

        let policy = SelectionPolicy {
            max_weight: self.config.block_max_weight,
            min_fee_rate: self.config.block_min_fee_rate,
            include_witness: self.config.include_witness,
            max_consecutive_failures: self.config.max_consecutive_failures,
            height,
            lock_time_cutoff: self.chain.median_time_past(),
            excluded_slots,
        };
        let selection = select_packages(&*self.mempool, &policy, db.state(), reserved_weight, 0);

        let mut fees = Some(selection.fees);
        let mut txdata: Vec<Transaction> = Vec::with_capacity(selection.entries.len() + 2);
        txdata.extend(selection.entries.iter().map(|e| (*e.tx).clone()));
        for payout in &payouts {
            fees = fees.and_then(|f| f.checked_add(payout.fee));
            txdata.push(payout.tx.clone());
        }

        if selection.has_critical_data() {
            if let Some(sweep) = critical_fee_sweep(&selection.entries, &self.config.payout_script)
            {
                let weight = sweep.weight().to_wu();
                if selection.weight + weight < self.config.block_max_weight {
                    debug!(inputs = sweep.input.len(), "sweeping critical data fees");
                    txdata.push(sweep);
                } else {
                    debug!("no room to sweep critical data fees");
                }
            }
        }

        let fees = fees.ok_or(AssemblyError::FeeOverflow)?;
        let reward = self
            .chain
            .block_subsidy(height)
            .checked_add(fees)
            .ok_or(AssemblyError::FeeOverflow)?;
        let coinbase = build_coinbase(
            height,
            reward,
            &self.config.payout_script,
            commitment_scripts,
        );
        txdata.insert(0, coinbase);

        let header = header_template(prev, next_block_time(&*self.chain), self.chain.next_bits());
        let block = build_block(header, txdata, self.config.include_witness);

        db.update(&block, true)?;

        info!(
            %height,
            %prev,
            txs = block.txdata.len(),
            %fees,
            payouts = payouts.len(),
            "built block template"
        );
        Ok(BlockTemplate::new(
            block,
            height,
            fees,
            payouts.iter().map(|p| (p.slot, p.hash)).collect(),
            commitments,
            transactions_updated,
            critical_txn_added,
        ))
    }
}

