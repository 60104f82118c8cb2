//! Mempool transaction selection by ancestor package fee rate.
//!
//! Transactions are considered together with their unconfirmed ancestors.
//! Once a package is in the block, the descendants of its transactions are
//! re-scored in a side map ("modified" entries) with the included ancestors
//! taken out of their totals, and each round picks the better of the next
//! pool entry and the best modified entry.
//!
//! Sidechain deposits are run through the deposit rules on a scratch copy of
//! the sidechain state as packages are picked, so a deposit that would get
//! the block rejected only costs its own package.

use std::collections::{BTreeMap, BTreeSet};

use bitcoin::{Amount, Sequence, Transaction, Txid};
use drivechain_consensus_logic::{apply_deposit_tx, errors::RejectReason, pays_active_sidechain};
use drivechain_primitives::{buf::Buf32, sidechain::SidechainNumber};
use drivechain_state::scdb_state::ScdbState;
use tracing::*;

use crate::mempool::{MempoolEntry, MempoolView};

/// Weight held back for the coinbase.
pub const COINBASE_RESERVED_WEIGHT: u64 = 4_000;

/// Sigop cost held back for the coinbase.
pub const COINBASE_RESERVED_SIGOPS: u64 = 400;

pub const MAX_BLOCK_SIGOPS_COST: u64 = 80_000;

/// Lock times below this are heights, above it timestamps.
const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Limits and policy for one selection run.
#[derive(Clone, Debug)]
pub struct SelectionPolicy {
    pub max_weight: u64,

    /// In sat/kvB.
    pub min_fee_rate: u64,

    pub include_witness: bool,
    pub max_consecutive_failures: u32,

    /// Height of the block being built.
    pub height: u32,

    /// Time lock times are compared against.
    pub lock_time_cutoff: u32,

    /// Slots paying out a withdrawal this block.  Deposits to them would race
    /// the payout for the CTIP.
    pub excluded_slots: BTreeSet<SidechainNumber>,
}

/// Fee, weight and sigops of a transaction together with its ancestors that
/// aren't in the block yet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Package {
    txid: Txid,
    fee: u64,
    weight: u64,
    sigops: u64,
}

impl Package {
    fn from_entry(entry: &MempoolEntry) -> Self {
        Self {
            txid: entry.txid(),
            fee: entry.ancestor_fee.to_sat(),
            weight: entry.ancestor_weight,
            sigops: entry.ancestor_sigops_cost,
        }
    }

    /// Higher fee rate first, ties go to the smaller txid.
    fn better_than(&self, other: &Package) -> bool {
        let lhs = self.fee as u128 * other.weight as u128;
        let rhs = other.fee as u128 * self.weight as u128;
        if lhs != rhs {
            return lhs > rhs;
        }
        self.txid < other.txid
    }
}

/// What selection put in the block, in block order.
#[derive(Clone, Debug, Default)]
pub struct Selection {
    pub entries: Vec<MempoolEntry>,

    /// Includes the reserved weight.
    pub weight: u64,

    /// Includes the reserved sigops.
    pub sigops: u64,
    pub fees: Amount,
}

impl Selection {
    /// Whether any selected transaction carries critical data.
    pub fn has_critical_data(&self) -> bool {
        self.entries.iter().any(|e| e.critical.is_some())
    }
}

/// Runs package selection over the mempool.
///
/// Deposits are checked against `sidechains`, the state the block builds
/// on.  `reserved_weight` and `reserved_sigops` are taken by transactions the
/// caller adds itself, on top of the coinbase reservation.
pub fn select_packages<M: MempoolView>(
    mempool: &M,
    policy: &SelectionPolicy,
    sidechains: &ScdbState,
    reserved_weight: u64,
    reserved_sigops: u64,
) -> Selection {
    let mut sel = PackageSelector {
        mempool,
        policy,
        sidechains: sidechains.clone(),
        block_weight: COINBASE_RESERVED_WEIGHT + reserved_weight,
        block_sigops: COINBASE_RESERVED_SIGOPS + reserved_sigops,
        fees: 0,
        in_block: BTreeSet::new(),
        entries: Vec::new(),
        modified: BTreeMap::new(),
    };
    sel.add_package_txs();

    debug!(
        txs = sel.entries.len(),
        weight = sel.block_weight,
        fees = sel.fees,
        "selected mempool packages"
    );
    Selection {
        entries: sel.entries,
        weight: sel.block_weight,
        sigops: sel.block_sigops,
        fees: Amount::from_sat(sel.fees),
    }
}

struct PackageSelector<'a, M> {
    mempool: &'a M,
    policy: &'a SelectionPolicy,

    /// Sidechain state with the deposits selected so far applied.
    sidechains: ScdbState,
    block_weight: u64,
    block_sigops: u64,
    fees: u64,
    in_block: BTreeSet<Txid>,
    entries: Vec<MempoolEntry>,

    /// Entries with ancestors in the block, scored without those.
    modified: BTreeMap<Txid, Package>,
}

impl<M: MempoolView> PackageSelector<'_, M> {
    fn add_package_txs(&mut self) {
        let order = self.mempool.ancestor_score_order();
        let mut next = 0;
        let mut failed = BTreeSet::new();
        let mut consecutive_failed = 0u32;

        loop {
            if let Some(txid) = order.get(next) {
                if self.modified.contains_key(txid)
                    || self.in_block.contains(txid)
                    || failed.contains(txid)
                {
                    next += 1;
                    continue;
                }
            }

            let best_modified = self.best_modified();
            let (package, using_modified) = match order.get(next) {
                None => match best_modified {
                    Some(pkg) => (pkg, true),
                    None => break,
                },
                Some(txid) => {
                    let Some(entry) = self.mempool.entry(txid) else {
                        next += 1;
                        continue;
                    };
                    let pkg = Package::from_entry(&entry);
                    match best_modified {
                        Some(m) if m.better_than(&pkg) => (m, true),
                        _ => {
                            next += 1;
                            (pkg, false)
                        }
                    }
                }
            };

            // The pool is sorted by package fee rate, nothing after this pays
            // enough either.
            if package.fee < self.min_fee(package.weight) {
                trace!(txid = %package.txid, "package below minimum fee rate");
                break;
            }

            let package_txs = self
                .unplaced_ancestors(&package.txid)
                .filter(|txs| self.test_package(&package) && self.test_package_txs(txs))
                .and_then(|mut txs| {
                    sort_block_order(&mut txs);
                    match self.test_package_deposits(&txs) {
                        Ok(next) => Some((txs, next)),
                        Err(e) => {
                            debug!(txid = %package.txid, err = %e, "package has an invalid deposit");
                            None
                        }
                    }
                });
            let Some((package_txs, next_sidechains)) = package_txs else {
                if using_modified {
                    self.modified.remove(&package.txid);
                    failed.insert(package.txid);
                }
                consecutive_failed += 1;
                let nearly_full = self.block_weight
                    > self.policy.max_weight.saturating_sub(COINBASE_RESERVED_WEIGHT);
                if consecutive_failed > self.policy.max_consecutive_failures && nearly_full {
                    break;
                }
                continue;
            };
            consecutive_failed = 0;

            if let Some(next) = next_sidechains {
                self.sidechains = next;
            }
            for entry in &package_txs {
                self.add_to_block(entry.clone());
            }
            self.update_packages_for_added(&package_txs);
        }
    }

    /// The package's transaction and its ancestors not in the block yet, or
    /// `None` if the pool lost one of them.
    fn unplaced_ancestors(&self, txid: &Txid) -> Option<Vec<MempoolEntry>> {
        let mut txs = Vec::new();
        for anc in self.mempool.ancestors(txid).into_iter().chain([*txid]) {
            if self.in_block.contains(&anc) {
                continue;
            }
            txs.push(self.mempool.entry(&anc)?);
        }
        Some(txs)
    }

    fn best_modified(&self) -> Option<Package> {
        self.modified
            .values()
            .fold(None, |best: Option<Package>, pkg| match best {
                Some(b) if !pkg.better_than(&b) => Some(b),
                _ => Some(*pkg),
            })
    }

    fn min_fee(&self, weight: u64) -> u64 {
        let vsize = weight.div_ceil(4);
        self.policy.min_fee_rate.saturating_mul(vsize) / 1000
    }

    fn test_package(&self, package: &Package) -> bool {
        if self.block_weight + package.weight >= self.policy.max_weight {
            return false;
        }
        self.block_sigops + package.sigops < MAX_BLOCK_SIGOPS_COST
    }

    fn test_package_txs(&self, txs: &[MempoolEntry]) -> bool {
        txs.iter().all(|entry| {
            let tx = &entry.tx;
            if !is_final_tx(tx, self.policy.height, self.policy.lock_time_cutoff) {
                return false;
            }
            if !self.policy.include_witness && has_witness(tx) {
                return false;
            }
            if let Some(critical) = &entry.critical {
                if critical.height != self.policy.height {
                    return false;
                }
            }
            !pays_to_slot(tx, &self.policy.excluded_slots)
        })
    }

    /// Applies the package's deposits to a copy of the sidechain state.
    /// Returns the copy if there were any.
    fn test_package_deposits(
        &self,
        txs: &[MempoolEntry],
    ) -> Result<Option<ScdbState>, RejectReason> {
        let mut next: Option<ScdbState> = None;
        for (i, entry) in txs.iter().enumerate() {
            let state = next.as_ref().unwrap_or(&self.sidechains);
            if !touches_sidechain(state, &entry.tx) {
                continue;
            }
            let state = next.get_or_insert_with(|| self.sidechains.clone());
            // After the coinbase, in the order the block will list them.
            let tx_index = (self.entries.len() + i + 1) as u32;
            apply_deposit_tx(state, &entry.tx, tx_index, Buf32::zero())?;
        }
        Ok(next)
    }

    fn add_to_block(&mut self, entry: MempoolEntry) {
        self.block_weight += entry.weight;
        self.block_sigops += entry.sigops_cost;
        self.fees = self.fees.saturating_add(entry.fee.to_sat());
        let txid = entry.txid();
        self.in_block.insert(txid);
        self.modified.remove(&txid);
        trace!(%txid, fee = %entry.fee, "added transaction to block");
        self.entries.push(entry);
    }

    /// Takes the newly added transactions out of their descendants' ancestor
    /// totals.
    fn update_packages_for_added(&mut self, added: &[MempoolEntry]) {
        for entry in added {
            for desc in self.mempool.descendants(&entry.txid()) {
                if self.in_block.contains(&desc) {
                    continue;
                }
                if !self.modified.contains_key(&desc) {
                    let Some(desc_entry) = self.mempool.entry(&desc) else {
                        continue;
                    };
                    self.modified.insert(desc, Package::from_entry(&desc_entry));
                }
                let Some(pkg) = self.modified.get_mut(&desc) else {
                    continue;
                };
                pkg.fee = pkg.fee.saturating_sub(entry.fee.to_sat());
                pkg.weight = pkg.weight.saturating_sub(entry.weight);
                pkg.sigops = pkg.sigops.saturating_sub(entry.sigops_cost);
            }
        }
    }
}

/// Parents before children, then by txid.
fn sort_block_order(txs: &mut [MempoolEntry]) {
    txs.sort_by(|a, b| {
        a.ancestor_count
            .cmp(&b.ancestor_count)
            .then_with(|| a.txid().cmp(&b.txid()))
    });
}

/// Whether `tx` spends a CTIP or pays to an active sidechain.
fn touches_sidechain(state: &ScdbState, tx: &Transaction) -> bool {
    state.deposits().ctip_spent_by(tx).is_some() || pays_active_sidechain(state, tx)
}

/// Whether the lock time of `tx` allows it in a block at `height` and
/// `time`.
pub fn is_final_tx(tx: &Transaction, height: u32, time: u32) -> bool {
    let lock_time = tx.lock_time.to_consensus_u32();
    if lock_time == 0 {
        return true;
    }
    let limit = if lock_time < LOCKTIME_THRESHOLD {
        height
    } else {
        time
    };
    if lock_time < limit {
        return true;
    }
    tx.input.iter().all(|txin| txin.sequence == Sequence::MAX)
}

fn has_witness(tx: &Transaction) -> bool {
    tx.input.iter().any(|txin| !txin.witness.is_empty())
}

fn pays_to_slot(tx: &Transaction, slots: &BTreeSet<SidechainNumber>) -> bool {
    !slots.is_empty()
        && tx.output.iter().any(|out| {
            SidechainNumber::from_script(&out.script_pubkey).is_ok_and(|s| slots.contains(&s))
        })
}
