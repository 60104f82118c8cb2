//! In-memory mempool and chain view for tests.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use bitcoin::{
    absolute::LockTime, hashes::Hash, transaction::Version, Amount, BlockHash, CompactTarget,
    OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, WPubkeyHash, Witness,
};
use parking_lot::Mutex;

use crate::{
    chain::ChainView,
    mempool::{CriticalData, MempoolEntry, MempoolView},
};

/// Makes the inputs of generated transactions unique.
static TX_COUNTER: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone)]
struct StubEntry {
    tx: Arc<Transaction>,
    fee: Amount,
    sigops_cost: u64,
    critical: Option<CriticalData>,
}

#[derive(Debug, Default)]
struct MempoolInner {
    entries: BTreeMap<Txid, StubEntry>,
    updated: u64,
    critical_added: bool,
    expired_at: Option<u32>,
    bmm_selected_on: Option<BlockHash>,
}

impl MempoolInner {
    /// Parents of `txid` that are in the pool.
    fn parents(&self, txid: &Txid) -> Vec<Txid> {
        let Some(entry) = self.entries.get(txid) else {
            return Vec::new();
        };
        entry
            .tx
            .input
            .iter()
            .map(|txin| txin.previous_output.txid)
            .filter(|parent| self.entries.contains_key(parent))
            .collect()
    }

    fn ancestors(&self, txid: &Txid) -> BTreeSet<Txid> {
        let mut seen = BTreeSet::new();
        let mut todo = self.parents(txid);
        while let Some(next) = todo.pop() {
            if seen.insert(next) {
                todo.extend(self.parents(&next));
            }
        }
        seen
    }

    fn descendants(&self, txid: &Txid) -> BTreeSet<Txid> {
        self.entries
            .keys()
            .filter(|other| self.ancestors(other).contains(txid))
            .copied()
            .collect()
    }

    fn build_entry(&self, txid: &Txid) -> Option<MempoolEntry> {
        let entry = self.entries.get(txid)?;
        let mut res = MempoolEntry {
            tx: entry.tx.clone(),
            fee: entry.fee,
            weight: entry.tx.weight().to_wu(),
            sigops_cost: entry.sigops_cost,
            ancestor_count: 1,
            ancestor_fee: entry.fee,
            ancestor_weight: entry.tx.weight().to_wu(),
            ancestor_sigops_cost: entry.sigops_cost,
            critical: entry.critical.clone(),
        };
        for anc in self.ancestors(txid) {
            let anc = &self.entries[&anc];
            res.ancestor_count += 1;
            res.ancestor_fee += anc.fee;
            res.ancestor_weight += anc.tx.weight().to_wu();
            res.ancestor_sigops_cost += anc.sigops_cost;
        }
        Some(res)
    }
}

/// Mempool held in memory.  Ancestor totals are computed on every lookup.
#[derive(Debug, Default)]
pub struct StubMempool {
    inner: Mutex<MempoolInner>,
}

impl StubMempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A one-in one-out transaction spending a made up outpoint.
    pub fn standalone_tx() -> Transaction {
        let n = TX_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut prev = [0u8; 32];
        prev[..4].copy_from_slice(&n.to_le_bytes());
        spend_tx(OutPoint::new(Txid::from_byte_array(prev), 0))
    }

    pub fn add_tx(&self, tx: Transaction, fee: Amount, critical: Option<CriticalData>) -> Txid {
        let txid = tx.compute_txid();
        let mut inner = self.inner.lock();
        if critical.is_some() {
            inner.critical_added = true;
        }
        inner.entries.insert(
            txid,
            StubEntry {
                tx: Arc::new(tx),
                fee,
                sigops_cost: 4,
                critical,
            },
        );
        inner.updated += 1;
        txid
    }

    pub fn add_standalone(&self, fee: Amount) -> Txid {
        self.add_tx(Self::standalone_tx(), fee, None)
    }

    /// Adds a transaction spending output 0 of `parent`.
    pub fn add_child(&self, parent: &Txid, fee: Amount) -> Txid {
        self.add_tx(spend_tx(OutPoint::new(*parent, 0)), fee, None)
    }

    pub fn remove(&self, txid: &Txid) {
        let mut inner = self.inner.lock();
        if inner.entries.remove(txid).is_some() {
            inner.updated += 1;
        }
    }

    /// Forgets about critical data seen so far, as after a new block.
    pub fn reset_critical_added(&self) {
        self.inner.lock().critical_added = false;
    }

    pub fn expired_at(&self) -> Option<u32> {
        self.inner.lock().expired_at
    }

    pub fn bmm_selected_on(&self) -> Option<BlockHash> {
        self.inner.lock().bmm_selected_on
    }
}

impl MempoolView for StubMempool {
    fn ancestor_score_order(&self) -> Vec<Txid> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner
            .entries
            .keys()
            .filter_map(|txid| inner.build_entry(txid))
            .collect();
        entries.sort_by(|a, b| {
            let lhs = a.ancestor_fee.to_sat() as u128 * b.ancestor_weight as u128;
            let rhs = b.ancestor_fee.to_sat() as u128 * a.ancestor_weight as u128;
            rhs.cmp(&lhs).then_with(|| a.txid().cmp(&b.txid()))
        });
        entries.iter().map(|e| e.txid()).collect()
    }

    fn entry(&self, txid: &Txid) -> Option<MempoolEntry> {
        self.inner.lock().build_entry(txid)
    }

    fn ancestors(&self, txid: &Txid) -> Vec<Txid> {
        self.inner.lock().ancestors(txid).into_iter().collect()
    }

    fn descendants(&self, txid: &Txid) -> Vec<Txid> {
        self.inner.lock().descendants(txid).into_iter().collect()
    }

    fn transactions_updated(&self) -> u64 {
        self.inner.lock().updated
    }

    fn expire_stale_critical_requests(&self, height: u32) {
        let mut inner = self.inner.lock();
        inner.expired_at = Some(height);
        let stale: Vec<_> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.critical.as_ref().is_some_and(|c| c.height < height))
            .map(|(txid, _)| *txid)
            .collect();
        for txid in stale {
            inner.entries.remove(&txid);
            inner.updated += 1;
        }
    }

    fn select_bmm_requests(&self, prev: BlockHash) {
        self.inner.lock().bmm_selected_on = Some(prev);
    }

    fn critical_txn_added(&self) -> bool {
        self.inner.lock().critical_added
    }
}

fn spend_tx(prev: OutPoint) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: prev,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(10_000),
            script_pubkey: ScriptBuf::new_p2wpkh(&WPubkeyHash::all_zeros()),
        }],
    }
}

#[derive(Debug)]
struct ChainInner {
    tip: BlockHash,
    height: u32,
    mtp: u32,
    time: u32,
    bits: CompactTarget,
    coins: HashSet<OutPoint>,
}

/// Chain view with everything set by hand.
#[derive(Debug)]
pub struct StubChain {
    inner: Mutex<ChainInner>,
}

impl StubChain {
    pub fn new(tip: BlockHash, height: u32, bits: CompactTarget) -> Self {
        Self {
            inner: Mutex::new(ChainInner {
                tip,
                height,
                mtp: 1_700_000_000,
                time: 1_700_000_600,
                bits,
                coins: HashSet::new(),
            }),
        }
    }

    pub fn set_tip(&self, tip: BlockHash, height: u32) {
        let mut inner = self.inner.lock();
        inner.tip = tip;
        inner.height = height;
    }

    pub fn set_time(&self, time: u32) {
        self.inner.lock().time = time;
    }

    pub fn set_bits(&self, bits: CompactTarget) {
        self.inner.lock().bits = bits;
    }

    pub fn add_coin(&self, outpoint: OutPoint) {
        self.inner.lock().coins.insert(outpoint);
    }
}

impl ChainView for StubChain {
    fn tip_hash(&self) -> BlockHash {
        self.inner.lock().tip
    }

    fn height(&self) -> u32 {
        self.inner.lock().height
    }

    fn median_time_past(&self) -> u32 {
        self.inner.lock().mtp
    }

    fn adjusted_time(&self) -> u32 {
        self.inner.lock().time
    }

    fn have_coin(&self, outpoint: &OutPoint) -> bool {
        self.inner.lock().coins.contains(outpoint)
    }

    /// Regtest schedule, halving every 150 blocks.
    fn block_subsidy(&self, height: u32) -> Amount {
        let halvings = height / 150;
        if halvings >= 64 {
            return Amount::ZERO;
        }
        Amount::from_sat((50 * 100_000_000u64) >> halvings)
    }

    fn next_bits(&self) -> CompactTarget {
        self.inner.lock().bits
    }
}
