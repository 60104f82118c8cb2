//! The narrow slice of the mempool the assembler consumes.

use std::sync::Arc;

use bitcoin::{Amount, BlockHash, Transaction, Txid};
use drivechain_primitives::buf::Buf32;

/// Sidechain critical data (a BMM request) carried by a transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CriticalData {
    /// Block height the request is valid for.
    pub height: u32,

    /// Opaque sidechain payload hash.
    pub hash: Buf32,
}

/// A mempool entry with the totals over its in-pool ancestors.
///
/// Ancestor totals include the entry itself.
#[derive(Clone, Debug)]
pub struct MempoolEntry {
    pub tx: Arc<Transaction>,
    pub fee: Amount,
    pub weight: u64,
    pub sigops_cost: u64,

    pub ancestor_count: u64,
    pub ancestor_fee: Amount,
    pub ancestor_weight: u64,
    pub ancestor_sigops_cost: u64,

    pub critical: Option<CriticalData>,
}

impl MempoolEntry {
    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }
}

/// Mempool capabilities the block assembler consumes.
///
/// Implementations sit in front of the node's pool and handle their own
/// locking, so every method takes `&self`.
pub trait MempoolView: Send + Sync + 'static {
    /// Txids by descending ancestor fee rate.
    fn ancestor_score_order(&self) -> Vec<Txid>;

    fn entry(&self, txid: &Txid) -> Option<MempoolEntry>;

    /// All in-pool ancestors of `txid`, not including itself.
    fn ancestors(&self, txid: &Txid) -> Vec<Txid>;

    /// All in-pool descendants of `txid`, not including itself.
    fn descendants(&self, txid: &Txid) -> Vec<Txid>;

    /// Counter bumped whenever the pool's contents change.
    fn transactions_updated(&self) -> u64;

    /// Drops critical data requests that can no longer be mined at `height`.
    fn expire_stale_critical_requests(&self, height: u32);

    /// Picks which pending BMM requests go into a block on top of `prev`.
    fn select_bmm_requests(&self, prev: BlockHash);

    /// Whether a transaction with critical data arrived since the last block.
    fn critical_txn_added(&self) -> bool;
}
