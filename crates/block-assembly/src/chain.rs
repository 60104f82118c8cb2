use bitcoin::{Amount, BlockHash, CompactTarget, OutPoint};

/// What the assembler and the miner need to know about the active chain.
pub trait ChainView: Send + Sync + 'static {
    fn tip_hash(&self) -> BlockHash;

    /// Height of the tip.
    fn height(&self) -> u32;

    fn median_time_past(&self) -> u32;

    /// Network adjusted time, in seconds since the epoch.
    fn adjusted_time(&self) -> u32;

    /// Whether the outpoint is in the UTXO set.
    fn have_coin(&self, outpoint: &OutPoint) -> bool;

    fn block_subsidy(&self, height: u32) -> Amount;

    /// Difficulty bits for the block after the tip.
    fn next_bits(&self) -> CompactTarget;
}

/// Timestamp for a block after the tip, `max(mtp + 1, now)`.
pub fn next_block_time(chain: &impl ChainView) -> u32 {
    chain
        .median_time_past()
        .saturating_add(1)
        .max(chain.adjusted_time())
}
