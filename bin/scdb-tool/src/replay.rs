use std::{fmt, fs, path::Path};

use anyhow::{bail, Context};
use bitcoin::{consensus::encode::deserialize_hex, Block, BlockHash};
use drivechain_consensus_logic::{BlockEffects, SidechainDb};
use drivechain_state::deposit::Ctip;
use tracing::*;

/// Reads a blocks file: one consensus encoded block per line, in hex.  Blank
/// lines and lines starting with `#` are skipped.
pub(crate) fn read_blocks(path: &Path) -> anyhow::Result<Vec<Block>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading blocks {}", path.display()))?;
    parse_blocks(&text)
}

pub(crate) fn parse_blocks(text: &str) -> anyhow::Result<Vec<Block>> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(lineno, line)| {
            deserialize_hex::<Block>(line).with_context(|| format!("bad block on line {lineno}"))
        })
        .collect()
}

/// Connects `blocks` in order.
pub(crate) fn replay(db: &mut SidechainDb, blocks: &[Block]) -> anyhow::Result<()> {
    for (i, block) in blocks.iter().enumerate() {
        let effects = db
            .update(block, false)
            .with_context(|| format!("connecting block {i} ({})", block.block_hash()))?;
        trace!(%i, ?effects, "replayed block");
    }
    info!(blocks = blocks.len(), tip = ?db.tip(), "replay finished");
    Ok(())
}

/// Connects every block but the last, then checks the last one without
/// connecting it.
pub(crate) fn check_last(db: &mut SidechainDb, blocks: &[Block]) -> anyhow::Result<BlockEffects> {
    let Some((last, prefix)) = blocks.split_last() else {
        bail!("no blocks to check");
    };
    replay(db, prefix)?;
    Ok(db.update(last, true)?)
}

/// What the sidechain state looks like after a replay.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct ScdbSummary {
    pub(crate) tip: Option<BlockHash>,
    pub(crate) active: Vec<(u8, String)>,
    pub(crate) ctips: Vec<(u8, Ctip)>,
    pub(crate) tracked_withdrawals: usize,
    pub(crate) pending_proposals: usize,
}

impl ScdbSummary {
    pub(crate) fn new(db: &SidechainDb) -> Self {
        let state = db.state();
        Self {
            tip: db.tip(),
            active: state
                .registry()
                .active()
                .map(|sc| (sc.slot().0, sc.title().to_owned()))
                .collect(),
            ctips: state
                .deposits()
                .ctips()
                .map(|(slot, ctip)| (slot.0, *ctip))
                .collect(),
            tracked_withdrawals: state.withdrawals().tracked().len(),
            pending_proposals: state.activation().statuses().len(),
        }
    }
}

impl fmt::Display for ScdbSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tip {
            Some(tip) => writeln!(f, "tip: {tip}")?,
            None => writeln!(f, "tip: none")?,
        }
        writeln!(f, "active sidechains: {}", self.active.len())?;
        for (slot, title) in &self.active {
            writeln!(f, "  {slot}: {title}")?;
        }
        for (slot, ctip) in &self.ctips {
            writeln!(f, "  ctip {slot}: {} {}", ctip.outpoint(), ctip.amount())?;
        }
        writeln!(f, "tracked withdrawals: {}", self.tracked_withdrawals)?;
        write!(f, "pending proposals: {}", self.pending_proposals)
    }
}
