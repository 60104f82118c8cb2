//! Data needed to disconnect recently connected blocks.

use std::collections::VecDeque;

use bitcoin::BlockHash;
use drivechain_state::withdrawal::WithdrawalState;

/// What a connected block changed that can't be derived from the block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockUndo {
    pub block_hash: BlockHash,

    /// Tip before the block was connected.
    pub prev_tip: Option<BlockHash>,

    /// Tracked withdrawals before the block was connected.
    pub tracked: Vec<WithdrawalState>,

    /// Whether the block touched the activation tracker, which we don't undo
    /// incrementally.
    pub activation_touched: bool,
}

/// Bounded stack of undo entries, newest last.
#[derive(Clone, Debug)]
pub struct UndoJournal {
    entries: VecDeque<BlockUndo>,
    depth: usize,
}

impl UndoJournal {
    pub fn new(depth: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            depth,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records a connected block, forgetting the oldest entry if full.
    pub fn push(&mut self, entry: BlockUndo) {
        if self.depth == 0 {
            return;
        }
        if self.entries.len() == self.depth {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Takes the entry of the newest block, if that's the one asked for.
    pub fn pop(&mut self, block_hash: &BlockHash) -> Option<BlockUndo> {
        match self.entries.back() {
            Some(e) if e.block_hash == *block_hash => self.entries.pop_back(),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
