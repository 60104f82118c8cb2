use std::collections::{
    hash_map::Entry::{Occupied, Vacant},
    HashMap,
};

use bitcoin::{Block, BlockHash};
use tracing::*;

use crate::{
    errors::TemplateError,
    template::{BlockTemplate, PowSolution, TemplateId},
};

/// Templates handed out to miners and waiting for a solution.
#[derive(Debug, Default)]
pub struct BlockTemplateManager {
    pending_templates: HashMap<TemplateId, BlockTemplate>,
}

impl BlockTemplateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_template(&mut self, template: BlockTemplate) -> TemplateId {
        let id = template.id();
        self.pending_templates.insert(id, template);
        id
    }

    pub fn get_block_template(&self, id: TemplateId) -> Result<&BlockTemplate, TemplateError> {
        self.pending_templates
            .get(&id)
            .ok_or(TemplateError::UnknownTemplate(id))
    }

    pub fn len(&self) -> usize {
        self.pending_templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_templates.is_empty()
    }

    /// Fills in the solution and returns the finished block if it has enough
    /// work and still builds on `tip`.  The template is consumed on success.
    pub fn complete_block_template(
        &mut self,
        id: TemplateId,
        solution: PowSolution,
        tip: BlockHash,
    ) -> Result<Block, TemplateError> {
        match self.pending_templates.entry(id) {
            Vacant(entry) => Err(TemplateError::UnknownTemplate(*entry.key())),
            Occupied(entry) => {
                if entry.get().prev_blockhash() != tip {
                    entry.remove();
                    return Err(TemplateError::Stale(id));
                }

                let block = entry.get().complete(solution);
                let hash = block.block_hash();
                if !block.header.target().is_met_by(hash) {
                    return Err(TemplateError::InsufficientWork(hash));
                }

                entry.remove();
                info!(%hash, "completed block template");
                Ok(block)
            }
        }
    }

    /// Drops every template that doesn't build on `tip`.
    pub fn purge_stale(&mut self, tip: BlockHash) -> usize {
        let before = self.pending_templates.len();
        self.pending_templates
            .retain(|_, template| template.prev_blockhash() == tip);
        let purged = before - self.pending_templates.len();
        if purged > 0 {
            debug!(%tip, purged, "purged stale block templates");
        }
        purged
    }
}
