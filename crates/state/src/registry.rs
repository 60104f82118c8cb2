use drivechain_primitives::{constants::MAX_SIDECHAINS, sidechain::SidechainNumber};

use crate::sidechain::Sidechain;

/// The sidechain slots.  Every slot is either empty or holds the sidechain
/// that was last activated in it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SidechainRegistry {
    slots: Vec<Option<Sidechain>>,
}

impl Default for SidechainRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SidechainRegistry {
    pub fn new() -> Self {
        Self {
            slots: vec![None; MAX_SIDECHAINS],
        }
    }

    pub fn get(&self, slot: SidechainNumber) -> Option<&Sidechain> {
        self.slots[slot.index()].as_ref()
    }

    pub fn is_active(&self, slot: SidechainNumber) -> bool {
        self.get(slot).is_some_and(|sc| sc.is_active())
    }

    /// Installs a sidechain, replacing whatever occupied its slot.  Returns
    /// the previous occupant.
    pub fn install(&mut self, sidechain: Sidechain) -> Option<Sidechain> {
        let idx = sidechain.slot().index();
        self.slots[idx].replace(sidechain)
    }

    pub fn active(&self) -> impl Iterator<Item = &Sidechain> + '_ {
        self.slots.iter().flatten().filter(|sc| sc.is_active())
    }

    pub fn active_slots(&self) -> impl Iterator<Item = SidechainNumber> + '_ {
        self.active().map(|sc| sc.slot())
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }
}

#[cfg(test)]
mod tests {
    use drivechain_test_utils::ArbitraryGenerator;

    use super::*;
    use crate::sidechain::SidechainProposal;

    #[test]
    fn test_install_and_replace() {
        let mut reg = SidechainRegistry::new();
        assert_eq!(reg.active_count(), 0);

        let mut prop: SidechainProposal = ArbitraryGenerator::new().generate();
        prop.slot = SidechainNumber(7);
        assert!(reg.install(prop.to_sidechain()).is_none());
        assert!(reg.is_active(SidechainNumber(7)));
        assert!(!reg.is_active(SidechainNumber(8)));

        prop.title = "replacement".to_owned();
        let old = reg.install(prop.to_sidechain()).expect("test: had occupant");
        assert_ne!(old.title(), "replacement");
        assert_eq!(reg.active_count(), 1);
        assert_eq!(reg.active_slots().collect::<Vec<_>>(), vec![SidechainNumber(7)]);
        assert_eq!(reg.get(SidechainNumber(7)).unwrap().title(), "replacement");
    }
}
