//! Sidechain slot numbers and the scripts that hold sidechain funds.

use std::fmt;

use arbitrary::Arbitrary;
use bitcoin::{Script, ScriptBuf};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{OP_DRIVECHAIN, OP_TRUE_BYTE},
    errors::ParseError,
};

/// Slot number of a sidechain.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Arbitrary,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct SidechainNumber(pub u8);

impl SidechainNumber {
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Iterates over every possible slot, in ascending order.
    pub fn all() -> impl Iterator<Item = SidechainNumber> {
        (0..=u8::MAX).map(SidechainNumber)
    }

    /// The script deposits and CTIP outputs of this slot pay to.
    pub fn script(&self) -> ScriptBuf {
        ScriptBuf::from_bytes(vec![OP_DRIVECHAIN, 0x01, self.0, OP_TRUE_BYTE])
    }

    /// Parses the slot out of a sidechain script.
    pub fn from_script(script: &Script) -> Result<Self, ParseError> {
        match script.as_bytes() {
            [OP_DRIVECHAIN, 0x01, n, OP_TRUE_BYTE] => Ok(SidechainNumber(*n)),
            _ => Err(ParseError::NotSidechainScript),
        }
    }
}

impl From<u8> for SidechainNumber {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl fmt::Display for SidechainNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_roundtrip() {
        for n in [0u8, 1, 16, 200, 255] {
            let slot = SidechainNumber(n);
            let script = slot.script();
            assert_eq!(script.len(), 4);
            assert_eq!(SidechainNumber::from_script(&script), Ok(slot));
        }
    }

    #[test]
    fn test_from_script_rejects_other_scripts() {
        let script = ScriptBuf::from_bytes(vec![OP_DRIVECHAIN, 0x02, 1, 1, OP_TRUE_BYTE]);
        assert_eq!(
            SidechainNumber::from_script(&script),
            Err(ParseError::NotSidechainScript)
        );
        assert!(SidechainNumber::from_script(&ScriptBuf::new()).is_err());
    }

    #[test]
    fn test_all_slots() {
        assert_eq!(SidechainNumber::all().count(), 256);
    }
}
