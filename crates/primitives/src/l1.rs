use std::io::{self, Read, Write};

use arbitrary::{Arbitrary, Unstructured};
use bitcoin::{hashes::Hash, OutPoint, Txid};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// L1 output reference.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct OutputRef(OutPoint);

impl From<OutPoint> for OutputRef {
    fn from(value: OutPoint) -> Self {
        Self(value)
    }
}

impl From<OutputRef> for OutPoint {
    fn from(value: OutputRef) -> Self {
        value.0
    }
}

impl OutputRef {
    pub fn new(txid: Txid, vout: u32) -> Self {
        Self(OutPoint::new(txid, vout))
    }

    pub fn outpoint(&self) -> &OutPoint {
        &self.0
    }
}

impl BorshSerialize for OutputRef {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
        writer.write_all(self.0.txid.as_byte_array())?;
        writer.write_all(&self.0.vout.to_le_bytes())?;
        Ok(())
    }
}

impl BorshDeserialize for OutputRef {
    fn deserialize_reader<R: Read>(reader: &mut R) -> Result<Self, io::Error> {
        let mut txid_bytes = [0u8; 32];
        reader.read_exact(&mut txid_bytes)?;
        let txid = Txid::from_byte_array(txid_bytes);

        let mut vout_bytes = [0u8; 4];
        reader.read_exact(&mut vout_bytes)?;
        let vout = u32::from_le_bytes(vout_bytes);

        Ok(OutputRef(OutPoint { txid, vout }))
    }
}

impl<'a> Arbitrary<'a> for OutputRef {
    fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Self> {
        let mut txid_bytes = [0u8; 32];
        u.fill_buffer(&mut txid_bytes)?;
        let txid = Txid::from_byte_array(txid_bytes);
        let vout = u.int_in_range(0..=u32::MAX)?;
        Ok(OutputRef(OutPoint { txid, vout }))
    }
}
