use arbitrary::Arbitrary;
use bitcoin::{hashes::Hash, BlockHash, Txid};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// 32-byte buf, used for bundle hashes, proposal identity hashes and block ids.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Arbitrary,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct Buf32([u8; 32]);
impl_buf!(Buf32, 32);

impl From<Txid> for Buf32 {
    fn from(value: Txid) -> Self {
        Self(value.to_byte_array())
    }
}

impl From<BlockHash> for Buf32 {
    fn from(value: BlockHash) -> Self {
        Self(value.to_byte_array())
    }
}

impl From<Buf32> for BlockHash {
    fn from(value: Buf32) -> Self {
        BlockHash::from_byte_array(value.0)
    }
}

impl From<Buf32> for Txid {
    fn from(value: Buf32) -> Self {
        Txid::from_byte_array(value.0)
    }
}
