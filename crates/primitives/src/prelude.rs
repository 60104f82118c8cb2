pub use crate::{
    buf::Buf32,
    l1::OutputRef,
    params::SidechainParams,
    sidechain::SidechainNumber,
};
