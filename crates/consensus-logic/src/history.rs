//! Per-block snapshots of the sidechain state, for explorers and audits.
//!
//! Nothing in consensus reads these back.

use borsh::{BorshDeserialize, BorshSerialize};
use drivechain_primitives::{buf::Buf32, sidechain::SidechainNumber};
use drivechain_state::{
    activation::ActivationStatus, deposit::Ctip, scdb_state::ScdbState, sidechain::Sidechain,
    withdrawal::WithdrawalState,
};
use crate::errors::HistoryError;

#[derive(Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct ScdbSnapshot {
    pub block_hash: Buf32,
    pub sidechains: Vec<Sidechain>,
    pub withdrawals: Vec<WithdrawalState>,
    pub ctips: Vec<(SidechainNumber, Ctip)>,
    pub proposals: Vec<ActivationStatus>,
}

impl ScdbSnapshot {
    pub fn from_state(block_hash: Buf32, state: &ScdbState) -> Self {
        Self {
            block_hash,
            sidechains: state.registry().active().cloned().collect(),
            withdrawals: state.withdrawals().tracked().to_vec(),
            ctips: state
                .deposits()
                .ctips()
                .map(|(slot, ctip)| (slot, *ctip))
                .collect(),
            proposals: state.activation().statuses().to_vec(),
        }
    }
}

/// Append-only store of snapshots keyed by block hash.
pub trait ScdbHistoryStore: Send + Sync + 'static {
    /// Writes the snapshot of a newly connected block.
    fn put_snapshot(&self, snapshot: &ScdbSnapshot) -> Result<(), HistoryError>;

    fn get_snapshot(&self, block_hash: &Buf32) -> Result<Option<ScdbSnapshot>, HistoryError>;
}

#[cfg(any(test, feature = "stubs"))]
pub use stub::StubHistoryStore;

#[cfg(any(test, feature = "stubs"))]
mod stub {
    use std::collections::HashMap;

    use drivechain_primitives::buf::Buf32;
    use parking_lot::Mutex;

    use super::{ScdbHistoryStore, ScdbSnapshot};
    use crate::errors::HistoryError;

    /// In-memory store that keeps the encoded snapshots around.
    #[derive(Debug, Default)]
    pub struct StubHistoryStore {
        snapshots: Mutex<HashMap<Buf32, Vec<u8>>>,
    }

    impl StubHistoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.snapshots.lock().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    impl ScdbHistoryStore for StubHistoryStore {
        fn put_snapshot(&self, snapshot: &ScdbSnapshot) -> Result<(), HistoryError> {
            let enc =
                borsh::to_vec(snapshot).map_err(|e| HistoryError::Encode(e.to_string()))?;
            let mut tbl = self.snapshots.lock();
            if tbl.contains_key(&snapshot.block_hash) {
                return Err(HistoryError::AlreadyWritten(snapshot.block_hash));
            }
            tbl.insert(snapshot.block_hash, enc);
            Ok(())
        }

        fn get_snapshot(&self, block_hash: &Buf32) -> Result<Option<ScdbSnapshot>, HistoryError> {
            let tbl = self.snapshots.lock();
            tbl.get(block_hash)
                .map(|enc| {
                    borsh::from_slice(enc)
                        .map_err(|e| HistoryError::Decode(*block_hash, e.to_string()))
                })
                .transpose()
        }
    }
}
