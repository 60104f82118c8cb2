//! Withdrawal bundle layout.
//!
//! A bundle spends the CTIP in input 0.  Output 0 is the return destination
//! marker, output 1 encodes the mainchain fee, the outputs after that are the
//! payouts and the last output returns the change to the sidechain script.
//!
//! Sidechains hand us "raw" bundles, which are missing the CTIP input and the
//! change output.  Both are filled in by the miner.

use bitcoin::{
    absolute::LockTime, transaction::Version, Amount, Script, ScriptBuf, Transaction, TxOut,
};
use drivechain_primitives::{
    buf::Buf32,
    constants::{
        WITHDRAWAL_FEE_PREFIX, WITHDRAWAL_FEE_SCRIPT_LEN, WITHDRAWAL_RETURN_DEST_SCRIPT,
    },
};

/// Index of the first payout output.
pub const FIRST_PAYOUT_OUTPUT: usize = 2;

pub fn return_dest_script() -> ScriptBuf {
    ScriptBuf::from_bytes(WITHDRAWAL_RETURN_DEST_SCRIPT.to_vec())
}

pub fn is_return_dest(script: &Script) -> bool {
    script.as_bytes() == WITHDRAWAL_RETURN_DEST_SCRIPT
}

/// Script of the output that carries the total mainchain fee of a bundle.
pub fn fee_script(fee: Amount) -> ScriptBuf {
    let mut buf = Vec::with_capacity(WITHDRAWAL_FEE_SCRIPT_LEN);
    buf.extend_from_slice(&WITHDRAWAL_FEE_PREFIX);
    buf.extend_from_slice(&fee.to_sat().to_le_bytes());
    ScriptBuf::from_bytes(buf)
}

pub fn decode_fee_script(script: &Script) -> Option<Amount> {
    let bytes = script.as_bytes();
    if bytes.len() != WITHDRAWAL_FEE_SCRIPT_LEN || !bytes.starts_with(&WITHDRAWAL_FEE_PREFIX) {
        return None;
    }
    let mut sats = [0u8; 8];
    sats.copy_from_slice(&bytes[WITHDRAWAL_FEE_PREFIX.len()..]);
    Some(Amount::from_sat(u64::from_le_bytes(sats)))
}

/// Builds a raw bundle out of a fee and the payouts.
pub fn build_raw_bundle(fee: Amount, payouts: Vec<TxOut>) -> Transaction {
    let mut output = Vec::with_capacity(FIRST_PAYOUT_OUTPUT + payouts.len());
    output.push(TxOut {
        value: Amount::ZERO,
        script_pubkey: return_dest_script(),
    });
    output.push(TxOut {
        value: Amount::ZERO,
        script_pubkey: fee_script(fee),
    });
    output.extend(payouts);

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: Vec::new(),
        output,
    }
}

/// Identity hash of a raw bundle, as committed on chain.
pub fn raw_bundle_hash(raw: &Transaction) -> Buf32 {
    let mut stripped = raw.clone();
    stripped.input.clear();
    stripped.compute_txid().into()
}

/// Identity hash of a complete bundle.  Strips the inputs and the change
/// output so the result matches the hash of the raw bundle it was built from.
pub fn bundle_hash(tx: &Transaction) -> Option<Buf32> {
    let mut stripped = tx.clone();
    stripped.input.clear();
    stripped.output.pop()?;
    Some(stripped.compute_txid().into())
}

/// Sum of the payouts of a raw bundle.
pub fn raw_payout_total(raw: &Transaction) -> Option<Amount> {
    raw.output
        .iter()
        .skip(FIRST_PAYOUT_OUTPUT)
        .try_fold(Amount::ZERO, |acc, out| acc.checked_add(out.value))
}

/// Fee encoded in a raw or complete bundle.
pub fn bundle_fee(tx: &Transaction) -> Option<Amount> {
    tx.output
        .get(FIRST_PAYOUT_OUTPUT - 1)
        .and_then(|out| decode_fee_script(&out.script_pubkey))
}

#[cfg(test)]
mod tests {
    use bitcoin::{OutPoint, TxIn};
    use drivechain_primitives::sidechain::SidechainNumber;

    use super::*;

    fn payout(sats: u64) -> TxOut {
        TxOut {
            value: Amount::from_sat(sats),
            script_pubkey: ScriptBuf::from_bytes(vec![0x00, 0x14, sats as u8]),
        }
    }

    #[test]
    fn test_fee_script() {
        let script = fee_script(Amount::from_sat(0x0102));
        assert_eq!(
            script.as_bytes(),
            &[0x6a, 0x08, 0x02, 0x01, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(decode_fee_script(&script), Some(Amount::from_sat(0x0102)));
        assert_eq!(decode_fee_script(&return_dest_script()), None);
    }

    #[test]
    fn test_complete_bundle_hash_matches_raw() {
        let raw = build_raw_bundle(Amount::from_sat(500), vec![payout(1000), payout(2000)]);
        assert_eq!(raw_payout_total(&raw), Some(Amount::from_sat(3000)));
        assert_eq!(bundle_fee(&raw), Some(Amount::from_sat(500)));

        let mut full = raw.clone();
        full.input.push(TxIn {
            previous_output: OutPoint::null(),
            ..Default::default()
        });
        full.output.push(TxOut {
            value: Amount::from_sat(10_000),
            script_pubkey: SidechainNumber(0).script(),
        });
        assert_eq!(bundle_hash(&full), Some(raw_bundle_hash(&raw)));
    }

    #[test]
    fn test_bundle_hash_needs_outputs() {
        let mut tx = build_raw_bundle(Amount::ZERO, Vec::new());
        tx.output.clear();
        assert_eq!(bundle_hash(&tx), None);
    }
}
