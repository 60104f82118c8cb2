//! Extracts the sidechain commitments from a block's coinbase.

use std::collections::BTreeSet;

use bitcoin::Transaction;
use drivechain_primitives::{buf::Buf32, sidechain::SidechainNumber};
use drivechain_state::{commitment::Commitment, sidechain::SidechainProposal};

use crate::errors::RejectReason;

/// Commitments found in a coinbase, in output order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockCommitments {
    pub proposals: Vec<SidechainProposal>,
    pub acks: Vec<Buf32>,
    pub withdrawals: Vec<(SidechainNumber, Buf32)>,
    pub update_bytes: Option<Vec<u8>>,
}

impl BlockCommitments {
    /// Slots that get a new withdrawal bundle.
    pub fn withdrawal_slots(&self) -> BTreeSet<SidechainNumber> {
        self.withdrawals.iter().map(|(slot, _)| *slot).collect()
    }
}

/// Scans the coinbase outputs.
///
/// Malformed commitments, more than one proposal, more than one set of update
/// bytes and more than one new withdrawal for a slot all make the block
/// invalid.
pub fn scan_coinbase(coinbase: &Transaction) -> Result<BlockCommitments, RejectReason> {
    let mut commits = BlockCommitments::default();
    let mut update_bytes = Vec::new();
    let mut withdrawal_slots = BTreeSet::new();

    for out in &coinbase.output {
        let Some(commitment) = Commitment::from_script(&out.script_pubkey)? else {
            continue;
        };
        match commitment {
            Commitment::Proposal(prop) => commits.proposals.push(prop),
            Commitment::Ack(hash) => commits.acks.push(hash),
            Commitment::WithdrawalHash { slot, hash } => {
                if !withdrawal_slots.insert(slot) {
                    return Err(RejectReason::MultipleWithdrawalCommits(slot));
                }
                commits.withdrawals.push((slot, hash));
            }
            Commitment::UpdateBytes(bytes) => update_bytes.push(bytes),
        }
    }

    if commits.proposals.len() > 1 {
        return Err(RejectReason::MultipleProposals(commits.proposals.len()));
    }
    if update_bytes.len() > 1 {
        return Err(RejectReason::MultipleUpdateBytes(update_bytes.len()));
    }
    commits.update_bytes = update_bytes.pop();

    Ok(commits)
}

#[cfg(test)]
mod tests {
    use bitcoin::{Amount, ScriptBuf, TxOut};
    use drivechain_state::errors::CodecError;
    use drivechain_test_utils::{bitcoin::coinbase_tx, ArbitraryGenerator};

    use super::*;

    fn coinbase(scripts: Vec<ScriptBuf>) -> Transaction {
        let outputs = scripts
            .into_iter()
            .map(|script_pubkey| TxOut {
                value: Amount::ZERO,
                script_pubkey,
            })
            .collect();
        coinbase_tx(1, Amount::from_sat(1), outputs)
    }

    #[test]
    fn test_scan_coinbase() {
        let prop: SidechainProposal = ArbitraryGenerator::new().generate();
        let cb = coinbase(vec![
            Commitment::Ack(Buf32::from([1; 32])).to_script(),
            Commitment::Proposal(prop.clone()).to_script(),
            Commitment::WithdrawalHash {
                slot: SidechainNumber(1),
                hash: Buf32::from([2; 32]),
            }
            .to_script(),
            Commitment::WithdrawalHash {
                slot: SidechainNumber(2),
                hash: Buf32::from([3; 32]),
            }
            .to_script(),
            Commitment::UpdateBytes(vec![0x01]).to_script(),
            ScriptBuf::from_bytes(vec![0x6a, 0x04, 0xaa, 0xaa, 0xaa, 0xaa]),
        ]);

        let commits = scan_coinbase(&cb).unwrap();
        assert_eq!(commits.proposals, vec![prop]);
        assert_eq!(commits.acks, vec![Buf32::from([1; 32])]);
        assert_eq!(commits.withdrawals.len(), 2);
        assert_eq!(
            commits.withdrawal_slots(),
            BTreeSet::from([SidechainNumber(1), SidechainNumber(2)])
        );
        assert_eq!(commits.update_bytes, Some(vec![0x01]));
    }

    #[test]
    fn test_duplicate_commitments_rejected() {
        let gen = ArbitraryGenerator::new();
        let a: SidechainProposal = gen.generate();
        let b: SidechainProposal = gen.generate();
        let cb = coinbase(vec![
            Commitment::Proposal(a).to_script(),
            Commitment::Proposal(b).to_script(),
        ]);
        assert_eq!(scan_coinbase(&cb), Err(RejectReason::MultipleProposals(2)));

        let cb = coinbase(vec![
            Commitment::UpdateBytes(vec![0x01]).to_script(),
            Commitment::UpdateBytes(vec![0x01]).to_script(),
        ]);
        assert_eq!(scan_coinbase(&cb), Err(RejectReason::MultipleUpdateBytes(2)));

        let wt = |b| {
            Commitment::WithdrawalHash {
                slot: SidechainNumber(0),
                hash: Buf32::from([b; 32]),
            }
            .to_script()
        };
        let cb = coinbase(vec![wt(1), wt(2)]);
        assert_eq!(
            scan_coinbase(&cb),
            Err(RejectReason::MultipleWithdrawalCommits(SidechainNumber(0)))
        );
    }

    #[test]
    fn test_malformed_commitment_rejected() {
        let mut bytes = Commitment::Ack(Buf32::zero()).to_script().into_bytes();
        bytes.truncate(10);
        let cb = coinbase(vec![ScriptBuf::from_bytes(bytes)]);
        assert_eq!(
            scan_coinbase(&cb),
            Err(RejectReason::Codec(CodecError::InvalidAckLength(5)))
        );
    }
}
