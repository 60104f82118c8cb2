//! Coinbase commitment scripts.
//!
//! Every commitment is a raw `OP_RETURN` script: the opcode, a 4-byte marker
//! and the payload, with no push opcodes in between.

use bitcoin::{Script, ScriptBuf};
use drivechain_primitives::{buf::Buf32, constants::*, sidechain::SidechainNumber};

use crate::{errors::CodecError, sidechain::SidechainProposal};

/// Length of `OP_RETURN` plus a marker.
const HEADER_LEN: usize = 1 + 4;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Commitment {
    /// Proposes a new sidechain.
    Proposal(SidechainProposal),

    /// Acks the proposal with this identity hash.
    Ack(Buf32),

    /// Starts tracking a new withdrawal bundle.
    WithdrawalHash { slot: SidechainNumber, hash: Buf32 },

    /// Update bytes payload, starting with the version byte.
    UpdateBytes(Vec<u8>),
}

impl Commitment {
    fn marker(&self) -> [u8; 4] {
        match self {
            Self::Proposal(_) => PROPOSAL_COMMIT_MARKER,
            Self::Ack(_) => ACK_COMMIT_MARKER,
            Self::WithdrawalHash { .. } => WITHDRAWAL_COMMIT_MARKER,
            Self::UpdateBytes(_) => UPDATE_BYTES_MARKER,
        }
    }

    pub fn to_script(&self) -> ScriptBuf {
        let mut buf = Vec::with_capacity(HEADER_LEN + 64);
        buf.push(OP_RETURN_BYTE);
        buf.extend_from_slice(&self.marker());
        match self {
            Self::Proposal(prop) => {
                let enc = borsh::to_vec(prop).expect("commitment: serialize proposal");
                buf.extend_from_slice(&enc);
            }
            Self::Ack(hash) => buf.extend_from_slice(hash.as_slice()),
            Self::WithdrawalHash { slot, hash } => {
                buf.push(slot.0);
                buf.extend_from_slice(hash.as_slice());
            }
            Self::UpdateBytes(payload) => buf.extend_from_slice(payload),
        }
        ScriptBuf::from_bytes(buf)
    }

    /// Decodes a commitment script.
    ///
    /// Returns `Ok(None)` for scripts that don't carry one of our markers and
    /// an error for scripts that do but whose payload is malformed.
    pub fn from_script(script: &Script) -> Result<Option<Self>, CodecError> {
        let bytes = script.as_bytes();
        if bytes.len() < HEADER_LEN || bytes[0] != OP_RETURN_BYTE {
            return Ok(None);
        }

        let mut marker = [0u8; 4];
        marker.copy_from_slice(&bytes[1..HEADER_LEN]);
        let payload = &bytes[HEADER_LEN..];

        let commitment = match marker {
            PROPOSAL_COMMIT_MARKER => {
                let prop = borsh::from_slice::<SidechainProposal>(payload)
                    .map_err(|e| CodecError::MalformedProposal(e.to_string()))?;
                Self::Proposal(prop)
            }
            ACK_COMMIT_MARKER => {
                let hash = Buf32::try_from(payload)
                    .map_err(|_| CodecError::InvalidAckLength(payload.len()))?;
                Self::Ack(hash)
            }
            WITHDRAWAL_COMMIT_MARKER => {
                if payload.len() != 1 + Buf32::LEN {
                    return Err(CodecError::InvalidWithdrawalCommitLength(payload.len()));
                }
                let hash = Buf32::try_from(&payload[1..])
                    .map_err(|_| CodecError::InvalidWithdrawalCommitLength(payload.len()))?;
                Self::WithdrawalHash {
                    slot: SidechainNumber(payload[0]),
                    hash,
                }
            }
            UPDATE_BYTES_MARKER => {
                if payload.is_empty() {
                    return Err(CodecError::MissingVersion);
                }
                Self::UpdateBytes(payload.to_vec())
            }
            _ => return Ok(None),
        };

        Ok(Some(commitment))
    }
}

#[cfg(test)]
mod tests {
    use drivechain_test_utils::ArbitraryGenerator;

    use super::*;

    #[test]
    fn test_proposal_layout() {
        let prop: SidechainProposal = ArbitraryGenerator::new().generate();
        let script = Commitment::Proposal(prop.clone()).to_script();
        let bytes = script.as_bytes();
        assert_eq!(bytes[0], OP_RETURN_BYTE);
        assert_eq!(&bytes[1..5], &PROPOSAL_COMMIT_MARKER);
        assert_eq!(bytes[5], prop.slot.0);

        let dec = Commitment::from_script(&script).unwrap();
        assert_eq!(dec, Some(Commitment::Proposal(prop)));
    }

    #[test]
    fn test_withdrawal_hash_layout() {
        let hash = Buf32::from([9; 32]);
        let c = Commitment::WithdrawalHash {
            slot: SidechainNumber(3),
            hash,
        };
        let script = c.to_script();
        assert_eq!(script.len(), 1 + 4 + 1 + 32);
        assert_eq!(script.as_bytes()[5], 3);
        assert_eq!(Commitment::from_script(&script).unwrap(), Some(c));
    }

    #[test]
    fn test_truncated_payloads_are_errors() {
        let mut bytes = Commitment::Ack(Buf32::from([1; 32])).to_script().into_bytes();
        bytes.pop();
        assert_eq!(
            Commitment::from_script(&ScriptBuf::from_bytes(bytes)),
            Err(CodecError::InvalidAckLength(31))
        );

        let mut bytes = Commitment::WithdrawalHash {
            slot: SidechainNumber(0),
            hash: Buf32::zero(),
        }
        .to_script()
        .into_bytes();
        bytes.push(0);
        assert!(Commitment::from_script(&ScriptBuf::from_bytes(bytes)).is_err());

        let mut bytes = vec![OP_RETURN_BYTE];
        bytes.extend_from_slice(&PROPOSAL_COMMIT_MARKER);
        bytes.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(
            Commitment::from_script(&ScriptBuf::from_bytes(bytes)),
            Err(CodecError::MalformedProposal(_))
        ));
    }

    #[test]
    fn test_unrelated_scripts_are_ignored() {
        assert_eq!(Commitment::from_script(&ScriptBuf::new()), Ok(None));
        let script = ScriptBuf::from_bytes(vec![OP_RETURN_BYTE, 1, 2, 3, 4, 5, 6]);
        assert_eq!(Commitment::from_script(&script), Ok(None));
        let script = SidechainNumber(1).script();
        assert_eq!(Commitment::from_script(&script), Ok(None));
    }
}
