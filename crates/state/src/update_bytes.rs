//! Compact encoding of a block's withdrawal votes.
//!
//! After the version byte there is one little-endian `u16` token for every
//! slot that has pending withdrawals, in ascending slot order.  A token is
//! either one of the abstain/downvote sentinels or the index of the upvoted
//! bundle in that slot's pending list.

use drivechain_primitives::{
    buf::Buf32,
    constants::{UPDATE_BYTES_VERSION, VOTE_ABSTAIN, VOTE_DOWNVOTE},
    sidechain::SidechainNumber,
};

use crate::{
    errors::CodecError,
    vote::{Vote, VoteVector},
};

/// Pending bundle hashes of one slot, in insertion order.
pub type PendingSlot = (SidechainNumber, Vec<Buf32>);

/// Encodes votes against the pending withdrawal lists.
///
/// Slots missing from `votes` abstain.  An upvote for a hash that isn't
/// pending in its slot can't be expressed and is encoded as an abstain.
pub fn generate_update_bytes(pending: &[PendingSlot], votes: &VoteVector) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + pending.len() * 2);
    buf.push(UPDATE_BYTES_VERSION);

    for (slot, hashes) in pending {
        let token = match votes.get(slot).copied().unwrap_or_default() {
            Vote::Abstain => VOTE_ABSTAIN,
            Vote::Downvote => VOTE_DOWNVOTE,
            Vote::Upvote(hash) => hashes
                .iter()
                .position(|h| *h == hash)
                .and_then(|i| u16::try_from(i).ok())
                .filter(|i| *i < VOTE_DOWNVOTE)
                .unwrap_or(VOTE_ABSTAIN),
        };
        buf.extend_from_slice(&token.to_le_bytes());
    }

    buf
}

/// Decodes update bytes against the pending withdrawal lists.
///
/// The resulting vector has one entry per pending slot.
pub fn parse_update_bytes(bytes: &[u8], pending: &[PendingSlot]) -> Result<VoteVector, CodecError> {
    let (version, tokens) = bytes.split_first().ok_or(CodecError::MissingVersion)?;
    if *version != UPDATE_BYTES_VERSION {
        return Err(CodecError::UnsupportedVersion(*version));
    }
    if tokens.len() % 2 != 0 {
        return Err(CodecError::OddTokenLength(tokens.len()));
    }
    if tokens.len() / 2 != pending.len() {
        return Err(CodecError::TokenCountMismatch {
            expected: pending.len(),
            found: tokens.len() / 2,
        });
    }

    let mut votes = VoteVector::new();
    for ((slot, hashes), chunk) in pending.iter().zip(tokens.chunks_exact(2)) {
        let token = u16::from_le_bytes([chunk[0], chunk[1]]);
        let vote = match token {
            VOTE_ABSTAIN => Vote::Abstain,
            VOTE_DOWNVOTE => Vote::Downvote,
            index => {
                let hash = hashes.get(index as usize).ok_or(CodecError::IndexOutOfRange {
                    slot: *slot,
                    index,
                })?;
                Vote::Upvote(*hash)
            }
        };
        votes.insert(*slot, vote);
    }

    Ok(votes)
}

/// Vote vector that abstains on every pending slot.
pub fn abstain_all(pending: &[PendingSlot]) -> VoteVector {
    pending.iter().map(|(slot, _)| (*slot, Vote::Abstain)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Vec<PendingSlot> {
        vec![
            (SidechainNumber(0), vec![Buf32::from([1; 32])]),
            (
                SidechainNumber(4),
                vec![Buf32::from([2; 32]), Buf32::from([3; 32]), Buf32::from([4; 32])],
            ),
        ]
    }

    #[test]
    fn test_all_abstain() {
        let pending = pending();
        let votes = abstain_all(&pending);
        let bytes = generate_update_bytes(&pending, &votes);
        assert_eq!(bytes, vec![0x01, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(parse_update_bytes(&bytes, &pending).unwrap(), votes);
    }

    #[test]
    fn test_all_downvote() {
        let pending = pending();
        let votes: VoteVector = pending
            .iter()
            .map(|(slot, _)| (*slot, Vote::Downvote))
            .collect();
        let bytes = generate_update_bytes(&pending, &votes);
        assert_eq!(bytes, vec![0x01, 0xfe, 0xff, 0xfe, 0xff]);
        assert_eq!(parse_update_bytes(&bytes, &pending).unwrap(), votes);
    }

    #[test]
    fn test_mixed_upvotes() {
        let pending = pending();
        let mut votes = VoteVector::new();
        votes.insert(SidechainNumber(0), Vote::Downvote);
        votes.insert(SidechainNumber(4), Vote::Upvote(Buf32::from([4; 32])));
        let bytes = generate_update_bytes(&pending, &votes);
        assert_eq!(bytes, vec![0x01, 0xfe, 0xff, 0x02, 0x00]);
        assert_eq!(parse_update_bytes(&bytes, &pending).unwrap(), votes);
    }

    #[test]
    fn test_upvote_for_unknown_hash_abstains() {
        let pending = pending();
        let mut votes = VoteVector::new();
        votes.insert(SidechainNumber(0), Vote::Upvote(Buf32::from([9; 32])));
        let bytes = generate_update_bytes(&pending, &votes);
        assert_eq!(parse_update_bytes(&bytes, &pending).unwrap(), abstain_all(&pending));
    }

    #[test]
    fn test_parse_errors() {
        let pending = pending();
        assert_eq!(parse_update_bytes(&[], &pending), Err(CodecError::MissingVersion));
        assert_eq!(
            parse_update_bytes(&[0x02, 0xff, 0xff, 0xff, 0xff], &pending),
            Err(CodecError::UnsupportedVersion(2))
        );
        assert_eq!(
            parse_update_bytes(&[0x01, 0xff, 0xff, 0xff], &pending),
            Err(CodecError::OddTokenLength(3))
        );
        assert_eq!(
            parse_update_bytes(&[0x01, 0xff, 0xff], &pending),
            Err(CodecError::TokenCountMismatch {
                expected: 2,
                found: 1
            })
        );
        assert_eq!(
            parse_update_bytes(&[0x01, 0x01, 0x00, 0xff, 0xff], &pending),
            Err(CodecError::IndexOutOfRange {
                slot: SidechainNumber(0),
                index: 1
            })
        );
    }
}
