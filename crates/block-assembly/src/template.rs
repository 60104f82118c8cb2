//! Block templates and the pieces of a block the assembler writes itself.

use bitcoin::{
    absolute::LockTime,
    block::{Header, Version as BlockVersion},
    hashes::Hash,
    opcodes::OP_0,
    script::Builder,
    transaction::Version,
    Amount, Block, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxMerkleNode, TxOut, Witness,
};
use drivechain_primitives::{buf::Buf32, sidechain::SidechainNumber};

use crate::sidechain::SidechainCommitments;

/// Version bits we signal, plain BIP9 top bits.
pub const BLOCK_VERSION: i32 = 0x2000_0000;

/// `OP_RETURN OP_PUSHBYTES_36` and the BIP141 commitment header.
const WITNESS_COMMITMENT_PREFIX: [u8; 6] = [0x6a, 0x24, 0xaa, 0x21, 0xa9, 0xed];

/// Identifies a template, the hash of its header before any work was done.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TemplateId(Buf32);

impl From<BlockHash> for TemplateId {
    fn from(value: BlockHash) -> Self {
        Self(value.into())
    }
}

/// Header fields the miner varies.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PowSolution {
    pub time: u32,
    pub nonce: u32,
}

/// A block ready to be mined, with what went into it.
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    block: Block,
    height: u32,
    fees: Amount,
    payouts: Vec<(SidechainNumber, Buf32)>,
    commitments: SidechainCommitments,

    /// Mempool update counter when the template was built.
    transactions_updated: u64,

    /// Whether critical data had arrived when the template was built.
    critical_txn_added: bool,
}

impl BlockTemplate {
    pub(crate) fn new(
        block: Block,
        height: u32,
        fees: Amount,
        payouts: Vec<(SidechainNumber, Buf32)>,
        commitments: SidechainCommitments,
        transactions_updated: u64,
        critical_txn_added: bool,
    ) -> Self {
        Self {
            block,
            height,
            fees,
            payouts,
            commitments,
            transactions_updated,
            critical_txn_added,
        }
    }

    pub fn id(&self) -> TemplateId {
        self.block.block_hash().into()
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn header(&self) -> &Header {
        &self.block.header
    }

    pub fn prev_blockhash(&self) -> BlockHash {
        self.block.header.prev_blockhash
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Transaction fees, not counting the subsidy.
    pub fn fees(&self) -> Amount {
        self.fees
    }

    /// Withdrawal bundles paid out by this block.
    pub fn payouts(&self) -> &[(SidechainNumber, Buf32)] {
        &self.payouts
    }

    pub fn commitments(&self) -> &SidechainCommitments {
        &self.commitments
    }

    pub fn transactions_updated(&self) -> u64 {
        self.transactions_updated
    }

    pub fn critical_txn_added(&self) -> bool {
        self.critical_txn_added
    }

    /// The block with the miner's solution filled in.
    pub fn complete(&self, solution: PowSolution) -> Block {
        let mut block = self.block.clone();
        block.header.time = solution.time;
        block.header.nonce = solution.nonce;
        block
    }
}

/// Coinbase paying `reward` to `payout_script`, followed by the commitments.
pub fn build_coinbase(
    height: u32,
    reward: Amount,
    payout_script: &ScriptBuf,
    commitments: Vec<ScriptBuf>,
) -> Transaction {
    // BIP34 height, and a zero extra nonce.
    let script_sig = Builder::new()
        .push_int(height as i64)
        .push_opcode(OP_0)
        .into_script();

    let mut output = Vec::with_capacity(1 + commitments.len());
    output.push(TxOut {
        value: reward,
        script_pubkey: payout_script.clone(),
    });
    output.extend(commitments.into_iter().map(|script_pubkey| TxOut {
        value: Amount::ZERO,
        script_pubkey,
    }));

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig,
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output,
    }
}

/// Adds the BIP141 witness commitment to the coinbase if any transaction
/// has witness data.  Must be called before the merkle root is computed.
pub fn add_witness_commitment(block: &mut Block) {
    let has_witness = block
        .txdata
        .iter()
        .skip(1)
        .any(|tx| tx.input.iter().any(|txin| !txin.witness.is_empty()));
    if !has_witness {
        return;
    }

    let reserved = [0u8; 32];
    let Some(witness_root) = block.witness_root() else {
        return;
    };
    let commitment = Block::compute_witness_commitment(&witness_root, &reserved);

    let mut script = WITNESS_COMMITMENT_PREFIX.to_vec();
    script.extend_from_slice(commitment.as_byte_array());

    let Some(coinbase) = block.txdata.first_mut() else {
        return;
    };
    if let Some(txin) = coinbase.input.first_mut() {
        txin.witness = Witness::from_slice(&[reserved]);
    }
    coinbase.output.push(TxOut {
        value: Amount::ZERO,
        script_pubkey: ScriptBuf::from_bytes(script),
    });
}

/// Assembles the block and fills in the merkle root.
pub fn build_block(header: Header, txdata: Vec<Transaction>, include_witness: bool) -> Block {
    let mut block = Block { header, txdata };
    if include_witness {
        add_witness_commitment(&mut block);
    }
    if let Some(root) = block.compute_merkle_root() {
        block.header.merkle_root = root;
    }
    block
}

/// Header template on top of `prev`, merkle root still unset.
pub fn header_template(prev: BlockHash, time: u32, bits: CompactTarget) -> Header {
    Header {
        version: BlockVersion::from_consensus(BLOCK_VERSION),
        prev_blockhash: prev,
        merkle_root: TxMerkleNode::all_zeros(),
        time,
        bits,
        nonce: 0,
    }
}
