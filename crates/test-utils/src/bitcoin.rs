//! Builders for the bitcoin objects the sidechain rules look at.

use bitcoin::{
    absolute::LockTime,
    block::{Header, Version as BlockVersion},
    hashes::Hash,
    opcodes::{all::OP_RETURN, OP_0},
    script::{Builder, PushBytesBuf},
    transaction::Version,
    Amount, Block, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxMerkleNode, TxOut, Txid, WPubkeyHash, Witness,
};
use drivechain_primitives::sidechain::SidechainNumber;
use rand::{rngs::OsRng, RngCore};

/// Regtest's proof of work limit, so any nonce does.
pub const REGTEST_BITS: u32 = 0x207f_ffff;

pub fn random_outpoint() -> OutPoint {
    let mut txid = [0u8; 32];
    OsRng.fill_bytes(&mut txid);
    OutPoint::new(Txid::from_byte_array(txid), OsRng.next_u32() % 4)
}

/// Output paying to a throwaway P2WPKH script derived from the amount.
pub fn payout_output(sats: u64) -> TxOut {
    let mut pkh = [0u8; 20];
    pkh[..8].copy_from_slice(&sats.to_le_bytes());
    TxOut {
        value: Amount::from_sat(sats),
        script_pubkey: ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(pkh)),
    }
}

pub fn op_return_output(data: &[u8]) -> TxOut {
    let push = PushBytesBuf::try_from(data.to_vec()).expect("test: op_return data too large");
    TxOut {
        value: Amount::ZERO,
        script_pubkey: Builder::new()
            .push_opcode(OP_RETURN)
            .push_slice(push)
            .into_script(),
    }
}

/// Deposit into a sidechain.  It spends `prev`, the sidechain's CTIP, or a
/// random outpoint for the first deposit.
pub fn deposit_tx(slot: u8, prev: Option<OutPoint>, value: Amount, dest: &str) -> Transaction {
    let mut input = vec![TxIn {
        previous_output: prev.unwrap_or_else(random_outpoint),
        script_sig: ScriptBuf::new(),
        sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
        witness: Witness::new(),
    }];
    if prev.is_some() {
        // Funding input, so deposits of equal value still differ.
        input.push(TxIn {
            previous_output: random_outpoint(),
            ..Default::default()
        });
    }

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output: vec![
            op_return_output(dest.as_bytes()),
            TxOut {
                value,
                script_pubkey: SidechainNumber(slot).script(),
            },
        ],
    }
}

/// Fills in the CTIP input and change output of a raw withdrawal bundle.
pub fn complete_bundle(
    raw: &Transaction,
    ctip: OutPoint,
    sidechain_script: ScriptBuf,
    change: Amount,
) -> Transaction {
    let mut tx = raw.clone();
    tx.input = vec![TxIn {
        previous_output: ctip,
        ..Default::default()
    }];
    tx.output.push(TxOut {
        value: change,
        script_pubkey: sidechain_script,
    });
    tx
}

/// Coinbase with a BIP34 height and the given outputs after the reward.
pub fn coinbase_tx(height: u32, reward: Amount, extra_outputs: Vec<TxOut>) -> Transaction {
    let script_sig = Builder::new()
        .push_int(height as i64)
        .push_opcode(OP_0)
        .into_script();

    let mut output = vec![TxOut {
        value: reward,
        script_pubkey: ScriptBuf::new_p2wpkh(&WPubkeyHash::all_zeros()),
    }];
    output.extend(extra_outputs);

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

/// Block on top of `prev` holding a coinbase with `commitments` and then
/// `txs`.
pub fn build_block(
    prev: BlockHash,
    height: u32,
    commitments: Vec<ScriptBuf>,
    txs: Vec<Transaction>,
) -> Block {
    let outputs = commitments
        .into_iter()
        .map(|script_pubkey| TxOut {
            value: Amount::ZERO,
            script_pubkey,
        })
        .collect();

    let mut txdata = vec![coinbase_tx(height, Amount::from_sat(50 * 100_000_000), outputs)];
    txdata.extend(txs);

    let mut block = Block {
        header: Header {
            version: BlockVersion::from_consensus(0x2000_0000),
            prev_blockhash: prev,
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_700_000_000 + height,
            bits: CompactTarget::from_consensus(REGTEST_BITS),
            nonce: 0,
        },
        txdata,
    };
    block.header.merkle_root = block
        .compute_merkle_root()
        .expect("test: block has transactions");
    block
}

/// Builds a chain of blocks one at a time.
#[derive(Debug)]
pub struct ChainBuilder {
    tip: BlockHash,
    height: u32,
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self {
            tip: BlockHash::all_zeros(),
            height: 0,
        }
    }

    pub fn tip(&self) -> BlockHash {
        self.tip
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Builds the next block and moves the tip to it.
    pub fn next(&mut self, commitments: Vec<ScriptBuf>, txs: Vec<Transaction>) -> Block {
        let block = build_block(self.tip, self.height + 1, commitments, txs);
        self.tip = block.block_hash();
        self.height += 1;
        block
    }

    /// Moves the tip back after a block was disconnected.
    pub fn rewind(&mut self, prev: BlockHash) {
        self.tip = prev;
        self.height = self.height.saturating_sub(1);
    }
}
