//! Builds, mines and connects blocks with the assembler against in-memory
//! collaborators.

use std::sync::Arc;

use bitcoin::{
    hashes::Hash, Amount, Block, BlockHash, CompactTarget, Network, OutPoint, PrivateKey,
    ScriptBuf, TxOut,
};
use drivechain_block_assembly::{
    chain::ChainView,
    errors::AssemblyError,
    mempool::CriticalData,
    sidechain::build_payouts,
    signer::{EcdsaSigner, StaticKeys},
    stubs::{StubChain, StubMempool},
    BlockAssembler, BlockTemplate, BlockTemplateManager, MineOutcome, Miner,
};
use drivechain_config::{AssemblerConfig, MinerConfig};
use drivechain_consensus_logic::{SharedScdb, SidechainDb};
use drivechain_primitives::{
    buf::Buf32, constants::CRITICAL_FEE_SCRIPT, params::SidechainParams,
    sidechain::SidechainNumber,
};
use drivechain_state::{bundle, sidechain::SidechainProposal, vote::Vote};
use drivechain_test_utils::bitcoin::{deposit_tx, payout_output, REGTEST_BITS};
use parking_lot::Mutex;

const SLOT: SidechainNumber = SidechainNumber(0);

fn payout_script() -> ScriptBuf {
    ScriptBuf::from_bytes([&[0x00, 0x14][..], &[0x42; 20]].concat())
}

fn assembler_config() -> AssemblerConfig {
    AssemblerConfig {
        block_max_weight: 3_996_000,
        block_min_fee_rate: 1_000,
        include_witness: true,
        max_consecutive_failures: 1_000,
        payout_script: payout_script(),
    }
}

fn miner_config() -> MinerConfig {
    MinerConfig {
        threads: 2,
        restart_timeout_secs: 60,
        restart_on_critical_data: false,
    }
}

fn proposal() -> SidechainProposal {
    SidechainProposal {
        slot: SLOT,
        version: 0,
        title: "assembled".to_owned(),
        description: "sidechain activated by mined templates".to_owned(),
        hash_id_1: Buf32::from([0x31; 32]),
        hash_id_2: Buf32::from([0x32; 32]),
    }
}

fn keys() -> StaticKeys {
    let mut keys = StaticKeys::new();
    keys.insert(
        SLOT,
        PrivateKey::from_slice(&[9; 32], Network::Regtest).unwrap(),
    );
    keys
}

type TestAssembler = BlockAssembler<StubMempool, StubChain, StaticKeys, EcdsaSigner>;

struct Node {
    scdb: SharedScdb,
    mempool: Arc<StubMempool>,
    chain: Arc<StubChain>,
    assembler: TestAssembler,
    miner: Miner<StubMempool, StubChain>,
    templates: BlockTemplateManager,
}

impl Node {
    fn new() -> Self {
        let scdb: SharedScdb = Arc::new(Mutex::new(SidechainDb::new(
            SidechainParams::regtest(),
            16,
        )));
        let mempool = Arc::new(StubMempool::new());
        let chain = Arc::new(StubChain::new(
            BlockHash::all_zeros(),
            0,
            CompactTarget::from_consensus(REGTEST_BITS),
        ));

        let assembler = BlockAssembler::new(
            assembler_config(),
            scdb.clone(),
            mempool.clone(),
            chain.clone(),
            Arc::new(keys()),
            Arc::new(EcdsaSigner::new()),
        );
        let miner = Miner::new(miner_config(), mempool.clone(), chain.clone());

        Self {
            scdb,
            mempool,
            chain,
            assembler,
            miner,
            templates: BlockTemplateManager::new(),
        }
    }

    fn template(&self) -> BlockTemplate {
        self.assembler
            .create_new_block()
            .expect("test: template builds")
    }

    /// Builds, mines and connects the next block.
    fn mine_block(&mut self) -> (BlockTemplate, Block) {
        let template = self.template();
        let id = self.templates.insert_template(template.clone());
        let MineOutcome::Found(solution) = self.miner.mine_template(&template) else {
            panic!("test: regtest target should be met");
        };
        let block = self
            .templates
            .complete_block_template(id, solution, self.chain.tip_hash())
            .expect("test: solution completes template");

        self.scdb
            .lock()
            .update(&block, false)
            .expect("test: mined block connects");
        self.chain.set_tip(block.block_hash(), template.height());
        for tx in block.txdata.iter().skip(1) {
            self.mempool.remove(&tx.compute_txid());
        }
        self.mempool.reset_critical_added();
        (template, block)
    }

    fn activate(&mut self) {
        let hash = {
            let mut db = self.scdb.lock();
            let hash = db.cache_mut().add_proposal(proposal());
            db.cache_mut().ack_proposal(hash);
            hash
        };
        let period = self.scdb.lock().params().activation_period;
        for i in 0..period {
            let (template, _) = self.mine_block();
            let commits = template.commitments();
            if i == 0 {
                assert!(commits.proposal.is_some());
                assert!(commits.acks.is_empty());
            } else {
                assert!(commits.proposal.is_none());
                assert_eq!(commits.acks, vec![hash]);
            }
        }
    }
}

#[test]
fn test_template_collects_fees() {
    let mut node = Node::new();
    let a = node.mempool.add_standalone(Amount::from_sat(2_000));
    let b = node.mempool.add_standalone(Amount::from_sat(3_000));

    let (template, block) = node.mine_block();
    let txids: Vec<_> = block.txdata.iter().map(|tx| tx.compute_txid()).collect();
    assert_eq!(&txids[1..], &[b, a]);
    assert_eq!(template.fees(), Amount::from_sat(5_000));

    let subsidy = node.chain.block_subsidy(1);
    let coinbase = &block.txdata[0];
    assert_eq!(coinbase.output[0].value, subsidy + Amount::from_sat(5_000));
    assert_eq!(coinbase.output[0].script_pubkey, payout_script());
    assert_eq!(coinbase.output.len(), 1);
    assert!(block.check_merkle_root());
    assert_eq!(node.mempool.bmm_selected_on(), Some(BlockHash::all_zeros()));
    assert_eq!(node.mempool.expired_at(), Some(1));
}

#[test]
fn test_sidechain_activated_by_templates() {
    let mut node = Node::new();
    node.activate();

    let db = node.scdb.lock();
    assert_eq!(db.state().registry().active_count(), 1);
    assert!(db.cache().proposals().is_empty());
    assert!(db.cache().acks().is_empty());
}

#[test]
fn test_template_on_stale_tip_fails() {
    let mut node = Node::new();
    node.mine_block();
    node.chain.set_tip(BlockHash::from_byte_array([7; 32]), 5);

    assert!(matches!(
        node.assembler.create_new_block(),
        Err(AssemblyError::TipMismatch { .. })
    ));
}

#[test]
fn test_critical_data_fee_swept() {
    let mut node = Node::new();

    let mut tx = StubMempool::standalone_tx();
    tx.output.push(TxOut {
        value: Amount::from_sat(700),
        script_pubkey: ScriptBuf::from_bytes(CRITICAL_FEE_SCRIPT.to_vec()),
    });
    let critical = |height| CriticalData {
        height,
        hash: Buf32::from([5; 32]),
    };
    let bmm = node
        .mempool
        .add_tx(tx, Amount::from_sat(1_000), Some(critical(1)));
    let later = node
        .mempool
        .add_tx(StubMempool::standalone_tx(), Amount::from_sat(1_000), Some(critical(3)));

    let (_, block) = node.mine_block();
    let txids: Vec<_> = block.txdata.iter().map(|tx| tx.compute_txid()).collect();
    assert!(txids.contains(&bmm));
    assert!(!txids.contains(&later));

    let sweep = block.txdata.last().unwrap();
    assert_eq!(sweep.input.len(), 1);
    assert_eq!(sweep.input[0].previous_output, OutPoint::new(bmm, 1));
    assert_eq!(sweep.output[0].value, Amount::from_sat(700));
    assert_eq!(sweep.output[0].script_pubkey, payout_script());
}

#[test]
fn test_withdrawal_paid_out_by_template() {
    let mut node = Node::new();
    node.activate();

    // Fund the sidechain.
    let deposit = deposit_tx(SLOT.0, None, Amount::from_sat(100_000), "sc-addr");
    node.mempool.add_tx(deposit, Amount::from_sat(1_000), None);
    node.mine_block();
    let ctip = *node.scdb.lock().state().deposits().ctip(SLOT).unwrap();
    assert_eq!(ctip.amount(), Amount::from_sat(100_000));

    // The sidechain hands us a bundle, the next template commits it.
    let raw = bundle::build_raw_bundle(
        Amount::from_sat(1_000),
        vec![payout_output(30_000), payout_output(20_000)],
    );
    let hash = node.scdb.lock().cache_mut().cache_bundle(SLOT, raw);
    let (template, _) = node.mine_block();
    assert_eq!(template.commitments().withdrawals, vec![(SLOT, hash)]);
    assert!(node.scdb.lock().state().withdrawals().get(SLOT, &hash).is_some());

    // Without a vote set, abstaining says the same and no bytes are written.
    assert!(node.template().commitments().update_bytes.is_none());

    node.scdb
        .lock()
        .cache_mut()
        .set_vote(SLOT, Vote::Upvote(hash));
    let min_workscore = node.scdb.lock().params().min_workscore;
    loop {
        let score = node
            .scdb
            .lock()
            .state()
            .withdrawals()
            .get(SLOT, &hash)
            .unwrap()
            .score();
        if score >= min_workscore {
            break;
        }
        let (template, _) = node.mine_block();
        assert!(template.commitments().update_bytes.is_some());
        assert!(template.payouts().is_empty());
    }

    // A payout whose outputs already exist is skipped.
    let payout_txid = {
        let db = node.scdb.lock();
        let payouts = build_payouts(&db, &*node.chain, &keys(), &EcdsaSigner::new());
        assert_eq!(payouts.len(), 1);
        let txid = payouts[0].tx.compute_txid();

        let replayed = StubChain::new(
            node.chain.tip_hash(),
            node.chain.height(),
            CompactTarget::from_consensus(REGTEST_BITS),
        );
        replayed.add_coin(OutPoint::new(txid, 0));
        assert!(build_payouts(&db, &replayed, &keys(), &EcdsaSigner::new()).is_empty());
        txid
    };

    // Deposits to a slot paying out wait for the next block.
    let racing = deposit_tx(
        SLOT.0,
        Some(ctip.outpoint()),
        Amount::from_sat(150_000),
        "late",
    );
    let racing_txid = node.mempool.add_tx(racing, Amount::from_sat(1_000), None);

    let (template, block) = node.mine_block();
    assert_eq!(template.payouts(), &[(SLOT, hash)]);
    let txids: Vec<_> = block.txdata.iter().map(|tx| tx.compute_txid()).collect();
    assert!(!txids.contains(&racing_txid));
    assert!(txids.contains(&payout_txid));
    node.mempool.remove(&racing_txid);

    // The bundle fee goes to the miner.
    let subsidy = node.chain.block_subsidy(template.height());
    assert_eq!(
        block.txdata[0].output[0].value,
        subsidy + Amount::from_sat(1_000)
    );

    let db = node.scdb.lock();
    let withdrawals = db.state().withdrawals();
    assert!(withdrawals.is_spent(SLOT, &hash));
    assert!(withdrawals.get(SLOT, &hash).is_none());
    assert!(db.cache().raw_bundle(&hash).is_none());

    let ctip = db.state().deposits().ctip(SLOT).unwrap();
    assert_eq!(ctip.outpoint(), OutPoint::new(payout_txid, 4));
    assert_eq!(ctip.amount(), Amount::from_sat(49_000));
}

#[test]
fn test_competing_deposits_do_not_break_template() {
    let mut node = Node::new();
    node.activate();

    let small = deposit_tx(SLOT.0, None, Amount::from_sat(10_000), "small");
    let small = node.mempool.add_tx(small, Amount::from_sat(1_000), None);
    let large = deposit_tx(SLOT.0, None, Amount::from_sat(20_000), "large");
    let large = node.mempool.add_tx(large, Amount::from_sat(1_000), None);
    let plain = node.mempool.add_standalone(Amount::from_sat(2_000));

    let (template, block) = node.mine_block();
    let txids: Vec<_> = block.txdata.iter().map(|tx| tx.compute_txid()).collect();
    let picked: Vec<_> = [small, large]
        .into_iter()
        .filter(|txid| txids.contains(txid))
        .collect();
    assert_eq!(picked.len(), 1);
    assert!(txids.contains(&plain));
    assert_eq!(
        template.fees(),
        Amount::from_sat(3_000),
        "only the chosen deposit's fee is collected"
    );

    let ctip = *node.scdb.lock().state().deposits().ctip(SLOT).unwrap();
    assert_eq!(ctip.outpoint().txid, picked[0]);
}
