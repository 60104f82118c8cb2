//! Proof of work search over a block template.
//!
//! Workers run on a thread pool and each walk their own slice of the nonce
//! space.  Every [`HASH_CHECK_INTERVAL`] attempts they check whether the
//! template is still worth mining.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    time::{Duration, Instant},
};

use bitcoin::{block::Header, BlockHash};
use drivechain_config::MinerConfig;
use threadpool::ThreadPool;
use tracing::*;

use crate::{
    chain::{next_block_time, ChainView},
    mempool::MempoolView,
    template::{BlockTemplate, PowSolution},
};

/// Hash attempts between checks of the restart conditions.
pub const HASH_CHECK_INTERVAL: u32 = 0x1_0000;

/// Workers give up on a template past this nonce.
const MAX_NONCE: u32 = 0xffff_0000;

/// Why mining a template stopped without a solution.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RestartReason {
    TipChanged,

    /// New transactions arrived and the template is older than the timeout.
    Timeout,

    /// The clock went back past the template's timestamp.
    ClockMovedBack,

    CriticalData,
    NonceSpaceExhausted,

    /// Every worker went away without reporting.
    WorkersLost,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MineOutcome {
    Found(PowSolution),
    Restart(RestartReason),
}

/// What a worker reports when it stops.  `Stopped(None)` means it was told to.
enum WorkerResult {
    Found(PowSolution),
    Stopped(Option<RestartReason>),
}

/// Immutable inputs of one mining run.
#[derive(Clone)]
struct MiningJob {
    header: Header,
    prev: BlockHash,
    transactions_updated: u64,
    critical_txn_added: bool,
    started: Instant,
    timeout: Duration,
    restart_on_critical_data: bool,
}

#[derive(Debug)]
pub struct Miner<M, C> {
    config: MinerConfig,
    mempool: Arc<M>,
    chain: Arc<C>,
    pool: ThreadPool,
}

impl<M: MempoolView, C: ChainView> Miner<M, C> {
    pub fn new(config: MinerConfig, mempool: Arc<M>, chain: Arc<C>) -> Self {
        let pool = ThreadPool::with_name("miner".to_owned(), config.threads.max(1));
        Self {
            config,
            mempool,
            chain,
            pool,
        }
    }

    fn threads(&self) -> u32 {
        self.config.threads.clamp(1, u32::MAX as usize) as u32
    }

    /// Searches for a nonce meeting the template's target.  Blocks until a
    /// worker finds one or the template has to be rebuilt.
    pub fn mine_template(&self, template: &BlockTemplate) -> MineOutcome {
        let threads = self.threads();
        let job = MiningJob {
            header: *template.header(),
            prev: template.prev_blockhash(),
            transactions_updated: template.transactions_updated(),
            critical_txn_added: template.critical_txn_added(),
            started: Instant::now(),
            timeout: Duration::from_secs(self.config.restart_timeout_secs),
            restart_on_critical_data: self.config.restart_on_critical_data,
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let (res_tx, res_rx) = mpsc::channel();
        for worker in 0..threads {
            let job = job.clone();
            let cancel = cancel.clone();
            let res_tx = res_tx.clone();
            let mempool = self.mempool.clone();
            let chain = self.chain.clone();
            self.pool.execute(move || {
                let res = search_nonces(&job, worker, threads, &cancel, &*mempool, &*chain);
                if res_tx.send(res).is_err() {
                    warn!(%worker, "miner result receiver dropped");
                }
            });
        }
        drop(res_tx);

        let mut outcome = None;
        for res in res_rx.iter() {
            match res {
                WorkerResult::Found(solution) => {
                    cancel.store(true, Ordering::Relaxed);
                    if !matches!(outcome, Some(MineOutcome::Found(_))) {
                        outcome = Some(MineOutcome::Found(solution));
                    }
                }
                WorkerResult::Stopped(Some(reason)) => {
                    cancel.store(true, Ordering::Relaxed);
                    outcome.get_or_insert(MineOutcome::Restart(reason));
                }
                WorkerResult::Stopped(None) => {}
            }
        }

        let outcome = outcome.unwrap_or(MineOutcome::Restart(RestartReason::WorkersLost));
        match outcome {
            MineOutcome::Found(solution) => {
                info!(height = template.height(), nonce = solution.nonce, "found block")
            }
            MineOutcome::Restart(reason) => debug!(?reason, "restarting miner"),
        }
        outcome
    }
}

fn search_nonces(
    job: &MiningJob,
    first_nonce: u32,
    stride: u32,
    cancel: &AtomicBool,
    mempool: &impl MempoolView,
    chain: &impl ChainView,
) -> WorkerResult {
    let mut header = job.header;
    let target = header.target();
    let mut nonce = first_nonce;
    let mut until_check = 0u32;

    loop {
        if until_check == 0 {
            if cancel.load(Ordering::Relaxed) {
                return WorkerResult::Stopped(None);
            }
            if let Some(reason) = restart_reason(job, &mut header, mempool, chain) {
                return WorkerResult::Stopped(Some(reason));
            }
            until_check = HASH_CHECK_INTERVAL;
        }

        header.nonce = nonce;
        if target.is_met_by(header.block_hash()) {
            return WorkerResult::Found(PowSolution {
                time: header.time,
                nonce,
            });
        }
        until_check -= 1;

        nonce = match nonce.checked_add(stride) {
            Some(next) if next < MAX_NONCE => next,
            _ => return WorkerResult::Stopped(Some(RestartReason::NonceSpaceExhausted)),
        };
    }
}

/// Checks whether the template went stale.  Otherwise rolls the header time
/// forward to the current time.
fn restart_reason(
    job: &MiningJob,
    header: &mut Header,
    mempool: &impl MempoolView,
    chain: &impl ChainView,
) -> Option<RestartReason> {
    if chain.tip_hash() != job.prev {
        return Some(RestartReason::TipChanged);
    }
    if mempool.transactions_updated() != job.transactions_updated
        && job.started.elapsed() > job.timeout
    {
        return Some(RestartReason::Timeout);
    }
    if job.restart_on_critical_data && !job.critical_txn_added && mempool.critical_txn_added() {
        return Some(RestartReason::CriticalData);
    }

    let now = next_block_time(chain);
    if now < header.time {
        return Some(RestartReason::ClockMovedBack);
    }
    header.time = now;
    None
}
