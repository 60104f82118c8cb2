//! Replays blocks through the sidechain rules offline.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use argh::FromArgs;
use drivechain_common::logging;
use drivechain_config::Config;
use drivechain_consensus_logic::SidechainDb;
use tokio::runtime::Handle;
use tracing::*;

mod replay;

/// Args.
#[derive(FromArgs)]
pub struct Args {
    #[argh(option, short = 'c', description = "path to the node config")]
    config: PathBuf,
    #[argh(subcommand)]
    subc: Subcommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
pub enum Subcommand {
    Replay(SubcReplay),
    Check(SubcCheck),
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "replay",
    description = "connect every block and print the resulting state"
)]
pub struct SubcReplay {
    #[argh(option, short = 'b', description = "file with one hex block per line")]
    blocks: PathBuf,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "check",
    description = "connect all but the last block, then dry-run the last one"
)]
pub struct SubcCheck {
    #[argh(option, short = 'b', description = "file with one hex block per line")]
    blocks: PathBuf,
}

fn main() {
    let args: Args = argh::from_env();
    if let Err(e) = main_inner(args) {
        eprintln!("{e}\n{e:?}");
        std::process::exit(1);
    }
}

fn main_inner(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;

    // Only hosts the OTLP exporter.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("scdb-tool-rt")
        .build()
        .context("init: build rt")?;
    init_logging(runtime.handle(), &config)?;

    let mut db = SidechainDb::from_config(&config.scdb);
    let res = run(&mut db, args.subc);
    logging::finalize();
    res
}

fn run(db: &mut SidechainDb, subc: Subcommand) -> anyhow::Result<()> {
    match subc {
        Subcommand::Replay(subc) => {
            let blocks = replay::read_blocks(&subc.blocks)?;
            replay::replay(db, &blocks)?;
            println!("{}", replay::ScdbSummary::new(db));
        }
        Subcommand::Check(subc) => {
            let blocks = replay::read_blocks(&subc.blocks)?;
            let effects = replay::check_last(db, &blocks)?;
            println!("{effects:#?}");
        }
    }
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str::<Config>(&raw).with_context(|| format!("parsing config {}", path.display()))
}

fn init_logging(rt: &Handle, config: &Config) -> anyhow::Result<()> {
    let lconfig = logging::LoggerConfig::new("scdb-tool", &config.logging);

    {
        // The batch exporter spawns onto the runtime.
        let _g = rt.enter();
        logging::init(&lconfig)?;
    }

    debug!(network = %config.scdb.network, "loaded config");
    Ok(())
}
