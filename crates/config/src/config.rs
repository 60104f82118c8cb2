use bitcoin::{Network, ScriptBuf};
use drivechain_primitives::params::SidechainParams;
use serde::{Deserialize, Serialize};

/// Default value for `undo_depth` in [`ScdbConfig`].
const DEFAULT_UNDO_DEPTH: usize = 288;

/// Default value for `block_max_weight` in [`AssemblerConfig`].
const DEFAULT_BLOCK_MAX_WEIGHT: u64 = 3_996_000;

/// Default value for `block_min_fee_rate` in [`AssemblerConfig`], in sat/kvB.
const DEFAULT_BLOCK_MIN_FEE_RATE: u64 = 1_000;

/// Default value for `max_consecutive_failures` in [`AssemblerConfig`].
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 1_000;

/// Default value for `restart_timeout_secs` in [`MinerConfig`].
const DEFAULT_RESTART_TIMEOUT_SECS: u64 = 60;

/// Default value for `filter` in [`LoggingConfig`].
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScdbConfig {
    /// Network, which picks the sidechain consensus parameters.
    pub network: Network,

    /// How many recent blocks we keep undo data for.
    #[serde(default = "default_undo_depth")]
    pub undo_depth: usize,
}

impl ScdbConfig {
    pub fn params(&self) -> SidechainParams {
        SidechainParams::for_network(self.network)
    }
}

fn default_undo_depth() -> usize {
    DEFAULT_UNDO_DEPTH
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblerConfig {
    /// Weight limit of the templates we build.
    #[serde(default = "default_block_max_weight")]
    pub block_max_weight: u64,

    /// Packages paying less than this, in sat/kvB, are left out.
    #[serde(default = "default_block_min_fee_rate")]
    pub block_min_fee_rate: u64,

    /// Whether transactions with witness data may be selected.
    #[serde(default = "default_true")]
    pub include_witness: bool,

    /// Failed package attempts after which a nearly full block is final.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Where the block reward goes.
    pub payout_script: ScriptBuf,
}

fn default_block_max_weight() -> u64 {
    DEFAULT_BLOCK_MAX_WEIGHT
}

fn default_block_min_fee_rate() -> u64 {
    DEFAULT_BLOCK_MIN_FEE_RATE
}

fn default_max_consecutive_failures() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_FAILURES
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerConfig {
    /// Worker threads searching for a nonce.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Once new transactions arrived, rebuild the template after this long.
    #[serde(default = "default_restart_timeout_secs")]
    pub restart_timeout_secs: u64,

    /// Rebuild the template as soon as new sidechain critical data arrives.
    #[serde(default)]
    pub restart_on_critical_data: bool,
}

fn default_threads() -> usize {
    1
}

fn default_restart_timeout_secs() -> u64 {
    DEFAULT_RESTART_TIMEOUT_SECS
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directives used when `RUST_LOG` isn't set.
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// OTLP collector spans are exported to.  The `DRIVECHAIN_OTLP_URL`
    /// envvar takes precedence.
    #[serde(default)]
    pub otlp_url: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            otlp_url: None,
        }
    }
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub scdb: ScdbConfig,
    pub assembler: AssemblerConfig,
    pub miner: MinerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_config_load() {
        let config_string = r#"
            [scdb]
            network = "regtest"
            undo_depth = 100

            [assembler]
            block_min_fee_rate = 2000
            include_witness = false
            payout_script = "00140000000000000000000000000000000000000000"

            [miner]
            threads = 4
            restart_on_critical_data = true

            [logging]
            otlp_url = "http://localhost:4317"
        "#;

        let config = toml::from_str::<Config>(config_string);
        assert!(
            config.is_ok(),
            "should be able to load TOML config but got: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.scdb.undo_depth, 100);
        assert_eq!(config.scdb.params(), SidechainParams::regtest());
        assert_eq!(config.assembler.block_max_weight, DEFAULT_BLOCK_MAX_WEIGHT);
        assert_eq!(config.assembler.block_min_fee_rate, 2000);
        assert!(!config.assembler.include_witness);
        assert_eq!(config.assembler.payout_script.len(), 22);
        assert_eq!(config.miner.threads, 4);
        assert_eq!(config.miner.restart_timeout_secs, DEFAULT_RESTART_TIMEOUT_SECS);
        assert!(config.miner.restart_on_critical_data);
        assert_eq!(config.logging.filter, DEFAULT_LOG_FILTER);
        assert_eq!(
            config.logging.otlp_url.as_deref(),
            Some("http://localhost:4317")
        );
    }

    #[test]
    fn test_config_defaults() {
        let config_string = r#"
            [scdb]
            network = "bitcoin"

            [assembler]
            payout_script = "51"

            [miner]
        "#;

        let config = toml::from_str::<Config>(config_string).unwrap();
        assert_eq!(config.scdb.undo_depth, DEFAULT_UNDO_DEPTH);
        assert_eq!(config.scdb.params(), SidechainParams::mainnet());
        assert!(config.assembler.include_witness);
        assert_eq!(
            config.assembler.max_consecutive_failures,
            DEFAULT_MAX_CONSECUTIVE_FAILURES
        );
        assert_eq!(config.miner.threads, 1);
        assert!(!config.miner.restart_on_critical_data);
        assert_eq!(config.logging, LoggingConfig::default());
    }
}
