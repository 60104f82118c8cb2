//! Consensus parameters for the sidechain rules.

use bitcoin::Network;
use serde::{Deserialize, Serialize};

/// Consensus parameters that don't change for the lifetime of the network.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SidechainParams {
    /// Number of blocks a withdrawal bundle is tracked for before it fails.
    pub verification_period: u16,

    /// Workscore a bundle needs before it may be paid out.
    pub min_workscore: u16,

    /// Blocks of acks a proposal needs to activate on an empty slot.
    pub activation_period: u32,

    /// Blocks of acks a proposal needs to replace an active sidechain.
    pub replacement_period: u32,

    /// Missed acks after which a proposal is dropped.
    pub max_activation_failures: u32,
}

impl SidechainParams {
    pub fn mainnet() -> Self {
        Self {
            verification_period: 26_300,
            min_workscore: 13_150,
            activation_period: 2_016,
            replacement_period: 1_008,
            max_activation_failures: 201,
        }
    }

    pub fn regtest() -> Self {
        Self {
            verification_period: 300,
            min_workscore: 131,
            activation_period: 20,
            replacement_period: 10,
            max_activation_failures: 5,
        }
    }

    /// Picks the parameter set for a bitcoin network.  Everything but the
    /// main network uses the short regtest periods.
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Bitcoin => Self::mainnet(),
            _ => Self::regtest(),
        }
    }

    /// Blocks left on a freshly added withdrawal bundle.
    pub fn initial_blocks_left(&self) -> u16 {
        self.verification_period - 1
    }
}
