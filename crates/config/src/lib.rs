//! Node configuration for the sidechain consensus, block assembly and mining.

mod config;

pub use config::*;
