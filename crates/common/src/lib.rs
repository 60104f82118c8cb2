//! Utilities shared by the services embedding the sidechain rules.

pub mod logging;
