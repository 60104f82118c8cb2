//! Collection of generic data types and constants that are used widely across
//! the sidechain consensus crates.

#[macro_use]
mod macros;

pub mod buf;
pub mod constants;
pub mod errors;
pub mod hash;
pub mod l1;
pub mod params;
pub mod sidechain;

pub mod prelude;
