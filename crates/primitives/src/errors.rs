//! Errors during parsing/handling/conversion of primitives.

use thiserror::Error;

/// Parsing errors for sidechain-related bitcoin scripts.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseError {
    /// The script is not a sidechain deposit script.
    #[error("not a sidechain script")]
    NotSidechainScript,
}
