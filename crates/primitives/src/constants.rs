//! Constants for magic numbers and byte strings used by the sidechain
//! consensus rules.  Everything in here is consensus-critical.

/// Number of sidechain slots.
pub const MAX_SIDECHAINS: usize = 256;

/// Upper bound of a withdrawal bundle's workscore.
pub const MAX_WORKSCORE: u16 = u16::MAX;

/// `OP_RETURN`, the first byte of every commitment script.
pub const OP_RETURN_BYTE: u8 = 0x6a;

/// Marker for a sidechain proposal commitment.
pub const PROPOSAL_COMMIT_MARKER: [u8; 4] = [0xD5, 0xE0, 0xC4, 0xAF];

/// Marker for a sidechain activation ack commitment.
pub const ACK_COMMIT_MARKER: [u8; 4] = [0xD6, 0xE1, 0xC5, 0xDF];

/// Marker for a new withdrawal bundle hash commitment.
pub const WITHDRAWAL_COMMIT_MARKER: [u8; 4] = [0xD4, 0x5A, 0xA9, 0x43];

/// Marker for the SCDB update bytes commitment.
pub const UPDATE_BYTES_MARKER: [u8; 4] = [0xD7, 0x7D, 0x17, 0x76];

/// Current version of the update bytes encoding.
pub const UPDATE_BYTES_VERSION: u8 = 0x01;

/// Update bytes token for an abstaining slot.
pub const VOTE_ABSTAIN: u16 = 0xFFFF;

/// Update bytes token for a downvoting slot.
pub const VOTE_DOWNVOTE: u16 = 0xFFFE;

/// Output 0 of every withdrawal bundle, `OP_RETURN` pushing "D".
pub const WITHDRAWAL_RETURN_DEST_SCRIPT: [u8; 3] = [OP_RETURN_BYTE, 0x01, b'D'];

/// Prefix of the withdrawal fee output, `OP_RETURN OP_PUSHBYTES_8`.
pub const WITHDRAWAL_FEE_PREFIX: [u8; 2] = [OP_RETURN_BYTE, 0x08];

/// Total size of the withdrawal fee output script.
pub const WITHDRAWAL_FEE_SCRIPT_LEN: usize = 10;

/// `OP_NOP5`, repurposed as the sidechain opcode.
pub const OP_DRIVECHAIN: u8 = 0xb4;

/// `OP_TRUE`.
pub const OP_TRUE_BYTE: u8 = 0x51;

/// Critical data fee outputs pay to a bare `OP_TRUE` the miner sweeps.
pub const CRITICAL_FEE_SCRIPT: [u8; 1] = [OP_TRUE_BYTE];
