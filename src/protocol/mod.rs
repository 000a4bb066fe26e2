//! Protocol module - Defines the RCON wire protocol
//!
//! Every packet is a little-endian, length-prefixed frame:
//! - 4 bytes size (counts everything after itself)
//! - 4 bytes request id
//! - 4 bytes packet type
//! - Variable length body
//! - 2 zero terminator bytes

mod codec;
mod id;
mod packet;

pub use codec::*;
pub use id::*;
pub use packet::*;

/// Default RCON port used by Source engine servers
pub const DEFAULT_PORT: u16 = 27015;

/// Length of the leading size field
pub const SIZE_FIELD_LEN: usize = 4;

/// Header size: size(4) + id(4) + type(4) = 12 bytes
pub const HEADER_SIZE: usize = 12;

/// Trailing terminator bytes after the body
pub const TERMINATOR_LEN: usize = 2;

/// Smallest legal value of the size field: id + type + terminators
pub const MIN_FRAME_SIZE: usize = 4 + 4 + TERMINATOR_LEN;

/// Bytes added to every body on the wire
pub const FRAME_OVERHEAD: usize = HEADER_SIZE + TERMINATOR_LEN;

/// Default upper bound on a declared frame size (1 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;
