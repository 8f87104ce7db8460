//! Protocol module - Defines the TTCP wire protocol
//!
//! Every packet is a fixed envelope followed by a variant payload:
//! - 1 byte protocol version
//! - 4 bytes total packet length (big-endian, envelope included)
//! - 1 byte packet type tag
//! - 8 bytes timestamp in milliseconds (big-endian, signed)
//! - Variable length payload

mod codec;
mod error_code;
mod packet;
mod primitives;
mod stream;
mod types;

pub use codec::*;
pub use error_code::*;
pub use packet::*;
pub use primitives::*;
pub use stream::*;
pub use types::*;

/// Protocol version carried in the first byte of every packet
pub const PROTOCOL_VERSION: u8 = 1;

/// Default port for TTCP servers
pub const DEFAULT_PORT: u16 = 53111;

/// Envelope size: version(1) + length(4) + type(1) + timestamp(8) = 14 bytes
pub const ENVELOPE_SIZE: usize = 14;

/// Bytes preceding the read-ahead region: version(1) + length(4)
pub(crate) const PREFIX_SIZE: usize = 5;

/// Default upper bound for a single encoded packet (64 MB)
pub const DEFAULT_MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;
