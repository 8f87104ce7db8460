//! Protocol codec for encoding/decoding packets
//!
//! Handles the envelope framing around each payload. The [`Decoder`] works
//! incrementally on a `BytesMut` filled by an async transport; the blocking
//! front end lives in [`super::PacketReader`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

use super::primitives::FieldReader;
use super::{
    Packet, PacketType, Payload, DEFAULT_MAX_PACKET_SIZE, ENVELOPE_SIZE, PREFIX_SIZE,
    PROTOCOL_VERSION,
};

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown packet type: 0x{0:02x}")]
    UnknownPacketType(u8),

    #[error("Unknown error code: 0x{0:02x}")]
    UnknownErrorCode(u8),

    #[error("Unknown termination type: 0x{0:02x}")]
    UnknownTerminationType(u8),

    #[error("Truncated input: needed {needed} bytes, {available} available")]
    TruncatedInput { needed: usize, available: usize },

    #[error("Invalid UTF-8 in string field: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),

    #[error("Length mismatch: declared {declared} bytes, decoded {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("User list mismatch: {ids} ids, {names} names")]
    UserListMismatch { ids: usize, names: usize },

    #[error("Invalid packet length: {0} (shorter than the envelope)")]
    InvalidLength(u32),

    #[error("Packet too large: {0} bytes (max: {1})")]
    PacketTooLarge(usize, usize),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Whether the stream is still positioned on a packet boundary.
    ///
    /// Payload-level failures happen after the whole packet has been read
    /// ahead, so the next packet can still be decoded.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CodecError::UnknownPacketType(_)
                | CodecError::UnknownErrorCode(_)
                | CodecError::UnknownTerminationType(_)
                | CodecError::InvalidUtf8(_)
                | CodecError::LengthMismatch { .. }
                | CodecError::UserListMismatch { .. }
        )
    }
}

/// Validate a declared packet length and return the read-ahead size
pub(crate) fn check_length(length: u32, max_packet_size: usize) -> Result<usize, CodecError> {
    let total = length as usize;
    if total < ENVELOPE_SIZE {
        return Err(CodecError::InvalidLength(length));
    }
    if total > max_packet_size {
        return Err(CodecError::PacketTooLarge(total, max_packet_size));
    }
    Ok(total - PREFIX_SIZE)
}

/// Decode everything after the length field: tag, timestamp and payload.
///
/// `body` must hold exactly `length - 5` bytes.
pub(crate) fn decode_body(length: u32, body: Bytes) -> Result<Packet, CodecError> {
    let mut reader = FieldReader::new(body);

    let packet_type = PacketType::from_byte(reader.read_u8()?)?;
    let timestamp = reader.read_i64()?;
    let payload = Payload::decode(packet_type, &mut reader)?;

    if reader.remaining() != 0 {
        return Err(CodecError::LengthMismatch {
            declared: length as usize,
            actual: length as usize - reader.remaining(),
        });
    }

    tracing::trace!("Decoded {:?} ({} bytes)", packet_type, length);
    Ok(Packet::with_timestamp(payload, timestamp))
}

/// Encodes packets into the wire format
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    max_packet_size: usize,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    /// Encode a packet (envelope + payload) into a buffer.
    ///
    /// Nothing is written if the packet exceeds the size limit.
    pub fn encode(&self, packet: &Packet, buf: &mut BytesMut) -> Result<(), CodecError> {
        let length = packet.encoded_len();
        let limit = self.max_packet_size.min(u32::MAX as usize);
        if length > limit {
            return Err(CodecError::PacketTooLarge(length, limit));
        }

        let start = buf.len();
        buf.reserve(length);

        // Write envelope
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u32(length as u32);
        buf.put_u8(packet.packet_type().to_byte());
        buf.put_i64(packet.timestamp);

        // Write payload
        packet.payload.encode(buf);

        debug_assert_eq!(buf.len() - start, length);
        tracing::trace!("Encoded {:?} ({} bytes)", packet.packet_type(), length);
        Ok(())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes packets from a growing buffer
pub struct Decoder {
    state: DecodeState,
    max_packet_size: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    #[default]
    AwaitingEnvelope,
    AwaitingPayload {
        length: u32,
    },
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_max_packet_size(DEFAULT_MAX_PACKET_SIZE)
    }

    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            state: DecodeState::AwaitingEnvelope,
            max_packet_size,
        }
    }

    /// Whether a packet has been started but not finished
    pub fn is_mid_packet(&self) -> bool {
        self.state != DecodeState::AwaitingEnvelope
    }

    /// Attempt to decode a packet from the buffer
    /// Returns Ok(None) if more data is needed
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        loop {
            match self.state {
                DecodeState::AwaitingEnvelope => {
                    if buf.is_empty() {
                        return Ok(None);
                    }

                    // Check version before consuming anything
                    if buf[0] != PROTOCOL_VERSION {
                        return Err(CodecError::UnsupportedVersion(buf[0]));
                    }

                    if buf.len() < PREFIX_SIZE {
                        return Ok(None);
                    }

                    let length = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
                    check_length(length, self.max_packet_size)?;

                    buf.advance(PREFIX_SIZE);
                    self.state = DecodeState::AwaitingPayload { length };
                }
                DecodeState::AwaitingPayload { length } => {
                    let remaining = length as usize - PREFIX_SIZE;
                    if buf.len() < remaining {
                        return Ok(None);
                    }

                    let body = buf.split_to(remaining).freeze();
                    self.state = DecodeState::AwaitingEnvelope;

                    return decode_body(length, body).map(Some);
                }
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
