//! Blocking packet I/O over sequential byte streams
//!
//! [`PacketReader`] decodes exactly one packet per call from a
//! [`ByteSource`]; [`PacketWriter`] encodes to any `Write` and flushes.

use bytes::{Buf, Bytes, BytesMut};
use std::io::{self, BufReader, Cursor, Read, Write};
use std::net::TcpStream;

use super::codec::{check_length, decode_body};
use super::{CodecError, Encoder, Packet, DEFAULT_MAX_PACKET_SIZE, PROTOCOL_VERSION};

/// A sequential input that can report how much is readable without blocking
pub trait ByteSource: Read {
    /// Bytes that can be read right now without blocking
    fn available(&self) -> usize;
}

impl ByteSource for &[u8] {
    fn available(&self) -> usize {
        self.len()
    }
}

impl<T: AsRef<[u8]>> ByteSource for Cursor<T> {
    fn available(&self) -> usize {
        let len = self.get_ref().as_ref().len() as u64;
        len.saturating_sub(self.position()) as usize
    }
}

/// Buffered bytes plus whatever the inner source can still hand over
impl<R: ByteSource> ByteSource for BufReader<R> {
    fn available(&self) -> usize {
        self.buffer().len() + self.get_ref().available()
    }
}

/// Peeks the socket without blocking. A closed or failed socket reports 0.
impl ByteSource for TcpStream {
    fn available(&self) -> usize {
        if self.set_nonblocking(true).is_err() {
            return 0;
        }
        let mut probe = [0u8; 8192];
        let peeked = self.peek(&mut probe);
        if let Err(e) = self.set_nonblocking(false) {
            tracing::warn!("Failed to restore blocking mode: {}", e);
        }
        match peeked {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                tracing::debug!("Socket peek failed: {}", e);
                0
            }
        }
    }
}

/// Read exactly `needed` bytes, reporting how many arrived if the source ends
fn read_exactly<S: Read>(source: &mut S, needed: usize) -> Result<Bytes, CodecError> {
    let mut buf = Vec::with_capacity(needed);
    let got = source.take(needed as u64).read_to_end(&mut buf)?;
    if got < needed {
        return Err(CodecError::TruncatedInput {
            needed,
            available: got,
        });
    }
    Ok(Bytes::from(buf))
}

/// Reads packets one at a time from a blocking source
pub struct PacketReader<S> {
    source: S,
    max_packet_size: usize,
}

impl<S: ByteSource> PacketReader<S> {
    pub fn new(source: S) -> Self {
        Self::with_max_packet_size(source, DEFAULT_MAX_PACKET_SIZE)
    }

    pub fn with_max_packet_size(source: S, max_packet_size: usize) -> Self {
        Self {
            source,
            max_packet_size,
        }
    }

    /// Read the next packet.
    ///
    /// The whole declared packet is read before any payload field is
    /// parsed, so payload errors leave the source on the next packet.
    pub fn read_packet(&mut self) -> Result<Packet, CodecError> {
        let version = read_exactly(&mut self.source, 1)?.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let length = read_exactly(&mut self.source, 4)?.get_u32();
        let remaining = check_length(length, self.max_packet_size)?;

        let body = read_exactly(&mut self.source, remaining)?;
        decode_body(length, body)
    }

    /// Whether at least one more byte is readable without blocking
    pub fn available(&self) -> bool {
        self.source.available() > 0
    }

    pub fn get_ref(&self) -> &S {
        &self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }
}

/// Writes packets to a blocking sink
pub struct PacketWriter<W> {
    sink: W,
    encoder: Encoder,
}

impl<W: Write> PacketWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            encoder: Encoder::new(),
        }
    }

    pub fn with_encoder(sink: W, encoder: Encoder) -> Self {
        Self { sink, encoder }
    }

    /// Encode, write and flush one packet. Returns the bytes written.
    pub fn write_packet(&mut self, packet: &Packet) -> Result<usize, CodecError> {
        let mut buf = BytesMut::with_capacity(packet.encoded_len());
        self.encoder.encode(packet, &mut buf)?;

        self.sink.write_all(&buf)?;
        self.sink.flush()?;
        Ok(buf.len())
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}
