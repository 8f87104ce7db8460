//! Connection handling for TTCP
//!
//! Wraps one byte stream with its own encoder, decoder and buffers:
//! - Packet encoding/decoding
//! - Clean vs. mid-packet close detection
//! - Per-connection statistics

use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::{CodecError, Decoder, Encoder, Packet, Payload, TerminationType};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Connection closed")]
    Closed,

    #[error("Connection timeout")]
    Timeout,
}

impl ConnectionError {
    /// Whether the connection can keep decoding after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            ConnectionError::Codec(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// State of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Ready for communication
    Open,
    /// Termination sent, stream shutting down
    Closing,
    /// Connection has been closed
    Closed,
}

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Packets sent
    pub packets_sent: u64,
    /// Packets received
    pub packets_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
}

/// One TTCP peer over an async byte stream
pub struct Connection<S = TcpStream> {
    /// Remote peer address
    peer_addr: SocketAddr,
    /// The byte stream
    stream: S,
    encoder: Encoder,
    decoder: Decoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    state: ConnectionState,
    stats: ConnectionStats,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new connection from an established stream
    pub fn new(stream: S, peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr,
            stream,
            encoder: Encoder::new(),
            decoder: Decoder::new(),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            state: ConnectionState::Open,
            stats: ConnectionStats::default(),
        }
    }

    /// Apply a packet size limit to both directions
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.encoder = Encoder::with_max_packet_size(max_packet_size);
        self.decoder = Decoder::with_max_packet_size(max_packet_size);
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Send a packet
    pub async fn send(&mut self, packet: &Packet) -> ConnectionResult<()> {
        self.write_buf.clear();
        self.encoder.encode(packet, &mut self.write_buf)?;

        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += self.write_buf.len() as u64;

        tracing::debug!("Sent {:?} to {}", packet.packet_type(), self.peer_addr);
        Ok(())
    }

    /// Receive a packet (returns None if the peer closed between packets)
    pub async fn recv(&mut self) -> ConnectionResult<Option<Packet>> {
        loop {
            // Try to decode a packet from the buffer
            if let Some(packet) = self.decoder.decode(&mut self.read_buf)? {
                self.stats.packets_received += 1;
                        return Ok(Some(packet));
            }

            // Read more data
            let n = self.stream.read_buf(&mut self.read_buf).await?;

            if n == 0 {
                if self.read_buf.is_empty() && !self.decoder.is_mid_packet() {
                    self.state = ConnectionState::Closed;
                    return Ok(None); // Clean close
                } else {
                    return Err(ConnectionError::Closed);
                }
            }

            self.stats.bytes_received += n as u64;
        }
    }

    /// Try to receive a packet with a timeout
    pub async fn recv_timeout(&mut self, timeout: Duration) -> ConnectionResult<Option<Packet>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    /// Send a termination packet and shut the stream down
    pub async fn close(&mut self, kind: TerminationType) -> ConnectionResult<()> {
        self.state = ConnectionState::Closing;

        self.send(&Packet::new(Payload::ConnectionTermination { kind }))
            .await?;

        self.stream.shutdown().await?;
        self.state = ConnectionState::Closed;

        Ok(())
    }

    /// Check if the connection is still open
    pub fn is_active(&self) -> bool {
        matches!(self.state, ConnectionState::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TextDirectMessage;
    use tokio_test::io::Builder;

    fn peer() -> SocketAddr {
        "127.0.0.1:53111".parse().unwrap()
    }

    fn text(text: &str) -> Packet {
        Packet::with_timestamp(Payload::TextMessage { text: text.into() }, 1_000)
    }

    #[tokio::test]
    async fn test_send_writes_encoded_packet() {
        let packet = text("Hallo, Welt!");
        let bytes = packet.to_bytes().unwrap();

        let mock = Builder::new().write(&bytes).build();
        let mut conn = Connection::new(mock, peer());
        conn.send(&packet).await.unwrap();

        assert_eq!(conn.stats().packets_sent, 1);
        assert_eq!(conn.stats().bytes_sent, bytes.len() as u64);
    }

    #[tokio::test]
    async fn test_recv_across_split_reads() {
        let first = text("one");
        let second = Packet::with_timestamp(
            Payload::TextDirectMessage(TextDirectMessage {
                recipient_id: 2,
                sender_id: 1,
                text: "two".into(),
            }),
            2_000,
        );
        let mut bytes = first.to_bytes().unwrap().to_vec();
        bytes.extend_from_slice(&second.to_bytes().unwrap());

        let mock = Builder::new()
            .read(&bytes[..3])
            .read(&bytes[3..20])
            .read(&bytes[20..])
            .build();
        let mut conn = Connection::new(mock, peer());

        assert_eq!(conn.recv().await.unwrap(), Some(first));
        assert_eq!(conn.recv().await.unwrap(), Some(second));
        assert_eq!(conn.recv().await.unwrap(), None);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.stats().packets_received, 2);
    }

    #[tokio::test]
    async fn test_close_mid_packet_is_an_error() {
        let bytes = text("cut short").to_bytes().unwrap();

        let mock = Builder::new().read(&bytes[..10]).build();
        let mut conn = Connection::new(mock, peer());

        assert!(matches!(conn.recv().await, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_recoverable_error_then_next_packet() {
        let mut bytes = vec![0x01, 0, 0, 0, 14, 0x7F, 0, 0, 0, 0, 0, 0, 0, 0];
        let next = text("after");
        bytes.extend_from_slice(&next.to_bytes().unwrap());

        let mock = Builder::new().read(&bytes).build();
        let mut conn = Connection::new(mock, peer());

        let err = conn.recv().await.unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(conn.recv().await.unwrap(), Some(next));
    }

    #[tokio::test]
    async fn test_close_sends_termination() {
        let (a, b) = tokio::io::duplex(1024);
        let mut client = Connection::new(a, peer());
        let mut server = Connection::new(b, peer());

        client.close(TerminationType::Delete).await.unwrap();
        assert_eq!(client.state(), ConnectionState::Closed);

        let packet = server.recv().await.unwrap().unwrap();
        assert_eq!(
            packet.payload,
            Payload::ConnectionTermination {
                kind: TerminationType::Delete
            }
        );
        assert_eq!(server.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_recv_timeout() {
        let (_a, b) = tokio::io::duplex(64);
        let mut conn = Connection::new(b, peer());

        let result = conn.recv_timeout(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ConnectionError::Timeout)));
    }

    #[tokio::test]
    async fn test_size_limit_applies_to_send() {
        let (a, _b) = tokio::io::duplex(64);
        let mut conn = Connection::new(a, peer()).with_max_packet_size(16);

        let err = conn.send(&text("too long for sixteen")).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Codec(CodecError::PacketTooLarge(_, 16))
        ));
    }
}
