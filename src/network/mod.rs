//! Network module - TCP transport for TTCP packets
//!
//! Provides:
//! - Connection adapter over any async byte stream
//! - Listener that accepts peers and reports decoded packets
//! - Helpers for dialing a server

mod connection;
mod listener;

pub use connection::*;
pub use listener::*;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}

/// Dial a TTCP server
pub async fn connect(
    host: &str,
    port: u16,
    timeout: Duration,
) -> ConnectionResult<Connection<TcpStream>> {
    let addr = resolve_host(host, port).await?;
    tracing::debug!("Connecting to {}", addr);

    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ConnectionError::Timeout)??;
    stream.set_nodelay(true)?;

    tracing::info!("Connected to {}", addr);
    Ok(Connection::new(stream, addr))
}
