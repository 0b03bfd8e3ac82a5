//! Async datagram socket abstraction.
//!
//! [`Datagram`] is the raw, connectionless primitive the protocol is built
//! on: send a byte buffer to an address, receive one buffer and learn who sent
//! it.  [`Socket`] is the production implementation, a thin wrapper around
//! `tokio::net::UdpSocket`; [`crate::simulator::Simulator`] wraps any
//! [`Datagram`] with fault injection for tests.
//!
//! All protocol logic lives elsewhere; this module owns only byte I/O.
//! Timeouts are applied by the caller with `tokio::time::timeout`, and a
//! socket is closed by dropping it.

use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Datagram trait
// ---------------------------------------------------------------------------

/// An unreliable, unordered datagram endpoint.
#[async_trait]
pub trait Datagram: Send + Sync {
    /// Address this endpoint is bound to.
    fn local_addr(&self) -> SocketAddr;

    /// Send `bytes` as a single datagram to `dest`.
    async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError>;

    /// Receive the next datagram into `buf`.
    ///
    /// Returns `(bytes_read, sender_address)`.  Datagrams longer than `buf`
    /// are truncated, as with any UDP socket.
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError>;
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// A bound UDP socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port `0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }
}

#[async_trait]
impl Datagram for Socket {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        Ok(self.inner.recv_from(buf).await?)
    }
}
