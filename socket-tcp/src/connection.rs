//! Per-connection lifecycle manager.
//!
//! A [`Connection`] owns the complete state for one logical peer-to-peer
//! session:
//! - the datagram socket, exclusively (released on close),
//! - the peer address resolved by the handshake,
//! - the shared sequence counter `seq`, which advances by the encoded length
//!   of every unit exchanged in either direction,
//! - the receive bookkeeping that persists across [`Connection::recv`] calls.
//!
//! The engines are split by concern and all operate on this struct:
//! the connector side of the handshake lives here, the listener side in
//! [`crate::listener`], data transfer in [`crate::sender`] and
//! [`crate::receiver`], and both close paths in [`crate::teardown`].

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;
use tokio::time::{timeout_at, Instant};

use crate::config::Config;
use crate::error::{ConnError, Phase};
use crate::header::{Header, HeaderError, Segment};
use crate::socket::{Datagram, Socket};
use crate::state::ConnectionState;
use crate::timer::RetransmitTimer;

/// Upper bound (inclusive) of the connector's random initial sequence number.
pub const MAX_ISN: u64 = 100;

/// Largest initial sequence number a listener accepts from the wire; above
/// it the shared counter could overflow.
pub const MAX_PEER_ISN: u64 = u64::MAX / 2;

/// Result of one bounded wait on the socket.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// A well-formed segment from an accepted sender.
    Segment(Segment, SocketAddr),
    /// A datagram from an accepted sender that failed to parse.
    Malformed(HeaderError, SocketAddr),
    /// Nothing arrived before the deadline.
    TimedOut,
}

/// A handle to a single reliable connection over UDP.
///
/// Generic over the datagram primitive so tests can interpose a
/// [`crate::simulator::Simulator`]; production code uses [`Socket`].
#[derive(Debug)]
pub struct Connection<D: Datagram = Socket> {
    pub(crate) state: ConnectionState,
    /// `None` once the socket has been released by a close.
    socket: Option<D>,
    local_addr: SocketAddr,
    pub(crate) peer: SocketAddr,
    isn: u64,
    /// Sequence counter shared by both directions.
    pub(crate) seq: u64,
    /// Bytes of the current message still expected from the wire.
    pub(crate) pending: u64,
    /// Accepted bytes held back because they overflowed a caller's buffer.
    pub(crate) buffered: VecDeque<u8>,
    /// `seq` header of the last accepted data unit.
    pub(crate) last_accepted: Option<u64>,
    pub(crate) config: Config,
}

impl<D: Datagram> Connection<D> {
    /// Perform an active open (client side) towards `peer`.
    ///
    /// Sends `SYN(seq0)` with a random `seq0` in `[0, 100]` and waits for
    /// `SYN+ACK(seq0+1)`.  The reply may come from any address: the listener
    /// answers from a freshly allocated endpoint, which becomes the peer.
    /// The final `ACK(seq0+2)` is sent there and the connection is
    /// established with `seq = seq0 + 2`.
    pub async fn connect(socket: D, peer: SocketAddr, config: Config) -> Result<Self, ConnError> {
        config.validate()?;

        let isn = rand::rng().random_range(0..=MAX_ISN);
        let mut conn = Self::from_parts(socket, peer, isn, config);
        conn.state = ConnectionState::SynSent;

        let syn = Segment::control(Header::syn(isn));
        let expected = Header::syn_ack(isn + 1);
        let mut timer = RetransmitTimer::new(config.timer);

        loop {
            conn.transmit_to(&syn, peer).await?;

            match conn.receive(timer.current_rto, None).await? {
                Inbound::Segment(seg, from) if seg.header == expected => {
                    conn.peer = from;
                    conn.seq = isn + 2;
                    conn.transmit(&Segment::control(Header::ack(conn.seq))).await?;
                    conn.state = ConnectionState::Established;
                    log::info!(
                        "[conn] {} established with {} (seq={})",
                        conn.local_addr,
                        conn.peer,
                        conn.seq
                    );
                    return Ok(conn);
                }
                // A listener answering with the wrong acknowledgment.
                Inbound::Segment(seg, _) if seg.header.syn && seg.header.ack => {
                    return Err(ConnError::Handshake { expected, received: seg.header });
                }
                Inbound::Malformed(e, from) if from == peer => return Err(e.into()),
                // Anything else is not an answer to our SYN.
                Inbound::Segment(seg, from) => {
                    log::debug!("[conn] ignoring {} from {from} during handshake", seg.header);
                }
                Inbound::Malformed(_, from) => {
                    log::debug!("[conn] ignoring malformed datagram from {from} during handshake");
                }
                Inbound::TimedOut => {
                    log::debug!("[conn] no SYN+ACK within {:?}", timer.current_rto);
                }
            }

            if !timer.back_off() {
                return Err(ConnError::Timeout {
                    phase: Phase::Handshake,
                    attempts: timer.attempts(),
                });
            }
            log::debug!("[conn] retransmitting SYN (retry {})", timer.retries);
        }
    }

    /// Build a connection around `socket` with every counter at its start value.
    pub(crate) fn from_parts(socket: D, peer: SocketAddr, isn: u64, config: Config) -> Self {
        Self {
            state: ConnectionState::Closed,
            local_addr: socket.local_addr(),
            socket: Some(socket),
            peer,
            isn,
            seq: isn,
            pending: 0,
            buffered: VecDeque::new(),
            last_accepted: None,
            config,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current value of the shared sequence counter.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Initial sequence number chosen by the connector.
    pub fn isn(&self) -> u64 {
        self.isn
    }

    /// Bytes of the current message not yet received from the wire.
    pub fn pending_bytes(&self) -> u64 {
        self.pending
    }

    /// Bytes received and acknowledged but not yet returned by `recv`.
    pub fn buffered_bytes(&self) -> usize {
        self.buffered.len()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `true` once the socket has been released.
    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }

    // -----------------------------------------------------------------------
    // Socket helpers shared by the engines
    // -----------------------------------------------------------------------

    /// Fail with [`ConnError::BadState`] unless data transfer is allowed.
    pub(crate) fn ensure_established(&self) -> Result<(), ConnError> {
        if self.state.is_established() && self.socket.is_some() {
            Ok(())
        } else {
            Err(ConnError::BadState(self.state))
        }
    }

    fn socket(&self) -> Result<&D, ConnError> {
        self.socket.as_ref().ok_or(ConnError::BadState(ConnectionState::Closed))
    }

    /// Drop the socket and enter [`ConnectionState::Closed`].
    pub(crate) fn release(&mut self) {
        if self.socket.take().is_some() {
            log::debug!("[conn] {} released", self.local_addr);
        }
        self.state = ConnectionState::Closed;
    }

    /// Send `segment` to the peer.
    pub(crate) async fn transmit(&self, segment: &Segment) -> Result<(), ConnError> {
        self.transmit_to(segment, self.peer).await
    }

    pub(crate) async fn transmit_to(
        &self,
        segment: &Segment,
        dest: SocketAddr,
    ) -> Result<(), ConnError> {
        log::debug!(
            "[conn] → {} len={} to {}",
            segment.header,
            segment.payload.len(),
            dest
        );
        self.socket()?.send_to(&segment.encode(), dest).await?;
        Ok(())
    }

    /// Wait at most `rto` for the next datagram.
    ///
    /// With `from = Some(addr)` datagrams from any other sender are dropped
    /// without extending the deadline; once the handshake is done the engines
    /// pass the peer address here.
    pub(crate) async fn receive(
        &self,
        rto: Duration,
        from: Option<SocketAddr>,
    ) -> Result<Inbound, ConnError> {
        let socket = self.socket()?;
        let deadline = Instant::now() + rto;
        let mut buf = vec![0u8; self.config.max_datagram];

        loop {
            let (n, addr) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Ok(result) => result?,
                Err(_elapsed) => return Ok(Inbound::TimedOut),
            };

            if from.is_some_and(|peer| peer != addr) {
                log::debug!("[conn] ignoring datagram from stranger {addr}");
                continue;
            }

            return Ok(match Segment::decode(&buf[..n]) {
                Ok(seg) => {
                    log::debug!(
                        "[conn] ← {} len={} from {}",
                        seg.header,
                        seg.payload.len(),
                        addr
                    );
                    Inbound::Segment(seg, addr)
                }
                Err(e) => {
                    log::warn!("[conn] malformed datagram from {addr}: {e}");
                    Inbound::Malformed(e, addr)
                }
            });
        }
    }

    /// Wait at most `rto` for the next datagram from the peer.
    pub(crate) async fn receive_from_peer(&self, rto: Duration) -> Result<Inbound, ConnError> {
        self.receive(rto, Some(self.peer)).await
    }
}
