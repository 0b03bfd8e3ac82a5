//! Passive open: the listener side of the three-way handshake.
//!
//! Unlike TCP, accepted connections do not share the listening port.  Each
//! SYN is answered from a **new** local endpoint, and all traffic of the
//! resulting [`Connection`] flows through that endpoint while the
//! [`Listener`] keeps its own socket free for the next SYN.
//!
//! Where the new endpoint comes from is decided by an [`EndpointAllocator`].
//! The default [`LinearScan`] binds `listen_port + 1`, `+ 2`, … until a bind
//! succeeds; [`Ephemeral`] lets the OS pick.  A single-port multiplexer could
//! be plugged in through the same trait.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::Config;
use crate::connection::{Connection, Inbound, MAX_PEER_ISN};
use crate::error::{ConnError, Phase};
use crate::header::{Header, Segment};
use crate::socket::{Datagram, Socket};
use crate::state::ConnectionState;
use crate::timer::RetransmitTimer;

/// Default number of ports [`LinearScan`] tries before giving up.
pub const DEFAULT_SCAN_LIMIT: usize = 1024;

/// How many accepted `(client, isn)` pairs are remembered.
const RECENT_ACCEPTS: usize = 64;

// ---------------------------------------------------------------------------
// Endpoint allocation
// ---------------------------------------------------------------------------

/// Strategy for choosing the local address of a newly accepted connection.
pub trait EndpointAllocator: Send + Sync {
    /// Addresses to try binding, in order, for a listener bound to `listen`.
    fn candidates(&self, listen: SocketAddr) -> Vec<SocketAddr>;
}

/// Try ports sequentially upwards from the listening port.
#[derive(Debug, Clone, Copy)]
pub struct LinearScan {
    pub limit: usize,
}

impl Default for LinearScan {
    fn default() -> Self {
        Self { limit: DEFAULT_SCAN_LIMIT }
    }
}

impl EndpointAllocator for LinearScan {
    fn candidates(&self, listen: SocketAddr) -> Vec<SocketAddr> {
        (1..=self.limit)
            .map_while(|i| listen.port().checked_add(u16::try_from(i).ok()?))
            .map(|port| SocketAddr::new(listen.ip(), port))
            .collect()
    }
}

/// Let the OS assign an ephemeral port on the listener's interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ephemeral;

impl EndpointAllocator for Ephemeral {
    fn candidates(&self, listen: SocketAddr) -> Vec<SocketAddr> {
        vec![SocketAddr::new(listen.ip(), 0)]
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// A bound endpoint that accepts connections one handshake at a time.
pub struct Listener {
    socket: Socket,
    allocator: Box<dyn EndpointAllocator>,
    config: Config,
    /// Handshakes already completed, newest last.  A connector whose
    /// SYN+ACK was lost resends its SYN, and that copy is still queued
    /// here after the connection is up.
    recent: Mutex<VecDeque<(SocketAddr, u64)>>,
}

impl Listener {
    /// Bind a listener on `addr` using [`LinearScan`] allocation.
    pub async fn bind(addr: SocketAddr, config: Config) -> Result<Self, ConnError> {
        Self::bind_with(addr, config, LinearScan::default()).await
    }

    /// Bind a listener on `addr` with a custom endpoint allocator.
    pub async fn bind_with(
        addr: SocketAddr,
        config: Config,
        allocator: impl EndpointAllocator + 'static,
    ) -> Result<Self, ConnError> {
        config.validate()?;
        let socket = Socket::bind(addr).await?;
        log::info!("[listen] bound {}", socket.local_addr);
        Ok(Self {
            socket,
            allocator: Box::new(allocator),
            config,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_ACCEPTS)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Wait for a connector and complete the handshake with it.
    ///
    /// Blocks until the first datagram arrives.  It must be `SYN(x)`; the
    /// reply `SYN+ACK(x+1)` is sent from a newly allocated endpoint, which
    /// then waits for `ACK(x+2)`.  Returns the established connection and the
    /// address it is bound to.
    pub async fn accept(&self) -> Result<(Connection<Socket>, SocketAddr), ConnError> {
        let mut buf = vec![0u8; self.config.max_datagram];
        let (client, syn) = loop {
            let (n, client) = self.socket.recv_from(&mut buf).await?;
            let syn = Segment::decode(&buf[..n])?.header;
            log::debug!("[listen] ← {syn} from {client}");

            if is_syn(&syn) && self.already_accepted(client, syn.seq) {
                log::debug!("[listen] discarding repeated SYN from connected {client}");
                continue;
            }
            break (client, syn);
        };

        if !is_syn(&syn) {
            return Err(ConnError::Handshake { expected: Header::syn(syn.seq), received: syn });
        }
        if syn.seq > MAX_PEER_ISN {
            return Err(ConnError::BadIsn(syn.seq));
        }

        let socket = self.allocate().await?;
        let local = socket.local_addr;
        let mut conn = Connection::from_parts(socket, client, syn.seq, self.config);
        conn.state = ConnectionState::SynReceived;

        let syn_ack = Segment::control(Header::syn_ack(syn.seq + 1));
        let expected = Header::ack(syn.seq + 2);
        let mut timer = RetransmitTimer::new(self.config.timer);

        loop {
            conn.transmit(&syn_ack).await?;

            match conn.receive_from_peer(timer.current_rto).await? {
                // A first data unit at x+2 means the connector is established
                // and its ACK was lost; the unit itself will be retransmitted.
                Inbound::Segment(seg, _)
                    if seg.header == expected || seg.header == Header::data(expected.seq) =>
                {
                    conn.seq = expected.seq;
                    conn.state = ConnectionState::Established;
                    self.remember(client, syn.seq);
                    log::info!("[listen] accepted {client} on {local} (seq={})", conn.seq);
                    return Ok((conn, local));
                }
                Inbound::Segment(seg, _) => {
                    return Err(ConnError::Handshake { expected, received: seg.header });
                }
                Inbound::Malformed(e, _) => return Err(e.into()),
                Inbound::TimedOut => {
                    if !timer.back_off() {
                        return Err(ConnError::Timeout {
                            phase: Phase::Handshake,
                            attempts: timer.attempts(),
                        });
                    }
                    log::debug!("[listen] no ACK; retransmitting SYN+ACK (retry {})", timer.retries);
                }
            }
        }
    }

    fn recent(&self) -> MutexGuard<'_, VecDeque<(SocketAddr, u64)>> {
        self.recent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn already_accepted(&self, client: SocketAddr, isn: u64) -> bool {
        self.recent().contains(&(client, isn))
    }

    fn remember(&self, client: SocketAddr, isn: u64) {
        let mut recent = self.recent();
        if recent.len() == RECENT_ACCEPTS {
            recent.pop_front();
        }
        recent.push_back((client, isn));
    }

    /// Bind the first candidate address that is free.
    async fn allocate(&self) -> Result<Socket, ConnError> {
        let candidates = self.allocator.candidates(self.local_addr());
        let tried = candidates.len();
        for addr in candidates {
            match Socket::bind(addr).await {
                Ok(socket) => return Ok(socket),
                Err(e) => log::debug!("[listen] cannot bind {addr}: {e}"),
            }
        }
        Err(ConnError::NoEndpoint(tried))
    }
}

fn is_syn(header: &Header) -> bool {
    header.syn && !header.ack && !header.fin
}
