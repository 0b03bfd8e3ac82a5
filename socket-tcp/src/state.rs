//! Connection finite-state machine (FSM) types.
//!
//! The protocol is a reduced form of the TCP state diagram (RFC 793 §3.2):
//! there is no simultaneous open or close, and the connector's final ACK of
//! the teardown releases both sides without a TIME_WAIT period.
//!
//! ```text
//!  CLOSED ──SYN sent──▶ SYN_SENT ──SYN-ACK / ACK sent──▶ ESTABLISHED
//!  CLOSED ──SYN rcvd──▶ SYN_RECEIVED ──ACK rcvd──────────▶ ESTABLISHED
//!
//!  ESTABLISHED ──FIN sent──▶ FIN_WAIT ──FIN-ACK / ACK sent──▶ CLOSED
//!  ESTABLISHED ──FIN rcvd──▶ LAST_ACK ──ACK rcvd────────────▶ CLOSED
//! ```
//!
//! Transitions live in the engines ([`crate::connection`],
//! [`crate::listener`], [`crate::teardown`]); this module only names states.

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists, or the socket has been released.
    #[default]
    Closed,
    /// SYN has been sent; waiting for SYN-ACK.
    SynSent,
    /// SYN received; SYN-ACK sent from a fresh endpoint; waiting for ACK.
    SynReceived,
    /// Three-way handshake complete; data transfer in progress.
    Established,
    /// Local side sent FIN; waiting for FIN-ACK.
    FinWait,
    /// Peer's FIN received and FIN-ACK sent; waiting for the final ACK.
    LastAck,
}

impl ConnectionState {
    /// `true` while data may be sent or received.
    pub fn is_established(self) -> bool {
        self == Self::Established
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
