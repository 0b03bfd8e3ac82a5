//! Errors surfaced by connection operations.
//!
//! Acknowledgment mismatches are not errors: they drive the retry loops and
//! only become [`ConnError::RetriesExhausted`] or [`ConnError::Timeout`] once
//! the retry budget is spent.

use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::header::{Header, HeaderError};
use crate::socket::SocketError;
use crate::state::ConnectionState;

/// Protocol phase an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Handshake,
    Transfer,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Handshake => write!(f, "handshake"),
            Phase::Transfer => write!(f, "transfer"),
            Phase::Teardown => write!(f, "teardown"),
        }
    }
}

/// Everything a connection operation can fail with.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error(transparent)]
    Socket(#[from] SocketError),

    /// A received datagram could not be parsed.
    #[error("malformed segment: {0}")]
    Header(#[from] HeaderError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The peer answered a handshake step with the wrong segment.
    #[error("handshake failed: expected {expected}, received {received}")]
    Handshake { expected: Header, received: Header },

    /// The peer answered a teardown step with the wrong segment.
    #[error("teardown failed: expected {expected}, received {received}")]
    Teardown { expected: Header, received: Header },

    /// The peer stayed silent through every retransmission.
    #[error("no response during {phase} after {attempts} attempt(s)")]
    Timeout { phase: Phase, attempts: u32 },

    /// A data unit was never acknowledged within the retry budget.
    #[error("segment seq={seq} unacknowledged after {attempts} transmission(s)")]
    RetriesExhausted { seq: u64, attempts: u32 },

    /// The first unit of a message was not a decimal byte count.
    #[error("invalid message length prefix {0:?}")]
    BadLength(String),

    /// The operation is not allowed in the connection's current state.
    #[error("operation not allowed in state {0}")]
    BadState(ConnectionState),

    /// A connector's SYN carried a sequence number too large to advance.
    #[error("initial sequence number {0} is out of range")]
    BadIsn(u64),

    /// The endpoint allocator found no bindable local address.
    #[error("no free local endpoint after {0} attempt(s)")]
    NoEndpoint(usize),
}
