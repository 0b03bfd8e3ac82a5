//! `socket-tcp`: a TCP-like reliable text channel implemented over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐  send(msg)         recv(cap)  ┌──────────┐
//!  │  sender  │──── units ─────────────────▶ │ receiver │
//!  └────┬─────┘◀─────────────── ACKs ─────────└─────┬────┘
//!       │                                           │
//!  ┌────▼───────────────────────────────────────────▼────┐
//!  │                    Connection                        │
//!  │  (seq counter, receive bookkeeping, owns socket)     │
//!  │  connect ─ listener::accept ─ teardown::close         │
//!  └────┬─────────────────────────────────────────────────┘
//!       │ header|||payload text datagrams
//!  ┌────▼──────┐
//!  │ Datagram  │  (tokio UdpSocket, or the fault simulator)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`header`]      : wire format (textual header, payload, partitioning)
//! - [`connection`]  : per-connection state + connector side of the handshake
//! - [`listener`]    : listener side of the handshake, endpoint allocation
//! - [`sender`]      : stop-and-wait outbound units
//! - [`receiver`]    : bounded, resumable inbound reads
//! - [`teardown`]    : active and passive close
//! - [`framing`]     : end-of-message delimiter helper
//! - [`state`]       : finite-state-machine types
//! - [`timer`]       : retransmit timeout, back-off and retry budget
//! - [`config`]      : per-connection tunables
//! - [`error`]       : error types
//! - [`simulator`]   : fault-injecting datagram layer for testing
//! - [`socket`]      : async UDP socket abstraction

pub mod config;
pub mod connection;
pub mod error;
pub mod framing;
pub mod header;
pub mod listener;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod teardown;
pub mod timer;

pub use config::Config;
pub use connection::Connection;
pub use error::ConnError;
pub use header::{Header, Segment};
pub use listener::Listener;
pub use socket::{Datagram, Socket};
