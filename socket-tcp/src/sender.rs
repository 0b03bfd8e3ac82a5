//! Outbound side of the stop-and-wait transfer engine.
//!
//! A message travels as a sequence of **units**, each carried by one plain
//! data segment:
//! 1. the decimal encoded-byte length of the whole message (never capped),
//! 2. the message itself, partitioned into chunks of at most
//!    [`crate::config::Config::chunk_size`] encoded bytes.
//!
//! # Stop-and-Wait contract
//! - At most **one** unit is in flight at any moment.
//! - A unit sent at `seq` is acknowledged by exactly `ACK(seq + unit_len)`.
//! - On that ACK: `seq` advances by the unit length; the next unit is sent.
//! - On timeout or any other reply: the **same** unit is resent unchanged,
//!   spending one retry of the budget; nothing is ever skipped.
//! - A retransmission of the peer's last accepted unit is re-acknowledged
//!   first and costs no retry: the peer is stuck until it sees that ACK.

use std::time::Instant;

use crate::connection::{Connection, Inbound};
use crate::error::ConnError;
use crate::header::{partition, Header, Segment};
use crate::socket::Datagram;
use crate::timer::RetransmitTimer;

// ---------------------------------------------------------------------------
// RetransmitEntry
// ---------------------------------------------------------------------------

/// A unit that has been sent but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmitEntry {
    /// The segment on the wire.
    pub segment: Segment,
    /// How many times this segment has been transmitted (1 = first send).
    pub tx_count: u32,
    /// Wall-clock time of the first transmission.
    pub first_sent: Instant,
}

impl RetransmitEntry {
    pub fn new(seq: u64, unit: &str) -> Self {
        Self {
            segment: Segment::new(Header::data(seq), unit),
            tx_count: 1,
            first_sent: Instant::now(),
        }
    }

    /// Sequence number once this unit is acknowledged.
    pub fn next_seq(&self) -> u64 {
        self.segment.header.seq + self.segment.payload_len()
    }

    /// The only acknowledgment that completes this unit.
    pub fn expected_ack(&self) -> Header {
        Header::ack(self.next_seq())
    }

    /// `true` if `reply` proves the peer consumed this unit.
    ///
    /// Besides the exact ACK, a FIN carrying the post-unit sequence number
    /// counts: the peer only closes after taking the whole message, so our
    /// ACK was lost on the way.
    pub fn is_completed_by(&self, reply: &Header) -> bool {
        *reply == self.expected_ack() || *reply == Header::fin(self.next_seq())
    }

    pub fn on_retransmit(&mut self) {
        self.tx_count += 1;
    }
}

/// The units a message is sent as: length prefix first, then the chunks.
pub fn units(message: &str, chunk_size: usize) -> Vec<String> {
    std::iter::once(message.len().to_string())
        .chain(partition(message, chunk_size).into_iter().map(str::to_owned))
        .collect()
}

// ---------------------------------------------------------------------------
// Connection::send
// ---------------------------------------------------------------------------

impl<D: Datagram> Connection<D> {
    /// Deliver `message` to the peer, one acknowledged unit at a time.
    ///
    /// Returns once the last chunk is acknowledged.  Fails with
    /// [`ConnError::RetriesExhausted`] if a unit stays unacknowledged through
    /// the whole retry budget, and with [`ConnError::BadState`] unless the
    /// connection is established.
    pub async fn send(&mut self, message: &str) -> Result<(), ConnError> {
        self.ensure_established()?;

        let units = units(message, self.config.chunk_size);
        log::debug!(
            "[send] {} byte(s) as {} chunk(s) from seq={}",
            message.len(),
            units.len() - 1,
            self.seq
        );
        for unit in &units {
            self.send_unit(unit).await?;
        }
        Ok(())
    }

    /// Stop-and-wait for a single unit.
    async fn send_unit(&mut self, unit: &str) -> Result<(), ConnError> {
        let mut entry = RetransmitEntry::new(self.seq, unit);
        let mut timer = RetransmitTimer::new(self.config.timer);

        loop {
            self.transmit(&entry.segment).await?;

            match self.receive_from_peer(timer.current_rto).await? {
                Inbound::Segment(reply, _) if entry.is_completed_by(&reply.header) => {
                    self.seq = entry.next_seq();
                    log::debug!(
                        "[send] unit seq={} acked after {} transmission(s) in {:?}",
                        entry.segment.header.seq,
                        entry.tx_count,
                        entry.first_sent.elapsed()
                    );
                    return Ok(());
                }
                // The peer missed our ACK of its last unit and is still
                // resending it; without the ACK it never reads our unit.
                Inbound::Segment(reply, _)
                    if reply.header.is_data() && Some(reply.header.seq) == self.last_accepted =>
                {
                    let ack = Header::ack(reply.header.seq + reply.payload_len());
                    log::debug!("[send] duplicate {}; re-acknowledging with {ack}", reply.header);
                    self.transmit(&Segment::control(ack)).await?;
                    entry.on_retransmit();
                    continue;
                }
                Inbound::Segment(reply, _) => {
                    log::debug!(
                        "[send] expected {}, got {}; retransmitting",
                        entry.expected_ack(),
                        reply.header
                    );
                }
                Inbound::Malformed(..) => {}
                Inbound::TimedOut => {
                    log::debug!("[send] timeout after {:?}; retransmitting", timer.current_rto);
                }
            }

            if !timer.back_off() {
                return Err(ConnError::RetriesExhausted {
                    seq: entry.segment.header.seq,
                    attempts: timer.attempts(),
                });
            }
            entry.on_retransmit();
        }
    }
}
