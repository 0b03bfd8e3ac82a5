//! Inbound side of the stop-and-wait transfer engine.
//!
//! [`Connection::recv`] is a bounded, resumable read.  Each call returns at
//! most `cap` bytes of the current message; callers call it repeatedly until
//! the message is drained.  The bookkeeping that makes this work lives on the
//! connection, not in the call:
//! - `pending`: bytes of the current message still expected from the wire
//!   (zero means the next unit is a length prefix or a FIN);
//! - `buffered`: acknowledged bytes that overflowed the previous call's cap;
//! - `last_accepted`: `seq` of the last accepted unit, so that a
//!   retransmission caused by a lost ACK is answered with a duplicate ACK
//!   instead of being mistaken for new data.
//!
//! A `FIN` at the current sequence number is a passive close: it is handled
//! inside `recv` (see [`crate::teardown`]) and the call returns empty.

use crate::connection::{Connection, Inbound};
use crate::error::{ConnError, Phase};
use crate::header::{Header, Segment};
use crate::socket::Datagram;
use crate::timer::RetransmitTimer;

/// How an inbound segment relates to the receive position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// `FIN(seq)`: the peer is closing.
    Fin,
    /// `DATA(seq)`: the next unit, to be accepted.
    Next,
    /// Retransmission of the last accepted unit; our ACK was lost.
    Duplicate,
    /// Retransmitted `SYN+ACK`; the connector's final handshake ACK was lost.
    HandshakeEcho,
    /// Anything else; discarded.
    Stray,
}

/// Classify `header` against the receiver's position.
pub fn classify(header: &Header, seq: u64, last_accepted: Option<u64>, isn: u64) -> Disposition {
    if *header == Header::fin(seq) {
        Disposition::Fin
    } else if *header == Header::data(seq) {
        Disposition::Next
    } else if header.is_data() && Some(header.seq) == last_accepted {
        Disposition::Duplicate
    } else if *header == Header::syn_ack(isn + 1) {
        Disposition::HandshakeEcho
    } else {
        Disposition::Stray
    }
}

/// Outcome of waiting for the next unit.
enum Unit {
    Data(String),
    Closed,
}

impl<D: Datagram> Connection<D> {
    /// Receive up to `cap` bytes of the current message.
    ///
    /// Returns early with fewer than `cap` bytes only when the message ends.
    /// Returns an empty vector when the peer closed the connection (the
    /// connection is then closed too), for an empty message, and for
    /// `cap == 0`.
    pub async fn recv(&mut self, cap: usize) -> Result<Vec<u8>, ConnError> {
        self.ensure_established()?;

        let mut out = Vec::with_capacity(cap.min(self.config.max_datagram));
        let take = cap.min(self.buffered.len());
        out.extend(self.buffered.drain(..take));

        if out.len() == cap || (!out.is_empty() && self.pending == 0) {
            return Ok(out);
        }

        if self.pending == 0 {
            let prefix = match self.next_unit().await? {
                Unit::Data(prefix) => prefix,
                Unit::Closed => return Ok(out),
            };
            self.pending = prefix
                .parse::<u64>()
                .map_err(|_| ConnError::BadLength(prefix))?;
            log::debug!("[recv] message of {} byte(s) begins", self.pending);
        }

        while self.pending > 0 {
            let chunk = match self.next_unit().await? {
                Unit::Data(chunk) => chunk.into_bytes(),
                Unit::Closed => {
                    log::warn!("[recv] peer closed with {} byte(s) outstanding", self.pending);
                    return Ok(out);
                }
            };

            let len = chunk.len() as u64;
            if len > self.pending {
                log::warn!("[recv] chunk of {len} byte(s) overruns the {} announced", self.pending);
            }
            self.pending = self.pending.saturating_sub(len);

            let room = cap - out.len();
            if chunk.len() > room {
                out.extend_from_slice(&chunk[..room]);
                self.buffered.extend(&chunk[room..]);
            } else {
                out.extend_from_slice(&chunk);
            }

            if out.len() == cap {
                break;
            }
        }

        Ok(out)
    }

    /// Wait for the next unit from the peer, acknowledging it.
    async fn next_unit(&mut self) -> Result<Unit, ConnError> {
        let mut timer = RetransmitTimer::new(self.config.timer);

        loop {
            match self.receive_from_peer(timer.current_rto).await? {
                Inbound::Segment(seg, _) => {
                    match classify(&seg.header, self.seq, self.last_accepted, self.isn()) {
                        Disposition::Fin => {
                            self.passive_close().await?;
                            return Ok(Unit::Closed);
                        }
                        Disposition::Next => {
                            self.last_accepted = Some(self.seq);
                            self.seq += seg.payload_len();
                            self.transmit(&Segment::control(Header::ack(self.seq))).await?;
                            return Ok(Unit::Data(seg.payload));
                        }
                        Disposition::Duplicate => {
                            log::debug!("[recv] duplicate {}; re-acknowledging", seg.header);
                            self.transmit(&Segment::control(Header::ack(self.seq))).await?;
                        }
                        Disposition::HandshakeEcho => {
                            log::debug!("[recv] SYN+ACK echo; repeating final handshake ACK");
                            let ack = Header::ack(self.isn() + 2);
                            self.transmit(&Segment::control(ack)).await?;
                        }
                        Disposition::Stray => {
                            log::debug!("[recv] discarding {} (at seq={})", seg.header, self.seq);
                        }
                    }
                }
                Inbound::Malformed(..) => {}
                Inbound::TimedOut => {
                    log::debug!("[recv] nothing within {:?}", timer.current_rto);
                }
            }

            if !timer.back_off() {
                return Err(ConnError::Timeout {
                    phase: Phase::Transfer,
                    attempts: timer.attempts(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_accepts_only_the_next_unit() {
        assert_eq!(classify(&Header::data(50), 50, Some(48), 10), Disposition::Next);
        assert_eq!(classify(&Header::data(51), 50, Some(48), 10), Disposition::Stray);
        assert_eq!(classify(&Header::ack(50), 50, Some(48), 10), Disposition::Stray);
    }

    #[test]
    fn classify_recognises_retransmission_of_last_unit() {
        assert_eq!(classify(&Header::data(48), 50, Some(48), 10), Disposition::Duplicate);
        assert_eq!(classify(&Header::data(30), 50, Some(48), 10), Disposition::Stray);
        assert_eq!(classify(&Header::data(48), 50, None, 10), Disposition::Stray);
    }

    #[test]
    fn classify_fin_must_match_seq() {
        assert_eq!(classify(&Header::fin(50), 50, None, 10), Disposition::Fin);
        assert_eq!(classify(&Header::fin(49), 50, None, 10), Disposition::Stray);
        assert_eq!(classify(&Header::fin_ack(50), 50, None, 10), Disposition::Stray);
    }

    #[test]
    fn classify_handshake_echo() {
        assert_eq!(classify(&Header::syn_ack(11), 12, None, 10), Disposition::HandshakeEcho);
        assert_eq!(classify(&Header::syn_ack(12), 12, None, 10), Disposition::Stray);
    }
}
