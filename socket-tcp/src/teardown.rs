//! Connection teardown.
//!
//! Active close (the side that decides to end the conversation):
//!
//! ```text
//!  → FIN(s)        ← FIN+ACK(s+1)        → ACK(s+2)        release
//! ```
//!
//! Passive close is detected inside [`Connection::recv`] when the next
//! segment is `FIN(s)` instead of data:
//!
//! ```text
//!  ← FIN(s)        → FIN+ACK(s+1)        ← ACK(s+2)        release
//! ```
//!
//! Either way the socket is dropped when the exchange ends, successfully or
//! not, so a failed close never leaves the handle open.

use crate::connection::{Connection, Inbound};
use crate::error::{ConnError, Phase};
use crate::header::{Header, Segment};
use crate::socket::Datagram;
use crate::state::ConnectionState;
use crate::timer::RetransmitTimer;

impl<D: Datagram> Connection<D> {
    /// Gracefully close the connection (active close).
    ///
    /// Closing an already closed connection is a no-op.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        if self.is_closed() {
            return Ok(());
        }
        self.ensure_established()?;
        self.state = ConnectionState::FinWait;

        let result = self.run_active_close().await;
        self.release();
        result
    }

    async fn run_active_close(&mut self) -> Result<(), ConnError> {
        let fin = Segment::control(Header::fin(self.seq));
        let expected = Header::fin_ack(self.seq + 1);
        let mut timer = RetransmitTimer::new(self.config.timer);

        loop {
            self.transmit(&fin).await?;

            match self.receive_from_peer(timer.current_rto).await? {
                Inbound::Segment(seg, _) if seg.header == expected => {
                    self.transmit(&Segment::control(Header::ack(self.seq + 2))).await?;
                    log::info!("[close] {} closed (active)", self.local_addr());
                    return Ok(());
                }
                // Late ACK of our last unit; the FIN is simply resent.
                Inbound::Segment(seg, _) if seg.header == Header::ack(self.seq) => {
                    log::debug!("[close] ignoring stale {}", seg.header);
                }
                // The peer never saw our ACK of its last unit.
                Inbound::Segment(seg, _)
                    if seg.header.is_data() && Some(seg.header.seq) == self.last_accepted =>
                {
                    log::debug!("[close] duplicate {}; re-acknowledging", seg.header);
                    self.transmit(&Segment::control(Header::ack(self.seq))).await?;
                }
                Inbound::Segment(seg, _) => {
                    return Err(ConnError::Teardown { expected, received: seg.header });
                }
                Inbound::Malformed(e, _) => return Err(e.into()),
                Inbound::TimedOut => {
                    log::debug!("[close] no FIN+ACK within {:?}", timer.current_rto);
                }
            }

            if !timer.back_off() {
                return Err(ConnError::Timeout {
                    phase: Phase::Teardown,
                    attempts: timer.attempts(),
                });
            }
        }
    }

    /// Answer the peer's `FIN(seq)`; called by `recv` on detecting it.
    pub(crate) async fn passive_close(&mut self) -> Result<(), ConnError> {
        self.state = ConnectionState::LastAck;

        let result = self.run_passive_close().await;
        self.release();
        result
    }

    async fn run_passive_close(&mut self) -> Result<(), ConnError> {
        let fin_ack = Segment::control(Header::fin_ack(self.seq + 1));
        let expected = Header::ack(self.seq + 2);
        let mut timer = RetransmitTimer::new(self.config.timer);

        loop {
            self.transmit(&fin_ack).await?;

            match self.receive_from_peer(timer.current_rto).await? {
                Inbound::Segment(seg, _) if seg.header == expected => {
                    log::info!("[close] {} closed (passive)", self.local_addr());
                    return Ok(());
                }
                // Our FIN+ACK was lost and the peer resent its FIN.
                Inbound::Segment(seg, _) if seg.header == Header::fin(self.seq) => {
                    log::debug!("[close] duplicate FIN; repeating FIN+ACK");
                }
                Inbound::Segment(seg, _) => {
                    return Err(ConnError::Teardown { expected, received: seg.header });
                }
                Inbound::Malformed(e, _) => return Err(e.into()),
                Inbound::TimedOut => {}
            }

            if !timer.back_off() {
                // The peer already sent FIN, so nothing is left to deliver.
                log::warn!("[close] final ACK never arrived; force-closing");
                return Ok(());
            }
        }
    }
}
