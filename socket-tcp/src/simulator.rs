//! Fault-injecting datagram layer for deterministic testing.
//!
//! Real networks drop and mangle datagrams.  To exercise the retry paths
//! without depending on actual network conditions, [`Simulator`] wraps any
//! [`Datagram`] and intercepts both directions:
//!
//! | Fault      | Description                                                |
//! |------------|------------------------------------------------------------|
//! | Loss       | Drop a datagram with probability `loss_rate`.              |
//! | Scripted   | Drop or corrupt the next N segments matching a predicate.  |
//! | Corruption | Shift the sequence number so the header no longer matches. |
//!
//! Random faults come from a seeded ChaCha8 RNG, so a failing run is
//! reproducible from its seed.  Every segment that passes through is recorded
//! in a [`Trace`] that tests inspect through a [`SimulatorHandle`], which
//! stays usable after the simulator has been moved into a connection.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::header::{Header, Segment};
use crate::socket::{Datagram, Socket, SocketError};

/// Offset added to the sequence number of a corrupted segment.
const CORRUPT_SEQ_OFFSET: u64 = 1 << 32;

/// Configuration for the random part of the fault model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a surviving datagram is corrupted.
    pub corrupt_rate: f64,
    /// Seed for the fault RNG.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            seed: 0,
        }
    }
}

/// Which way a datagram is travelling, seen from the wrapped endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// What happens to a datagram selected by a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Drop,
    Corrupt,
}

/// Everything observed by a simulator.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    /// Segments handed to the network by the wrapped endpoint (including
    /// ones the simulator then dropped).
    pub sent: Vec<Header>,
    /// Segments delivered to the wrapped endpoint, after corruption.
    pub delivered: Vec<Header>,
    pub dropped: usize,
    pub corrupted: usize,
}

type Matcher = Box<dyn Fn(&Header) -> bool + Send + Sync>;

struct Rule {
    direction: Direction,
    fault: Fault,
    remaining: u32,
    matches: Matcher,
}

struct Shared {
    config: SimulatorConfig,
    rng: ChaCha8Rng,
    rules: Vec<Rule>,
    trace: Trace,
}

impl Shared {
    /// Pick the fault, if any, for a datagram with `header`.
    fn decide(&mut self, direction: Direction, header: Option<&Header>) -> Option<Fault> {
        if let Some(h) = header {
            let hit = self
                .rules
                .iter_mut()
                .find(|r| r.direction == direction && r.remaining > 0 && (r.matches)(h));
            if let Some(rule) = hit {
                rule.remaining -= 1;
                return Some(rule.fault);
            }
        }
        if self.config.loss_rate > 0.0 && self.rng.random::<f64>() < self.config.loss_rate {
            return Some(Fault::Drop);
        }
        if self.config.corrupt_rate > 0.0 && self.rng.random::<f64>() < self.config.corrupt_rate {
            return Some(Fault::Corrupt);
        }
        None
    }

    fn record(&mut self, fault: Option<Fault>) {
        match fault {
            Some(Fault::Drop) => self.trace.dropped += 1,
            Some(Fault::Corrupt) => self.trace.corrupted += 1,
            None => {}
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Make a datagram that still parses but no longer matches what its
/// receiver expects.  Unparseable input is bit-flipped instead.
fn corrupt(bytes: &[u8]) -> Vec<u8> {
    match Segment::decode(bytes) {
        Ok(mut seg) => {
            seg.header.seq = seg.header.seq.wrapping_add(CORRUPT_SEQ_OFFSET);
            seg.encode()
        }
        Err(_) => bytes.iter().map(|b| !b).collect(),
    }
}

/// A fault-injecting wrapper around a datagram endpoint.
pub struct Simulator<D: Datagram = Socket> {
    inner: D,
    shared: Arc<Mutex<Shared>>,
}

/// Control and inspection handle for a [`Simulator`].
#[derive(Clone)]
pub struct SimulatorHandle {
    shared: Arc<Mutex<Shared>>,
}

impl<D: Datagram> Simulator<D> {
    pub fn new(inner: D, config: SimulatorConfig) -> Self {
        let shared = Shared {
            config,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            rules: Vec::new(),
            trace: Trace::default(),
        };
        Self { inner, shared: Arc::new(Mutex::new(shared)) }
    }

    /// A pass-through simulator (no random faults).
    pub fn transparent(inner: D) -> Self {
        Self::new(inner, SimulatorConfig::default())
    }

    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle { shared: Arc::clone(&self.shared) }
    }
}

impl SimulatorHandle {
    /// Apply `fault` to the next `times` segments travelling in `direction`
    /// whose header satisfies `matches`.
    pub fn inject<F>(&self, direction: Direction, fault: Fault, times: u32, matches: F)
    where
        F: Fn(&Header) -> bool + Send + Sync + 'static,
    {
        lock(&self.shared).rules.push(Rule {
            direction,
            fault,
            remaining: times,
            matches: Box::new(matches),
        });
    }

    /// Drop the next segment in `direction` matching `matches`.
    pub fn drop_once<F>(&self, direction: Direction, matches: F)
    where
        F: Fn(&Header) -> bool + Send + Sync + 'static,
    {
        self.inject(direction, Fault::Drop, 1, matches);
    }

    /// Corrupt the next segment in `direction` matching `matches`.
    pub fn corrupt_once<F>(&self, direction: Direction, matches: F)
    where
        F: Fn(&Header) -> bool + Send + Sync + 'static,
    {
        self.inject(direction, Fault::Corrupt, 1, matches);
    }

    /// Replace the random fault model; the RNG is reseeded from `config.seed`.
    ///
    /// Lets a test establish a connection cleanly and only then turn loss on.
    pub fn reconfigure(&self, config: SimulatorConfig) {
        let mut shared = lock(&self.shared);
        shared.config = config;
        shared.rng = ChaCha8Rng::seed_from_u64(config.seed);
    }

    /// Snapshot of everything observed so far.
    pub fn trace(&self) -> Trace {
        lock(&self.shared).trace.clone()
    }

    /// Number of outbound segments whose header equals `header`.
    pub fn sent_count(&self, header: &Header) -> usize {
        lock(&self.shared).trace.sent.iter().filter(|h| *h == header).count()
    }
}

impl<D: Datagram> fmt::Debug for Simulator<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulator")
            .field("local_addr", &self.inner.local_addr())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<D: Datagram> Datagram for Simulator<D> {
    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        let header = Segment::decode(bytes).ok().map(|s| s.header);
        let fault = {
            let mut shared = lock(&self.shared);
            if let Some(h) = header {
                shared.trace.sent.push(h);
            }
            let fault = shared.decide(Direction::Outbound, header.as_ref());
            shared.record(fault);
            fault
        };

        match fault {
            Some(Fault::Drop) => {
                log::debug!("[sim] dropped outbound {header:?}");
                Ok(())
            }
            Some(Fault::Corrupt) => self.inner.send_to(&corrupt(bytes), dest).await,
            None => self.inner.send_to(bytes, dest).await,
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        loop {
            let (n, addr) = self.inner.recv_from(buf).await?;
            let header = Segment::decode(&buf[..n]).ok().map(|s| s.header);

            let mut shared = lock(&self.shared);
            let fault = shared.decide(Direction::Inbound, header.as_ref());
            shared.record(fault);

            let n = match fault {
                Some(Fault::Drop) => {
                    log::debug!("[sim] dropped inbound {header:?}");
                    continue;
                }
                Some(Fault::Corrupt) => {
                    let mangled = corrupt(&buf[..n]);
                    let len = mangled.len().min(buf.len());
                    buf[..len].copy_from_slice(&mangled[..len]);
                    len
                }
                None => n,
            };

            if let Ok(seg) = Segment::decode(&buf[..n]) {
                shared.trace.delivered.push(seg.header);
            }
            return Ok((n, addr));
        }
    }
}
