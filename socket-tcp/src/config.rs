//! Per-connection configuration.
//!
//! [`Config`] gathers every tunable of the engine.  Defaults reproduce the
//! classic parameters of the protocol: 64-byte data chunks and a 4 KiB
//! receive buffer for one datagram.  The CLI maps its flags onto a
//! [`Config`]; library users build one with the `with_*` methods.

use std::time::Duration;

use thiserror::Error;

use crate::header::CHUNK_SIZE;
use crate::timer::TimerConfig;

/// Size of the buffer one datagram is received into.
pub const MAX_DATAGRAM: usize = 4096;

/// Widest UTF-8 character; a chunk must be able to hold any one of them.
const MIN_CHUNK_SIZE: usize = 4;

/// Tunables shared by every engine operating on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Timeout, back-off and retry budget.
    pub timer: TimerConfig,
    /// Maximum encoded bytes of one data chunk.
    pub chunk_size: usize,
    /// Receive buffer for a single datagram.
    pub max_datagram: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timer: TimerConfig::default(),
            chunk_size: CHUNK_SIZE,
            max_datagram: MAX_DATAGRAM,
        }
    }
}

impl Config {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timer.initial_rto = timeout;
        self.timer.max_rto = self.timer.max_rto.max(timeout);
        self
    }

    pub fn with_max_timeout(mut self, max: Duration) -> Self {
        self.timer.max_rto = max;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.timer.max_retries = retries;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Check that the values are usable by the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timer.initial_rto.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.timer.max_rto < self.timer.initial_rto {
            return Err(ConfigError::MaxBelowInitial);
        }
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(ConfigError::ChunkTooSmall(self.chunk_size));
        }
        // A full chunk plus its header must fit the peer's receive buffer.
        if self.chunk_size + 64 > self.max_datagram {
            return Err(ConfigError::DatagramTooSmall(self.max_datagram));
        }
        Ok(())
    }
}

/// Rejected configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("timeout must be non-zero")]
    ZeroTimeout,
    #[error("maximum timeout is below the initial timeout")]
    MaxBelowInitial,
    #[error("chunk size {0} cannot hold a 4-byte character")]
    ChunkTooSmall(usize),
    #[error("datagram buffer of {0} bytes cannot hold a full chunk")]
    DatagramTooSmall(usize),
}
