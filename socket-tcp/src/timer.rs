//! Retransmit timer and retry budget.
//!
//! Every wait on the socket is bounded by the current retransmission timeout
//! (RTO).  When a wait fails (timeout, or an unexpected segment that forces a
//! retransmission) the RTO doubles up to [`TimerConfig::max_rto`] and one unit
//! of the retry budget is spent.  Once more than
//! [`TimerConfig::max_retries`] retries have been spent, the operation gives
//! up with an error instead of blocking forever.
//!
//! A fresh [`RetransmitTimer`] is started for every unit that needs an
//! answer (one handshake step, one data unit, one teardown step).

use std::time::Duration;

/// Adjustable timeout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// RTO of the first wait.
    pub initial_rto: Duration,
    /// Maximum RTO after repeated back-off.
    pub max_rto: Duration,
    /// Retransmissions allowed per unit before giving up.
    pub max_retries: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            initial_rto: Duration::from_millis(1000),
            max_rto: Duration::from_secs(60),
            max_retries: 6,
        }
    }
}

/// Back-off state for the unit currently awaiting an answer.
#[derive(Debug, Clone)]
pub struct RetransmitTimer {
    pub config: TimerConfig,
    /// Timeout to apply to the next wait.
    pub current_rto: Duration,
    /// Retries spent so far on this unit.
    pub retries: u32,
}

impl RetransmitTimer {
    pub fn new(config: TimerConfig) -> Self {
        Self {
            config,
            current_rto: config.initial_rto,
            retries: 0,
        }
    }

    /// Spend one retry and double the RTO (exponential back-off, RFC 6298 §5.5).
    ///
    /// Returns `false`, leaving the timer untouched, once the retry budget is
    /// exhausted; the caller must then stop retransmitting and surface an error.
    pub fn back_off(&mut self) -> bool {
        if self.retries >= self.config.max_retries {
            return false;
        }
        self.retries += 1;
        self.current_rto = (self.current_rto * 2).min(self.config.max_rto);
        true
    }

    /// Transmissions made for this unit so far: the first send plus retries.
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Restore the initial RTO and a full budget for the next unit.
    pub fn reset(&mut self) {
        self.current_rto = self.config.initial_rto;
        self.retries = 0;
    }
}
