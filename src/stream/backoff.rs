//! Reconnect state of one event stream.

use std::time::Duration;

/// Connection status published by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected; waiting to retry.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake done, receiving frames.
    Connected,
    /// Retry budget exhausted; the stream has stopped for good.
    GivingUp,
}

/// Retry bookkeeping with multiplicative backoff.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Consecutive failures since the last successful handshake.
    pub retry_count: u32,
    /// Delay before the next retry; doubled on every failure.
    pub retry_delay: Duration,
    base_delay: Duration,
    max_retries: u32,
    max_delay: Option<Duration>,
}

impl ConnectionState {
    pub fn new(base_delay: Duration, max_retries: u32, max_delay: Option<Duration>) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            retry_count: 0,
            retry_delay: base_delay,
            base_delay,
            max_retries,
            max_delay,
        }
    }

    pub fn connecting(&mut self) {
        self.status = ConnectionStatus::Connecting;
    }

    /// Successful handshake: reset to `(Connected, 0, base_delay)`.
    pub fn connected(&mut self) {
        self.status = ConnectionStatus::Connected;
        self.retry_count = 0;
        self.retry_delay = self.base_delay;
    }

    /// Record a failure. Returns how long to wait before the next attempt, or
    /// `None` once the failure budget is spent.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.retry_count = self.retry_count.saturating_add(1);
        if self.retry_count >= self.max_retries {
            self.status = ConnectionStatus::GivingUp;
            return None;
        }
        self.retry_delay = self.retry_delay.saturating_mul(2);
        if let Some(max) = self.max_delay {
            self.retry_delay = self.retry_delay.min(max);
        }
        self.status = ConnectionStatus::Disconnected;
        Some(self.retry_delay)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn delays_double_from_base() {
        let mut state = ConnectionState::new(secs(2), 15, None);
        let delays: Vec<_> = (0..3).filter_map(|_| state.record_failure()).collect();
        assert_eq!(delays, vec![secs(4), secs(8), secs(16)]);
        assert_eq!(state.retry_count, 3);
        assert_eq!(state.status, ConnectionStatus::Disconnected);
    }

    #[test]
    fn gives_up_on_fifteenth_failure() {
        let mut state = ConnectionState::new(secs(2), 15, None);
        for _ in 0..14 {
            assert!(state.record_failure().is_some());
        }
        assert_eq!(state.record_failure(), None);
        assert_eq!(state.status, ConnectionStatus::GivingUp);
        assert_eq!(state.retry_count, 15);
    }

    #[test]
    fn handshake_resets_backoff() {
        let mut state = ConnectionState::new(secs(2), 15, None);
        state.record_failure();
        state.record_failure();
        state.connected();
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.retry_delay, secs(2));
        assert_eq!(state.record_failure(), Some(secs(4)));
    }

    #[test]
    fn delay_is_capped() {
        let mut state = ConnectionState::new(secs(2), 100, Some(secs(10)));
        let delays: Vec<_> = (0..4).filter_map(|_| state.record_failure()).collect();
        assert_eq!(delays, vec![secs(4), secs(8), secs(10), secs(10)]);
    }
}
