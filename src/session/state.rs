//! Connection state and reconnection decisions
//!
//! Pure functions only; the session loop applies the decisions.

use std::fmt;
use std::time::Duration;

/// Session-wide connection state
///
/// Transitions are strictly Disconnected -> Connecting -> Connected ->
/// Disconnected; a reconnect always starts again from Disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
        }
    }
}

/// Exponential backoff with a hard attempt cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(base: Duration, max_retries: u32) -> Self {
        Self { base, max_retries }
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent)
    }

    /// Decide what to do after `consecutive_failures` failed attempts
    pub fn decide(&self, consecutive_failures: u32, shutdown_requested: bool) -> RetryDecision {
        if shutdown_requested {
            return RetryDecision::AbortShutdownRequested;
        }

        if consecutive_failures > self.max_retries {
            return RetryDecision::AbortMaxAttemptsExceeded;
        }

        RetryDecision::Proceed {
            attempt: consecutive_failures,
            delay: self.backoff_delay(consecutive_failures),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then reconnect
    Proceed { attempt: u32, delay: Duration },
    AbortShutdownRequested,
    AbortMaxAttemptsExceeded,
}
