//! Client configuration.

use std::time::Duration;

use checker_core::DeviceType;

/// How the client spaces out reconnect attempts.
///
/// Attempts never stop. The delay before attempt `n` (1-based) is
/// `interval * 2^(n-1)`, capped at `max_interval`. With the defaults both are
/// one second, which gives a fixed one second reconnect interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub interval: Duration,
    /// Upper bound on the delay.
    pub max_interval: Duration,
    /// Log an error every time this many consecutive attempts have failed.
    pub warn_after: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_interval: Duration::from_millis(1000),
            warn_after: 30,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed interval between attempts.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            ..Default::default()
        }
    }

    /// Delay before the given 1-based consecutive attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.interval
            .saturating_mul(1u32 << shift)
            .min(self.max_interval)
    }

    /// Whether this failure count should be escalated in the logs.
    pub fn should_warn(&self, failures: u32) -> bool {
        self.warn_after > 0 && failures > 0 && failures % self.warn_after == 0
    }
}

/// Configuration for the telemetry client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Device type announced in the welcome frame.
    pub device_type: DeviceType,
    /// Reconnect spacing.
    pub reconnect: ReconnectPolicy,
    /// Upper bound on establishing the TCP connection and WebSocket upgrade.
    pub connect_timeout: Duration,
    /// How long the server has to acknowledge the welcome frame.
    pub ack_timeout: Duration,
    /// Interval between WebSocket pings while connected.
    pub ping_interval: Duration,
    /// How long to wait for a pong before declaring the link dead.
    pub pong_timeout: Duration,
    /// Upper bound on a single frame write.
    pub send_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::Checker,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_fixed_one_second() {
        let policy = ReconnectPolicy::default();
        for attempt in [1, 2, 5, 100, u32::MAX] {
            assert_eq!(policy.delay(attempt), Duration::from_secs(1));
        }
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = ReconnectPolicy {
            interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(1000),
            warn_after: 10,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(5), Duration::from_millis(1000));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_warn_cadence() {
        let policy = ReconnectPolicy::fixed(Duration::from_millis(10));
        assert!(!policy.should_warn(0));
        assert!(!policy.should_warn(29));
        assert!(policy.should_warn(30));
        assert!(policy.should_warn(60));

        let silent = ReconnectPolicy {
            warn_after: 0,
            ..policy
        };
        assert!(!silent.should_warn(30));
    }
}
