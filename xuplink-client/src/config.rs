//! Client configuration and reconnect cadence
//!
//! Reconnect policy is data, not behaviour scattered through the
//! supervisor: the delay formula lives here next to its tests so the
//! cadence can be reasoned about (and changed) in one place.

use std::time::Duration;

/// Default cluster endpoint, used when no endpoint is given.
pub const DEFAULT_ENDPOINT: &str = "wss://xrplcluster.com";

/// Tunables for the connection supervisor.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Budget for a single connect attempt. An attempt that is not open
    /// within this window counts as failed (dead-connect detection).
    pub connect_attempt_timeout: Duration,
    /// Ledger silence tolerated before the uplink is assumed dead and the
    /// transport is forcibly recycled.
    pub assume_offline_after: Duration,
    /// Connect attempts per endpoint before rotating to the next one, or
    /// giving up when there is nothing to rotate to. `None` means
    /// unlimited; it is forced to `Some(3)` when several endpoints are
    /// supplied, so rotation can actually occur.
    pub max_connection_attempts: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_attempt_timeout: Duration::from_secs(3),
            assume_offline_after: Duration::from_secs(15),
            max_connection_attempts: None,
        }
    }
}

impl ClientConfig {
    /// Delay before the next connect cycle: a mild linear ramp scaled so
    /// the last allowed attempt lands near the connect-attempt timeout,
    /// never below the 1.5 s floor.
    pub(crate) fn reconnect_delay(&self, attempts: i32) -> Duration {
        let factor = match self.max_connection_attempts {
            Some(max) if max > 1 => {
                (self.connect_attempt_timeout.as_secs_f64() - 1.0) / f64::from(max - 1)
            }
            _ => 1.0,
        };
        let attempts = attempts.max(0) as f64;
        Duration::from_secs_f64(((attempts + 1.0) * factor).max(1.5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_attempt_timeout, Duration::from_secs(3));
        assert_eq!(config.assume_offline_after, Duration::from_secs(15));
        assert_eq!(config.max_connection_attempts, None);
    }

    #[test]
    fn reconnect_delay_never_drops_below_floor() {
        let config = ClientConfig {
            connect_attempt_timeout: Duration::from_secs(3),
            max_connection_attempts: Some(5),
            ..ClientConfig::default()
        };
        // factor = (3 - 1) / (5 - 1) = 0.5; first attempts sit on the floor
        assert_eq!(config.reconnect_delay(0), Duration::from_secs_f64(1.5));
        assert_eq!(config.reconnect_delay(1), Duration::from_secs_f64(1.5));
        assert_eq!(config.reconnect_delay(4), Duration::from_secs_f64(2.5));
    }

    #[test]
    fn reconnect_delay_ramps_linearly_without_attempt_cap() {
        let config = ClientConfig::default();
        // factor = 1 when no cap (or a cap of 1) is configured
        assert_eq!(config.reconnect_delay(1), Duration::from_secs_f64(2.0));
        assert_eq!(config.reconnect_delay(2), Duration::from_secs_f64(3.0));
    }

    #[test]
    fn reconnect_delay_treats_sentinel_attempts_as_zero() {
        let config = ClientConfig::default();
        assert_eq!(config.reconnect_delay(-1), Duration::from_secs_f64(1.5));
    }
}
