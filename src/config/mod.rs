//! Protocol tunables and persistent records.
//!
//! [`ProtocolConfig`] is read-only once a role is started; every connection of
//! that role shares it.

mod store;

pub use store::{ClientCredentials, JsonFileStore, StoredCredential};

use std::time::Duration;

use tracing::warn;

use crate::core::{
    ACK_TIMEOUT, DEV_GAIN, FRAME_TIMEOUT, HANDSHAKE_TIMEOUT, MAX_QUEUE_LENGTH,
    PASSWORD_SETTLE_DELAY, RECONNECT_BASE, RECONNECT_JITTER, RESTART_DELAY, RTT_GAIN,
};

/// Environment variable overriding [`ProtocolConfig::max_queue_length`].
pub const ENV_MAX_QUEUE_LENGTH: &str = "MAX_QUEUE_LENGTH";

/// Environment variable overriding [`ProtocolConfig::rtt_gain`].
pub const ENV_RTT_GAIN: &str = "RTT_GAIN";

/// Environment variable overriding [`ProtocolConfig::dev_gain`].
pub const ENV_DEV_GAIN: &str = "DEV_GAIN";

/// Process-wide protocol configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolConfig {
    /// Send queue capacity before halving.
    pub max_queue_length: usize,

    /// Gain of the smoothed RTT average.
    pub rtt_gain: f64,

    /// Gain of the RTT mean deviation.
    pub dev_gain: f64,

    /// Camera closes peers that are not authenticated after this long.
    pub handshake_timeout: Duration,

    /// Camera closes the connection when no ack arrived for this long.
    pub ack_timeout: Duration,

    /// Client closes the connection when no frame arrived for this long.
    pub frame_timeout: Duration,

    /// Fixed part of the client reconnect delay.
    pub reconnect_base: Duration,

    /// Upper bound of the random part of the reconnect delay.
    pub reconnect_jitter: Duration,

    /// Client delay between a password rotation and reconnecting.
    pub password_settle_delay: Duration,

    /// Camera delay between a password rotation and listening again.
    pub restart_delay: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_queue_length: MAX_QUEUE_LENGTH,
            rtt_gain: RTT_GAIN,
            dev_gain: DEV_GAIN,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            ack_timeout: ACK_TIMEOUT,
            frame_timeout: FRAME_TIMEOUT,
            reconnect_base: RECONNECT_BASE,
            reconnect_jitter: RECONNECT_JITTER,
            password_settle_delay: PASSWORD_SETTLE_DELAY,
            restart_delay: RESTART_DELAY,
        }
    }
}

impl ProtocolConfig {
    /// Defaults overlaid with `MAX_QUEUE_LENGTH`, `RTT_GAIN` and `DEV_GAIN`
    /// from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`. Unparsable or out-of-range
    /// values are ignored with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_MAX_QUEUE_LENGTH) {
            match raw.trim().parse::<usize>() {
                Ok(len) if len > 0 => config.max_queue_length = len,
                _ => warn!(key = ENV_MAX_QUEUE_LENGTH, value = %raw, "ignoring invalid value"),
            }
        }
        if let Some(gain) = parse_gain(&lookup, ENV_RTT_GAIN) {
            config.rtt_gain = gain;
        }
        if let Some(gain) = parse_gain(&lookup, ENV_DEV_GAIN) {
            config.dev_gain = gain;
        }

        config
    }
}

fn parse_gain<F>(lookup: &F, key: &str) -> Option<f64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<f64>() {
        Ok(gain) if gain > 0.0 && gain < 1.0 => Some(gain),
        _ => {
            warn!(key, value = %raw, "ignoring invalid value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ProtocolConfig::default();
        assert_eq!(config.max_queue_length, 30);
        assert_eq!(config.rtt_gain, 0.125);
        assert_eq!(config.dev_gain, 0.25);
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
        assert_eq!(config.ack_timeout, Duration::from_secs(10));
        assert_eq!(config.frame_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect_base, Duration::from_millis(2000));
        assert_eq!(config.reconnect_jitter, Duration::from_millis(1000));
        assert_eq!(config.password_settle_delay, Duration::from_secs(5));
        assert_eq!(config.restart_delay, Duration::from_secs(3));
    }

    #[test]
    fn test_overlay() {
        let config = ProtocolConfig::from_lookup(lookup(&[
            ("MAX_QUEUE_LENGTH", "12"),
            ("RTT_GAIN", "0.5"),
            ("DEV_GAIN", " 0.1 "),
        ]));
        assert_eq!(config.max_queue_length, 12);
        assert_eq!(config.rtt_gain, 0.5);
        assert_eq!(config.dev_gain, 0.1);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ProtocolConfig::from_lookup(lookup(&[
            ("MAX_QUEUE_LENGTH", "0"),
            ("RTT_GAIN", "1.5"),
            ("DEV_GAIN", "fast"),
        ]));
        assert_eq!(config, ProtocolConfig::default());
    }

    #[test]
    fn test_missing_values_keep_defaults() {
        assert_eq!(
            ProtocolConfig::from_lookup(|_| None),
            ProtocolConfig::default()
        );
    }
}
