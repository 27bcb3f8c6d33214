//! RTT estimation and timing utilities.
//!
//! Implements the estimator from V. Jacobson, "Congestion Avoidance and
//! Control" (SIGCOMM 1988): exponentially weighted averages of the RTT and of
//! its mean deviation, whose sum paces the camera's send window.

use std::future;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Sleep;

use crate::core::{DEV_GAIN, MIN_PACING_INTERVAL, RTT_GAIN};

/// An optional one-shot timer owned by a connection task.
///
/// Re-arming replaces the previous instance; `None` never fires.
pub type Timer = Option<Pin<Box<Sleep>>>;

/// A timer firing after `after`.
pub fn arm(after: Duration) -> Timer {
    Some(Box::pin(tokio::time::sleep(after)))
}

/// Resolve when `timer` fires, disarming it. Pending forever when unarmed.
pub async fn expired(timer: &mut Timer) {
    match timer.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending::<()>().await,
    }
    *timer = None;
}

/// Milliseconds since the Unix epoch (0 if the clock is before the epoch).
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Jacobson RTT estimator.
///
/// All values are in milliseconds and start at zero for every newly
/// authenticated connection:
///
/// ```text
/// err          = rtt - rtt_avg
/// rtt_avg     += RTT_GAIN * err
/// mean_dev    += DEV_GAIN * (|err| - mean_dev)
/// rto_interval = rtt_avg + mean_dev
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RttEstimator {
    /// Smoothed RTT.
    rtt_avg: f64,
    /// Mean deviation of the RTT.
    mean_dev: f64,
    /// Pacing interval for the send window.
    rto_interval: f64,
    rtt_gain: f64,
    dev_gain: f64,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(RTT_GAIN, DEV_GAIN)
    }
}

impl RttEstimator {
    /// Create a zeroed estimator with the given gains.
    pub fn new(rtt_gain: f64, dev_gain: f64) -> Self {
        Self {
            rtt_avg: 0.0,
            mean_dev: 0.0,
            rto_interval: 0.0,
            rtt_gain,
            dev_gain,
        }
    }

    /// Feed one RTT sample in milliseconds.
    pub fn update(&mut self, rtt_ms: f64) {
        let err = rtt_ms - self.rtt_avg;
        self.rtt_avg += self.rtt_gain * err;
        self.mean_dev += self.dev_gain * (err.abs() - self.mean_dev);
        self.rto_interval = self.rtt_avg + self.mean_dev;
    }

    /// Smoothed RTT in milliseconds.
    pub fn rtt_avg(&self) -> f64 {
        self.rtt_avg
    }

    /// Mean deviation in milliseconds.
    pub fn mean_dev(&self) -> f64 {
        self.mean_dev
    }

    /// Current pacing interval in milliseconds.
    pub fn rto_interval(&self) -> f64 {
        self.rto_interval
    }

    /// Pacing interval as a timer duration, never below
    /// [`MIN_PACING_INTERVAL`].
    pub fn rto(&self) -> Duration {
        let floor_ms = MIN_PACING_INTERVAL.as_secs_f64() * 1000.0;
        let micros = f64::max(self.rto_interval, floor_ms) * 1000.0;
        Duration::from_micros(micros.round() as u64)
    }

    /// Zero all estimates, keeping the gains.
    pub fn reset(&mut self) {
        *self = Self::new(self.rtt_gain, self.dev_gain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_rtt_estimator_initial() {
        let estimator = RttEstimator::default();
        assert_eq!(estimator.rtt_avg(), 0.0);
        assert_eq!(estimator.mean_dev(), 0.0);
        assert_eq!(estimator.rto_interval(), 0.0);
        assert_eq!(estimator.rto(), MIN_PACING_INTERVAL);
    }

    #[test]
    fn test_rtt_estimator_first_sample() {
        let mut estimator = RttEstimator::default();
        estimator.update(80.0);

        // err = 80, rtt_avg = 10, mean_dev = 20, rto = 30
        assert!(close(estimator.rtt_avg(), 10.0));
        assert!(close(estimator.mean_dev(), 20.0));
        assert!(close(estimator.rto_interval(), 30.0));
        assert_eq!(estimator.rto(), Duration::from_millis(30));
    }

    #[test]
    fn test_rtt_estimator_second_sample() {
        let mut estimator = RttEstimator::default();
        estimator.update(80.0);
        estimator.update(50.0);

        // err = 40, rtt_avg = 15, mean_dev = 20 + 0.25 * (40 - 20) = 25
        assert!(close(estimator.rtt_avg(), 15.0));
        assert!(close(estimator.mean_dev(), 25.0));
        assert!(close(estimator.rto_interval(), 40.0));
    }

    #[test]
    fn test_rtt_estimator_converges() {
        let mut estimator = RttEstimator::default();
        for _ in 0..200 {
            estimator.update(100.0);
        }
        assert!((estimator.rtt_avg() - 100.0).abs() < 0.01);
        assert!(estimator.mean_dev() < 0.01);
    }

    #[test]
    fn test_rtt_estimator_custom_gains() {
        let mut estimator = RttEstimator::new(0.5, 0.5);
        estimator.update(10.0);
        assert!(close(estimator.rtt_avg(), 5.0));
        assert!(close(estimator.mean_dev(), 5.0));
    }

    #[test]
    fn test_rtt_estimator_reset() {
        let mut estimator = RttEstimator::new(0.5, 0.5);
        estimator.update(10.0);
        estimator.reset();
        assert_eq!(estimator, RttEstimator::new(0.5, 0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let mut timer = arm(Duration::from_millis(50));
        expired(&mut timer).await;
        assert!(timer.is_none());

        let unarmed = tokio::time::timeout(Duration::from_secs(1), expired(&mut timer)).await;
        assert!(unarmed.is_err());
    }

    #[test]
    fn test_unix_millis_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(unix_millis() > 1_577_836_800_000);
    }
}
