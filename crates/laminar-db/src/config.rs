//! Configuration for stream scans and inserts.

use std::time::Duration;

use laminar_core::streaming::worker_queue::DEFAULT_QUEUE_CAPACITY_BYTES;
use laminar_core::streaming::WaitOptions;
use serde::{Deserialize, Serialize};

use crate::error::DbError;

fn default_batch_size() -> usize {
    10_000
}

fn default_num_workers() -> usize {
    1
}

fn default_queue_capacity_bytes() -> usize {
    DEFAULT_QUEUE_CAPACITY_BYTES
}

fn default_ack_poll_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_scan_poll_timeout() -> Duration {
    Duration::from_millis(50)
}

/// Stream read/write configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Rows pushed to one worker queue before switching, and events read per
    /// scan batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Number of worker queues.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// Byte capacity of each worker queue.
    #[serde(default = "default_queue_capacity_bytes")]
    pub queue_capacity_bytes: usize,
    /// Wait for workers to take every inserted row before an insert completes.
    #[serde(default)]
    pub synchronous_insert: bool,
    /// How often an acknowledgment wait re-checks for cancellation.
    #[serde(default = "default_ack_poll_interval")]
    pub ack_poll_interval: Duration,
    /// Upper bound on an acknowledgment wait. `None` waits until cancelled.
    #[serde(default)]
    pub ack_timeout: Option<Duration>,
    /// How long an idle scan waits for an event before ending its batch.
    #[serde(default = "default_scan_poll_timeout")]
    pub scan_poll_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            num_workers: default_num_workers(),
            queue_capacity_bytes: default_queue_capacity_bytes(),
            synchronous_insert: false,
            ack_poll_interval: default_ack_poll_interval(),
            ack_timeout: None,
            scan_poll_timeout: default_scan_poll_timeout(),
        }
    }
}

impl StreamConfig {
    /// Parses a JSON document; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] on malformed JSON or invalid values.
    pub fn from_json(json: &str) -> Result<Self, DbError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| DbError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] naming the first invalid key.
    pub fn validate(&self) -> Result<(), DbError> {
        if self.batch_size == 0 {
            return Err(DbError::Config("batch_size must be > 0".into()));
        }
        if self.num_workers == 0 {
            return Err(DbError::Config("num_workers must be > 0".into()));
        }
        if self.queue_capacity_bytes == 0 {
            return Err(DbError::Config("queue_capacity_bytes must be > 0".into()));
        }
        if self.ack_poll_interval.is_zero() {
            return Err(DbError::Config("ack_poll_interval must be > 0".into()));
        }
        Ok(())
    }

    /// Acknowledgment wait settings.
    #[must_use]
    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            poll_interval: self.ack_poll_interval,
            timeout: self.ack_timeout,
        }
    }

    /// Planner row estimate for one stream scan: a quarter of a batch,
    /// capped at 100.
    #[must_use]
    pub fn estimated_scan_rows(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let quarter = self.batch_size as f64 * 0.25;
        quarter.min(100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.batch_size, 10_000);
        assert_eq!(config.num_workers, 1);
        assert_eq!(config.queue_capacity_bytes, 8 * 1024 * 1024);
        assert!(!config.synchronous_insert);
        assert_eq!(config.ack_poll_interval, Duration::from_millis(10));
        assert_eq!(config.ack_timeout, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            StreamConfig::from_json(r#"{"num_workers": 4, "synchronous_insert": true}"#).unwrap();
        assert_eq!(config.num_workers, 4);
        assert!(config.synchronous_insert);
        assert_eq!(config.batch_size, 10_000);
    }

    #[test]
    fn test_json_round_trip() {
        let config = StreamConfig {
            ack_timeout: Some(Duration::from_secs(2)),
            ..StreamConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(StreamConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let err = StreamConfig::from_json(r#"{"num_workers": 0}"#).unwrap_err();
        assert!(matches!(err, DbError::Config(ref m) if m.contains("num_workers")));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            StreamConfig::from_json("{"),
            Err(DbError::Config(_))
        ));
    }

    #[test]
    fn test_estimated_scan_rows() {
        assert!((StreamConfig::default().estimated_scan_rows() - 100.0).abs() < f64::EPSILON);
        let small = StreamConfig {
            batch_size: 40,
            ..StreamConfig::default()
        };
        assert!((small.estimated_scan_rows() - 10.0).abs() < f64::EPSILON);
    }
}
