//! Configuration types for hsdl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, time::Duration};

/// Settings shared by the dispatcher and every worker
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Target number of concurrent workers (default: min(32, cpus + 4))
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,

    /// Bytes handled per read step of the response body (default: 40 KiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Smallest gap, in bytes, that an ongoing range may be split at (default: 4 096 000)
    #[serde(default = "default_min_insertion_interval")]
    pub min_insertion_interval: u64,

    /// Per-request timeout; must be set
    #[serde(default = "default_timeout", with = "opt_secs")]
    pub timeout: Option<Duration>,

    /// Speedometer bucket width in milliseconds (default: 50)
    #[serde(default = "default_precision_ms")]
    pub precision_ms: u64,

    /// Pause after a failed request or read (default: 2s)
    #[serde(default = "default_retry_delay", with = "secs")]
    pub retry_delay: Duration,

    /// Pause between claims while in standby (default: 1s)
    #[serde(default = "default_standby_delay", with = "secs")]
    pub standby_delay: Duration,

    /// How often the dispatcher checks for worker convergence (default: 2s)
    #[serde(default = "default_poll_interval", with = "secs")]
    pub poll_interval: Duration,

    /// Root directory for debris files (default: "./temp_debris")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    #[serde(default = "default_headers")]
    pub headers: HashMap<String, String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            thread_count: default_thread_count(),
            chunk_size: default_chunk_size(),
            min_insertion_interval: default_min_insertion_interval(),
            timeout: default_timeout(),
            precision_ms: default_precision_ms(),
            retry_delay: default_retry_delay(),
            standby_delay: default_standby_delay(),
            poll_interval: default_poll_interval(),
            temp_dir: default_temp_dir(),
            headers: default_headers(),
        }
    }
}

impl DownloadConfig {
    /// Reject settings the download loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        match self.timeout {
            None => {
                return Err(Error::config(
                    "timeout",
                    "cannot have timeout unspecified due to download mechanism",
                ))
            }
            Some(t) if t.is_zero() => {
                return Err(Error::config("timeout", "timeout must be greater than zero"))
            }
            _ => {}
        }
        if self.thread_count == 0 {
            return Err(Error::config("thread_count", "at least one worker is required"));
        }
        if self.chunk_size == 0 {
            return Err(Error::config("chunk_size", "chunk size must be greater than zero"));
        }
        if self.min_insertion_interval == 0 {
            return Err(Error::config(
                "min_insertion_interval",
                "minimum insertion interval must be greater than zero",
            ));
        }
        if self.precision_ms == 0 {
            return Err(Error::config("precision_ms", "precision must be greater than zero"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Result<Duration> {
        self.validate()?;
        self.timeout
            .ok_or_else(|| Error::config("timeout", "timeout is required"))
    }

    /// Number of workers actually started for a resource of `total_size` bytes.
    ///
    /// A single worker when ranges are not honoured; otherwise no more workers
    /// than there are `min_insertion_interval`-sized pieces.
    pub fn effective_thread_count(&self, total_size: u64, range_supported: bool) -> usize {
        if !range_supported {
            return 1;
        }
        let pieces = total_size.div_ceil(self.min_insertion_interval).max(1);
        self.thread_count
            .min(usize::try_from(pieces).unwrap_or(usize::MAX))
            .max(1)
    }
}

fn default_thread_count() -> usize {
    (num_cpus::get() + 4).min(32)
}

fn default_chunk_size() -> usize {
    40 * 1024
}

fn default_min_insertion_interval() -> u64 {
    4_096_000
}

fn default_timeout() -> Option<Duration> {
    Some(Duration::from_secs(20))
}

fn default_precision_ms() -> u64 {
    50
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_standby_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp_debris")
}

fn default_headers() -> HashMap<String, String> {
    HashMap::from([(
        "User-Agent".to_string(),
        concat!("hsdl/", env!("CARGO_PKG_VERSION")).to_string(),
    )])
}

/// Durations as fractional seconds
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let v = f64::deserialize(d)?;
        Duration::try_from_secs_f64(v).map_err(serde::de::Error::custom)
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(d)?
            .map(|v| Duration::try_from_secs_f64(v).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_timeout_rejected() {
        let config = DownloadConfig {
            timeout: None,
            ..Default::default()
        };
        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("timeout")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_thread_count_capped_by_size() {
        let config = DownloadConfig {
            thread_count: 8,
            min_insertion_interval: 1000,
            ..Default::default()
        };
        assert_eq!(config.effective_thread_count(10_000, true), 8);
        assert_eq!(config.effective_thread_count(2_500, true), 3);
        assert_eq!(config.effective_thread_count(10, true), 1);
        assert_eq!(config.effective_thread_count(0, true), 1);
        assert_eq!(config.effective_thread_count(10_000, false), 1);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: DownloadConfig =
            serde_json::from_str(r#"{"thread_count": 3, "timeout": 1.5}"#).unwrap();
        assert_eq!(config.thread_count, 3);
        assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.chunk_size, 40 * 1024);
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert!(config.headers.contains_key("User-Agent"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_null_timeout_fails_validation() {
        let config: DownloadConfig = serde_json::from_str(r#"{"timeout": null}"#).unwrap();
        assert!(config.timeout.is_none());
        assert!(config.validate().is_err());
    }
}
