//! Downloader engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::downloader;

/// Tuning knobs for a [`DataDownloader`](super::DataDownloader)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// Keep provider connections open this long after completion
    /// (zero = release immediately)
    pub hold_time: Duration,
    /// Timeout for acquiring a connection to a candidate provider
    pub connect_timeout: Duration,
    /// Interval between dead-man passes over inactive providers
    pub dead_man_interval: Duration,
    /// Assumed per-chunk time for a provider with no download history
    pub default_chunk_time: Duration,
    /// Poll interval used by the blocking download wrapper
    pub poll_interval: Duration,
    /// Datasets larger than this go to a temporary file instead of memory
    pub memory_sink_threshold: u64,
}

impl DownloaderConfig {
    /// Create a configuration with production defaults
    pub fn new() -> Self {
        DownloaderConfig {
            hold_time: Duration::ZERO,
            connect_timeout: downloader::CONNECT_TIMEOUT,
            dead_man_interval: downloader::DEAD_MAN_INTERVAL,
            default_chunk_time: downloader::DEFAULT_CHUNK_TIME,
            poll_interval: downloader::POLL_INTERVAL,
            memory_sink_threshold: downloader::MEMORY_SINK_THRESHOLD,
        }
    }

    /// Create a configuration with intervals short enough for tests
    pub fn for_testing() -> Self {
        DownloaderConfig {
            hold_time: Duration::ZERO,
            connect_timeout: Duration::from_millis(100),
            dead_man_interval: Duration::from_millis(50),
            default_chunk_time: Duration::from_millis(20),
            poll_interval: Duration::from_millis(5),
            memory_sink_threshold: downloader::MEMORY_SINK_THRESHOLD,
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.dead_man_interval.is_zero() {
            return Err("dead_man_interval must be greater than zero".to_string());
        }
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(DownloaderConfig::new().validate().is_ok());
        assert!(DownloaderConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = DownloaderConfig { dead_man_interval: Duration::ZERO, ..DownloaderConfig::new() };
        assert!(config.validate().is_err());
    }
}
