//! Tuning constants for swarm_fetcher
//!
//! This module centralizes the constants used throughout the crate,
//! organized by functional domain.

use std::time::Duration;

/// Wire protocol constants
pub mod wire {
    /// Length of a message tag in bytes
    pub const TAG_LEN: usize = 4;

    /// Length of a dataset identifier in bytes
    pub const DATASET_ID_LEN: usize = 16;

    /// Length of an MD5 payload checksum in bytes
    pub const CHECKSUM_LEN: usize = 16;
}

/// Downloader engine constants
pub mod downloader {
    use super::Duration;

    /// Datasets larger than this are written to a temporary file instead of
    /// an in-memory buffer
    pub const MEMORY_SINK_THRESHOLD: u64 = 50_000;

    /// Interval between dead-man passes over inactive providers
    pub const DEAD_MAN_INTERVAL: Duration = Duration::from_secs(100);

    /// Assumed per-chunk time for a provider with no download history yet
    pub const DEFAULT_CHUNK_TIME: Duration = Duration::from_secs(1);

    /// A stalled request is duplicated once it exceeds this multiple of the
    /// candidate provider's observed per-chunk time
    pub const SLOW_REQUEST_MULTIPLIER: u32 = 2;

    /// Timeout for acquiring a connection to a candidate provider
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

    /// Poll interval for the synchronous download wrapper
    pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

    /// Default idle window for the synchronous download wrapper
    pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 10;

    /// Downloads slower than this are logged on success
    pub const SLOW_DOWNLOAD_WARNING: Duration = Duration::from_secs(15);
}

/// Event fan-out constants
pub mod events {
    /// Capacity of the broadcast channel carrying download events
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}

// Re-export commonly used constants for convenience
pub use downloader::{DEAD_MAN_INTERVAL, DEFAULT_IDLE_TIMEOUT_SECS, MEMORY_SINK_THRESHOLD};
pub use wire::{DATASET_ID_LEN, TAG_LEN};
