//! Download telemetry
//!
//! [`DownloadStatus`] counts the messages a download sent and received and
//! remembers when each phase first happened. It is purely observational: the
//! engine never branches on it. The timing breakdown answers "where did the
//! time go" for slow transfers.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters and timestamps for one download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadStatus {
    /// True once the download completed
    pub completed: bool,
    /// Metadata requests sent
    pub info_requests_sent: u32,
    /// Metadata replies received
    pub info_replies_received: u32,
    /// Chunk requests sent (including hedged duplicates)
    pub chunk_requests_sent: u32,
    /// Chunk replies received (including duplicates)
    pub chunk_replies_received: u32,
    /// Providers that accepted a metadata request
    pub providers_found: u32,
    /// Providers that could not be reached or knew nothing
    pub providers_not_found: u32,
    /// When the download started
    pub started_at: DateTime<Utc>,
    /// When the first metadata request went out
    pub first_info_request_at: Option<DateTime<Utc>>,
    /// When the first metadata reply came back
    pub first_info_reply_at: Option<DateTime<Utc>>,
    /// When the first chunk request went out
    pub first_chunk_request_at: Option<DateTime<Utc>>,
    /// When the first chunk reply came back
    pub first_chunk_reply_at: Option<DateTime<Utc>>,
    /// When the most recent chunk reply came back
    pub last_chunk_at: Option<DateTime<Utc>>,
    /// When the download completed or gave up
    pub finished_at: Option<DateTime<Utc>>,
    /// Free-form log of non-fatal problems
    pub issues: String,
}

impl DownloadStatus {
    /// Start tracking a download now
    pub fn new() -> Self {
        DownloadStatus {
            completed: false,
            info_requests_sent: 0,
            info_replies_received: 0,
            chunk_requests_sent: 0,
            chunk_replies_received: 0,
            providers_found: 0,
            providers_not_found: 0,
            started_at: Utc::now(),
            first_info_request_at: None,
            first_info_reply_at: None,
            first_chunk_request_at: None,
            first_chunk_reply_at: None,
            last_chunk_at: None,
            finished_at: None,
            issues: String::new(),
        }
    }

    /// Record a metadata request going out
    pub fn record_info_request(&mut self) {
        self.info_requests_sent += 1;
        self.first_info_request_at.get_or_insert_with(Utc::now);
    }

    /// Record a metadata reply coming back
    pub fn record_info_reply(&mut self) {
        self.info_replies_received += 1;
        self.first_info_reply_at.get_or_insert_with(Utc::now);
    }

    /// Record a chunk request going out
    pub fn record_chunk_request(&mut self) {
        self.chunk_requests_sent += 1;
        self.first_chunk_request_at.get_or_insert_with(Utc::now);
    }

    /// Record a chunk reply coming back
    pub fn record_chunk_reply(&mut self) {
        self.chunk_replies_received += 1;
        let now = Utc::now();
        self.first_chunk_reply_at.get_or_insert(now);
        self.last_chunk_at = Some(now);
    }

    /// Append a non-fatal issue note
    pub fn note_issue(&mut self, issue: &str) {
        if !self.issues.is_empty() {
            self.issues.push_str("; ");
        }
        self.issues.push_str(issue);
    }

    /// Close the record as completed or failed
    pub fn finish(&mut self, completed: bool) {
        self.completed = completed;
        self.finished_at = Some(Utc::now());
    }

    fn span(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Duration {
        match (from, to) {
            (Some(from), Some(to)) => (to - from).to_std().unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }

    /// Time from start until the first metadata request went out
    pub fn wait_for_request_start(&self) -> Duration {
        Self::span(Some(self.started_at), self.first_info_request_at)
    }

    /// Time from the first metadata request to the first reply
    pub fn wait_for_info(&self) -> Duration {
        Self::span(self.first_info_request_at, self.first_info_reply_at)
    }

    /// Time from the first chunk reply until the download finished
    pub fn chunk_transfer_time(&self) -> Duration {
        Self::span(self.first_chunk_reply_at, self.finished_at)
    }

    /// Total wall-clock time of the download
    pub fn total_time(&self) -> Duration {
        Self::span(Some(self.started_at), self.finished_at)
    }
}

impl Default for DownloadStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.total_time();
        write!(
            f,
            "completed={}: {}\ninfo: requests={}, replies={}\nchunks: requests={}, replies={}\ntotal time: {:.2?}",
            self.completed,
            if self.issues.is_empty() { "no issues" } else { &self.issues },
            self.info_requests_sent,
            self.info_replies_received,
            self.chunk_requests_sent,
            self.chunk_replies_received,
            total,
        )?;
        if total.as_secs() >= 1 {
            let percent = |part: Duration| {
                100.0 * part.as_secs_f64() / total.as_secs_f64().max(f64::EPSILON)
            };
            write!(
                f,
                " (wait for start {:.1}%, wait for info {:.1}%, chunk transfer {:.1}%)",
                percent(self.wait_for_request_start()),
                percent(self.wait_for_info()),
                percent(self.chunk_transfer_time()),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_first_timestamps() {
        let mut status = DownloadStatus::new();
        assert_eq!(status.info_requests_sent, 0);
        assert!(status.first_info_request_at.is_none());

        status.record_info_request();
        status.record_info_request();
        assert_eq!(status.info_requests_sent, 2);
        let first = status.first_info_request_at.unwrap();

        status.record_info_request();
        // first timestamp does not move
        assert_eq!(status.first_info_request_at.unwrap(), first);
    }

    #[test]
    fn test_chunk_reply_tracks_last_arrival() {
        let mut status = DownloadStatus::new();
        status.record_chunk_reply();
        let first = status.first_chunk_reply_at.unwrap();
        status.record_chunk_reply();
        assert_eq!(status.first_chunk_reply_at.unwrap(), first);
        assert!(status.last_chunk_at.unwrap() >= first);
    }

    #[test]
    fn test_issues_accumulate() {
        let mut status = DownloadStatus::new();
        status.note_issue("conflicting data length");
        status.note_issue("timeout");
        assert_eq!(status.issues, "conflicting data length; timeout");
    }

    #[test]
    fn test_spans_default_to_zero() {
        let status = DownloadStatus::new();
        assert_eq!(status.wait_for_info(), Duration::ZERO);
        assert_eq!(status.chunk_transfer_time(), Duration::ZERO);
        assert_eq!(status.total_time(), Duration::ZERO);
    }

    #[test]
    fn test_finish_stamps_the_record() {
        let mut status = DownloadStatus::new();
        status.finish(true);
        assert!(status.completed);
        assert!(status.finished_at.is_some());
        let rendered = status.to_string();
        assert!(rendered.contains("completed=true"));
    }
}
