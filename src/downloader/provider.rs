//! Per-provider download state
//!
//! The engine keeps one [`Provider`] per candidate peer. Each provider owns
//! at most one outstanding chunk request at a time; everything mutable lives
//! behind the provider's own lock so transport callbacks for different peers
//! never contend with each other.

use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard};

use crate::protocol::chunk::DataChunkRequest;
use crate::protocol::info::DataInfo;
use crate::transport::{Connection, PeerId};

/// Where a provider sits in its request lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderPhase {
    /// Nothing known, no metadata request sent yet
    NoInfo,
    /// Metadata request sent, no reply yet
    InfoRequested,
    /// Metadata known, no chunk request outstanding
    InfoKnown,
    /// Exactly one chunk request outstanding
    Requesting,
}

/// Mutable state of one provider, guarded by the provider's lock
#[derive(Debug, Default)]
pub struct ProviderState {
    /// Live connection to the peer; re-acquired lazily after failures
    pub connection: Option<Connection>,
    /// The metadata this peer advertised; `None` until its first reply
    pub info: Option<DataInfo>,
    /// True once a metadata request has been sent
    pub info_requested: bool,
    /// The single in-flight chunk request this provider owns
    pub current_request: Option<DataChunkRequest>,
    /// When the most recent chunk request was sent
    pub request_sent_at: Option<Instant>,
    /// Total payload bytes received from this peer
    pub bytes_downloaded: u64,
    /// Total time spent waiting on this peer's replies
    pub download_time: Duration,
    /// True if the in-flight request has already been hedged elsewhere
    pub double_requested: bool,
    /// False once the scheduler found nothing to ask this peer for
    pub active: bool,
}

impl ProviderState {
    /// The lifecycle phase implied by the current fields
    pub fn phase(&self) -> ProviderPhase {
        match (&self.info, &self.current_request, self.info_requested) {
            (Some(_), Some(_), _) => ProviderPhase::Requesting,
            (Some(_), None, _) => ProviderPhase::InfoKnown,
            (None, _, true) => ProviderPhase::InfoRequested,
            (None, _, false) => ProviderPhase::NoInfo,
        }
    }

    /// Number of whole chunks this peer has delivered, per its advertised
    /// chunk size
    pub fn chunks_completed(&self) -> u64 {
        match &self.info {
            Some(info) if info.chunk_size > 0 => self.bytes_downloaded / info.chunk_size as u64,
            _ => 0,
        }
    }

    /// The elapsed time beyond which another peer's request counts as slow
    /// relative to this peer: `multiplier` times this peer's observed
    /// per-chunk time, or `default` with no history yet
    pub fn slow_threshold(&self, default: Duration, multiplier: u32) -> Duration {
        let chunks = self.chunks_completed();
        if chunks == 0 {
            return default;
        }
        self.download_time * multiplier / chunks as u32
    }

    /// Record a delivered reply against the in-flight request
    pub fn record_delivery(&mut self, bytes: u64, now: Instant) {
        if let Some(sent_at) = self.request_sent_at {
            self.bytes_downloaded += bytes;
            self.download_time += now.duration_since(sent_at);
        }
    }
}

/// One candidate peer and its guarded state
#[derive(Debug)]
pub struct Provider {
    peer: PeerId,
    state: Mutex<ProviderState>,
}

impl Provider {
    /// Track a new candidate peer
    pub fn new(peer: PeerId) -> Self {
        Provider { peer, state: Mutex::new(ProviderState::default()) }
    }

    /// The peer this provider wraps
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Take the provider's lock
    pub async fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::dataset::DatasetId;

    #[tokio::test]
    async fn test_phase_progression() {
        let provider = Provider::new(PeerId::random());
        {
            let state = provider.lock().await;
            assert_eq!(state.phase(), ProviderPhase::NoInfo);
        }

        {
            let mut state = provider.lock().await;
            state.info_requested = true;
            assert_eq!(state.phase(), ProviderPhase::InfoRequested);

            state.info = Some(DataInfo::complete(DatasetId::random(), 100_000, 26_000));
            assert_eq!(state.phase(), ProviderPhase::InfoKnown);

            state.current_request = Some(DataChunkRequest {
                dataset_id: DatasetId::random(),
                offset: 0,
                length: 26_000,
                use_encryption: false,
                use_signing: false,
                extra_info: Default::default(),
                certificate: None,
            });
            assert_eq!(state.phase(), ProviderPhase::Requesting);

            state.current_request = None;
            assert_eq!(state.phase(), ProviderPhase::InfoKnown);
        }
    }

    #[test]
    fn test_slow_threshold_defaults_without_history() {
        let state = ProviderState::default();
        let default = Duration::from_secs(1);
        assert_eq!(state.slow_threshold(default, 2), default);
    }

    #[test]
    fn test_slow_threshold_doubles_observed_chunk_time() {
        let mut state = ProviderState {
            info: Some(DataInfo::complete(DatasetId::random(), 100_000, 10_000)),
            ..ProviderState::default()
        };
        // 3 whole chunks over 6 seconds: 2s per chunk, threshold 4s
        state.bytes_downloaded = 30_000;
        state.download_time = Duration::from_secs(6);
        assert_eq!(state.slow_threshold(Duration::from_secs(1), 2), Duration::from_secs(4));
    }

    #[test]
    fn test_record_delivery_needs_a_request_timestamp() {
        let mut state = ProviderState::default();
        state.record_delivery(5_000, Instant::now());
        assert_eq!(state.bytes_downloaded, 0);

        let sent = Instant::now() - Duration::from_millis(250);
        state.request_sent_at = Some(sent);
        state.record_delivery(5_000, Instant::now());
        assert_eq!(state.bytes_downloaded, 5_000);
        assert!(state.download_time >= Duration::from_millis(250));
    }
}
