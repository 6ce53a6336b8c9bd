//! The multi-provider download engine
//!
//! [`DataDownloader`] drives one in-flight download of one data set across
//! any number of candidate providers. It requests metadata from every
//! candidate, promotes the first valid reply to the authoritative view of
//! the data set, then keeps every provider busy with at most one chunk
//! request each, picking rarest-first among the chunks a provider can offer.
//! Incoming chunks are deduplicated and written into the destination sink;
//! a recurring dead-man pass hedges requests stuck on slow peers through
//! idle ones. Completion fires exactly once, no matter how many providers
//! deliver the final chunk concurrently.
//!
//! The engine is driven entirely by transport callbacks plus one timer; it
//! owns no threads of its own beyond the tasks it spawns on `start`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::constants::downloader::SLOW_REQUEST_MULTIPLIER;
use crate::constants::events::EVENT_CHANNEL_CAPACITY;
use crate::errors::{DownloadError, DownloadResult};
use crate::protocol::chunk::{Certificate, DataChunk, DataChunkRequest};
use crate::protocol::chunk_map::ChunkMap;
use crate::protocol::dataset::DatasetId;
use crate::protocol::info::{DataInfo, DataInfoRequest, DataNoInfo};
use crate::protocol::wire::WireMessage;
use crate::transport::{Connection, Inbound, PeerId, Transport};

use super::config::DownloaderConfig;
use super::events::{self, DownloadEvent, EventReceiver, EventSender};
use super::provider::Provider;
use super::sink::DataSink;
use super::status::DownloadStatus;

/// Authoritative transfer state, unknown until the first metadata reply
#[derive(Debug)]
enum TransferState {
    /// No provider has answered yet; chunk geometry is unknown
    AwaitingInfo,
    /// First metadata reply established the geometry
    Known {
        /// The authoritative metadata
        info: DataInfo,
        /// Chunks ever requested through the normal scheduling path
        requested: ChunkMap,
    },
}

#[derive(Debug)]
struct SelectState {
    transfer: TransferState,
}

#[derive(Debug)]
struct WriteState {
    /// Destination sink, created lazily on the first chunk
    sink: Option<DataSink>,
    /// Deep copy of the authoritative metadata tracking what has been
    /// written; its availability map is the completion authority
    tracker: Option<DataInfo>,
    bytes_received: u64,
}

struct RunState {
    started: bool,
    tasks: Vec<JoinHandle<()>>,
}

struct Shared {
    dataset_id: DatasetId,
    extra_info: WireMessage,
    certificate: Option<Certificate>,
    config: DownloaderConfig,
    transport: Arc<dyn Transport>,
    suggested: Vec<PeerId>,
    providers: Mutex<Vec<Arc<Provider>>>,
    select: Mutex<SelectState>,
    write: Mutex<WriteState>,
    status: Mutex<DownloadStatus>,
    run: Mutex<RunState>,
    completion_latch: Mutex<bool>,
    complete_tx: watch::Sender<bool>,
    events: EventSender,
    dead_man_armed: AtomicBool,
}

/// Downloads one data set from a swarm of candidate providers
///
/// Cloning is cheap and every clone drives the same download.
#[derive(Clone)]
pub struct DataDownloader {
    shared: Arc<Shared>,
}

impl DataDownloader {
    /// Create a downloader for `dataset_id` with the given candidates
    pub fn new(
        dataset_id: DatasetId,
        transport: Arc<dyn Transport>,
        providers: Vec<PeerId>,
        config: DownloaderConfig,
    ) -> Self {
        Self::with_details(dataset_id, transport, providers, WireMessage::new(), None, config)
    }

    /// Create a downloader carrying an extra-info fingerprint and an
    /// optional certificate for chunk requests
    pub fn with_details(
        dataset_id: DatasetId,
        transport: Arc<dyn Transport>,
        providers: Vec<PeerId>,
        extra_info: WireMessage,
        certificate: Option<Certificate>,
        config: DownloaderConfig,
    ) -> Self {
        if let Err(message) = config.validate() {
            panic!("Invalid downloader configuration: {}", message);
        }

        let (complete_tx, _) = watch::channel(false);
        DataDownloader {
            shared: Arc::new(Shared {
                dataset_id,
                extra_info,
                certificate,
                config,
                transport,
                suggested: providers,
                providers: Mutex::new(Vec::new()),
                select: Mutex::new(SelectState { transfer: TransferState::AwaitingInfo }),
                write: Mutex::new(WriteState { sink: None, tracker: None, bytes_received: 0 }),
                status: Mutex::new(DownloadStatus::new()),
                run: Mutex::new(RunState { started: false, tasks: Vec::new() }),
                completion_latch: Mutex::new(false),
                complete_tx,
                events: events::channel(EVENT_CHANNEL_CAPACITY),
                dead_man_armed: AtomicBool::new(false),
            }),
        }
    }

    /// The data set this downloader is fetching
    pub fn dataset_id(&self) -> DatasetId {
        self.shared.dataset_id
    }

    /// Start the download: register handlers and contact every candidate
    ///
    /// Idempotent; returns quickly, the work happens on spawned tasks.
    pub async fn start(&self) {
        let shared = &self.shared;
        let mut run = shared.run.lock().await;
        if run.started {
            return;
        }
        run.started = true;
        debug!("Starting download of {}", shared.dataset_id);

        let (info_tx, info_rx) = mpsc::unbounded_channel();
        let (no_info_tx, no_info_rx) = mpsc::unbounded_channel();
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        shared.transport.register_handler(DataInfo::TAG, info_tx);
        shared.transport.register_handler(DataNoInfo::TAG, no_info_tx);
        shared.transport.register_handler(DataChunk::TAG, chunk_tx);

        run.tasks.push(tokio::spawn(Arc::clone(shared).info_loop(info_rx)));
        run.tasks.push(tokio::spawn(Arc::clone(shared).no_info_loop(no_info_rx)));
        run.tasks.push(tokio::spawn(Arc::clone(shared).chunk_loop(chunk_rx)));
        run.tasks.push(tokio::spawn(Arc::clone(shared).dead_man_loop()));
        run.tasks.push(tokio::spawn(Arc::clone(shared).contact_candidates()));
    }

    /// Stop the download: unregister handlers and release providers
    ///
    /// Idempotent. In-flight requests are abandoned, not cancelled on the
    /// wire.
    pub async fn stop(&self) {
        self.shared.stop_engine().await;
    }

    /// Add a candidate provider mid-flight
    ///
    /// Returns false if the peer is already tracked. A metadata request is
    /// attempted immediately.
    pub async fn add_provider(&self, peer: PeerId) -> bool {
        self.shared.add_provider(peer).await
    }

    /// Drop every provider and release their connections
    pub async fn reset_providers(&self) {
        self.shared.reset_providers().await;
    }

    /// Drop every provider, then add the given candidates
    pub async fn reset_providers_with(&self, peers: Vec<PeerId>) {
        self.shared.reset_providers().await;
        for peer in peers {
            self.shared.add_provider(peer).await;
        }
    }

    /// Run the download to completion, giving up after `timeout_secs`
    /// without new data
    ///
    /// Starts the engine, polls until the download completes or stalls, then
    /// stops the engine and logs telemetry. Returns true on success.
    pub async fn download(&self, timeout_secs: u64) -> bool {
        {
            let mut status = self.shared.status.lock().await;
            *status = DownloadStatus::new();
        }
        if self.shared.provider_snapshot().await.is_empty() && self.shared.suggested.is_empty() {
            self.shared.status.lock().await.note_issue("started with no providers");
        }

        let mut events = self.subscribe();
        self.start().await;

        let idle_limit = Duration::from_secs(timeout_secs);
        let mut last_data = Instant::now();
        let completed = loop {
            if self.is_complete() {
                break true;
            }
            // every observed arrival resets the idle watchdog
            while let Ok(event) = events.try_recv() {
                if matches!(event, DownloadEvent::DataReceived { .. }) {
                    last_data = Instant::now();
                }
            }
            if last_data.elapsed() >= idle_limit {
                break false;
            }
            tokio::time::sleep(self.shared.config.poll_interval).await;
        };

        if !completed {
            let mut status = self.shared.status.lock().await;
            status.note_issue("Timeout");
            status.finish(false);
        }
        self.stop().await;
        self.shared.log_status().await;
        completed
    }

    /// Download and copy the result to `path`
    ///
    /// Fails if the download times out, if `path` already exists non-empty,
    /// or on any file-system error during the copy (all logged).
    pub async fn download_file(&self, path: &std::path::Path, timeout_secs: u64) -> bool {
        if !self.download(timeout_secs).await {
            return false;
        }
        let mut write = self.shared.write.lock().await;
        let Some(sink) = write.sink.as_mut() else {
            warn!("Download finished but produced no data");
            return false;
        };
        match sink.copy_to_file(path).await {
            Ok(()) => true,
            Err(error) => {
                warn!("Download finished but could not save the file: {}", error);
                drop(write);
                self.shared.status.lock().await.note_issue("could not save file");
                false
            }
        }
    }

    /// The assembled payload of a finished (or partial) download
    pub async fn downloaded_bytes(&self) -> DownloadResult<Vec<u8>> {
        let mut write = self.shared.write.lock().await;
        match write.sink.as_mut() {
            Some(sink) => sink.to_bytes().await,
            None => Err(DownloadError::NoData),
        }
    }

    /// Subscribe to download events
    pub fn subscribe(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    /// A watch that flips to true when the download completes
    pub fn completion(&self) -> watch::Receiver<bool> {
        self.shared.complete_tx.subscribe()
    }

    /// True once every chunk has been written
    pub fn is_complete(&self) -> bool {
        self.shared.is_complete()
    }

    /// Snapshot of the download telemetry
    pub async fn status(&self) -> DownloadStatus {
        self.shared.status.lock().await.clone()
    }

    /// Metadata describing what has been downloaded so far
    pub async fn downloaded_info(&self) -> Option<DataInfo> {
        self.shared.write.lock().await.tracker.clone()
    }

    /// Payload bytes written so far
    pub async fn bytes_received(&self) -> u64 {
        self.shared.write.lock().await.bytes_received
    }

    /// Number of tracked providers
    pub async fn provider_count(&self) -> usize {
        self.shared.providers.lock().await.len()
    }

    /// One-line human-readable progress description
    pub async fn progress_line(&self) -> String {
        let write = self.shared.write.lock().await;
        match &write.tracker {
            Some(tracker) => {
                format!("Bytes transferred: {} of {}", write.bytes_received, tracker.length)
            }
            None => "Waiting for download information.".to_string(),
        }
    }
}

impl Shared {
    fn is_complete(&self) -> bool {
        *self.complete_tx.borrow()
    }

    async fn provider_snapshot(&self) -> Vec<Arc<Provider>> {
        self.providers.lock().await.clone()
    }

    /// Resolve the provider an inbound message came from, by connection
    /// identity (same connection, or any connection to the same peer)
    async fn find_provider(&self, connection: &Connection) -> Option<Arc<Provider>> {
        for provider in self.provider_snapshot().await {
            let matches = {
                let state = provider.lock().await;
                state
                    .connection
                    .map(|known| known.is_same_endpoint(connection))
                    .unwrap_or(false)
            };
            if matches {
                return Some(provider);
            }
        }
        None
    }

    // ---- message dispatch -------------------------------------------------

    async fn info_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Inbound>) {
        while let Some(inbound) = rx.recv().await {
            let shared = Arc::clone(&self);
            tokio::spawn(async move { shared.handle_info(inbound).await });
        }
    }

    async fn no_info_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Inbound>) {
        while let Some(inbound) = rx.recv().await {
            let shared = Arc::clone(&self);
            tokio::spawn(async move { shared.handle_no_info(inbound).await });
        }
    }

    async fn chunk_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Inbound>) {
        while let Some(inbound) = rx.recv().await {
            let shared = Arc::clone(&self);
            tokio::spawn(async move { shared.handle_chunk(inbound).await });
        }
    }

    /// Contact every suggested candidate with a metadata request
    async fn contact_candidates(self: Arc<Self>) {
        if self.is_complete() {
            return;
        }
        let peers = self.suggested.clone();
        futures::future::join_all(peers.into_iter().map(|peer| {
            let shared = Arc::clone(&self);
            async move {
                shared.add_provider(peer).await;
            }
        }))
        .await;
    }

    async fn add_provider(&self, peer: PeerId) -> bool {
        {
            let providers = self.providers.lock().await;
            if providers.iter().any(|provider| provider.peer() == peer) {
                return false;
            }
        }
        let provider = Arc::new(Provider::new(peer));
        self.request_info(&provider).await;

        let mut providers = self.providers.lock().await;
        if providers.iter().any(|existing| existing.peer() == peer) {
            return false;
        }
        providers.push(provider);
        true
    }

    async fn reset_providers(&self) {
        let drained: Vec<Arc<Provider>> = {
            let mut providers = self.providers.lock().await;
            providers.drain(..).collect()
        };
        for provider in drained {
            provider.lock().await.connection = None;
        }
    }

    /// Connect to a provider (if needed) and send a metadata request
    async fn request_info(&self, provider: &Arc<Provider>) {
        if self.is_complete() {
            return;
        }
        if provider.lock().await.info.is_some() {
            return;
        }

        // one reconnect attempt if the first send fails on a stale connection
        for attempt in 0..2 {
            let existing = { provider.lock().await.connection };
            let connection = match existing {
                Some(connection) => connection,
                None => {
                    let acquired = self
                        .transport
                        .get_connection(&provider.peer(), self.config.connect_timeout)
                        .await;
                    match acquired {
                        Some(connection) => {
                            provider.lock().await.connection = Some(connection);
                            connection
                        }
                        None => {
                            debug!("Could not connect to {}", provider.peer());
                            self.status.lock().await.providers_not_found += 1;
                            return;
                        }
                    }
                }
            };

            self.status.lock().await.record_info_request();
            let request = DataInfoRequest::new(self.dataset_id, self.extra_info.clone());
            if self.transport.send(&connection, request.encode()).await {
                debug!("Requested info from {}", provider.peer());
                let mut state = provider.lock().await;
                state.info_requested = true;
                drop(state);
                self.status.lock().await.providers_found += 1;
                return;
            }

            debug!("Failed to request info from {} (attempt {})", provider.peer(), attempt + 1);
            provider.lock().await.connection = None;
        }
        self.status.lock().await.providers_not_found += 1;
    }

    // ---- metadata handling ------------------------------------------------

    async fn handle_info(&self, inbound: Inbound) {
        let info = match DataInfo::decode(&inbound.message) {
            Ok(info) => info,
            Err(error) => {
                warn!("Dropping malformed DataInfo message: {}", error);
                return;
            }
        };
        if info.dataset_id != self.dataset_id || info.extra_info != self.extra_info {
            return;
        }
        let Some(provider) = self.find_provider(&inbound.connection).await else {
            // info from a connection that is not in our provider list
            return;
        };
        debug!("Received info from {}", provider.peer());
        self.status.lock().await.record_info_reply();

        let mut use_this_provider = true;
        let mut established_empty = false;
        {
            let mut select = self.select.lock().await;
            match &select.transfer {
                TransferState::AwaitingInfo => {
                    let chunk_count = info.chunk_count();
                    debug!(
                        "Established geometry for {}: {} bytes in {} chunks of {}",
                        self.dataset_id, info.length, chunk_count, info.chunk_size
                    );
                    select.transfer = TransferState::Known {
                        info: info.clone(),
                        requested: ChunkMap::new(chunk_count),
                    };
                    // lock order: select before write, only here
                    let mut write = self.write.lock().await;
                    write.tracker = Some(info.without_availability());
                    established_empty = chunk_count == 0;
                }
                TransferState::Known { info: master, .. } => {
                    if master.length != info.length {
                        warn!(
                            "Provider {} disagrees on data length ({} != {})",
                            provider.peer(),
                            info.length,
                            master.length
                        );
                        self.status.lock().await.note_issue("conflicting data length");
                        use_this_provider = false;
                    }
                }
            }
        }

        if established_empty {
            // a zero-length data set has nothing to fetch
            self.complete_download().await;
            return;
        }

        if use_this_provider {
            provider.lock().await.info = Some(info);
            self.next_chunk(&provider).await;
        }
    }

    async fn handle_no_info(&self, inbound: Inbound) {
        let reply = match DataNoInfo::decode(&inbound.message) {
            Ok(reply) => reply,
            Err(error) => {
                warn!("Dropping malformed DataNoInfo message: {}", error);
                return;
            }
        };
        if reply.dataset_id != self.dataset_id {
            return;
        }
        let Some(provider) = self.find_provider(&inbound.connection).await else {
            return;
        };
        debug!("Provider {} has no knowledge of {}", provider.peer(), self.dataset_id);
        {
            let mut status = self.status.lock().await;
            status.providers_not_found += 1;
            status.note_issue("provider had no info");
        }
        let mut state = provider.lock().await;
        state.connection = None;
        state.active = false;
    }

    // ---- chunk scheduling -------------------------------------------------

    /// Pick and request the next chunk for a provider (rarest first, random
    /// tie-break); parks the provider and arms the dead-man timer when it
    /// has nothing left to offer
    async fn next_chunk(&self, provider: &Arc<Provider>) {
        if self.is_complete() {
            return;
        }
        {
            let state = provider.lock().await;
            // a provider owns at most one outstanding request
            if state.current_request.is_some() || state.info.is_none() {
                return;
            }
        }

        let snapshot = self.provider_snapshot().await;
        let picked = {
            let mut select = self.select.lock().await;
            let TransferState::Known { info: master, requested } = &mut select.transfer else {
                return;
            };

            let known_info = { provider.lock().await.info.clone() };
            let Some(provider_info) = known_info else { return };
            let mut known_infos = Vec::with_capacity(snapshot.len());
            for other in &snapshot {
                if let Some(info) = other.lock().await.info.clone() {
                    known_infos.push(info);
                }
            }

            let mut lowest_rarity = usize::MAX;
            let mut candidates: Vec<usize> = Vec::new();
            for index in requested.missing() {
                if !provider_info.has_chunk(index) {
                    continue;
                }
                let rarity =
                    known_infos.iter().filter(|info| info.has_chunk(index)).count();
                if rarity < lowest_rarity {
                    lowest_rarity = rarity;
                    candidates.clear();
                }
                if rarity == lowest_rarity {
                    candidates.push(index);
                }
            }

            if candidates.is_empty() {
                None
            } else {
                // uniform pick decorrelates concurrent schedulers
                let index = candidates[rand::thread_rng().gen_range(0..candidates.len())];
                let request = DataChunkRequest {
                    dataset_id: self.dataset_id,
                    offset: master.chunk_offset(index),
                    length: master.chunk_len(index) as u32,
                    use_encryption: master.use_encryption,
                    use_signing: master.use_signing,
                    extra_info: self.extra_info.clone(),
                    certificate: self.certificate.clone(),
                };
                requested.set(index);
                let mut state = provider.lock().await;
                state.current_request = Some(request.clone());
                state.request_sent_at = Some(Instant::now());
                state.double_requested = false;
                state.active = true;
                Some((index, request))
            }
        };

        let Some((index, request)) = picked else {
            debug!("Provider {} has nothing new to offer", provider.peer());
            provider.lock().await.active = false;
            self.dead_man_armed.store(true, Ordering::SeqCst);
            return;
        };

        debug!(
            "Requesting chunk {} (offset {}) of {} from {}",
            index, request.offset, self.dataset_id, provider.peer()
        );
        self.status.lock().await.record_chunk_request();
        if !self.send_request(provider, &request).await {
            warn!("Failed to send chunk request to {}", provider.peer());
            // roll back so the range can be scheduled elsewhere
            {
                let mut select = self.select.lock().await;
                if let TransferState::Known { requested, .. } = &mut select.transfer {
                    requested.clear(index);
                }
            }
            let mut state = provider.lock().await;
            state.current_request = None;
            state.connection = None;
            state.active = false;
            drop(state);
            self.dead_man_armed.store(true, Ordering::SeqCst);
        }
    }

    /// Send a chunk request, re-acquiring the provider's connection if needed
    async fn send_request(&self, provider: &Arc<Provider>, request: &DataChunkRequest) -> bool {
        let existing = { provider.lock().await.connection };
        let connection = match existing {
            Some(connection) => Some(connection),
            None => {
                let acquired = self
                    .transport
                    .get_connection(&provider.peer(), self.config.connect_timeout)
                    .await;
                if let Some(connection) = acquired {
                    provider.lock().await.connection = Some(connection);
                }
                acquired
            }
        };
        match connection {
            Some(connection) => self.transport.send(&connection, request.encode()).await,
            None => false,
        }
    }

    // ---- chunk ingestion --------------------------------------------------

    async fn handle_chunk(&self, inbound: Inbound) {
        let received_at = Instant::now();
        let chunk = match DataChunk::decode(&inbound.message) {
            Ok(chunk) => chunk,
            Err(error) => {
                warn!("Dropping malformed DataChunk message: {}", error);
                return;
            }
        };
        // the reply must match the dataset and the request fingerprint
        if chunk.dataset_id != self.dataset_id || chunk.extra_info != self.extra_info {
            return;
        }
        if self.is_complete() {
            return;
        }
        let Some(provider) = self.find_provider(&inbound.connection).await else {
            return;
        };
        let chunk_size = {
            let state = provider.lock().await;
            match &state.info {
                Some(info) if info.chunk_size > 0 => info.chunk_size,
                _ => {
                    debug!("Ignoring chunk from {} without valid metadata", provider.peer());
                    return;
                }
            }
        };
        self.status.lock().await.record_chunk_reply();

        let index = (chunk.offset / chunk_size as u64) as usize;
        let payload_len = chunk.payload.data().len() as u64;

        enum Ingest {
            Written { all_downloaded: bool },
            Duplicate,
            BadChecksum,
            OutOfRange,
            SinkFailed,
        }

        let outcome = {
            let mut write = self.write.lock().await;
            let WriteState { sink, tracker: Some(tracker), bytes_received } = &mut *write else {
                return;
            };
            let Some(downloaded) = tracker.available_chunks.as_mut() else {
                return;
            };

            if index >= downloaded.len() || chunk.offset + payload_len > tracker.length {
                Ingest::OutOfRange
            } else if downloaded.get(index) {
                Ingest::Duplicate
            } else if !chunk.payload.valid_checksum() {
                Ingest::BadChecksum
            } else {
                if sink.is_none() {
                    match DataSink::for_length(tracker.length, self.config.memory_sink_threshold) {
                        Ok(created) => *sink = Some(created),
                        Err(error) => {
                            error!("Could not create destination sink: {}", error);
                            return;
                        }
                    }
                }
                match sink.as_mut() {
                    Some(sink) => match sink.write_at(chunk.offset, chunk.payload.data()).await {
                        Ok(()) => {
                            *bytes_received += payload_len;
                            downloaded.set(index);
                            Ingest::Written { all_downloaded: downloaded.all_set() }
                        }
                        Err(error) => {
                            error!("Failed to write chunk at offset {}: {}", chunk.offset, error);
                            Ingest::SinkFailed
                        }
                    },
                    None => Ingest::SinkFailed,
                }
            }
        };

        match outcome {
            Ingest::OutOfRange => {
                debug!("Discarding out-of-range chunk at offset {}", chunk.offset);
                return;
            }
            Ingest::BadChecksum => {
                warn!("Discarding chunk {} from {}: checksum mismatch", index, provider.peer());
                self.status.lock().await.note_issue("chunk checksum mismatch");
                self.reschedule_range(&provider, index, chunk.offset).await;
                return;
            }
            Ingest::SinkFailed => {
                self.reschedule_range(&provider, index, chunk.offset).await;
                return;
            }
            Ingest::Duplicate => {
                debug!("Discarding duplicate chunk {} from {}", index, provider.peer());
                // a duplicate still answers the provider's outstanding request
                self.clear_matching_request(&provider, chunk.offset, Some((payload_len, received_at)))
                    .await;
            }
            Ingest::Written { all_downloaded } => {
                self.clear_matching_request(&provider, chunk.offset, Some((payload_len, received_at)))
                    .await;
                let _ = self.events.send(DownloadEvent::DataReceived {
                    peer: provider.peer(),
                    offset: chunk.offset,
                    length: payload_len as u32,
                });
                if all_downloaded {
                    self.complete_download().await;
                }
            }
        }

        if !self.is_complete() {
            self.next_chunk(&provider).await;
        }
    }

    /// Free a chunk range that failed to land so the normal scheduler can
    /// request it again
    async fn reschedule_range(&self, provider: &Arc<Provider>, index: usize, offset: u64) {
        {
            let mut select = self.select.lock().await;
            if let TransferState::Known { requested, .. } = &mut select.transfer {
                requested.clear(index);
            }
        }
        self.clear_matching_request(provider, offset, None).await;
        if !self.is_complete() {
            self.next_chunk(provider).await;
        }
    }

    /// Clear the provider's in-flight request if this reply answers it,
    /// optionally crediting its speed statistics
    async fn clear_matching_request(
        &self,
        provider: &Arc<Provider>,
        offset: u64,
        delivery: Option<(u64, Instant)>,
    ) {
        let mut state = provider.lock().await;
        let matches = state
            .current_request
            .as_ref()
            .map(|request| request.offset == offset)
            .unwrap_or(false);
        if matches {
            if let Some((bytes, received_at)) = delivery {
                state.record_delivery(bytes, received_at);
            }
            state.current_request = None;
        }
    }

    // ---- completion -------------------------------------------------------

    async fn complete_download(&self) {
        {
            let mut latch = self.completion_latch.lock().await;
            if *latch {
                return;
            }
            *latch = true;
        }

        {
            let mut write = self.write.lock().await;
            let tracker_length = if let Some(tracker) = &mut write.tracker {
                tracker.all_available = true;
                Some(tracker.length)
            } else {
                None
            };
            if let Some(length) = tracker_length {
                if write.sink.is_none() {
                    // zero-length data set: materialise an empty payload
                    match DataSink::for_length(length, self.config.memory_sink_threshold) {
                        Ok(sink) => write.sink = Some(sink),
                        Err(error) => error!("Could not create destination sink: {}", error),
                    }
                }
            }
        }
        self.status.lock().await.finish(true);
        info!("Download of {} complete", self.dataset_id);

        let _ = self.events.send(DownloadEvent::Completed { dataset_id: self.dataset_id });
        let _ = self.complete_tx.send(true);

        if !self.config.hold_time.is_zero() {
            for provider in self.provider_snapshot().await {
                if let Some(connection) = provider.lock().await.connection {
                    self.transport.hold_connection(&connection, self.config.hold_time);
                }
            }
        }
        self.stop_engine().await;
    }

    async fn stop_engine(&self) {
        {
            let mut run = self.run.lock().await;
            if !run.started {
                return;
            }
            run.started = false;
            for task in run.tasks.drain(..) {
                task.abort();
            }
        }
        self.transport.unregister_handler(DataInfo::TAG);
        self.transport.unregister_handler(DataNoInfo::TAG);
        self.transport.unregister_handler(DataChunk::TAG);
        self.reset_providers().await;
        debug!("Stopped download engine for {}", self.dataset_id);
    }

    async fn log_status(&self) {
        let status = self.status.lock().await.clone();
        if !status.completed {
            error!("Download of {} failed: {}", self.dataset_id, status);
        } else if status.total_time() > crate::constants::downloader::SLOW_DOWNLOAD_WARNING {
            warn!("Download of {} was slow: {}", self.dataset_id, status);
        }
    }

    // ---- dead-man redundancy ----------------------------------------------

    async fn dead_man_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.dead_man_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // the first tick completes immediately
        loop {
            ticker.tick().await;
            if self.is_complete() {
                self.dead_man_armed.store(false, Ordering::SeqCst);
                return;
            }
            if self.dead_man_armed.load(Ordering::SeqCst) {
                self.dead_man_pass().await;
            }
        }
    }

    /// Try to press every parked provider back into service by hedging the
    /// slowest in-flight request through it; disarms the timer once no
    /// parked provider remains
    async fn dead_man_pass(&self) {
        let providers = self.provider_snapshot().await;
        let mut still_parked = false;
        for provider in &providers {
            let eligible = {
                let state = provider.lock().await;
                !state.active && state.info.is_some() && state.request_sent_at.is_some()
            };
            if !eligible {
                continue;
            }
            if !self.hedge_through(provider, &providers).await {
                still_parked = true;
            }
        }
        if !still_parked {
            self.dead_man_armed.store(false, Ordering::SeqCst);
        }
    }

    /// Re-issue the slowest outstanding request through an idle provider
    ///
    /// Returns true if the idle provider was put back into play.
    async fn hedge_through(
        &self,
        provider: &Arc<Provider>,
        providers: &[Arc<Provider>],
    ) -> bool {
        let threshold = {
            let state = provider.lock().await;
            state.slow_threshold(self.config.default_chunk_time, SLOW_REQUEST_MULTIPLIER)
        };

        // find the slowest active, not-yet-hedged request
        let mut slowest: Option<(Arc<Provider>, DataChunkRequest, Duration)> = None;
        for other in providers {
            let state = other.lock().await;
            if !state.active || state.double_requested {
                continue;
            }
            if let (Some(request), Some(sent_at)) = (&state.current_request, state.request_sent_at)
            {
                let elapsed = sent_at.elapsed();
                if slowest.as_ref().map(|(_, _, d)| elapsed > *d).unwrap_or(true) {
                    slowest = Some((Arc::clone(other), request.clone(), elapsed));
                }
            }
        }

        let Some((slow_provider, slow_request, elapsed)) = slowest else {
            return false;
        };
        if elapsed <= threshold {
            return false;
        }

        info!(
            "Hedging chunk at offset {} ({}ms outstanding at {}) through {}",
            slow_request.offset,
            elapsed.as_millis(),
            slow_provider.peer(),
            provider.peer()
        );
        let request = DataChunkRequest {
            dataset_id: self.dataset_id,
            offset: slow_request.offset,
            length: slow_request.length,
            use_encryption: slow_request.use_encryption,
            use_signing: slow_request.use_signing,
            extra_info: slow_request.extra_info.clone(),
            certificate: self.certificate.clone(),
        };
        {
            let mut state = provider.lock().await;
            state.active = true;
            state.current_request = Some(request.clone());
            state.request_sent_at = Some(Instant::now());
        }
        self.status.lock().await.record_chunk_request();
        if !self.send_request(provider, &request).await {
            let mut state = provider.lock().await;
            state.active = false;
            state.current_request = None;
            state.connection = None;
            return false;
        }
        // one hedge per request: never duplicate the same range twice
        slow_provider.lock().await.double_requested = true;
        true
    }
}
