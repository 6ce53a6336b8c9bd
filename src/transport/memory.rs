//! In-process transport for tests and simulation
//!
//! [`MemoryHub`] is a message switch connecting any number of in-process
//! nodes. Each node attaches to the hub and gets a [`MemoryTransport`], a
//! full [`Transport`] implementation that routes messages to the handler
//! channels other nodes registered. [`SeedPeer`] is a scripted provider that
//! serves a byte store over the hub, with knobs for partial availability,
//! response delay, stalling, and bad metadata — enough to exercise every
//! scheduling path in the engine without a real network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Connection, HandlerSender, Inbound, PeerId, Transport};
use crate::protocol::chunk::{DataChunk, DataChunkRequest};
use crate::protocol::chunk_map::ChunkMap;
use crate::protocol::dataset::DatasetId;
use crate::protocol::info::{DataInfo, DataInfoRequest, DataNoInfo};
use crate::protocol::wire::{MessageTag, WireMessage};

#[derive(Default)]
struct Node {
    handlers: HashMap<MessageTag, HandlerSender>,
}

#[derive(Default)]
struct HubInner {
    nodes: Mutex<HashMap<PeerId, Node>>,
    next_connection_id: AtomicU64,
}

impl HubInner {
    fn fresh_connection(&self, peer: PeerId) -> Connection {
        Connection::new(self.next_connection_id.fetch_add(1, Ordering::Relaxed), peer)
    }
}

/// An in-process message switch; clones share the same switch
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    /// Create an empty hub
    pub fn new() -> Self {
        MemoryHub::default()
    }

    /// Attach a node and get its transport
    pub fn attach(&self, peer: PeerId) -> MemoryTransport {
        self.inner.nodes.lock().unwrap().entry(peer).or_default();
        MemoryTransport { hub: Arc::clone(&self.inner), local: peer }
    }

    /// Take a node offline; its handlers are dropped
    pub fn detach(&self, peer: &PeerId) {
        self.inner.nodes.lock().unwrap().remove(peer);
    }
}

/// One node's view of a [`MemoryHub`]
#[derive(Clone)]
pub struct MemoryTransport {
    hub: Arc<HubInner>,
    local: PeerId,
}

impl MemoryTransport {
    /// The identity this transport sends as
    pub fn local_peer(&self) -> PeerId {
        self.local
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn get_connection(&self, peer: &PeerId, _timeout: Duration) -> Option<Connection> {
        let nodes = self.hub.nodes.lock().unwrap();
        nodes.contains_key(peer).then(|| self.hub.fresh_connection(*peer))
    }

    async fn send(&self, connection: &Connection, message: WireMessage) -> bool {
        let Some(tag) = message.tag() else {
            return false;
        };
        let handler = {
            let nodes = self.hub.nodes.lock().unwrap();
            nodes
                .get(&connection.peer())
                .and_then(|node| node.handlers.get(&tag))
                .cloned()
        };
        let Some(handler) = handler else {
            debug!("No handler for {} at {}", tag, connection.peer());
            return false;
        };
        // The receiver sees a connection handle that identifies the sender
        let reply_path = self.hub.fresh_connection(self.local);
        handler.send(Inbound { connection: reply_path, message }).is_ok()
    }

    fn register_handler(&self, tag: MessageTag, handler: HandlerSender) {
        let mut nodes = self.hub.nodes.lock().unwrap();
        nodes.entry(self.local).or_default().handlers.insert(tag, handler);
    }

    fn unregister_handler(&self, tag: MessageTag) {
        let mut nodes = self.hub.nodes.lock().unwrap();
        if let Some(node) = nodes.get_mut(&self.local) {
            node.handlers.remove(&tag);
        }
    }
}

/// Behaviour knobs for a [`SeedPeer`]
#[derive(Debug, Clone)]
pub struct SeedConfig {
    /// Chunk size advertised in the seed's metadata
    pub chunk_size: u32,
    /// Chunk indices the seed claims to hold; `None` advertises everything
    pub available: Option<Vec<usize>>,
    /// Delay before answering each request
    pub response_delay: Duration,
    /// When false the seed accepts chunk requests but never answers them
    pub serve_chunks: bool,
    /// Advertise this total length instead of the real one
    pub advertised_length: Option<u64>,
    /// Answer metadata requests with [`DataNoInfo`]
    pub reply_no_info: bool,
}

impl Default for SeedConfig {
    fn default() -> Self {
        SeedConfig {
            chunk_size: 16 * 1024,
            available: None,
            response_delay: Duration::ZERO,
            serve_chunks: true,
            advertised_length: None,
            reply_no_info: false,
        }
    }
}

/// A scripted provider serving one data set over a [`MemoryHub`]
pub struct SeedPeer {
    peer: PeerId,
    handle: JoinHandle<()>,
}

impl SeedPeer {
    /// Spawn a seed task serving `data` on the hub
    pub fn spawn(
        hub: &MemoryHub,
        dataset_id: DatasetId,
        data: Vec<u8>,
        extra_info: WireMessage,
        config: SeedConfig,
    ) -> SeedPeer {
        let peer = PeerId::random();
        let transport = hub.attach(peer);

        let (info_tx, mut info_rx) = mpsc::unbounded_channel();
        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
        transport.register_handler(DataInfoRequest::TAG, info_tx);
        transport.register_handler(DataChunkRequest::TAG, chunk_tx);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    inbound = info_rx.recv() => match inbound {
                        Some(inbound) => {
                            answer_info_request(&transport, &dataset_id, &data, &extra_info, &config, inbound).await;
                        }
                        None => break,
                    },
                    inbound = chunk_rx.recv() => match inbound {
                        Some(inbound) => {
                            answer_chunk_request(&transport, &dataset_id, &data, &extra_info, &config, inbound).await;
                        }
                        None => break,
                    },
                }
            }
        });

        SeedPeer { peer, handle }
    }

    /// The seed's peer identity (hand this to the downloader as a candidate)
    pub fn peer(&self) -> PeerId {
        self.peer
    }
}

impl Drop for SeedPeer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn seed_info(
    dataset_id: &DatasetId,
    data: &[u8],
    extra_info: &WireMessage,
    config: &SeedConfig,
) -> DataInfo {
    let length = config.advertised_length.unwrap_or(data.len() as u64);
    let mut info = match &config.available {
        None => DataInfo::complete(*dataset_id, length, config.chunk_size),
        Some(indices) => {
            let count = if config.chunk_size == 0 {
                0
            } else {
                length.div_ceil(config.chunk_size as u64) as usize
            };
            let mut map = ChunkMap::new(count);
            for &index in indices {
                map.set(index);
            }
            DataInfo::partial(*dataset_id, length, config.chunk_size, map)
        }
    };
    info.extra_info = extra_info.clone();
    info
}

async fn answer_info_request(
    transport: &MemoryTransport,
    dataset_id: &DatasetId,
    data: &[u8],
    extra_info: &WireMessage,
    config: &SeedConfig,
    inbound: Inbound,
) {
    let Ok(request) = DataInfoRequest::decode(&inbound.message) else {
        return;
    };
    if request.dataset_id != *dataset_id {
        return;
    }

    if !config.response_delay.is_zero() {
        tokio::time::sleep(config.response_delay).await;
    }

    let requester = inbound.connection.peer();
    let Some(connection) = transport.get_connection(&requester, Duration::ZERO).await else {
        return;
    };

    let reply = if config.reply_no_info {
        DataNoInfo::new(*dataset_id, request.extra_info).encode()
    } else {
        seed_info(dataset_id, data, extra_info, config).encode()
    };
    transport.send(&connection, reply).await;
}

async fn answer_chunk_request(
    transport: &MemoryTransport,
    dataset_id: &DatasetId,
    data: &[u8],
    extra_info: &WireMessage,
    config: &SeedConfig,
    inbound: Inbound,
) {
    if !config.serve_chunks {
        return;
    }
    let Ok(request) = DataChunkRequest::decode(&inbound.message) else {
        return;
    };
    if request.dataset_id != *dataset_id {
        return;
    }

    if !config.response_delay.is_zero() {
        tokio::time::sleep(config.response_delay).await;
    }

    let start = (request.offset as usize).min(data.len());
    let end = (start + request.length as usize).min(data.len());
    let chunk = DataChunk::new(*dataset_id, request.offset, data[start..end].to_vec(), extra_info.clone());

    let requester = inbound.connection.peer();
    if let Some(connection) = transport.get_connection(&requester, Duration::ZERO).await {
        transport.send(&connection, chunk.encode()).await;
    }
}
