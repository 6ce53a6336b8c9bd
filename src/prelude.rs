//! Prelude module for swarm_fetcher
//!
//! Re-exports the items needed for typical usage so one
//! `use swarm_fetcher::prelude::*;` sets up an integration.
//!
//! # Usage
//!
//! ```rust,no_run
//! use swarm_fetcher::prelude::*;
//!
//! # async fn example(transport: Arc<dyn Transport>, peers: Vec<PeerId>) {
//! let downloader = DataDownloader::new(
//!     DatasetId::random(),
//!     transport,
//!     peers,
//!     DownloaderConfig::default(),
//! );
//! let complete = downloader.download(10).await;
//! # let _ = complete;
//! # }
//! ```

// Core result types
pub use crate::errors::{AppError, DownloadError, ProtocolError, Result};

// The engine and its companions
pub use crate::downloader::{
    DataDownloader, DownloadEvent, DownloadStatus, DownloaderConfig, EventReceiver,
};

// Wire protocol types
pub use crate::protocol::{
    Certificate, ChunkMap, DataChunk, DataChunkRequest, DataInfo, DataInfoRequest, DataNoInfo,
    DataPackage, DatasetId, MessageTag, WireMessage,
};

// Transport contract
pub use crate::transport::{Connection, Inbound, PeerId, Transport};

// Commonly used constants
pub use crate::constants::{DEFAULT_IDLE_TIMEOUT_SECS, MEMORY_SINK_THRESHOLD};

// Standard library re-exports that are commonly needed
pub use std::sync::Arc;
pub use std::time::Duration;
