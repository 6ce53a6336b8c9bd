//! Download event fan-out
//!
//! The engine publishes events on a broadcast channel so any number of
//! independent observers (status displays, idle-timeout watchdogs) see every
//! occurrence. Subscribers that fall behind lose the oldest events, which is
//! acceptable for notifications that only say "something happened".

use tokio::sync::broadcast;

use crate::protocol::dataset::DatasetId;
use crate::transport::PeerId;

/// Something observable happened during a download
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// A new (non-duplicate) chunk was written into the destination
    DataReceived {
        /// Peer that delivered the chunk
        peer: PeerId,
        /// Byte offset of the chunk
        offset: u64,
        /// Byte length of the chunk
        length: u32,
    },
    /// Every chunk has been written; fires exactly once per download
    Completed {
        /// The finished data set
        dataset_id: DatasetId,
    },
}

/// Receiving end of the engine's event stream
pub type EventReceiver = broadcast::Receiver<DownloadEvent>;

pub(crate) type EventSender = broadcast::Sender<DownloadEvent>;

pub(crate) fn channel(capacity: usize) -> EventSender {
    broadcast::channel(capacity).0
}
