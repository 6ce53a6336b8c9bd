//! The download engine layer
//!
//! [`DataDownloader`] coordinates one download across many providers:
//! rarest-first chunk selection with a uniform random tie-break, at most one
//! outstanding request per provider, global request deduplication, hedged
//! re-requests for stalled peers, and exactly-once completion. The
//! supporting modules hold the per-provider state ([`provider`]), the
//! destination sink ([`sink`]), telemetry ([`status`]), the event fan-out
//! ([`events`]) and configuration ([`config`]).

pub mod config;
pub mod engine;
pub mod events;
pub mod provider;
pub mod sink;
pub mod status;

pub use config::DownloaderConfig;
pub use engine::DataDownloader;
pub use events::{DownloadEvent, EventReceiver};
pub use provider::ProviderPhase;
pub use sink::DataSink;
pub use status::DownloadStatus;
