//! swarm_fetcher
//!
//! A swarm-style downloader for named, fixed-size byte data sets. A
//! requester contacts several candidate providers, learns what each one has,
//! and pulls missing chunks opportunistically — rarest chunks first, at most
//! one outstanding request per provider, with hedged re-requests to route
//! around slow peers and idempotent assembly of the final byte stream.
//!
//! The crate has three layers:
//!
//! - [`protocol`] — the wire format: dataset identity, the
//!   checksummed/compressed payload codec, and the five message schemas;
//! - [`transport`] — the contract the engine consumes from the peer
//!   transport, plus an in-process implementation for tests and simulation;
//! - [`downloader`] — the engine that drives one download across a swarm.

pub mod constants;
pub mod downloader;
pub mod errors;
pub mod prelude;
pub mod protocol;
pub mod transport;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
