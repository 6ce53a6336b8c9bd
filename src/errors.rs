//! Error types for swarm_fetcher
//!
//! This module defines the error types for all components of the crate.
//! Wire-level failures are kept separate from engine-level failures so that
//! callers can distinguish a malformed peer message from a download that
//! simply did not finish.

use std::path::PathBuf;
use thiserror::Error;

/// Wire protocol decode/encode errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Message tag did not match the expected schema
    #[error("Schema mismatch: expected message tag '{expected}', found '{found}'")]
    SchemaMismatch { expected: String, found: String },

    /// Bytes remained after all schema fields were consumed
    #[error("Trailing data: {remaining} unexpected bytes after a complete {schema} message")]
    TrailingData { schema: &'static str, remaining: usize },

    /// Reader ran off the end of the message
    #[error("Truncated message: needed {needed} more bytes but only {remaining} remain")]
    Truncated { needed: usize, remaining: usize },

    /// Message shorter than the 4-byte tag
    #[error("Message too short to carry a tag ({length} bytes)")]
    MissingTag { length: usize },

    /// Payload failed to inflate
    #[error("Failed to decompress payload")]
    Decompress(#[source] std::io::Error),

    /// Inflated payload length disagrees with the recorded raw length
    #[error("Decompressed length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// A length or count field was negative
    #[error("Invalid {field} field: {value}")]
    InvalidField { field: &'static str, value: i64 },
}

/// Download engine errors
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Target file already exists and holds data
    #[error("Unable to copy to {path}: file already exists")]
    TargetExists { path: PathBuf },

    /// No new data arrived within the idle window
    #[error("Download timed out after {seconds} seconds without progress")]
    Timeout { seconds: u64 },

    /// The destination sink has not been created yet (no chunk ever arrived)
    #[error("No data has been downloaded")]
    NoData,

    /// The download finished short of the advertised length
    #[error("Incomplete download: received {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },

    /// I/O error on the destination sink or the final copy
    #[error("File I/O error")]
    Io(#[from] std::io::Error),

    /// Wire-level failure bubbled out of a handler
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Transport collaborator errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// No route to the requested peer
    #[error("Peer {peer} is not reachable")]
    PeerUnreachable { peer: String },

    /// The peer's inbound channel is gone
    #[error("Connection to {peer} is closed")]
    ConnectionClosed { peer: String },
}

/// Top-level error that can represent any failure in the crate
#[derive(Error, Debug)]
pub enum AppError {
    /// Wire protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Download engine error
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Get error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Protocol(_) => "protocol",
            AppError::Download(_) => "download",
            AppError::Transport(_) => "transport",
            AppError::Io(_) => "io",
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::Download(DownloadError::Timeout { .. })
                | AppError::Transport(TransportError::PeerUnreachable { .. })
                | AppError::Transport(TransportError::ConnectionClosed { .. })
        )
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Protocol result type alias
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Download result type alias
pub type DownloadResult<T> = std::result::Result<T, DownloadError>;
