//! Transport collaborator contract
//!
//! The downloader does not own any sockets. It talks to peers through a
//! [`Transport`] implementation that resolves peers to connections, sends
//! tagged wire messages, and feeds inbound messages to registered handler
//! channels. Connections are owned by the transport; the engine only holds
//! references and never closes a connection it did not open.
//!
//! [`memory`] provides an in-process implementation used by the integration
//! tests and the simulation binary.

pub mod memory;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use tokio::sync::mpsc;

use crate::protocol::wire::{MessageTag, WireMessage};

/// Value-equal identity of a peer on the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 16]);

impl PeerId {
    /// Generate a fresh random peer identity
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        PeerId(bytes)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        PeerId(bytes)
    }

    /// The raw byte representation
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix keeps log lines readable
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// A live connection to a peer, owned by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    id: u64,
    peer: PeerId,
}

impl Connection {
    /// Create a connection handle
    pub fn new(id: u64, peer: PeerId) -> Self {
        Connection { id, peer }
    }

    /// Transport-assigned connection identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The remote peer this connection reaches
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// True if both handles reach the same endpoint: the same connection, or
    /// any connection to the same remote peer
    pub fn is_same_endpoint(&self, other: &Connection) -> bool {
        self.id == other.id || self.peer == other.peer
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.peer, self.id)
    }
}

/// An inbound message together with the connection it arrived on
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Connection identifying the sending peer
    pub connection: Connection,
    /// The raw tagged message
    pub message: WireMessage,
}

/// Channel end that receives inbound messages for one registered tag
pub type HandlerSender = mpsc::UnboundedSender<Inbound>;

/// The peer transport consumed by the downloader
///
/// Implementations route each inbound message to the handler registered for
/// its tag. Registering a tag that already has a handler replaces the old
/// handler.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolve a connection to `peer`, waiting up to `timeout`
    ///
    /// Returns `None` if the peer cannot be reached in time.
    async fn get_connection(&self, peer: &PeerId, timeout: Duration) -> Option<Connection>;

    /// Send a message over a connection; returns false if the send failed
    async fn send(&self, connection: &Connection, message: WireMessage) -> bool;

    /// Route inbound messages tagged `tag` to `handler`
    fn register_handler(&self, tag: MessageTag, handler: HandlerSender);

    /// Stop routing messages tagged `tag`
    fn unregister_handler(&self, tag: MessageTag);

    /// Ask the transport to keep a connection open for a while after the
    /// caller is done with it; implementations may ignore this
    fn hold_connection(&self, connection: &Connection, hold: Duration) {
        let _ = (connection, hold);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_ids_are_distinct() {
        assert_ne!(PeerId::random(), PeerId::random());
    }

    #[test]
    fn test_connection_endpoint_identity() {
        let peer_a = PeerId::random();
        let peer_b = PeerId::random();

        let first = Connection::new(1, peer_a);
        let second = Connection::new(2, peer_a);
        let third = Connection::new(1, peer_b);
        let fourth = Connection::new(4, peer_b);

        // same connection id
        assert!(first.is_same_endpoint(&third));
        // same remote peer, different connections
        assert!(first.is_same_endpoint(&second));
        // different peer and id
        assert!(!second.is_same_endpoint(&fourth));
    }

    #[test]
    fn test_display_forms() {
        let peer = PeerId::from_bytes([0xAB; 16]);
        assert_eq!(peer.to_string(), "abababab");
        assert_eq!(Connection::new(7, peer).to_string(), "abababab#7");
    }
}
