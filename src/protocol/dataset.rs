//! Opaque dataset identifier
//!
//! A data set is named by a 128-bit globally unique identifier. The type
//! stores the identifier as a raw 16-byte array, compares by value, and
//! serializes transparently as a lowercase hex string.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::constants::wire::DATASET_ID_LEN;
use crate::errors::{ProtocolError, ProtocolResult};
use crate::protocol::wire::{WireMessage, WireReader};

/// Globally unique identity of a data set
///
/// Immutable once created: the only constructors are a fresh random
/// identifier, a copy, or a decode from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatasetId([u8; DATASET_ID_LEN]);

impl DatasetId {
    /// Generate a fresh random identifier
    pub fn random() -> Self {
        let mut bytes = [0u8; DATASET_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        DatasetId(bytes)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; DATASET_ID_LEN]) -> Self {
        DatasetId(bytes)
    }

    /// The raw byte representation
    pub fn as_bytes(&self) -> &[u8; DATASET_ID_LEN] {
        &self.0
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        use std::fmt::Write;
        self.0.iter().fold(String::with_capacity(32), |mut acc, b| {
            write!(&mut acc, "{:02x}", b).unwrap();
            acc
        })
    }

    /// Parse from a 32-character hex string
    pub fn from_hex(hex: &str) -> ProtocolResult<Self> {
        if hex.len() != DATASET_ID_LEN * 2 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ProtocolError::InvalidField {
                field: "dataset id",
                value: hex.len() as i64,
            });
        }

        let mut bytes = [0u8; DATASET_ID_LEN];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).unwrap(); // Safe: validated above
            bytes[i] = u8::from_str_radix(pair, 16).unwrap(); // Safe: validated above
        }
        Ok(DatasetId(bytes))
    }

    /// Append the identifier to a wire message (16 raw bytes)
    pub fn encode_to(&self, message: &mut WireMessage) {
        message.append_bytes(&self.0);
    }

    /// Read an identifier from a wire cursor
    pub fn decode_from(reader: &mut WireReader<'_>) -> ProtocolResult<Self> {
        let bytes = reader.read_bytes(DATASET_ID_LEN)?;
        let mut id = [0u8; DATASET_ID_LEN];
        id.copy_from_slice(&bytes);
        Ok(DatasetId(id))
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for DatasetId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for DatasetId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DatasetId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire::MessageTag;

    #[test]
    fn test_random_ids_are_distinct() {
        let a = DatasetId::random();
        let b = DatasetId::random();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_round_trip() {
        let id = DatasetId::from_bytes([
            0x50, 0xc9, 0xd1, 0xc4, 0x65, 0xf3, 0xcb, 0xff, 0x65, 0x2b, 0xe1, 0x50, 0x9c, 0x2e,
            0x2a, 0x4e,
        ]);
        assert_eq!(id.to_hex(), "50c9d1c465f3cbff652be1509c2e2a4e");
        assert_eq!(DatasetId::from_hex(&id.to_hex()).unwrap(), id);
    }

    #[test]
    fn test_invalid_hex_rejected() {
        assert!(DatasetId::from_hex("").is_err());
        assert!(DatasetId::from_hex("50c9").is_err());
        assert!(DatasetId::from_hex("zz c9d1c465f3cbff652be1509c2e2a4e").is_err());
    }

    #[test]
    fn test_wire_round_trip() {
        let id = DatasetId::random();

        let mut message = WireMessage::tagged(MessageTag::new(b"Test"));
        id.encode_to(&mut message);
        assert_eq!(message.len(), 4 + 16);

        let mut reader = message.reader().unwrap();
        let decoded = DatasetId::decode_from(&mut reader).unwrap();
        assert_eq!(decoded, id);
        assert!(reader.at_end());
    }

    #[test]
    fn test_value_equality() {
        let bytes = [7u8; 16];
        assert_eq!(DatasetId::from_bytes(bytes), DatasetId::from_bytes(bytes));
    }
}
