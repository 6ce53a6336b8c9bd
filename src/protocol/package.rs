//! Checksummed, gain-gated-compressed byte payload codec
//!
//! A [`DataPackage`] wraps an arbitrary byte buffer for transmission. It can
//! carry an MD5 checksum of the payload (captured when the payload is
//! assigned, not when it is encoded) and can gzip the payload on encode. The
//! compressed form is only emitted when it is strictly smaller than the raw
//! bytes; otherwise the wire carries the raw payload with the compression
//! flag cleared, so incompressible data never grows in transit.
//!
//! Wire shape:
//!
//! ```text
//! bool has_checksum · [i32 checksum_len · checksum] ·
//! bool is_compressed · i32 raw_len ·
//! [i32 compressed_len · compressed bytes] | [raw bytes]
//! ```

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::errors::{ProtocolError, ProtocolResult};
use crate::protocol::wire::{WireMessage, WireReader};

/// A byte payload with optional checksum and compression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPackage {
    data: Vec<u8>,
    use_checksum: bool,
    use_compression: bool,
    checksum: Option<Vec<u8>>,
}

impl DataPackage {
    /// Wrap a payload, capturing its checksum now if checksumming is enabled
    pub fn new(data: Vec<u8>, use_compression: bool, use_checksum: bool) -> Self {
        let checksum = use_checksum.then(|| md5::compute(&data).0.to_vec());
        DataPackage { data, use_checksum, use_compression, checksum }
    }

    /// The payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the package into its payload
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// True if a checksum rides the wire with this payload
    pub fn uses_checksum(&self) -> bool {
        self.use_checksum
    }

    /// True if the payload is (or is asked to be) compressed on the wire
    pub fn uses_compression(&self) -> bool {
        self.use_compression
    }

    /// Replace the payload, re-capturing the checksum
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.checksum = self.use_checksum.then(|| md5::compute(&data).0.to_vec());
        self.data = data;
    }

    /// Recompute the checksum over the current payload and compare with the
    /// captured one
    ///
    /// Trivially true when checksumming is off or no checksum was captured.
    pub fn valid_checksum(&self) -> bool {
        match &self.checksum {
            Some(stored) if self.use_checksum => md5::compute(&self.data).0[..] == stored[..],
            _ => true,
        }
    }

    /// Append the package to a wire message
    pub fn encode_to(&self, message: &mut WireMessage) {
        message.append_bool(self.use_checksum);
        if let Some(checksum) = &self.checksum {
            message.append_counted_bytes(checksum);
        }

        let compressed = if self.use_compression { compress(&self.data) } else { None };
        match compressed {
            // Gain gate: only ship the compressed form when it actually shrank
            Some(compressed) if compressed.len() < self.data.len() => {
                message.append_bool(true);
                message.append_i32(self.data.len() as i32);
                message.append_counted_bytes(&compressed);
            }
            _ => {
                message.append_bool(false);
                message.append_counted_bytes(&self.data);
            }
        }
    }

    /// Read a package from a wire cursor
    pub fn decode_from(reader: &mut WireReader<'_>) -> ProtocolResult<Self> {
        let use_checksum = reader.read_bool()?;
        let checksum = if use_checksum {
            Some(reader.read_counted_bytes("checksum length")?)
        } else {
            None
        };

        let is_compressed = reader.read_bool()?;
        let raw_len = reader.read_len("raw payload length")?;
        let data = if is_compressed {
            let compressed = reader.read_counted_bytes("compressed payload length")?;
            let inflated = decompress(&compressed)?;
            if inflated.len() != raw_len {
                return Err(ProtocolError::LengthMismatch {
                    expected: raw_len,
                    actual: inflated.len(),
                });
            }
            inflated
        } else {
            reader.read_bytes(raw_len)?
        };

        Ok(DataPackage { data, use_checksum, use_compression: is_compressed, checksum })
    }
}

fn compress(data: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).ok()?;
    encoder.finish().ok()
}

fn decompress(compressed: &[u8]) -> ProtocolResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(compressed);
    let mut inflated = Vec::new();
    decoder
        .read_to_end(&mut inflated)
        .map_err(ProtocolError::Decompress)?;
    Ok(inflated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire::MessageTag;
    use rand::RngCore;

    const TEST_TAG: MessageTag = MessageTag::new(b"Test");

    fn round_trip(package: &DataPackage) -> DataPackage {
        let mut message = WireMessage::tagged(TEST_TAG);
        package.encode_to(&mut message);
        let mut reader = message.reader().unwrap();
        let decoded = DataPackage::decode_from(&mut reader).unwrap();
        assert!(reader.at_end());
        decoded
    }

    #[test]
    fn test_round_trip_all_flag_combinations() {
        let payload = b"The quick brown fox jumps over the lazy dog. ".repeat(40);
        for compress in [false, true] {
            for checksum in [false, true] {
                let package = DataPackage::new(payload.clone(), compress, checksum);
                let decoded = round_trip(&package);
                assert_eq!(decoded.data(), &payload[..], "compress={compress} checksum={checksum}");
                assert!(decoded.valid_checksum());
            }
        }
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let package = DataPackage::new(Vec::new(), true, true);
        let decoded = round_trip(&package);
        assert!(decoded.data().is_empty());
        assert!(decoded.valid_checksum());
    }

    #[test]
    fn test_compressible_payload_shrinks() {
        let payload = vec![0u8; 10_000];
        let compressed = DataPackage::new(payload.clone(), true, false);
        let plain = DataPackage::new(payload, false, false);

        let mut compressed_wire = WireMessage::tagged(TEST_TAG);
        compressed.encode_to(&mut compressed_wire);
        let mut plain_wire = WireMessage::tagged(TEST_TAG);
        plain.encode_to(&mut plain_wire);

        assert!(compressed_wire.len() < plain_wire.len());

        let decoded = round_trip(&compressed);
        assert!(decoded.uses_compression());
        assert_eq!(decoded.data().len(), 10_000);
    }

    #[test]
    fn test_incompressible_payload_falls_back_to_raw() {
        let mut payload = vec![0u8; 4096];
        rand::thread_rng().fill_bytes(&mut payload);

        let package = DataPackage::new(payload.clone(), true, false);
        let mut message = WireMessage::tagged(TEST_TAG);
        package.encode_to(&mut message);

        // bool flag + bool flag + i32 len + payload: no compression overhead
        assert_eq!(message.len(), 4 + 1 + 1 + 4 + payload.len());

        let mut reader = message.reader().unwrap();
        let decoded = DataPackage::decode_from(&mut reader).unwrap();
        assert!(!decoded.uses_compression());
        assert_eq!(decoded.data(), &payload[..]);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let payload = b"chunk payload bytes".to_vec();
        let package = DataPackage::new(payload, false, true);

        let mut message = WireMessage::tagged(TEST_TAG);
        package.encode_to(&mut message);

        // Flip the final payload byte on the wire
        let mut bytes = message.as_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let corrupted = WireMessage::from_bytes(&bytes[..]);

        let mut reader = corrupted.reader().unwrap();
        let decoded = DataPackage::decode_from(&mut reader).unwrap();
        assert!(!decoded.valid_checksum());
    }

    #[test]
    fn test_set_data_recaptures_checksum() {
        let mut package = DataPackage::new(b"first".to_vec(), false, true);
        package.set_data(b"second".to_vec());
        assert!(package.valid_checksum());
        assert_eq!(round_trip(&package).data(), b"second");
    }

    #[test]
    fn test_garbage_compressed_payload_is_an_error() {
        let mut message = WireMessage::tagged(TEST_TAG);
        message.append_bool(false); // no checksum
        message.append_bool(true); // claims compression
        message.append_i32(100); // raw length
        message.append_counted_bytes(b"this is not a gzip stream");

        let mut reader = message.reader().unwrap();
        let err = DataPackage::decode_from(&mut reader).unwrap_err();
        assert!(matches!(err, ProtocolError::Decompress(_)));
    }

    #[test]
    fn test_raw_length_mismatch_is_an_error() {
        let inner = DataPackage::new(vec![0u8; 1000], true, false);
        let mut message = WireMessage::tagged(TEST_TAG);
        inner.encode_to(&mut message);

        // Tamper with the recorded raw length (bytes 6..10: after the two
        // flag bytes that follow the tag)
        let mut bytes = message.as_bytes().to_vec();
        bytes[6..10].copy_from_slice(&999i32.to_le_bytes());
        let tampered = WireMessage::from_bytes(&bytes[..]);

        let mut reader = tampered.reader().unwrap();
        let err = DataPackage::decode_from(&mut reader).unwrap_err();
        assert!(matches!(err, ProtocolError::LengthMismatch { expected: 999, actual: 1000 }));
    }
}
