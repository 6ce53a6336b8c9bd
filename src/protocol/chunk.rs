//! Chunk transfer schemas
//!
//! [`DataChunkRequest`] asks one provider for one byte range of a data set;
//! [`DataChunk`] carries the bytes back, wrapped in a [`DataPackage`] so the
//! payload can ride the wire compressed and checksummed.

use crate::errors::{ProtocolError, ProtocolResult};
use crate::protocol::dataset::DatasetId;
use crate::protocol::info::schema_mismatch;
use crate::protocol::package::DataPackage;
use crate::protocol::wire::{MessageTag, WireMessage, WireReader};

/// Opaque authorization blob attached to chunk requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate(Vec<u8>);

impl Certificate {
    /// Wrap raw certificate bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Certificate(bytes)
    }

    /// The raw certificate bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A request for one byte range of a data set, sent to exactly one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunkRequest {
    /// Identity of the data set
    pub dataset_id: DatasetId,
    /// Byte offset of the requested range
    pub offset: u64,
    /// Byte length of the requested range
    pub length: u32,
    /// Transmission intent flag carried on the wire (unused downstream)
    pub use_encryption: bool,
    /// Transmission intent flag carried on the wire (unused downstream)
    pub use_signing: bool,
    /// Opaque caller-defined disambiguator
    pub extra_info: WireMessage,
    /// Optional authorization certificate
    pub certificate: Option<Certificate>,
}

impl DataChunkRequest {
    /// Wire tag for a DataChunkRequest message
    pub const TAG: MessageTag = MessageTag::new(b"DaCR");

    /// Build the tagged wire message
    pub fn encode(&self) -> WireMessage {
        let mut message = WireMessage::tagged(Self::TAG);
        self.dataset_id.encode_to(&mut message);
        message.append_i32(self.offset as i32);
        message.append_i32(self.length as i32);
        message.append_bool(self.use_encryption);
        message.append_bool(self.use_signing);
        message.append_message(&self.extra_info);
        message.append_bool(self.certificate.is_some());
        if let Some(certificate) = &self.certificate {
            message.append_counted_bytes(certificate.as_bytes());
        }
        message
    }

    /// Decode a complete DataChunkRequest message, verifying tag and length
    pub fn decode(message: &WireMessage) -> ProtocolResult<Self> {
        if !message.has_tag(Self::TAG) {
            return Err(schema_mismatch(Self::TAG, message));
        }
        let mut reader = message.reader()?;
        let request = Self::decode_from(&mut reader)?;
        reader.expect_end("DataChunkRequest")?;
        Ok(request)
    }

    /// Decode from a cursor positioned at the first field
    pub fn decode_from(reader: &mut WireReader<'_>) -> ProtocolResult<Self> {
        let dataset_id = DatasetId::decode_from(reader)?;
        let offset = read_offset(reader)?;
        let length = read_chunk_len(reader)?;
        let use_encryption = reader.read_bool()?;
        let use_signing = reader.read_bool()?;
        let extra_info = reader.read_message()?;
        let certificate = if reader.read_bool()? {
            Some(Certificate::new(reader.read_counted_bytes("certificate length")?))
        } else {
            None
        };

        Ok(DataChunkRequest {
            dataset_id,
            offset,
            length,
            use_encryption,
            use_signing,
            extra_info,
            certificate,
        })
    }
}

/// One byte range of a data set, as delivered by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    /// Identity of the data set
    pub dataset_id: DatasetId,
    /// Byte offset of this chunk within the data set
    pub offset: u64,
    /// Byte length of this chunk
    pub length: u32,
    /// Opaque caller-defined disambiguator
    pub extra_info: WireMessage,
    /// The chunk bytes, wrapped for transmission
    pub payload: DataPackage,
}

impl DataChunk {
    /// Wire tag for a DataChunk message
    pub const TAG: MessageTag = MessageTag::new(b"DaCh");

    /// Wrap a byte range for transmission (compressed and checksummed)
    pub fn new(dataset_id: DatasetId, offset: u64, data: Vec<u8>, extra_info: WireMessage) -> Self {
        DataChunk {
            dataset_id,
            offset,
            length: data.len() as u32,
            extra_info,
            payload: DataPackage::new(data, true, true),
        }
    }

    /// Build the tagged wire message
    pub fn encode(&self) -> WireMessage {
        let mut message = WireMessage::tagged(Self::TAG);
        self.dataset_id.encode_to(&mut message);
        message.append_i32(self.offset as i32);
        message.append_i32(self.length as i32);
        message.append_message(&self.extra_info);
        self.payload.encode_to(&mut message);
        message
    }

    /// Decode a complete DataChunk message, verifying tag and length
    pub fn decode(message: &WireMessage) -> ProtocolResult<Self> {
        if !message.has_tag(Self::TAG) {
            return Err(schema_mismatch(Self::TAG, message));
        }
        let mut reader = message.reader()?;
        let chunk = Self::decode_from(&mut reader)?;
        reader.expect_end("DataChunk")?;
        Ok(chunk)
    }

    /// Decode from a cursor positioned at the first field
    pub fn decode_from(reader: &mut WireReader<'_>) -> ProtocolResult<Self> {
        let dataset_id = DatasetId::decode_from(reader)?;
        let offset = read_offset(reader)?;
        let length = read_chunk_len(reader)?;
        let extra_info = reader.read_message()?;
        let payload = DataPackage::decode_from(reader)?;

        Ok(DataChunk { dataset_id, offset, length, extra_info, payload })
    }
}

fn read_offset(reader: &mut WireReader<'_>) -> ProtocolResult<u64> {
    let offset = reader.read_i32()?;
    if offset < 0 {
        return Err(ProtocolError::InvalidField { field: "chunk offset", value: offset as i64 });
    }
    Ok(offset as u64)
}

fn read_chunk_len(reader: &mut WireReader<'_>) -> ProtocolResult<u32> {
    let length = reader.read_i32()?;
    if length < 0 {
        return Err(ProtocolError::InvalidField { field: "chunk length", value: length as i64 });
    }
    Ok(length as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile_extra_info() -> WireMessage {
        let mut extra = WireMessage::new();
        extra.append_str("tile-12-40");
        extra
    }

    fn sample_request() -> DataChunkRequest {
        DataChunkRequest {
            dataset_id: DatasetId::random(),
            offset: 52_000,
            length: 26_000,
            use_encryption: false,
            use_signing: true,
            extra_info: tile_extra_info(),
            certificate: Some(Certificate::new(vec![0xCA, 0xFE, 0x01])),
        }
    }

    #[test]
    fn test_request_round_trip_with_certificate() {
        let request = sample_request();
        let decoded = DataChunkRequest::decode(&request.encode()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_request_round_trip_without_certificate() {
        let request = DataChunkRequest { certificate: None, ..sample_request() };
        let decoded = DataChunkRequest::decode(&request.encode()).unwrap();
        assert_eq!(decoded, request);
        assert!(decoded.certificate.is_none());
    }

    #[test]
    fn test_chunk_round_trip() {
        let data: Vec<u8> = (0..26_000u32).map(|i| (i % 251) as u8).collect();
        let chunk = DataChunk::new(DatasetId::random(), 26_000, data.clone(), tile_extra_info());

        let decoded = DataChunk::decode(&chunk.encode()).unwrap();
        assert_eq!(decoded.dataset_id, chunk.dataset_id);
        assert_eq!(decoded.offset, 26_000);
        assert_eq!(decoded.length, 26_000);
        assert_eq!(decoded.payload.data(), &data[..]);
        assert!(decoded.payload.valid_checksum());
        assert_eq!(decoded.extra_info, chunk.extra_info);
    }

    #[test]
    fn test_chunk_rejects_request_tag() {
        let request = sample_request();
        let err = DataChunk::decode(&request.encode()).unwrap_err();
        assert!(matches!(err, ProtocolError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let chunk = DataChunk::new(DatasetId::random(), 0, vec![1, 2, 3], WireMessage::new());
        let mut message = chunk.encode();
        message.append_i32(12);
        let err = DataChunk::decode(&message).unwrap_err();
        assert!(matches!(err, ProtocolError::TrailingData { .. }));
    }

    #[test]
    fn test_negative_offset_rejected() {
        let request = DataChunkRequest { certificate: None, ..sample_request() };
        let mut bytes = request.encode().as_bytes().to_vec();
        // offset field sits right after the tag and dataset id
        bytes[20..24].copy_from_slice(&(-1i32).to_le_bytes());
        let err = DataChunkRequest::decode(&WireMessage::from_bytes(&bytes[..])).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "chunk offset", .. }));
    }
}
