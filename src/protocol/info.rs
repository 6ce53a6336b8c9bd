//! Dataset metadata and metadata-request schemas
//!
//! [`DataInfo`] is the availability advertisement a provider returns for a
//! data set: total length, chunk size, per-chunk availability, and optional
//! per-chunk hash codes. [`DataInfoRequest`] asks a peer for its `DataInfo`;
//! [`DataNoInfo`] is the reply from a peer that knows nothing about the
//! data set.

use crate::errors::{ProtocolError, ProtocolResult};
use crate::protocol::chunk_map::ChunkMap;
use crate::protocol::dataset::DatasetId;
use crate::protocol::package::DataPackage;
use crate::protocol::wire::{MessageTag, WireMessage, WireReader};

/// Everything a provider advertises about a data set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataInfo {
    /// Identity of the data set this metadata describes
    pub dataset_id: DatasetId,
    /// Total size of the data set in bytes
    pub length: u64,
    /// Size of the chunks used for availability tracking and transfer
    pub chunk_size: u32,
    /// Transmission intent flag carried on the wire (unused downstream)
    pub use_encryption: bool,
    /// Transmission intent flag carried on the wire (unused downstream)
    pub use_signing: bool,
    /// True if `chunk_hash_codes` carries one hash per chunk
    pub uses_hash_codes: bool,
    /// Per-chunk hash codes, parallel to the chunk index space
    pub chunk_hash_codes: Vec<Vec<u8>>,
    /// True if the provider holds the entire data set
    pub all_available: bool,
    /// Per-chunk availability; present only when `all_available` is false
    pub available_chunks: Option<ChunkMap>,
    /// Opaque caller-defined disambiguator (e.g. which tile)
    pub extra_info: WireMessage,
}

impl DataInfo {
    /// Wire tag for a DataInfo message
    pub const TAG: MessageTag = MessageTag::new(b"DaIn");

    /// Metadata for a fully available data set
    pub fn complete(dataset_id: DatasetId, length: u64, chunk_size: u32) -> Self {
        DataInfo {
            dataset_id,
            length,
            chunk_size,
            use_encryption: false,
            use_signing: false,
            uses_hash_codes: false,
            chunk_hash_codes: Vec::new(),
            all_available: true,
            available_chunks: None,
            extra_info: WireMessage::new(),
        }
    }

    /// Metadata for a partially available data set
    pub fn partial(
        dataset_id: DatasetId,
        length: u64,
        chunk_size: u32,
        available_chunks: ChunkMap,
    ) -> Self {
        DataInfo {
            available_chunks: Some(available_chunks),
            all_available: false,
            ..DataInfo::complete(dataset_id, length, chunk_size)
        }
    }

    /// Number of chunks in the data set
    ///
    /// Equals `ceil(length / chunk_size)`; the final chunk may be short.
    pub fn chunk_count(&self) -> usize {
        if self.chunk_size == 0 {
            return 0;
        }
        self.length.div_ceil(self.chunk_size as u64) as usize
    }

    /// Byte offset of chunk `index`
    pub fn chunk_offset(&self, index: usize) -> u64 {
        index as u64 * self.chunk_size as u64
    }

    /// Byte length of chunk `index` (the final chunk may be short)
    pub fn chunk_len(&self, index: usize) -> u64 {
        let offset = self.chunk_offset(index);
        (self.chunk_size as u64).min(self.length.saturating_sub(offset))
    }

    /// True if this provider claims to hold chunk `index`
    pub fn has_chunk(&self, index: usize) -> bool {
        if self.all_available {
            return index < self.chunk_count();
        }
        self.available_chunks
            .as_ref()
            .map(|map| map.get(index))
            .unwrap_or(false)
    }

    /// Deep copy with nothing marked available, used to track download
    /// progress against this metadata
    pub fn without_availability(&self) -> DataInfo {
        DataInfo {
            all_available: false,
            available_chunks: Some(ChunkMap::new(self.chunk_count())),
            ..self.clone()
        }
    }

    /// Build the tagged wire message
    pub fn encode(&self) -> WireMessage {
        let mut message = WireMessage::tagged(Self::TAG);
        self.encode_body(&mut message);
        message
    }

    fn encode_body(&self, message: &mut WireMessage) {
        self.dataset_id.encode_to(message);
        message.append_i64(self.length as i64);
        message.append_i32(self.chunk_size as i32);
        message.append_bool(self.use_encryption);
        message.append_bool(self.use_signing);
        message.append_bool(self.uses_hash_codes);
        if self.uses_hash_codes {
            message.append_i32(self.chunk_hash_codes.len() as i32);
            for hash in &self.chunk_hash_codes {
                message.append_counted_bytes(hash);
            }
        }
        message.append_bool(self.all_available);
        message.append_bool(self.available_chunks.is_some());
        if let Some(map) = &self.available_chunks {
            // The bitmap travels compressed; large sparse maps shrink well
            DataPackage::new(map.to_bytes(), true, false).encode_to(message);
        }
        message.append_message(&self.extra_info);
    }

    /// Decode a complete DataInfo message, verifying tag and length
    pub fn decode(message: &WireMessage) -> ProtocolResult<Self> {
        if !message.has_tag(Self::TAG) {
            return Err(schema_mismatch(Self::TAG, message));
        }
        let mut reader = message.reader()?;
        let info = Self::decode_from(&mut reader)?;
        reader.expect_end("DataInfo")?;
        Ok(info)
    }

    /// Decode a DataInfo from a cursor positioned at its first field
    pub fn decode_from(reader: &mut WireReader<'_>) -> ProtocolResult<Self> {
        let dataset_id = DatasetId::decode_from(reader)?;
        let length = reader.read_i64()?;
        if length < 0 {
            return Err(ProtocolError::InvalidField { field: "data length", value: length });
        }
        let chunk_size = reader.read_i32()?;
        if chunk_size < 0 {
            return Err(ProtocolError::InvalidField {
                field: "chunk size",
                value: chunk_size as i64,
            });
        }
        let use_encryption = reader.read_bool()?;
        let use_signing = reader.read_bool()?;
        let uses_hash_codes = reader.read_bool()?;
        let mut chunk_hash_codes = Vec::new();
        if uses_hash_codes {
            let count = reader.read_len("hash code count")?;
            for _ in 0..count {
                chunk_hash_codes.push(reader.read_counted_bytes("hash code length")?);
            }
        }
        let all_available = reader.read_bool()?;
        let has_bitmap = reader.read_bool()?;

        let mut info = DataInfo {
            dataset_id,
            length: length as u64,
            chunk_size: chunk_size as u32,
            use_encryption,
            use_signing,
            uses_hash_codes,
            chunk_hash_codes,
            all_available,
            available_chunks: None,
            extra_info: WireMessage::new(),
        };

        if has_bitmap {
            let package = DataPackage::decode_from(reader)?;
            info.available_chunks = Some(ChunkMap::from_bytes(package.data(), info.chunk_count()));
        }
        info.extra_info = reader.read_message()?;

        if info.uses_hash_codes && info.chunk_hash_codes.len() != info.chunk_count() {
            return Err(ProtocolError::InvalidField {
                field: "hash code count",
                value: info.chunk_hash_codes.len() as i64,
            });
        }

        Ok(info)
    }
}

/// Request for a peer's [`DataInfo`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataInfoRequest {
    /// Identity of the data set being asked about
    pub dataset_id: DatasetId,
    /// Opaque caller-defined disambiguator
    pub extra_info: WireMessage,
}

impl DataInfoRequest {
    /// Wire tag for a DataInfoRequest message
    pub const TAG: MessageTag = MessageTag::new(b"DaRe");

    /// Create a request for a data set
    pub fn new(dataset_id: DatasetId, extra_info: WireMessage) -> Self {
        DataInfoRequest { dataset_id, extra_info }
    }

    /// Build the tagged wire message
    pub fn encode(&self) -> WireMessage {
        let mut message = WireMessage::tagged(Self::TAG);
        self.dataset_id.encode_to(&mut message);
        message.append_message(&self.extra_info);
        message
    }

    /// Decode a complete DataInfoRequest message, verifying tag and length
    pub fn decode(message: &WireMessage) -> ProtocolResult<Self> {
        if !message.has_tag(Self::TAG) {
            return Err(schema_mismatch(Self::TAG, message));
        }
        let mut reader = message.reader()?;
        let request = Self::decode_from(&mut reader)?;
        reader.expect_end("DataInfoRequest")?;
        Ok(request)
    }

    /// Decode from a cursor positioned at the first field
    pub fn decode_from(reader: &mut WireReader<'_>) -> ProtocolResult<Self> {
        Ok(DataInfoRequest {
            dataset_id: DatasetId::decode_from(reader)?,
            extra_info: reader.read_message()?,
        })
    }
}

/// Reply from a peer that has no knowledge of the data set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataNoInfo {
    /// Identity of the unknown data set
    pub dataset_id: DatasetId,
    /// Opaque caller-defined disambiguator, echoed from the request
    pub extra_info: WireMessage,
}

impl DataNoInfo {
    /// Wire tag for a DataNoInfo message
    pub const TAG: MessageTag = MessageTag::new(b"DaNI");

    /// Create a no-info reply for a data set
    pub fn new(dataset_id: DatasetId, extra_info: WireMessage) -> Self {
        DataNoInfo { dataset_id, extra_info }
    }

    /// Build the tagged wire message
    pub fn encode(&self) -> WireMessage {
        let mut message = WireMessage::tagged(Self::TAG);
        self.dataset_id.encode_to(&mut message);
        message.append_message(&self.extra_info);
        message
    }

    /// Decode a complete DataNoInfo message, verifying tag and length
    pub fn decode(message: &WireMessage) -> ProtocolResult<Self> {
        if !message.has_tag(Self::TAG) {
            return Err(schema_mismatch(Self::TAG, message));
        }
        let mut reader = message.reader()?;
        let reply = Self::decode_from(&mut reader)?;
        reader.expect_end("DataNoInfo")?;
        Ok(reply)
    }

    /// Decode from a cursor positioned at the first field
    pub fn decode_from(reader: &mut WireReader<'_>) -> ProtocolResult<Self> {
        Ok(DataNoInfo {
            dataset_id: DatasetId::decode_from(reader)?,
            extra_info: reader.read_message()?,
        })
    }
}

pub(crate) fn schema_mismatch(expected: MessageTag, message: &WireMessage) -> ProtocolError {
    ProtocolError::SchemaMismatch {
        expected: expected.to_string(),
        found: message
            .tag()
            .map(|tag| tag.to_string())
            .unwrap_or_else(|| "<none>".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_partial_info() -> DataInfo {
        let mut available = ChunkMap::new(4);
        available.set(0);
        available.set(2);

        let mut extra = WireMessage::new();
        extra.append_str("tile-7-3");

        let mut info = DataInfo::partial(DatasetId::random(), 100_000, 26_000, available);
        info.extra_info = extra;
        info
    }

    #[test]
    fn test_chunk_arithmetic() {
        // 100,000 bytes at 26,000 per chunk: 4 chunks, short final chunk
        let info = DataInfo::complete(DatasetId::random(), 100_000, 26_000);
        assert_eq!(info.chunk_count(), 4);
        assert_eq!(info.chunk_offset(3), 78_000);
        assert_eq!(info.chunk_len(0), 26_000);
        assert_eq!(info.chunk_len(3), 22_000);
    }

    #[test]
    fn test_chunk_count_for_exact_multiple() {
        let info = DataInfo::complete(DatasetId::random(), 52_000, 26_000);
        assert_eq!(info.chunk_count(), 2);
        assert_eq!(info.chunk_len(1), 26_000);
    }

    #[test]
    fn test_chunk_count_for_zero_sizes() {
        let info = DataInfo::complete(DatasetId::random(), 0, 26_000);
        assert_eq!(info.chunk_count(), 0);

        let info = DataInfo::complete(DatasetId::random(), 100, 0);
        assert_eq!(info.chunk_count(), 0);
    }

    #[test]
    fn test_availability_queries() {
        let info = sample_partial_info();
        assert!(info.has_chunk(0));
        assert!(!info.has_chunk(1));
        assert!(info.has_chunk(2));
        assert!(!info.has_chunk(3));
        assert!(!info.has_chunk(99));

        let complete = DataInfo::complete(info.dataset_id, 100_000, 26_000);
        assert!(complete.has_chunk(0));
        assert!(complete.has_chunk(3));
        assert!(!complete.has_chunk(4));
    }

    #[test]
    fn test_round_trip_partial() {
        let info = sample_partial_info();
        let decoded = DataInfo::decode(&info.encode()).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_round_trip_complete_with_hash_codes() {
        let mut info = DataInfo::complete(DatasetId::random(), 100_000, 26_000);
        info.uses_hash_codes = true;
        info.chunk_hash_codes = (0..4).map(|i| vec![i as u8; 16]).collect();

        let decoded = DataInfo::decode(&info.encode()).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_hash_code_count_must_match_chunk_count() {
        let mut info = DataInfo::complete(DatasetId::random(), 100_000, 26_000);
        info.uses_hash_codes = true;
        info.chunk_hash_codes = vec![vec![1u8; 16]; 3]; // 4 chunks, 3 hashes

        let err = DataInfo::decode(&info.encode()).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "hash code count", .. }));
    }

    #[test]
    fn test_wrong_tag_rejected() {
        let request = DataInfoRequest::new(DatasetId::random(), WireMessage::new());
        let err = DataInfo::decode(&request.encode()).unwrap_err();
        assert!(matches!(err, ProtocolError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let info = sample_partial_info();
        let mut message = info.encode();
        message.append_u8(0);
        let err = DataInfo::decode(&message).unwrap_err();
        assert!(matches!(err, ProtocolError::TrailingData { .. }));
    }

    #[test]
    fn test_without_availability_resets_progress() {
        let info = sample_partial_info();
        let tracker = info.without_availability();
        assert!(!tracker.all_available);
        let map = tracker.available_chunks.as_ref().unwrap();
        assert_eq!(map.len(), 4);
        assert_eq!(map.count_set(), 0);
        // the source metadata is untouched
        assert_eq!(info.available_chunks.as_ref().unwrap().count_set(), 2);
    }

    #[test]
    fn test_info_request_round_trip() {
        let request = DataInfoRequest::new(DatasetId::random(), WireMessage::new());
        let decoded = DataInfoRequest::decode(&request.encode()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_no_info_round_trip() {
        let mut extra = WireMessage::new();
        extra.append_str("tile-1-1");
        let reply = DataNoInfo::new(DatasetId::random(), extra);
        let decoded = DataNoInfo::decode(&reply.encode()).unwrap();
        assert_eq!(decoded, reply);
    }
}
