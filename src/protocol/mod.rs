//! Wire protocol layer
//!
//! Everything that crosses the network lives here: the tagged message buffer
//! and its cursor ([`wire`]), the opaque dataset identity ([`dataset`]), the
//! chunk bitset ([`chunk_map`]), the checksummed/compressed payload codec
//! ([`package`]), and the five message schemas ([`info`], [`chunk`]).
//!
//! | Tag    | Schema             |
//! |--------|--------------------|
//! | `DaIn` | [`DataInfo`]         |
//! | `DaRe` | [`DataInfoRequest`]  |
//! | `DaNI` | [`DataNoInfo`]       |
//! | `DaCR` | [`DataChunkRequest`] |
//! | `DaCh` | [`DataChunk`]        |

pub mod chunk;
pub mod chunk_map;
pub mod dataset;
pub mod info;
pub mod package;
pub mod wire;

pub use chunk::{Certificate, DataChunk, DataChunkRequest};
pub use chunk_map::ChunkMap;
pub use dataset::DatasetId;
pub use info::{DataInfo, DataInfoRequest, DataNoInfo};
pub use package::DataPackage;
pub use wire::{MessageTag, WireMessage, WireReader};
