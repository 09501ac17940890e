//! Binary world format.
//!
//! ## Layout (big-endian)
//!
//! | Field          | Size      | Notes                                     |
//! |----------------|-----------|-------------------------------------------|
//! | magic          | 2         | `0xB1 0x0B`                               |
//! | version        | 1         | `1..=FORMAT_VERSION`                      |
//! | encoding       | 1         | 0 = legacy, 1 = modern                    |
//! | compression    | 1         | 0 = none, 1 = lz4 (size-prepended block)  |
//! | digest         | 16        | MD5 of the stored payload                 |
//! | payload length | 4         | stored (possibly compressed) byte count   |
//! | payload        | *n*       | see [`decode`]                            |
//!
//! Payload, after decompression:
//!
//! ```text
//! chunk_count u32
//! chunk_count × { x i32, z i32, body_len u32, body }   ascending (x, z)
//!     body = section_mask u16, sections (low bit first), biomes [256]u8
//! tile_entity_count u32, root compound tags
//! entity_count u32, root compound tags      version >= 2
//! extra root compound tag                   version >= 3
//! ```
//!
//! Decoding is strict and single-pass: any structural anomaly is a
//! [`DecodeError::Corrupted`], never a best guess.

mod decode;
mod encode;
pub mod header;
pub mod reader;

pub use decode::decode;
pub use encode::encode;
pub use header::Header;

use crate::error::WorldError;
use crate::tag::TagError;
use crate::types::ChunkPos;
use thiserror::Error;

pub const MAGIC: [u8; 2] = [0xB1, 0x0B];

/// Newest format version this build reads and writes.
pub const FORMAT_VERSION: u8 = 3;

/// First version carrying an entity section.
pub const ENTITIES_SINCE: u8 = 2;

/// First version carrying the extra-data compound.
pub const EXTRA_SINCE: u8 = 3;

/// Upper bound on a decompressed payload.
pub const MAX_PAYLOAD_LEN: usize = 256 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Compression
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default)]
pub enum Compression {
    None,
    #[default]
    Lz4,
}

impl Compression {
    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            0 => Some(Compression::None),
            1 => Some(Compression::Lz4),
            _ => None,
        }
    }

    pub fn marker(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Lz4 => 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    #[error("{reason}")]
    Corrupted {
        chunk: Option<ChunkPos>,
        reason: String,
    },
    #[error("format version {0} is newer than supported version {FORMAT_VERSION}")]
    NewerFormat(u8),
}

impl DecodeError {
    pub fn corrupted(reason: impl Into<String>) -> Self {
        DecodeError::Corrupted {
            chunk: None,
            reason: reason.into(),
        }
    }

    /// Attribute a corruption to a chunk, keeping any earlier attribution.
    pub fn in_chunk(self, pos: ChunkPos) -> Self {
        match self {
            DecodeError::Corrupted {
                chunk: None,
                reason,
            } => DecodeError::Corrupted {
                chunk: Some(pos),
                reason,
            },
            other => other,
        }
    }

    pub fn into_world_error(self, world: &str) -> WorldError {
        match self {
            DecodeError::Corrupted { chunk, reason } => WorldError::CorruptedWorld {
                world: world.to_string(),
                chunk,
                reason,
            },
            DecodeError::NewerFormat(version) => WorldError::NewerFormat {
                world: world.to_string(),
                version,
            },
        }
    }
}

/// A world the reader could not take back.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EncodeError {
    #[error("chunk {chunk}: {source}")]
    Tag { chunk: ChunkPos, source: TagError },

    #[error("{what}: {source}")]
    Section { what: &'static str, source: TagError },

    #[error("payload of {len} bytes exceeds limit {limit}")]
    PayloadTooLarge { len: usize, limit: usize },
}

impl EncodeError {
    pub fn into_world_error(self, world: &str) -> WorldError {
        WorldError::illegal(format!("world '{}' cannot be encoded: {}", world, self))
    }
}
