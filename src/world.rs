//! The top-level `World` data container.

use crate::chunk::{Chunk, ChunkError};
use crate::format::{Compression, FORMAT_VERSION};
use crate::tag::{Compound, Tag};
use crate::types::{ChunkPos, Encoding, WorldProperties};
use std::collections::BTreeMap;

/// A named, persisted world: chunk table, entities and properties.
///
/// Produced by [`crate::format::decode`] (or [`World::empty`]) and owned by
/// the caller from then on; nothing in this crate keeps a reference.
#[derive(Debug, Clone, PartialEq)]
pub struct World {
    name: String,
    backend: String,
    version: u8,
    encoding: Encoding,
    compression: Compression,
    chunks: BTreeMap<ChunkPos, Chunk>,
    tile_entities: Vec<Compound>,
    entities: Vec<Compound>,
    extra: Compound,
    properties: WorldProperties,
}

/// Decoded sections of a world blob, before properties are merged in.
pub(crate) struct WorldParts {
    pub version: u8,
    pub encoding: Encoding,
    pub compression: Compression,
    pub chunks: BTreeMap<ChunkPos, Chunk>,
    pub tile_entities: Vec<Compound>,
    pub entities: Vec<Compound>,
    pub extra: Compound,
}

impl World {
    /// A world with no chunks, written at the newest format version.
    pub fn empty(
        name: impl Into<String>,
        backend: impl Into<String>,
        encoding: Encoding,
        properties: WorldProperties,
    ) -> Self {
        Self {
            name: name.into(),
            backend: backend.into(),
            version: FORMAT_VERSION,
            encoding,
            compression: Compression::Lz4,
            chunks: BTreeMap::new(),
            tile_entities: Vec::new(),
            entities: Vec::new(),
            extra: Compound::new(),
            properties,
        }
    }

    pub(crate) fn from_parts(
        name: &str,
        backend: &str,
        parts: WorldParts,
        properties: WorldProperties,
    ) -> Self {
        Self {
            name: name.to_string(),
            backend: backend.to_string(),
            version: parts.version,
            encoding: parts.encoding,
            compression: parts.compression,
            chunks: parts.chunks,
            tile_entities: parts.tile_entities,
            entities: parts.entities,
            extra: parts.extra,
            properties,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry name of the backend this world was read from.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn is_modern(&self) -> bool {
        self.encoding.is_modern()
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn set_compression(&mut self, compression: Compression) {
        self.compression = compression;
    }

    pub fn properties(&self) -> &WorldProperties {
        &self.properties
    }

    pub fn is_read_only(&self) -> bool {
        self.properties.read_only
    }

    // -----------------------------------------------------------------------
    // Chunks
    // -----------------------------------------------------------------------

    pub fn chunk(&self, pos: ChunkPos) -> Option<&Chunk> {
        self.chunks.get(&pos)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Insert or replace a chunk. Its encoding must match the world's.
    pub fn insert_chunk(&mut self, chunk: Chunk) -> Result<Option<Chunk>, ChunkError> {
        if chunk.encoding() != self.encoding {
            return Err(ChunkError::EncodingMismatch {
                expected: self.encoding,
                found: chunk.encoding(),
            });
        }
        Ok(self.chunks.insert(chunk.pos(), chunk))
    }

    pub fn remove_chunk(&mut self, pos: ChunkPos) -> Option<Chunk> {
        self.chunks.remove(&pos)
    }

    // -----------------------------------------------------------------------
    // Entities & extra data
    // -----------------------------------------------------------------------

    pub fn tile_entities(&self) -> &[Compound] {
        &self.tile_entities
    }

    pub fn push_tile_entity(&mut self, tile: Compound) {
        self.tile_entities.push(tile);
    }

    /// Tile entities whose `x`/`z` block coordinates fall inside `pos`.
    pub fn tile_entities_in(&self, pos: ChunkPos) -> impl Iterator<Item = &Compound> {
        self.tile_entities.iter().filter(move |t| {
            let coord = |k: &str| t.get(k).and_then(Tag::as_int).map(|v| v >> 4);
            coord("x") == Some(pos.x) && coord("z") == Some(pos.z)
        })
    }

    pub fn entities(&self) -> &[Compound] {
        &self.entities
    }

    pub fn push_entity(&mut self, entity: Compound) {
        self.entities.push(entity);
    }

    pub fn extra(&self) -> &Compound {
        &self.extra
    }

    pub fn extra_mut(&mut self) -> &mut Compound {
        &mut self.extra
    }
}
