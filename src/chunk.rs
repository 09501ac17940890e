//! Chunk subsystem: chunk columns, 16³ sections and the two block-storage
//! generations (legacy fixed-size, modern palette-based).
//!
//! Sections can only be built through validating constructors, so every
//! `Chunk` reachable from a `World` is encodable and every packed palette
//! index points inside its palette.

use crate::tag::Tag;
use crate::types::{ChunkPos, Encoding};
use std::collections::BTreeMap;
use thiserror::Error;

/// Blocks per section (16 × 16 × 16).
pub const SECTION_VOLUME: usize = 4096;
/// Bytes of 4-bit legacy metadata per section.
pub const LEGACY_META_LEN: usize = SECTION_VOLUME / 2;
/// Vertical sections per chunk column.
pub const SECTIONS_PER_CHUNK: u8 = 16;
/// One biome id per column cell.
pub const BIOME_LEN: usize = 256;

pub const MIN_BITS_PER_BLOCK: u8 = 4;
pub const MAX_BITS_PER_BLOCK: u8 = 12;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("legacy block array holds {0} bytes, expected {SECTION_VOLUME}")]
    LegacyBlocksLen(usize),
    #[error("legacy metadata array holds {0} bytes, expected {LEGACY_META_LEN}")]
    LegacyMetaLen(usize),
    #[error("palette size {0} outside 1..={SECTION_VOLUME}")]
    PaletteSize(usize),
    #[error("{bits} bits per block cannot address a palette of {palette}")]
    BitsPerBlock { bits: u8, palette: usize },
    #[error("packed state array holds {found} longs, expected {expected}")]
    PackedLen { found: usize, expected: usize },
    #[error("block {index} references palette entry {entry}, palette has {palette}")]
    PaletteIndex {
        index: usize,
        entry: u64,
        palette: usize,
    },
    #[error("section index {0} out of range")]
    SectionIndex(u8),
    #[error("biome array holds {0} bytes, expected {BIOME_LEN}")]
    BiomeLen(usize),
    #[error("{found:?} section in a {expected:?} chunk")]
    EncodingMismatch { expected: Encoding, found: Encoding },
}

// ---------------------------------------------------------------------------
// Block storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum BlockStorage {
    Legacy {
        blocks: Vec<u8>,
        metadata: Vec<u8>,
    },
    Modern {
        palette: Vec<Tag>,
        bits: u8,
        states: Vec<i64>,
    },
}

/// Smallest bit width able to index `palette_len` entries (at least 4).
pub fn bits_for_palette(palette_len: usize) -> u8 {
    let mut bits = MIN_BITS_PER_BLOCK;
    while (1usize << bits) < palette_len {
        bits += 1;
    }
    bits
}

/// Number of longs a section packed at `bits` per block occupies. Entries
/// never straddle two longs.
pub fn packed_len(bits: u8) -> usize {
    let per_long = 64 / bits as usize;
    SECTION_VOLUME.div_ceil(per_long)
}

fn unpack(states: &[i64], bits: u8, index: usize) -> u64 {
    let per_long = 64 / bits as usize;
    let word = states[index / per_long] as u64;
    let shift = (index % per_long) * bits as usize;
    (word >> shift) & ((1u64 << bits) - 1)
}

impl BlockStorage {
    pub fn encoding(&self) -> Encoding {
        match self {
            BlockStorage::Legacy { .. } => Encoding::Legacy,
            BlockStorage::Modern { .. } => Encoding::Modern,
        }
    }

    fn validate(&self) -> Result<(), ChunkError> {
        match self {
            BlockStorage::Legacy { blocks, metadata } => {
                if blocks.len() != SECTION_VOLUME {
                    return Err(ChunkError::LegacyBlocksLen(blocks.len()));
                }
                if metadata.len() != LEGACY_META_LEN {
                    return Err(ChunkError::LegacyMetaLen(metadata.len()));
                }
            }
            BlockStorage::Modern {
                palette,
                bits,
                states,
            } => {
                if palette.is_empty() || palette.len() > SECTION_VOLUME {
                    return Err(ChunkError::PaletteSize(palette.len()));
                }
                if *bits > MAX_BITS_PER_BLOCK || *bits < bits_for_palette(palette.len()) {
                    return Err(ChunkError::BitsPerBlock {
                        bits: *bits,
                        palette: palette.len(),
                    });
                }
                let expected = packed_len(*bits);
                if states.len() != expected {
                    return Err(ChunkError::PackedLen {
                        found: states.len(),
                        expected,
                    });
                }
                for index in 0..SECTION_VOLUME {
                    let entry = unpack(states, *bits, index);
                    if entry >= palette.len() as u64 {
                        return Err(ChunkError::PaletteIndex {
                            index,
                            entry,
                            palette: palette.len(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Section
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    storage: BlockStorage,
}

fn block_index(x: usize, y: usize, z: usize) -> usize {
    (y & 15) << 8 | (z & 15) << 4 | (x & 15)
}

impl Section {
    pub fn new(storage: BlockStorage) -> Result<Self, ChunkError> {
        storage.validate()?;
        Ok(Self { storage })
    }

    pub fn legacy(blocks: Vec<u8>, metadata: Vec<u8>) -> Result<Self, ChunkError> {
        Self::new(BlockStorage::Legacy { blocks, metadata })
    }

    pub fn modern(palette: Vec<Tag>, bits: u8, states: Vec<i64>) -> Result<Self, ChunkError> {
        Self::new(BlockStorage::Modern {
            palette,
            bits,
            states,
        })
    }

    /// Pack one palette index per block (YZX order) at the smallest legal
    /// bit width.
    pub fn modern_from_indices(palette: Vec<Tag>, indices: &[u16]) -> Result<Self, ChunkError> {
        if indices.len() != SECTION_VOLUME {
            return Err(ChunkError::PackedLen {
                found: indices.len(),
                expected: SECTION_VOLUME,
            });
        }
        let bits = bits_for_palette(palette.len());
        let per_long = 64 / bits as usize;
        let mut states = vec![0i64; packed_len(bits)];
        for (i, &entry) in indices.iter().enumerate() {
            let shift = (i % per_long) * bits as usize;
            let word = &mut states[i / per_long];
            *word = ((*word as u64) | (u64::from(entry) << shift)) as i64;
        }
        Self::modern(palette, bits, states)
    }

    /// A legacy section filled with a single block id.
    pub fn legacy_filled(block: u8) -> Self {
        Self {
            storage: BlockStorage::Legacy {
                blocks: vec![block; SECTION_VOLUME],
                metadata: vec![0; LEGACY_META_LEN],
            },
        }
    }

    /// A modern section filled with a single block state.
    pub fn modern_filled(state: Tag) -> Self {
        Self {
            storage: BlockStorage::Modern {
                palette: vec![state],
                bits: MIN_BITS_PER_BLOCK,
                states: vec![0; packed_len(MIN_BITS_PER_BLOCK)],
            },
        }
    }

    pub fn storage(&self) -> &BlockStorage {
        &self.storage
    }

    pub fn encoding(&self) -> Encoding {
        self.storage.encoding()
    }

    /// Legacy `(block id, metadata nibble)` at local coordinates.
    pub fn legacy_block(&self, x: usize, y: usize, z: usize) -> Option<(u8, u8)> {
        match &self.storage {
            BlockStorage::Legacy { blocks, metadata } => {
                let i = block_index(x, y, z);
                let byte = metadata[i >> 1];
                let meta = if i & 1 == 0 { byte & 0x0f } else { byte >> 4 };
                Some((blocks[i], meta))
            }
            BlockStorage::Modern { .. } => None,
        }
    }

    /// Modern block state at local coordinates.
    pub fn modern_state(&self, x: usize, y: usize, z: usize) -> Option<&Tag> {
        match &self.storage {
            BlockStorage::Modern {
                palette,
                bits,
                states,
            } => {
                let entry = unpack(states, *bits, block_index(x, y, z));
                palette.get(entry as usize)
            }
            BlockStorage::Legacy { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk column
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pos: ChunkPos,
    encoding: Encoding,
    sections: BTreeMap<u8, Section>,
    biomes: Vec<u8>,
}

impl Chunk {
    pub fn new(pos: ChunkPos, encoding: Encoding) -> Self {
        Self {
            pos,
            encoding,
            sections: BTreeMap::new(),
            biomes: vec![0; BIOME_LEN],
        }
    }

    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn set_section(&mut self, y: u8, section: Section) -> Result<(), ChunkError> {
        if y >= SECTIONS_PER_CHUNK {
            return Err(ChunkError::SectionIndex(y));
        }
        if section.encoding() != self.encoding {
            return Err(ChunkError::EncodingMismatch {
                expected: self.encoding,
                found: section.encoding(),
            });
        }
        self.sections.insert(y, section);
        Ok(())
    }

    pub fn section(&self, y: u8) -> Option<&Section> {
        self.sections.get(&y)
    }

    /// Present sections in ascending height.
    pub fn sections(&self) -> impl Iterator<Item = (u8, &Section)> {
        self.sections.iter().map(|(y, s)| (*y, s))
    }

    /// Bit `y` set for every present section.
    pub fn section_mask(&self) -> u16 {
        self.sections.keys().fold(0u16, |mask, y| mask | (1 << y))
    }

    pub fn set_biomes(&mut self, biomes: Vec<u8>) -> Result<(), ChunkError> {
        if biomes.len() != BIOME_LEN {
            return Err(ChunkError::BiomeLen(biomes.len()));
        }
        self.biomes = biomes;
        Ok(())
    }

    pub fn biomes(&self) -> &[u8] {
        &self.biomes
    }
}
