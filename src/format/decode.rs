use super::header::Header;
use super::reader::Reader;
use super::{Compression, DecodeError, ENTITIES_SINCE, EXTRA_SINCE, MAX_PAYLOAD_LEN};
use crate::chunk::{
    packed_len, Chunk, Section, BIOME_LEN, LEGACY_META_LEN, MAX_BITS_PER_BLOCK,
    MIN_BITS_PER_BLOCK, SECTIONS_PER_CHUNK, SECTION_VOLUME,
};
use crate::error::WorldError;
use crate::tag::{self, Compound};
use crate::types::{ChunkPos, Encoding, WorldProperties};
use crate::world::{World, WorldParts};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Smallest possible chunk table entry: coordinates plus body length.
const CHUNK_ENTRY_MIN: usize = 4 + 4 + 4;

/// Decode a world blob read from `backend`.
///
/// The returned world carries the header's encoding generation, version and
/// compression marker, plus the supplied `properties`.
pub fn decode(
    backend: &str,
    world: &str,
    bytes: &[u8],
    properties: WorldProperties,
) -> Result<World, WorldError> {
    let parts = decode_parts(bytes).map_err(|e| e.into_world_error(world))?;
    Ok(World::from_parts(world, backend, parts, properties))
}

pub(crate) fn decode_parts(bytes: &[u8]) -> Result<WorldParts, DecodeError> {
    let mut r = Reader::new(bytes);
    let header = Header::read(&mut r)?;

    let stored = r.bytes(header.payload_len as usize, "payload")?;
    if !r.is_empty() {
        return Err(DecodeError::corrupted(format!(
            "{} trailing bytes after payload",
            r.remaining()
        )));
    }
    if md5::compute(stored).0 != header.digest {
        return Err(DecodeError::corrupted("payload digest mismatch"));
    }

    let payload = decompress(header.compression, stored)?;
    let mut r = Reader::new(&payload);

    let chunks = read_chunk_table(&mut r, header.encoding)?;

    let tile_entities = read_compounds(&mut r, "tile entity")?;
    let entities = if header.version >= ENTITIES_SINCE {
        read_compounds(&mut r, "entity")?
    } else {
        Vec::new()
    };
    let extra = if header.version >= EXTRA_SINCE {
        tag::read_root_compound(&mut r, "extra data")?
    } else {
        Compound::new()
    };

    if !r.is_empty() {
        return Err(DecodeError::corrupted(format!(
            "{} trailing bytes in payload",
            r.remaining()
        )));
    }

    Ok(WorldParts {
        version: header.version,
        encoding: header.encoding,
        compression: header.compression,
        chunks,
        tile_entities,
        entities,
        extra,
    })
}

fn decompress(compression: Compression, stored: &[u8]) -> Result<Cow<'_, [u8]>, DecodeError> {
    match compression {
        Compression::None => Ok(Cow::Borrowed(stored)),
        Compression::Lz4 => {
            let declared = Reader::new(stored).bytes(4, "decompressed size")?;
            let size = u32::from_le_bytes([declared[0], declared[1], declared[2], declared[3]]);
            if size as usize > MAX_PAYLOAD_LEN {
                return Err(DecodeError::corrupted(format!(
                    "declared payload size {} exceeds limit {}",
                    size, MAX_PAYLOAD_LEN
                )));
            }
            let payload = lz4_flex::block::decompress_size_prepended(stored)
                .map_err(|e| DecodeError::corrupted(format!("decompression failed: {}", e)))?;
            // Re-encoding must reproduce the stored bytes exactly.
            if lz4_flex::block::compress_prepend_size(&payload) != stored {
                return Err(DecodeError::corrupted("non-canonical lz4 payload"));
            }
            Ok(Cow::Owned(payload))
        }
    }
}

/// Read a `u32` element count and reject counts the remaining input cannot
/// possibly hold.
fn read_count(r: &mut Reader<'_>, min_elem: usize, what: &str) -> Result<usize, DecodeError> {
    let n = r.u32(what)? as usize;
    if n.saturating_mul(min_elem) > r.remaining() {
        return Err(DecodeError::corrupted(format!(
            "{} {} exceeds remaining {} bytes",
            what,
            n,
            r.remaining()
        )));
    }
    Ok(n)
}

// ---------------------------------------------------------------------------
// Chunk table
// ---------------------------------------------------------------------------

fn read_chunk_table(
    r: &mut Reader<'_>,
    encoding: Encoding,
) -> Result<BTreeMap<ChunkPos, Chunk>, DecodeError> {
    let count = read_count(r, CHUNK_ENTRY_MIN, "chunk count")?;
    let mut chunks = BTreeMap::new();
    let mut previous: Option<ChunkPos> = None;

    for index in 0..count {
        let at_entry = |e: DecodeError| match e {
            DecodeError::Corrupted { chunk: None, reason } => DecodeError::corrupted(format!(
                "chunk table entry #{}: {}",
                index, reason
            )),
            other => other,
        };
        let x = r.i32("chunk x").map_err(at_entry)?;
        let z = r.i32("chunk z").map_err(at_entry)?;
        let pos = ChunkPos::new(x, z);

        if let Some(prev) = previous {
            if pos <= prev {
                return Err(DecodeError::corrupted(format!(
                    "chunk table out of order (after {})",
                    prev
                ))
                .in_chunk(pos));
            }
        }
        previous = Some(pos);

        let body_len = r.u32("chunk body length").map_err(|e| e.in_chunk(pos))?;
        let body = r
            .bytes(body_len as usize, "chunk body")
            .map_err(|e| e.in_chunk(pos))?;
        let chunk = read_chunk(pos, encoding, body).map_err(|e| e.in_chunk(pos))?;
        chunks.insert(pos, chunk);
    }

    Ok(chunks)
}

fn read_chunk(pos: ChunkPos, encoding: Encoding, body: &[u8]) -> Result<Chunk, DecodeError> {
    let mut r = Reader::new(body);
    let mut chunk = Chunk::new(pos, encoding);

    let mask = r.u16("section mask")?;
    for y in 0..SECTIONS_PER_CHUNK {
        if mask & (1 << y) == 0 {
            continue;
        }
        let section = match encoding {
            Encoding::Legacy => read_legacy_section(&mut r),
            Encoding::Modern => read_modern_section(&mut r),
        }
        .map_err(|e| match e {
            DecodeError::Corrupted { chunk, reason } => DecodeError::Corrupted {
                chunk,
                reason: format!("section {}: {}", y, reason),
            },
            other => other,
        })?;
        chunk
            .set_section(y, section)
            .map_err(|e| DecodeError::corrupted(e.to_string()))?;
    }

    let biomes = r.bytes(BIOME_LEN, "biomes")?;
    chunk
        .set_biomes(biomes.to_vec())
        .map_err(|e| DecodeError::corrupted(e.to_string()))?;

    if !r.is_empty() {
        return Err(DecodeError::corrupted(format!(
            "{} trailing bytes in chunk body",
            r.remaining()
        )));
    }
    Ok(chunk)
}

fn read_legacy_section(r: &mut Reader<'_>) -> Result<Section, DecodeError> {
    let blocks = r.bytes(SECTION_VOLUME, "block ids")?.to_vec();
    let metadata = r.bytes(LEGACY_META_LEN, "block metadata")?.to_vec();
    Section::legacy(blocks, metadata).map_err(|e| DecodeError::corrupted(e.to_string()))
}

fn read_modern_section(r: &mut Reader<'_>) -> Result<Section, DecodeError> {
    let palette_len = r.u16("palette length")? as usize;
    if palette_len == 0 || palette_len > SECTION_VOLUME {
        return Err(DecodeError::corrupted(format!(
            "palette size {} outside 1..={}",
            palette_len, SECTION_VOLUME
        )));
    }
    let mut palette = Vec::with_capacity(palette_len);
    for _ in 0..palette_len {
        palette.push(tag::read_root(r)?);
    }

    let bits = r.u8("bits per block")?;
    if !(MIN_BITS_PER_BLOCK..=MAX_BITS_PER_BLOCK).contains(&bits) {
        return Err(DecodeError::corrupted(format!(
            "bits per block {} outside {}..={}",
            bits, MIN_BITS_PER_BLOCK, MAX_BITS_PER_BLOCK
        )));
    }
    let long_count = r.u16("packed state length")? as usize;
    if long_count != packed_len(bits) {
        return Err(DecodeError::corrupted(format!(
            "packed state array holds {} longs, expected {}",
            long_count,
            packed_len(bits)
        )));
    }
    let mut states = Vec::with_capacity(long_count);
    for _ in 0..long_count {
        states.push(r.i64("packed states")?);
    }

    Section::modern(palette, bits, states).map_err(|e| DecodeError::corrupted(e.to_string()))
}

// ---------------------------------------------------------------------------
// Entity sections
// ---------------------------------------------------------------------------

fn read_compounds(r: &mut Reader<'_>, what: &str) -> Result<Vec<Compound>, DecodeError> {
    // A root compound is at least its type id and end marker.
    let count = read_count(r, 2, &format!("{} count", what))?;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let tag = tag::read_root_compound(r, what).map_err(|e| match e {
            DecodeError::Corrupted { chunk, reason } => DecodeError::Corrupted {
                chunk,
                reason: format!("{} #{}: {}", what, i, reason),
            },
            other => other,
        })?;
        out.push(tag);
    }
    Ok(out)
}
