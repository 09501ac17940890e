use super::header::{Header, HEADER_LEN};
use super::{Compression, EncodeError, ENTITIES_SINCE, EXTRA_SINCE, MAX_PAYLOAD_LEN};
use crate::chunk::{BlockStorage, Chunk};
use crate::tag::{self, Compound, TagError};
use crate::world::World;
use bytes::{BufMut, Bytes, BytesMut};

/// Serialize a world.
///
/// The world is written at its own format version, raised only when it holds
/// data that version cannot represent (entities before v2, extra data before
/// v3). A world obtained from [`super::decode`] therefore re-encodes to the
/// exact bytes it was decoded from.
///
/// Fails on content the decoder would reject, such as a string longer than
/// its length field or a payload above the size limit.
pub fn encode(world: &World) -> Result<Bytes, EncodeError> {
    let version = effective_version(world);

    let mut payload = Vec::new();
    write_chunk_table(&mut payload, world)?;
    write_compounds(&mut payload, world.tile_entities(), "tile entity")?;
    if version >= ENTITIES_SINCE {
        write_compounds(&mut payload, world.entities(), "entity")?;
    }
    if version >= EXTRA_SINCE {
        tag::write_root_compound(&mut payload, world.extra())
            .map_err(|source| EncodeError::Section { what: "extra data", source })?;
    }

    let limit = match world.compression() {
        Compression::None => u32::MAX as usize,
        Compression::Lz4 => MAX_PAYLOAD_LEN,
    };
    if payload.len() > limit {
        return Err(EncodeError::PayloadTooLarge {
            len: payload.len(),
            limit,
        });
    }
    let stored = match world.compression() {
        Compression::None => payload,
        Compression::Lz4 => lz4_flex::block::compress_prepend_size(&payload),
    };
    if stored.len() > u32::MAX as usize {
        return Err(EncodeError::PayloadTooLarge {
            len: stored.len(),
            limit: u32::MAX as usize,
        });
    }

    let header = Header {
        version,
        encoding: world.encoding(),
        compression: world.compression(),
        digest: md5::compute(&stored).0,
        payload_len: stored.len() as u32,
    };

    let mut out = BytesMut::with_capacity(HEADER_LEN + stored.len());
    header.write(&mut out);
    out.put_slice(&stored);
    Ok(out.freeze())
}

fn effective_version(world: &World) -> u8 {
    let mut version = world.version();
    if !world.entities().is_empty() {
        version = version.max(ENTITIES_SINCE);
    }
    if !world.extra().is_empty() {
        version = version.max(EXTRA_SINCE);
    }
    version
}

fn write_chunk_table(out: &mut Vec<u8>, world: &World) -> Result<(), EncodeError> {
    out.put_u32(world.chunk_count() as u32);
    let mut body = Vec::new();
    for chunk in world.chunks() {
        body.clear();
        write_chunk(&mut body, chunk).map_err(|source| EncodeError::Tag {
            chunk: chunk.pos(),
            source,
        })?;
        out.put_i32(chunk.pos().x);
        out.put_i32(chunk.pos().z);
        out.put_u32(body.len() as u32);
        out.put_slice(&body);
    }
    Ok(())
}

fn write_chunk(out: &mut Vec<u8>, chunk: &Chunk) -> Result<(), TagError> {
    out.put_u16(chunk.section_mask());
    for (_, section) in chunk.sections() {
        match section.storage() {
            BlockStorage::Legacy { blocks, metadata } => {
                out.put_slice(blocks);
                out.put_slice(metadata);
            }
            BlockStorage::Modern {
                palette,
                bits,
                states,
            } => {
                out.put_u16(palette.len() as u16);
                for entry in palette {
                    tag::write_root(out, entry)?;
                }
                out.put_u8(*bits);
                out.put_u16(states.len() as u16);
                for word in states {
                    out.put_i64(*word);
                }
            }
        }
    }
    out.put_slice(chunk.biomes());
    Ok(())
}

fn write_compounds(
    out: &mut Vec<u8>,
    compounds: &[Compound],
    what: &'static str,
) -> Result<(), EncodeError> {
    out.put_u32(compounds.len() as u32);
    for c in compounds {
        tag::write_root_compound(out, c).map_err(|source| EncodeError::Section { what, source })?;
    }
    Ok(())
}
