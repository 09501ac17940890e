//! Fixed leading structure of a world blob.

use super::reader::Reader;
use super::{Compression, DecodeError, FORMAT_VERSION, MAGIC};
use crate::types::Encoding;
use bytes::BufMut;

/// Encoded size of a [`Header`].
pub const HEADER_LEN: usize = 2 + 1 + 1 + 1 + 16 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub encoding: Encoding,
    pub compression: Compression,
    pub digest: [u8; 16],
    pub payload_len: u32,
}

impl Header {
    /// Parse the header at the start of `bytes` without touching the payload.
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::read(&mut Reader::new(bytes))
    }

    /// Read a header. The version is checked right after the magic so a blob
    /// from a newer writer is reported as such even if the rest of its
    /// header no longer matches this layout.
    pub(crate) fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let magic = r.bytes(MAGIC.len(), "header magic")?;
        if magic != MAGIC {
            return Err(DecodeError::corrupted(format!(
                "bad magic {:02x}{:02x}",
                magic[0], magic[1]
            )));
        }

        let version = r.u8("header version")?;
        if version == 0 {
            return Err(DecodeError::corrupted("header version 0"));
        }
        if version > FORMAT_VERSION {
            return Err(DecodeError::NewerFormat(version));
        }

        let encoding = match r.u8("encoding flag")? {
            0 => Encoding::Legacy,
            1 => Encoding::Modern,
            other => {
                return Err(DecodeError::corrupted(format!(
                    "unknown encoding flag {}",
                    other
                )))
            }
        };

        let marker = r.u8("compression marker")?;
        let compression = Compression::from_marker(marker).ok_or_else(|| {
            DecodeError::corrupted(format!("unknown compression marker {}", marker))
        })?;

        let mut digest = [0u8; 16];
        digest.copy_from_slice(r.bytes(16, "payload digest")?);
        let payload_len = r.u32("payload length")?;

        Ok(Self {
            version,
            encoding,
            compression,
            digest,
            payload_len,
        })
    }

    pub fn write(&self, out: &mut impl BufMut) {
        out.put_slice(&MAGIC);
        out.put_u8(self.version);
        out.put_u8(u8::from(self.encoding.is_modern()));
        out.put_u8(self.compression.marker());
        out.put_slice(&self.digest);
        out.put_u32(self.payload_len);
    }
}
