//! Structured tags: the self-describing tree format used for entities,
//! tile entities, block-state palettes and per-world extra data.
//!
//! The wire form follows the familiar named-tag layout (type id byte, then
//! payload; compounds are `(id, name, payload)` triples terminated by id 0).
//! Compounds keep their fields in file order and [`TagList`] remembers its
//! element type even when empty, so an encoded tree re-encodes to exactly
//! the bytes it was read from. Fields this crate does not understand are
//! carried along untouched.

use crate::format::reader::Reader;
use crate::format::DecodeError;
use bytes::BufMut;
use thiserror::Error;

/// Nesting limit for compounds and lists.
pub const MAX_DEPTH: usize = 512;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
#[repr(u8)]
pub enum TagKind {
    End = 0,
    Byte = 1,
    Short = 2,
    Int = 3,
    Long = 4,
    Float = 5,
    Double = 6,
    ByteArray = 7,
    String = 8,
    List = 9,
    Compound = 10,
    IntArray = 11,
    LongArray = 12,
}

impl TagKind {
    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0 => TagKind::End,
            1 => TagKind::Byte,
            2 => TagKind::Short,
            3 => TagKind::Int,
            4 => TagKind::Long,
            5 => TagKind::Float,
            6 => TagKind::Double,
            7 => TagKind::ByteArray,
            8 => TagKind::String,
            9 => TagKind::List,
            10 => TagKind::Compound,
            11 => TagKind::IntArray,
            12 => TagKind::LongArray,
            _ => return None,
        })
    }

    pub fn id(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("list holds {expected:?} tags, cannot add {found:?}")]
    ListKindMismatch { expected: TagKind, found: TagKind },

    #[error("string of {0} bytes does not fit a u16 length")]
    StringTooLong(usize),

    #[error("{0} elements do not fit an i32 length")]
    TooManyElements(usize),

    #[error("tag nesting deeper than {}", MAX_DEPTH)]
    TooDeep,
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<i8>),
    String(String),
    List(TagList),
    Compound(Compound),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagList {
    kind: TagKind,
    items: Vec<Tag>,
}

/// Ordered name → tag map. Duplicate names read from disk are kept as-is.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Compound {
    fields: Vec<(String, Tag)>,
}

impl Tag {
    pub fn kind(&self) -> TagKind {
        match self {
            Tag::Byte(_) => TagKind::Byte,
            Tag::Short(_) => TagKind::Short,
            Tag::Int(_) => TagKind::Int,
            Tag::Long(_) => TagKind::Long,
            Tag::Float(_) => TagKind::Float,
            Tag::Double(_) => TagKind::Double,
            Tag::ByteArray(_) => TagKind::ByteArray,
            Tag::String(_) => TagKind::String,
            Tag::List(_) => TagKind::List,
            Tag::Compound(_) => TagKind::Compound,
            Tag::IntArray(_) => TagKind::IntArray,
            Tag::LongArray(_) => TagKind::LongArray,
        }
    }

    pub fn as_compound(&self) -> Option<&Compound> {
        match self {
            Tag::Compound(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Tag::Byte(v) => Some(i32::from(*v)),
            Tag::Short(v) => Some(i32::from(*v)),
            Tag::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Tag::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Compound> for Tag {
    fn from(c: Compound) -> Self {
        Tag::Compound(c)
    }
}

impl TagList {
    pub fn new(kind: TagKind) -> Self {
        Self {
            kind,
            items: Vec::new(),
        }
    }

    pub fn kind(&self) -> TagKind {
        self.kind
    }

    pub fn push(&mut self, tag: Tag) -> Result<(), TagError> {
        if self.kind == TagKind::End && self.items.is_empty() {
            self.kind = tag.kind();
        }
        if tag.kind() != self.kind {
            return Err(TagError::ListKindMismatch {
                expected: self.kind,
                found: tag.kind(),
            });
        }
        self.items.push(tag);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Compound {
    pub fn new() -> Self {
        Self::default()
    }

    /// First field with this name.
    pub fn get(&self, name: &str) -> Option<&Tag> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    /// Replace the first field with this name, or append a new one.
    pub fn insert(&mut self, name: impl Into<String>, tag: Tag) -> Option<Tag> {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, tag)),
            None => {
                self.fields.push((name, tag));
                None
            }
        }
    }

    pub fn with(mut self, name: impl Into<String>, tag: Tag) -> Self {
        self.insert(name, tag);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tag)> {
        self.fields.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Read an unnamed root tag: type id, then payload.
pub fn read_root(r: &mut Reader<'_>) -> Result<Tag, DecodeError> {
    let id = r.u8("tag type")?;
    let kind = TagKind::from_id(id)
        .ok_or_else(|| DecodeError::corrupted(format!("unknown tag type {}", id)))?;
    if kind == TagKind::End {
        return Err(DecodeError::corrupted("root tag cannot be an end tag"));
    }
    read_payload(r, kind, 0)
}

/// Read a root tag and require it to be a compound.
pub fn read_root_compound(r: &mut Reader<'_>, what: &str) -> Result<Compound, DecodeError> {
    match read_root(r)? {
        Tag::Compound(c) => Ok(c),
        other => Err(DecodeError::corrupted(format!(
            "{} must be a compound tag, found {:?}",
            what,
            other.kind()
        ))),
    }
}

fn read_string(r: &mut Reader<'_>) -> Result<String, DecodeError> {
    let len = r.u16("string length")? as usize;
    let raw = r.bytes(len, "string")?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| DecodeError::corrupted("string is not valid UTF-8"))
}

fn read_payload(r: &mut Reader<'_>, kind: TagKind, depth: usize) -> Result<Tag, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::corrupted(format!(
            "tag nesting deeper than {}",
            MAX_DEPTH
        )));
    }

    Ok(match kind {
        TagKind::End => return Err(DecodeError::corrupted("unexpected end tag")),
        TagKind::Byte => Tag::Byte(r.i8("byte tag")?),
        TagKind::Short => Tag::Short(r.i16("short tag")?),
        TagKind::Int => Tag::Int(r.i32("int tag")?),
        TagKind::Long => Tag::Long(r.i64("long tag")?),
        TagKind::Float => Tag::Float(r.f32("float tag")?),
        TagKind::Double => Tag::Double(r.f64("double tag")?),
        TagKind::ByteArray => {
            let n = r.count(1, "byte array length")?;
            Tag::ByteArray(r.bytes(n, "byte array")?.iter().map(|b| *b as i8).collect())
        }
        TagKind::String => Tag::String(read_string(r)?),
        TagKind::List => {
            let id = r.u8("list element type")?;
            let elem = TagKind::from_id(id).ok_or_else(|| {
                DecodeError::corrupted(format!("unknown list element type {}", id))
            })?;
            // Every element payload is at least one byte long.
            let n = r.count(1, "list length")?;
            if elem == TagKind::End && n > 0 {
                return Err(DecodeError::corrupted("non-empty list of end tags"));
            }
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                items.push(read_payload(r, elem, depth + 1)?);
            }
            Tag::List(TagList { kind: elem, items })
        }
        TagKind::Compound => {
            let mut fields = Vec::new();
            loop {
                let id = r.u8("compound field type")?;
                let field_kind = TagKind::from_id(id).ok_or_else(|| {
                    DecodeError::corrupted(format!("unknown tag type {}", id))
                })?;
                if field_kind == TagKind::End {
                    break;
                }
                let name = read_string(r)?;
                let value = read_payload(r, field_kind, depth + 1)?;
                fields.push((name, value));
            }
            Tag::Compound(Compound { fields })
        }
        TagKind::IntArray => {
            let n = r.count(4, "int array length")?;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(r.i32("int array")?);
            }
            Tag::IntArray(v)
        }
        TagKind::LongArray => {
            let n = r.count(8, "long array length")?;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(r.i64("long array")?);
            }
            Tag::LongArray(v)
        }
    })
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Write an unnamed root tag. Fails, before writing anything, on a tree the
/// reader would reject: oversized strings or lengths, or excessive nesting.
pub fn write_root(out: &mut impl BufMut, tag: &Tag) -> Result<(), TagError> {
    check_payload(tag, 0)?;
    out.put_u8(tag.kind().id());
    write_payload(out, tag);
    Ok(())
}

pub fn write_root_compound(out: &mut impl BufMut, c: &Compound) -> Result<(), TagError> {
    check_compound(c, 0)?;
    out.put_u8(TagKind::Compound.id());
    write_compound(out, c);
    Ok(())
}

fn check_len(len: usize) -> Result<(), TagError> {
    if len > i32::MAX as usize {
        return Err(TagError::TooManyElements(len));
    }
    Ok(())
}

fn check_string(s: &str) -> Result<(), TagError> {
    if s.len() > u16::MAX as usize {
        return Err(TagError::StringTooLong(s.len()));
    }
    Ok(())
}

fn check_compound(c: &Compound, depth: usize) -> Result<(), TagError> {
    if depth > MAX_DEPTH {
        return Err(TagError::TooDeep);
    }
    for (name, value) in &c.fields {
        check_string(name)?;
        check_payload(value, depth + 1)?;
    }
    Ok(())
}

fn check_payload(tag: &Tag, depth: usize) -> Result<(), TagError> {
    if depth > MAX_DEPTH {
        return Err(TagError::TooDeep);
    }
    match tag {
        Tag::ByteArray(v) => check_len(v.len()),
        Tag::IntArray(v) => check_len(v.len()),
        Tag::LongArray(v) => check_len(v.len()),
        Tag::String(s) => check_string(s),
        Tag::List(list) => {
            check_len(list.items.len())?;
            list.items
                .iter()
                .try_for_each(|item| check_payload(item, depth + 1))
        }
        Tag::Compound(c) => check_compound(c, depth),
        _ => Ok(()),
    }
}

fn write_compound(out: &mut impl BufMut, c: &Compound) {
    for (name, value) in &c.fields {
        out.put_u8(value.kind().id());
        write_string(out, name);
        write_payload(out, value);
    }
    out.put_u8(TagKind::End.id());
}

// Lengths were checked by `check_payload`.
fn write_string(out: &mut impl BufMut, s: &str) {
    out.put_u16(s.len() as u16);
    out.put_slice(s.as_bytes());
}
fn write_payload(out: &mut impl BufMut, tag: &Tag) {
    match tag {
        Tag::Byte(v) => out.put_i8(*v),
        Tag::Short(v) => out.put_i16(*v),
        Tag::Int(v) => out.put_i32(*v),
        Tag::Long(v) => out.put_i64(*v),
        Tag::Float(v) => out.put_u32(v.to_bits()),
        Tag::Double(v) => out.put_u64(v.to_bits()),
        Tag::ByteArray(v) => {
            out.put_i32(v.len() as i32);
            for b in v {
                out.put_i8(*b);
            }
        }
        Tag::String(s) => write_string(out, s),
        Tag::List(list) => {
            out.put_u8(list.kind.id());
            out.put_i32(list.items.len() as i32);
            for item in &list.items {
                write_payload(out, item);
            }
        }
        Tag::Compound(c) => write_compound(out, c),
        Tag::IntArray(v) => {
            out.put_i32(v.len() as i32);
            for x in v {
                out.put_i32(*x);
            }
        }
        Tag::LongArray(v) => {
            out.put_i32(v.len() as i32);
            for x in v {
                out.put_i64(*x);
            }
        }
    }
}
