//! Netlink attribute (TLV) encoding and schema-driven decoding.
//!
//! Netlink attributes do not describe their own payload type, so decoding is
//! driven by a [`Schema`]: a table naming the kind of each known tag, plus an
//! optional kind applied to every other tag (homogeneous arrays where the tag
//! is just an index). Nested kinds recurse into their own schema.

use crate::types::{align, GENL_HDRLEN, NLA_F_NESTED, NLA_HDRLEN, NLA_TYPE_MASK, NLMSG_HDRLEN};
use crate::CodecError;
use indexmap::IndexMap;

/// Default capacity of one outbound message (one page, as libnl allocates).
pub const DEFAULT_MESSAGE_CAPACITY: usize = 4096;

#[derive(Clone, Copy, Debug)]
pub enum AttrKind {
    U8,
    U16,
    U32,
    U64,
    S8,
    S32,
    /// u16 transmitted little-endian regardless of host order.
    Le16,
    /// u64 transmitted little-endian regardless of host order.
    Le64,
    Str,
    Flag,
    Raw,
    Nested(&'static Schema),
}

impl AttrKind {
    fn name(self) -> &'static str {
        match self {
            AttrKind::U8 => "u8",
            AttrKind::U16 | AttrKind::Le16 => "u16",
            AttrKind::U32 => "u32",
            AttrKind::U64 | AttrKind::Le64 => "u64",
            AttrKind::S8 => "s8",
            AttrKind::S32 => "s32",
            AttrKind::Str => "string",
            AttrKind::Flag => "flag",
            AttrKind::Raw => "raw",
            AttrKind::Nested(_) => "nested",
        }
    }
}

#[derive(Debug)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [(u16, AttrKind)],
    /// Kind for tags not listed in `fields`; `None` keeps them raw.
    pub rest: Option<AttrKind>,
}

impl Schema {
    /// Schema of an unlabelled list: every tag is an index with the same kind.
    pub const fn array(name: &'static str, kind: AttrKind) -> Self {
        Self {
            name,
            fields: &[],
            rest: Some(kind),
        }
    }

    pub fn kind_of(&self, tag: u16) -> AttrKind {
        self.fields
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, k)| *k)
            .or(self.rest)
            .unwrap_or(AttrKind::Raw)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    S8(i8),
    S32(i32),
    Str(String),
    Flag,
    Nested(AttrMap),
    Raw(Vec<u8>),
}

impl AttrValue {
    pub fn as_u8(&self) -> Option<u8> {
        match self {
            AttrValue::U8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self {
            AttrValue::U16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            AttrValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AttrValue::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i8(&self) -> Option<i8> {
        match self {
            AttrValue::S8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            AttrValue::S32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_nested(&self) -> Option<&AttrMap> {
        match self {
            AttrValue::Nested(m) => Some(m),
            _ => None,
        }
    }
}

/// Attributes of one message level, in transmission order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttrMap(IndexMap<u16, AttrValue>);

impl AttrMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later duplicates replace the value but keep the first position.
    pub fn insert(&mut self, tag: u16, value: AttrValue) {
        self.0.insert(tag, value);
    }

    pub fn get(&self, tag: u16) -> Option<&AttrValue> {
        self.0.get(&tag)
    }

    pub fn contains(&self, tag: u16) -> bool {
        self.0.contains_key(&tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &AttrValue)> {
        self.0.iter().map(|(t, v)| (*t, v))
    }

    pub fn tags(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn u8(&self, tag: u16) -> Option<u8> {
        self.get(tag).and_then(AttrValue::as_u8)
    }

    pub fn u16(&self, tag: u16) -> Option<u16> {
        self.get(tag).and_then(AttrValue::as_u16)
    }

    pub fn u32(&self, tag: u16) -> Option<u32> {
        self.get(tag).and_then(AttrValue::as_u32)
    }

    pub fn u64(&self, tag: u16) -> Option<u64> {
        self.get(tag).and_then(AttrValue::as_u64)
    }

    pub fn i8(&self, tag: u16) -> Option<i8> {
        self.get(tag).and_then(AttrValue::as_i8)
    }

    pub fn i32(&self, tag: u16) -> Option<i32> {
        self.get(tag).and_then(AttrValue::as_i32)
    }

    pub fn str(&self, tag: u16) -> Option<&str> {
        self.get(tag).and_then(AttrValue::as_str)
    }

    pub fn nested(&self, tag: u16) -> Option<&AttrMap> {
        self.get(tag).and_then(AttrValue::as_nested)
    }
}

impl FromIterator<(u16, AttrValue)> for AttrMap {
    fn from_iter<I: IntoIterator<Item = (u16, AttrValue)>>(iter: I) -> Self {
        let mut map = AttrMap::new();
        for (tag, value) in iter {
            map.insert(tag, value);
        }
        map
    }
}

/// Parse a run of attributes according to `schema`.
pub fn parse_attrs(buf: &[u8], schema: &'static Schema) -> Result<AttrMap, CodecError> {
    let mut map = AttrMap::new();
    let mut rest = buf;
    while rest.len() >= NLA_HDRLEN {
        let len = usize::from(u16::from_ne_bytes([rest[0], rest[1]]));
        let tag = u16::from_ne_bytes([rest[2], rest[3]]) & NLA_TYPE_MASK;
        if len < NLA_HDRLEN || len > rest.len() {
            return Err(CodecError::BadLength { what: "nlattr", len });
        }
        let payload = &rest[NLA_HDRLEN..len];
        let value = decode_value(schema, tag, schema.kind_of(tag), payload)?;
        map.insert(tag, value);
        rest = &rest[align(len).min(rest.len())..];
    }
    Ok(map)
}

fn decode_value(
    schema: &'static Schema,
    tag: u16,
    kind: AttrKind,
    p: &[u8],
) -> Result<AttrValue, CodecError> {
    let mismatch = || CodecError::SchemaMismatch {
        schema: schema.name,
        tag,
        expected: kind.name(),
        len: p.len(),
    };
    let value = match kind {
        AttrKind::U8 => AttrValue::U8(*p.first().ok_or_else(mismatch)?),
        AttrKind::S8 => AttrValue::S8(i8::from_ne_bytes([*p.first().ok_or_else(mismatch)?])),
        AttrKind::U16 => AttrValue::U16(u16::from_ne_bytes(fixed(p).ok_or_else(mismatch)?)),
        AttrKind::Le16 => AttrValue::U16(u16::from_le_bytes(fixed(p).ok_or_else(mismatch)?)),
        AttrKind::U32 => AttrValue::U32(u32::from_ne_bytes(fixed(p).ok_or_else(mismatch)?)),
        AttrKind::S32 => AttrValue::S32(i32::from_ne_bytes(fixed(p).ok_or_else(mismatch)?)),
        AttrKind::U64 => AttrValue::U64(u64::from_ne_bytes(fixed(p).ok_or_else(mismatch)?)),
        AttrKind::Le64 => AttrValue::U64(u64::from_le_bytes(fixed(p).ok_or_else(mismatch)?)),
        AttrKind::Str => {
            let end = p.iter().position(|&b| b == 0).unwrap_or(p.len());
            let s = std::str::from_utf8(&p[..end]).map_err(|_| CodecError::Utf8 { tag })?;
            AttrValue::Str(s.to_owned())
        }
        AttrKind::Flag => AttrValue::Flag,
        AttrKind::Raw => AttrValue::Raw(p.to_vec()),
        AttrKind::Nested(inner) => AttrValue::Nested(parse_attrs(p, inner)?),
    };
    Ok(value)
}

fn fixed<const N: usize>(p: &[u8]) -> Option<[u8; N]> {
    p.get(..N)?.try_into().ok()
}

/// Bounded writer for a run of attributes.
#[derive(Clone, Debug)]
pub struct AttrBuf {
    buf: Vec<u8>,
    capacity: usize,
}

impl Default for AttrBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl AttrBuf {
    /// Attribute area of a default-capacity generic netlink message.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MESSAGE_CAPACITY - NLMSG_HDRLEN - GENL_HDRLEN)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put(&mut self, tag: u16, payload: &[u8]) -> Result<&mut Self, CodecError> {
        let len = NLA_HDRLEN + payload.len();
        let len16 = u16::try_from(len).map_err(|_| CodecError::BadLength {
            what: "nlattr",
            len,
        })?;
        let needed = self.buf.len() + align(len);
        if needed > self.capacity {
            return Err(CodecError::Capacity {
                needed,
                capacity: self.capacity,
            });
        }
        self.buf.extend_from_slice(&len16.to_ne_bytes());
        self.buf.extend_from_slice(&tag.to_ne_bytes());
        self.buf.extend_from_slice(payload);
        self.buf.resize(needed, 0);
        Ok(self)
    }

    pub fn put_u8(&mut self, tag: u16, v: u8) -> Result<&mut Self, CodecError> {
        self.put(tag, &[v])
    }

    pub fn put_s8(&mut self, tag: u16, v: i8) -> Result<&mut Self, CodecError> {
        self.put(tag, &v.to_ne_bytes())
    }

    pub fn put_u16(&mut self, tag: u16, v: u16) -> Result<&mut Self, CodecError> {
        self.put(tag, &v.to_ne_bytes())
    }

    pub fn put_le16(&mut self, tag: u16, v: u16) -> Result<&mut Self, CodecError> {
        self.put(tag, &v.to_le_bytes())
    }

    pub fn put_u32(&mut self, tag: u16, v: u32) -> Result<&mut Self, CodecError> {
        self.put(tag, &v.to_ne_bytes())
    }

    pub fn put_s32(&mut self, tag: u16, v: i32) -> Result<&mut Self, CodecError> {
        self.put(tag, &v.to_ne_bytes())
    }

    pub fn put_u64(&mut self, tag: u16, v: u64) -> Result<&mut Self, CodecError> {
        self.put(tag, &v.to_ne_bytes())
    }

    pub fn put_le64(&mut self, tag: u16, v: u64) -> Result<&mut Self, CodecError> {
        self.put(tag, &v.to_le_bytes())
    }

    /// NUL-terminated string.
    pub fn put_str(&mut self, tag: u16, s: &str) -> Result<&mut Self, CodecError> {
        let mut payload = Vec::with_capacity(s.len() + 1);
        payload.extend_from_slice(s.as_bytes());
        payload.push(0);
        self.put(tag, &payload)
    }

    pub fn put_flag(&mut self, tag: u16) -> Result<&mut Self, CodecError> {
        self.put(tag, &[])
    }

    /// Write a nested attribute whose children are produced by `fill`.
    pub fn nest<F>(&mut self, tag: u16, fill: F) -> Result<&mut Self, CodecError>
    where
        F: FnOnce(&mut AttrBuf) -> Result<(), CodecError>,
    {
        let mut child = AttrBuf::with_capacity(self.remaining().saturating_sub(NLA_HDRLEN));
        fill(&mut child)?;
        self.put(tag | NLA_F_NESTED, child.as_bytes())
    }

    pub fn put_value(&mut self, tag: u16, value: &AttrValue) -> Result<&mut Self, CodecError> {
        match value {
            AttrValue::U8(v) => self.put_u8(tag, *v),
            AttrValue::U16(v) => self.put_u16(tag, *v),
            AttrValue::U32(v) => self.put_u32(tag, *v),
            AttrValue::U64(v) => self.put_u64(tag, *v),
            AttrValue::S8(v) => self.put_s8(tag, *v),
            AttrValue::S32(v) => self.put_s32(tag, *v),
            AttrValue::Str(s) => self.put_str(tag, s),
            AttrValue::Flag => self.put_flag(tag),
            AttrValue::Raw(bytes) => self.put(tag, bytes),
            AttrValue::Nested(map) => self.nest(tag, |child| {
                for (t, v) in map.iter() {
                    child.put_value(t, v)?;
                }
                Ok(())
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static LEVELS: Schema = Schema::array("levels", AttrKind::S32);
    static CHANNELS: Schema = Schema::array("channels", AttrKind::Flag);
    static PAGES: Schema = Schema::array("pages", AttrKind::Nested(&CHANNELS));
    static TOP: Schema = Schema {
        name: "top",
        fields: &[
            (1, AttrKind::U32),
            (2, AttrKind::Str),
            (3, AttrKind::Le16),
            (4, AttrKind::Nested(&LEVELS)),
            (5, AttrKind::Nested(&PAGES)),
            (6, AttrKind::U8),
        ],
        rest: None,
    };

    #[test]
    fn le16_decodes_to_host_order() {
        let mut buf = AttrBuf::new();
        buf.put(3, &[0x34, 0x12]).unwrap();
        let map = parse_attrs(buf.as_bytes(), &TOP).unwrap();
        assert_eq!(map.u16(3), Some(4660));
    }

    #[test]
    fn nested_array_keeps_transmission_order() {
        let mut buf = AttrBuf::new();
        buf.nest(4, |lv| {
            lv.put_s32(0, 500)?.put_s32(1, 1200)?.put_s32(2, -300)?;
            Ok(())
        })
        .unwrap();
        let map = parse_attrs(buf.as_bytes(), &TOP).unwrap();
        let levels: Vec<i32> = map
            .nested(4)
            .unwrap()
            .iter()
            .filter_map(|(_, v)| v.as_i32())
            .collect();
        assert_eq!(levels, vec![500, 1200, -300]);
    }

    #[test]
    fn doubly_nested_flags_record_tags() {
        let mut buf = AttrBuf::new();
        buf.nest(5, |pages| {
            pages.nest(0, |chs| {
                for ch in [11u16, 12, 26] {
                    chs.put_flag(ch)?;
                }
                Ok(())
            })?;
            Ok(())
        })
        .unwrap();
        let map = parse_attrs(buf.as_bytes(), &TOP).unwrap();
        let page0 = map.nested(5).unwrap().nested(0).unwrap();
        assert_eq!(page0.tags().collect::<Vec<_>>(), vec![11, 12, 26]);
        assert_eq!(page0.get(12), Some(&AttrValue::Flag));
    }

    #[test]
    fn strings_drop_nul_terminator() {
        let mut buf = AttrBuf::new();
        buf.put_str(2, "wpan-phy0").unwrap();
        let map = parse_attrs(buf.as_bytes(), &TOP).unwrap();
        assert_eq!(map.str(2), Some("wpan-phy0"));
    }

    #[test]
    fn unknown_tags_stay_raw() {
        let mut buf = AttrBuf::new();
        buf.put(42, &[1, 2, 3]).unwrap();
        let map = parse_attrs(buf.as_bytes(), &TOP).unwrap();
        assert_eq!(map.get(42), Some(&AttrValue::Raw(vec![1, 2, 3])));
    }

    #[test]
    fn duplicate_tag_last_value_wins() {
        let mut buf = AttrBuf::new();
        buf.put_u32(1, 3).unwrap().put_u8(6, 1).unwrap().put_u32(1, 9).unwrap();
        let map = parse_attrs(buf.as_bytes(), &TOP).unwrap();
        assert_eq!(map.u32(1), Some(9));
        assert_eq!(map.tags().collect::<Vec<_>>(), vec![1, 6]);
    }

    #[test]
    fn short_scalar_is_schema_mismatch() {
        let mut buf = AttrBuf::new();
        buf.put(1, &[1, 2]).unwrap();
        let err = parse_attrs(buf.as_bytes(), &TOP).unwrap_err();
        assert!(matches!(
            err,
            CodecError::SchemaMismatch {
                tag: 1,
                expected: "u32",
                len: 2,
                ..
            }
        ));
    }

    #[test]
    fn attribute_length_past_buffer_is_rejected() {
        let mut bytes = 40u16.to_ne_bytes().to_vec();
        bytes.extend_from_slice(&1u16.to_ne_bytes());
        bytes.extend_from_slice(&[0; 4]);
        assert_eq!(
            parse_attrs(&bytes, &TOP),
            Err(CodecError::BadLength {
                what: "nlattr",
                len: 40
            })
        );
    }

    #[test]
    fn put_past_capacity_fails_without_writing() {
        let mut buf = AttrBuf::with_capacity(8);
        buf.put_u32(1, 5).unwrap();
        let err = buf.put_u32(1, 6).unwrap_err();
        assert_eq!(
            err,
            CodecError::Capacity {
                needed: 16,
                capacity: 8
            }
        );
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn put_value_encodes_nested_maps() {
        let inner: AttrMap = [(0, AttrValue::S32(-100)), (1, AttrValue::S32(200))]
            .into_iter()
            .collect();
        let mut buf = AttrBuf::new();
        buf.put_value(4, &AttrValue::Nested(inner.clone())).unwrap();
        let map = parse_attrs(buf.as_bytes(), &TOP).unwrap();
        assert_eq!(map.nested(4), Some(&inner));
    }
}
