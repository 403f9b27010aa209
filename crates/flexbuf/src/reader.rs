//! Decoder for the FlexBuffers format.
//!
//! A [`Reader`] is an immutable cursor over a finished buffer. It
//! decodes only the bytes each access touches: no upfront parse pass,
//! no allocation until the caller materializes. Navigation starts from
//! the buffer's last two bytes (the root descriptor) and walks the
//! tree purely via offset arithmetic.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt::Write as _;

use crate::error::DecodeError;
use crate::types::{BitWidth, FlexType};
use crate::value::Value;

/// Nesting bound for recursive traversal. Offsets in a corrupt buffer
/// can reference their own container, so unbounded recursion would
/// overflow the thread stack instead of returning an error.
const MAX_DEPTH: usize = 128;

/// A lazy view of one node in a finished buffer.
///
/// Identity is `(buffer, offset, parent width, own byte width, type)`.
/// Views are `Copy`; any number of them may read the same buffer
/// concurrently since reads never mutate anything.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    buffer: &'a [u8],
    offset: usize,
    /// Width of the enclosing container's slots, used to decode this
    /// node's own field.
    parent_width: usize,
    /// This node's payload width, from its packed-type byte.
    byte_width: usize,
    flex_type: FlexType,
}

impl<'a> Reader<'a> {
    /// Opens the root of a finished buffer.
    ///
    /// The last byte is the root's byte width, the second-to-last its
    /// packed type; the root value sits immediately before them.
    pub fn from_bytes(buffer: &'a [u8]) -> Result<Reader<'a>, DecodeError> {
        if buffer.len() < 3 {
            return Err(DecodeError::BufferTooSmall { len: buffer.len() });
        }
        let byte_width = buffer[buffer.len() - 1] as usize;
        let packed = buffer[buffer.len() - 2];
        if !matches!(byte_width, 1 | 2 | 4 | 8) || byte_width + 2 > buffer.len() {
            return Err(DecodeError::InvalidWidth { width: byte_width });
        }
        let offset = buffer.len() - byte_width - 2;
        Reader::unpack(buffer, offset, byte_width, packed)
    }

    fn unpack(
        buffer: &'a [u8],
        offset: usize,
        parent_width: usize,
        packed: u8,
    ) -> Result<Reader<'a>, DecodeError> {
        Ok(Reader {
            buffer,
            offset,
            parent_width,
            byte_width: BitWidth::from_packed_bits(packed).byte_width(),
            flex_type: FlexType::from_packed(packed)?,
        })
    }

    /// The node's wire type.
    pub fn flex_type(&self) -> FlexType {
        self.flex_type
    }

    pub fn is_null(&self) -> bool {
        self.flex_type == FlexType::Null
    }

    /// Element count for vectors and maps, byte count for blobs,
    /// character-byte count for strings and keys, 0 for null, 1 for
    /// any other scalar.
    pub fn length(&self) -> Result<usize, DecodeError> {
        // Fixed vectors carry their count in the tag, before the
        // generic vector check.
        if let Some(size) = self.flex_type.fixed_typed_vector_element_size() {
            return Ok(size);
        }
        if self.flex_type == FlexType::Blob
            || self.flex_type == FlexType::Map
            || self.flex_type.is_vector()
        {
            let payload = self.indirect()?;
            let at = payload
                .checked_sub(self.byte_width)
                .ok_or(DecodeError::BadOffset {
                    offset: payload,
                    distance: self.byte_width as u64,
                })?;
            let len = self.read_uint(at, self.byte_width)? as usize;
            // The claimed payload span must fit the buffer, or a lying
            // length field could drive huge allocations downstream.
            let unit = if self.flex_type == FlexType::Blob {
                1
            } else {
                self.byte_width
            };
            len.checked_mul(unit)
                .and_then(|span| payload.checked_add(span))
                .filter(|&end| end <= self.buffer.len())
                .ok_or(DecodeError::OutOfBounds {
                    offset: payload,
                    width: len,
                    len: self.buffer.len(),
                })?;
            return Ok(len);
        }
        match self.flex_type {
            FlexType::Null => Ok(0),
            FlexType::String => self.string_length(),
            FlexType::Key => self.key_length(),
            _ => Ok(1),
        }
    }

    /// Reads an integer node, resolving one indirection for
    /// `IndirectInt`.
    pub fn as_i64(&self) -> Result<i64, DecodeError> {
        match self.flex_type {
            FlexType::Int => self.read_int(self.offset, self.parent_width),
            FlexType::IndirectInt => {
                let payload = self.indirect()?;
                self.read_int(payload, self.byte_width)
            }
            _ => Err(DecodeError::UnexpectedType {
                expected: "an Int node",
                found: self.flex_type,
            }),
        }
    }

    /// Reads an unsigned integer node.
    pub fn as_u64(&self) -> Result<u64, DecodeError> {
        match self.flex_type {
            FlexType::UInt => self.read_uint(self.offset, self.parent_width),
            FlexType::IndirectUInt => {
                let payload = self.indirect()?;
                self.read_uint(payload, self.byte_width)
            }
            _ => Err(DecodeError::UnexpectedType {
                expected: "a UInt node",
                found: self.flex_type,
            }),
        }
    }

    /// Reads a float node. Width-4 fields decode as single precision.
    pub fn as_f64(&self) -> Result<f64, DecodeError> {
        match self.flex_type {
            FlexType::Float => self.read_float(self.offset, self.parent_width),
            FlexType::IndirectFloat => {
                let payload = self.indirect()?;
                self.read_float(payload, self.byte_width)
            }
            _ => Err(DecodeError::UnexpectedType {
                expected: "a Float node",
                found: self.flex_type,
            }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, DecodeError> {
        match self.flex_type {
            FlexType::Bool => Ok(self.read_int(self.offset, self.parent_width)? != 0),
            _ => Err(DecodeError::UnexpectedType {
                expected: "a Bool node",
                found: self.flex_type,
            }),
        }
    }

    /// Borrows the UTF-8 text of a String or Key node.
    pub fn as_str(&self) -> Result<&'a str, DecodeError> {
        match self.flex_type {
            FlexType::String | FlexType::Key => {
                let size = self.length()?;
                let payload = self.indirect()?;
                let end = payload
                    .checked_add(size)
                    .filter(|&end| end <= self.buffer.len())
                    .ok_or(DecodeError::OutOfBounds {
                        offset: payload,
                        width: size,
                        len: self.buffer.len(),
                    })?;
                std::str::from_utf8(&self.buffer[payload..end])
                    .map_err(|_| DecodeError::InvalidUtf8 { context: "string" })
            }
            _ => Err(DecodeError::UnexpectedType {
                expected: "a String or Key node",
                found: self.flex_type,
            }),
        }
    }

    /// Borrows the raw bytes of a Blob node.
    pub fn as_blob(&self) -> Result<&'a [u8], DecodeError> {
        match self.flex_type {
            FlexType::Blob => {
                let payload = self.indirect()?;
                let size = self.length()?;
                let end = payload
                    .checked_add(size)
                    .filter(|&end| end <= self.buffer.len())
                    .ok_or(DecodeError::OutOfBounds {
                        offset: payload,
                        width: size,
                        len: self.buffer.len(),
                    })?;
                Ok(&self.buffer[payload..end])
            }
            _ => Err(DecodeError::UnexpectedType {
                expected: "a Blob node",
                found: self.flex_type,
            }),
        }
    }

    /// Indexed access into any vector form.
    ///
    /// Typed and fixed vectors derive the element type from the
    /// vector's own tag; generic vectors read the element's packed-type
    /// byte from the table after the values.
    pub fn index(&self, index: usize) -> Result<Reader<'a>, DecodeError> {
        if !self.flex_type.is_vector() {
            return Err(DecodeError::UnexpectedType {
                expected: "a vector node",
                found: self.flex_type,
            });
        }
        let len = self.length()?;
        if index >= len {
            return Err(DecodeError::IndexOutOfBounds { index, len });
        }
        let payload = self.indirect()?;
        let elem_offset = payload + index * self.byte_width;
        if let Some(element_type) = self.flex_type.typed_vector_element_type() {
            return Ok(Reader {
                buffer: self.buffer,
                offset: elem_offset,
                parent_width: self.byte_width,
                byte_width: 1,
                flex_type: element_type,
            });
        }
        if let Some(element_type) = self.flex_type.fixed_typed_vector_element_type() {
            return Ok(Reader {
                buffer: self.buffer,
                offset: elem_offset,
                parent_width: self.byte_width,
                byte_width: 1,
                flex_type: element_type,
            });
        }
        let packed = self.read_packed_at(payload, len, index)?;
        Reader::unpack(self.buffer, elem_offset, self.byte_width, packed)
    }

    /// Keyed access into a map via binary search over its key vector.
    /// Returns `None` when the key is absent.
    pub fn get(&self, key: &str) -> Result<Option<Reader<'a>>, DecodeError> {
        match self.key_index(key)? {
            Some(index) => Ok(Some(self.map_value_at(index)?)),
            None => Ok(None),
        }
    }

    /// Iterates child views: vectors yield elements in index order,
    /// maps yield values in stored key order, any other node yields
    /// itself once. Restartable; errors are local to the item.
    pub fn iter(&self) -> Iter<'a> {
        let counted = if self.flex_type.is_vector() || self.flex_type == FlexType::Map {
            self.length()
        } else {
            Ok(1)
        };
        match counted {
            Ok(len) => Iter {
                reader: *self,
                index: 0,
                len,
                failed: None,
            },
            Err(err) => Iter {
                reader: *self,
                index: 0,
                len: 1,
                failed: Some(err),
            },
        }
    }

    /// Iterates a map's `(key, value)` pairs in stored sorted order.
    /// Empty for non-map nodes.
    pub fn entries(&self) -> Entries<'a> {
        let counted = if self.flex_type == FlexType::Map {
            self.length()
        } else {
            Ok(0)
        };
        match counted {
            Ok(len) => Entries {
                reader: *self,
                index: 0,
                len,
                failed: None,
            },
            Err(err) => Entries {
                reader: *self,
                index: 0,
                len: 1,
                failed: Some(err),
            },
        }
    }

    /// Fully materializes the subtree, borrowing text and blob bytes
    /// from the buffer.
    pub fn value(&self) -> Result<Value<'a>, DecodeError> {
        self.value_at_depth(0)
    }

    fn value_at_depth(&self, depth: usize) -> Result<Value<'a>, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::DepthLimit { limit: MAX_DEPTH });
        }
        match self.flex_type {
            FlexType::Null => Ok(Value::Null),
            FlexType::Bool => self.as_bool().map(Value::Bool),
            FlexType::Int | FlexType::IndirectInt => self.as_i64().map(Value::Int),
            FlexType::UInt | FlexType::IndirectUInt => self.as_u64().map(Value::UInt),
            FlexType::Float | FlexType::IndirectFloat => self.as_f64().map(Value::Float),
            FlexType::String | FlexType::Key => {
                Ok(Value::String(Cow::Borrowed(self.as_str()?)))
            }
            FlexType::Blob => Ok(Value::Blob(Cow::Borrowed(self.as_blob()?))),
            FlexType::Map => {
                let len = self.length()?;
                let mut entries = Vec::with_capacity(len);
                for i in 0..len {
                    let key = self.map_key_at(i)?.as_str()?;
                    let value = self.map_value_at(i)?.value_at_depth(depth + 1)?;
                    entries.push((Cow::Borrowed(key), value));
                }
                Ok(Value::Map(entries))
            }
            _ => {
                let len = self.length()?;
                let mut items = Vec::with_capacity(len);
                for i in 0..len {
                    items.push(self.index(i)?.value_at_depth(depth + 1)?);
                }
                Ok(Value::Vector(items))
            }
        }
    }

    /// Renders the subtree as canonical JSON-like text: maps in stored
    /// key order, blobs as arrays of byte values, integral floats with
    /// a trailing `.0`.
    pub fn to_json(&self) -> Result<String, DecodeError> {
        let mut out = String::new();
        self.write_json(&mut out, 0)?;
        Ok(out)
    }

    fn write_json(&self, out: &mut String, depth: usize) -> Result<(), DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::DepthLimit { limit: MAX_DEPTH });
        }
        match self.flex_type {
            FlexType::Map => {
                out.push('{');
                let len = self.length()?;
                for i in 0..len {
                    if i > 0 {
                        out.push(',');
                    }
                    escape_json_string(self.map_key_at(i)?.as_str()?, out);
                    out.push(':');
                    self.map_value_at(i)?.write_json(out, depth + 1)?;
                }
                out.push('}');
            }
            FlexType::Blob => {
                out.push('[');
                for (i, byte) in self.as_blob()?.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, "{byte}");
                }
                out.push(']');
            }
            ty if ty.is_vector() => {
                out.push('[');
                let len = self.length()?;
                for i in 0..len {
                    if i > 0 {
                        out.push(',');
                    }
                    self.index(i)?.write_json(out, depth + 1)?;
                }
                out.push(']');
            }
            FlexType::String | FlexType::Key => escape_json_string(self.as_str()?, out),
            FlexType::Bool => out.push_str(if self.as_bool()? { "true" } else { "false" }),
            FlexType::Null => out.push_str("null"),
            FlexType::Int | FlexType::IndirectInt => {
                let _ = write!(out, "{}", self.as_i64()?);
            }
            FlexType::UInt | FlexType::IndirectUInt => {
                let _ = write!(out, "{}", self.as_u64()?);
            }
            _ => format_float(self.as_f64()?, out),
        }
        Ok(())
    }

    // =========================================================================
    // Map internals
    // =========================================================================

    /// Locates a map's parallel key vector: its reference and its own
    /// byte-width marker sit in the two prefix slots before the length
    /// word.
    fn map_key_at(&self, index: usize) -> Result<Reader<'a>, DecodeError> {
        if self.flex_type != FlexType::Map {
            return Err(DecodeError::UnexpectedType {
                expected: "a Map node",
                found: self.flex_type,
            });
        }
        let payload = self.indirect()?;
        let keys_offset =
            payload
                .checked_sub(self.byte_width * 3)
                .ok_or(DecodeError::BadOffset {
                    offset: payload,
                    distance: (self.byte_width * 3) as u64,
                })?;
        let distance = self.read_uint(keys_offset, self.byte_width)?;
        let keys_payload = usize::try_from(distance)
            .ok()
            .and_then(|d| keys_offset.checked_sub(d))
            .ok_or(DecodeError::BadOffset {
                offset: keys_offset,
                distance,
            })?;
        let key_width = self.read_uint(keys_offset + self.byte_width, self.byte_width)? as usize;
        if !matches!(key_width, 1 | 2 | 4 | 8) {
            return Err(DecodeError::InvalidWidth { width: key_width });
        }
        let elem_offset = keys_payload
            .checked_add(index.checked_mul(key_width).unwrap_or(usize::MAX))
            .ok_or(DecodeError::OutOfBounds {
                offset: keys_payload,
                width: key_width,
                len: self.buffer.len(),
            })?;
        Ok(Reader {
            buffer: self.buffer,
            offset: elem_offset,
            parent_width: key_width,
            byte_width: key_width,
            flex_type: FlexType::Key,
        })
    }

    fn map_value_at(&self, index: usize) -> Result<Reader<'a>, DecodeError> {
        if self.flex_type != FlexType::Map {
            return Err(DecodeError::UnexpectedType {
                expected: "a Map node",
                found: self.flex_type,
            });
        }
        let len = self.length()?;
        let payload = self.indirect()?;
        let elem_offset = payload + index * self.byte_width;
        let packed = self.read_packed_at(payload, len, index)?;
        Reader::unpack(self.buffer, elem_offset, self.byte_width, packed)
    }

    /// Binary search over the sorted key vector; relies on the
    /// builder's ascending raw-byte ordering invariant.
    fn key_index(&self, key: &str) -> Result<Option<usize>, DecodeError> {
        if self.flex_type != FlexType::Map {
            return Err(DecodeError::UnexpectedType {
                expected: "a Map node",
                found: self.flex_type,
            });
        }
        let search = key.as_bytes();
        let len = self.length()?;
        if len == 0 {
            return Ok(None);
        }
        let mut low = 0usize;
        let mut high = len - 1;
        while low <= high {
            let mid = (low + high) >> 1;
            match self.compare_key_at(mid, search)? {
                Ordering::Equal => return Ok(Some(mid)),
                Ordering::Less => {
                    // Search key sorts before the candidate.
                    if mid == 0 {
                        return Ok(None);
                    }
                    high = mid - 1;
                }
                Ordering::Greater => low = mid + 1,
            }
        }
        Ok(None)
    }

    /// Orders the search key against the NUL-terminated candidate at
    /// `index`, byte by byte. A candidate that ends exactly where the
    /// search key continues is less.
    fn compare_key_at(&self, index: usize, search: &[u8]) -> Result<Ordering, DecodeError> {
        let candidate = self.map_key_at(index)?;
        let payload = candidate.indirect()?;
        for (i, &byte) in search.iter().enumerate() {
            let pos = payload + i;
            if pos >= self.buffer.len() {
                return Err(DecodeError::OutOfBounds {
                    offset: pos,
                    width: 1,
                    len: self.buffer.len(),
                });
            }
            match byte.cmp(&self.buffer[pos]) {
                Ordering::Equal => continue,
                unequal => return Ok(unequal),
            }
        }
        let pos = payload + search.len();
        if pos >= self.buffer.len() {
            return Err(DecodeError::OutOfBounds {
                offset: pos,
                width: 1,
                len: self.buffer.len(),
            });
        }
        if self.buffer[pos] == 0 {
            Ok(Ordering::Equal)
        } else {
            Ok(Ordering::Less)
        }
    }

    // =========================================================================
    // Primitive reads
    // =========================================================================

    /// Resolves one indirection: the field at `offset` holds the
    /// backward byte distance to the payload.
    fn indirect(&self) -> Result<usize, DecodeError> {
        let distance = self.read_uint(self.offset, self.parent_width)?;
        if distance > self.offset as u64 {
            return Err(DecodeError::BadOffset {
                offset: self.offset,
                distance,
            });
        }
        Ok(self.offset - distance as usize)
    }

    fn validate(&self, offset: usize, width: usize) -> Result<(), DecodeError> {
        if offset
            .checked_add(width)
            .map(|end| end > self.buffer.len())
            .unwrap_or(true)
        {
            return Err(DecodeError::OutOfBounds {
                offset,
                width,
                len: self.buffer.len(),
            });
        }
        if offset & (width - 1) != 0 {
            return Err(DecodeError::Misaligned { offset, width });
        }
        Ok(())
    }

    fn read_uint(&self, offset: usize, width: usize) -> Result<u64, DecodeError> {
        self.validate(offset, width)?;
        let mut bytes = [0u8; 8];
        bytes[..width].copy_from_slice(&self.buffer[offset..offset + width]);
        Ok(u64::from_le_bytes(bytes))
    }

    fn read_int(&self, offset: usize, width: usize) -> Result<i64, DecodeError> {
        let raw = self.read_uint(offset, width)?;
        Ok(match width {
            1 => raw as u8 as i8 as i64,
            2 => raw as u16 as i16 as i64,
            4 => raw as u32 as i32 as i64,
            _ => raw as i64,
        })
    }

    fn read_float(&self, offset: usize, width: usize) -> Result<f64, DecodeError> {
        self.validate(offset, width)?;
        match width {
            4 => {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(&self.buffer[offset..offset + 4]);
                Ok(f32::from_le_bytes(bytes) as f64)
            }
            8 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&self.buffer[offset..offset + 8]);
                Ok(f64::from_le_bytes(bytes))
            }
            _ => Err(DecodeError::InvalidFloatWidth { width }),
        }
    }

    /// Reads the packed-type byte from the table after a container's
    /// values.
    fn read_packed_at(
        &self,
        payload: usize,
        len: usize,
        index: usize,
    ) -> Result<u8, DecodeError> {
        let pos = len
            .checked_mul(self.byte_width)
            .and_then(|table| payload.checked_add(table))
            .and_then(|table| table.checked_add(index))
            .filter(|&pos| pos < self.buffer.len())
            .ok_or(DecodeError::OutOfBounds {
                offset: payload,
                width: 1,
                len: self.buffer.len(),
            })?;
        Ok(self.buffer[pos])
    }

    /// String lengths may be under-reported when the length field was
    /// widened for alignment: keep doubling the field width and
    /// re-reading until the byte at the presumed end is the NUL
    /// terminator.
    fn string_length(&self) -> Result<usize, DecodeError> {
        let payload = self.indirect()?;
        let mut size_width = self.byte_width;
        let mut size = self.read_length_before(payload, size_width)?;
        loop {
            let end = payload
                .checked_add(size)
                .filter(|&end| end < self.buffer.len())
                .ok_or(DecodeError::OutOfBounds {
                    offset: payload,
                    width: size,
                    len: self.buffer.len(),
                })?;
            if self.buffer[end] == 0 {
                return Ok(size);
            }
            size_width <<= 1;
            if size_width > 8 {
                return Err(DecodeError::Unterminated {
                    context: "string",
                    offset: payload,
                });
            }
            size = self.read_length_before(payload, size_width)?;
        }
    }

    fn read_length_before(&self, payload: usize, width: usize) -> Result<usize, DecodeError> {
        let at = payload.checked_sub(width).ok_or(DecodeError::BadOffset {
            offset: payload,
            distance: width as u64,
        })?;
        Ok(self.read_uint(at, width)? as usize)
    }

    /// Keys carry no length prefix; scan forward to the NUL.
    fn key_length(&self) -> Result<usize, DecodeError> {
        let payload = self.indirect()?;
        let mut size = 0;
        loop {
            let pos = payload + size;
            if pos >= self.buffer.len() {
                return Err(DecodeError::Unterminated {
                    context: "key",
                    offset: payload,
                });
            }
            if self.buffer[pos] == 0 {
                return Ok(size);
            }
            size += 1;
        }
    }
}

/// Child iterator; see [`Reader::iter`].
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    reader: Reader<'a>,
    index: usize,
    len: usize,
    failed: Option<DecodeError>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Result<Reader<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.len {
            return None;
        }
        if let Some(err) = self.failed.take() {
            self.len = 0;
            return Some(Err(err));
        }
        let index = self.index;
        self.index += 1;
        let reader = self.reader;
        Some(if reader.flex_type.is_vector() {
            reader.index(index)
        } else if reader.flex_type == FlexType::Map {
            reader.map_value_at(index)
        } else {
            Ok(reader)
        })
    }
}

/// Map entry iterator; see [`Reader::entries`].
#[derive(Debug, Clone)]
pub struct Entries<'a> {
    reader: Reader<'a>,
    index: usize,
    len: usize,
    failed: Option<DecodeError>,
}

impl<'a> Iterator for Entries<'a> {
    type Item = Result<(Reader<'a>, Reader<'a>), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.len {
            return None;
        }
        if let Some(err) = self.failed.take() {
            self.len = 0;
            return Some(Err(err));
        }
        let index = self.index;
        self.index += 1;
        let reader = self.reader;
        Some(
            reader
                .map_key_at(index)
                .and_then(|key| Ok((key, reader.map_value_at(index)?))),
        )
    }
}

fn escape_json_string(text: &str, out: &mut String) {
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Integral finite floats render with a trailing `.0`.
fn format_float(value: f64, out: &mut String) {
    if value.is_finite() && value.fract() == 0.0 {
        let _ = write!(out, "{value:.1}");
    } else {
        let _ = write!(out, "{value}");
    }
}
