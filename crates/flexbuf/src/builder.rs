//! Encoder for the FlexBuffers format.
//!
//! The builder keeps an explicit value stack and a growable output
//! buffer. Callers push children before closing a container; closing a
//! vector or map pops the pushed range, lays it out, and replaces it
//! with a single composite reference. Finishing writes the root value
//! followed by its packed-type byte and byte-width byte, the format's
//! fixed entry point.
//!
//! # Example
//!
//! ```rust
//! use flexbuf::{encode, Reader, Value};
//!
//! let bytes = encode(&Value::Map(vec![
//!     ("name".into(), "Alice".into()),
//!     ("age".into(), Value::Int(30)),
//! ])).unwrap();
//!
//! let root = Reader::from_bytes(&bytes).unwrap();
//! assert_eq!(root.get("age").unwrap().unwrap().as_i64().unwrap(), 30);
//! ```

use std::borrow::Cow;

use rustc_hash::FxHashMap;

use crate::error::EncodeError;
use crate::types::{BitWidth, FlexType};
use crate::value::Value;

/// Initial buffer size when none is given.
const DEFAULT_CAPACITY: usize = 2048;

/// Raw payload of an encode-time value.
#[derive(Debug, Clone, Copy)]
enum Raw {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Absolute buffer position of an already-written payload.
    Offset(usize),
}

/// Ephemeral node used only while building: a raw value plus its
/// chosen type and intrinsic width. Never persisted past the build.
#[derive(Debug, Clone, Copy)]
struct StackValue {
    raw: Raw,
    flex_type: FlexType,
    width: BitWidth,
}

impl StackValue {
    fn null() -> Self {
        Self {
            raw: Raw::Null,
            flex_type: FlexType::Null,
            width: BitWidth::W8,
        }
    }

    fn bool(value: bool) -> Self {
        Self {
            raw: Raw::Bool(value),
            flex_type: FlexType::Bool,
            width: BitWidth::W8,
        }
    }

    fn int(value: i64) -> Self {
        Self {
            raw: Raw::Int(value),
            flex_type: FlexType::Int,
            width: BitWidth::from_int(value),
        }
    }

    fn uint(value: u64) -> Self {
        Self {
            raw: Raw::UInt(value),
            flex_type: FlexType::UInt,
            width: BitWidth::from_uint(value),
        }
    }

    fn float(value: f64) -> Self {
        Self {
            raw: Raw::Float(value),
            flex_type: FlexType::Float,
            width: BitWidth::from_float(value),
        }
    }

    fn offset(position: usize, flex_type: FlexType, width: BitWidth) -> Self {
        Self {
            raw: Raw::Offset(position),
            flex_type,
            width,
        }
    }

    fn is_offset(&self) -> bool {
        !self.flex_type.is_inline()
    }

    /// Inline values widen to the enclosing container's minimum width;
    /// offset values keep their intrinsic width.
    fn stored_width(&self, min: BitWidth) -> BitWidth {
        if self.flex_type.is_inline() {
            self.width.max(min)
        } else {
            self.width
        }
    }

    fn stored_packed_type(&self, min: BitWidth) -> u8 {
        self.flex_type.packed_type(self.stored_width(min))
    }

    /// Width needed to reference this value from a field that will sit
    /// at element `index` of a container starting at write cursor
    /// `cursor`.
    ///
    /// For each candidate byte width the final field position is
    /// computed (including the alignment padding that width implies)
    /// together with the backward distance to the already-written
    /// payload; the smallest width whose range covers the distance
    /// wins. Failing even at 8 bytes signals an internal defect.
    fn element_width(&self, cursor: usize, index: usize) -> Result<BitWidth, EncodeError> {
        if self.flex_type.is_inline() {
            return Ok(self.width);
        }
        let target = match self.raw {
            Raw::Offset(position) => position,
            // Offset-typed values are only built via `offset()`.
            _ => return Err(EncodeError::OffsetOverflow { target: 0 }),
        };
        for i in 0..4 {
            let byte_width = 1usize << i;
            let field_loc =
                cursor + BitWidth::padding_size(cursor, byte_width) + index * byte_width;
            let distance = field_loc - target;
            let width = BitWidth::from_uint(distance as u64);
            if width.byte_width() == byte_width {
                return Ok(width);
            }
        }
        Err(EncodeError::OffsetOverflow { target })
    }
}

/// Encoder state: value stack, output buffer and dedup caches.
///
/// A builder is single-use: [`finish`](Builder::finish) seals the
/// buffer and any further operation fails with
/// [`EncodeError::AlreadyFinished`]. Independent builds need
/// independent builders.
#[derive(Debug, Clone)]
pub struct Builder {
    buffer: Vec<u8>,
    stack: Vec<StackValue>,
    offset: usize,
    finished: bool,
    string_cache: FxHashMap<String, usize>,
    key_cache: FxHashMap<String, usize>,
    /// Key vectors already emitted, keyed by the exact ordered sequence
    /// of key offsets, so structurally identical key sets share bytes.
    key_vector_cache: FxHashMap<Vec<usize>, StackValue>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// Creates a builder with the default initial buffer size.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a builder with an initial buffer size.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity.max(1)],
            stack: Vec::new(),
            offset: 0,
            finished: false,
            string_cache: FxHashMap::default(),
            key_cache: FxHashMap::default(),
            key_vector_cache: FxHashMap::default(),
        }
    }

    fn check_unfinished(&self) -> Result<(), EncodeError> {
        if self.finished {
            Err(EncodeError::AlreadyFinished)
        } else {
            Ok(())
        }
    }

    /// Pushes a null.
    pub fn push_null(&mut self) -> Result<(), EncodeError> {
        self.check_unfinished()?;
        self.stack.push(StackValue::null());
        Ok(())
    }

    /// Pushes a boolean.
    pub fn push_bool(&mut self, value: bool) -> Result<(), EncodeError> {
        self.check_unfinished()?;
        self.stack.push(StackValue::bool(value));
        Ok(())
    }

    /// Pushes a signed integer at its minimal width.
    pub fn push_int(&mut self, value: i64) -> Result<(), EncodeError> {
        self.check_unfinished()?;
        self.stack.push(StackValue::int(value));
        Ok(())
    }

    /// Pushes an unsigned integer at its minimal width.
    pub fn push_uint(&mut self, value: u64) -> Result<(), EncodeError> {
        self.check_unfinished()?;
        self.stack.push(StackValue::uint(value));
        Ok(())
    }

    /// Pushes a double.
    pub fn push_float(&mut self, value: f64) -> Result<(), EncodeError> {
        self.check_unfinished()?;
        self.stack.push(StackValue::float(value));
        Ok(())
    }

    /// Pushes a string, writing a width-aligned length prefix, the raw
    /// UTF-8 bytes and a trailing NUL. A string already written in this
    /// build reuses its cached offset and writes nothing.
    pub fn push_string(&mut self, value: &str) -> Result<(), EncodeError> {
        self.check_unfinished()?;
        let utf8 = value.as_bytes();
        let bit_width = BitWidth::from_uint(utf8.len() as u64);
        if let Some(&position) = self.string_cache.get(value) {
            self.stack
                .push(StackValue::offset(position, FlexType::String, bit_width));
            return Ok(());
        }
        let byte_width = self.align(bit_width);
        self.write_uint(utf8.len() as u64, byte_width);
        let string_offset = self.offset;
        self.write_terminated(utf8);
        self.stack
            .push(StackValue::offset(string_offset, FlexType::String, bit_width));
        self.string_cache.insert(value.to_owned(), string_offset);
        Ok(())
    }

    /// Pushes a map key: NUL-terminated UTF-8 with no length prefix.
    /// Keys use a dedup cache separate from general strings.
    pub fn push_key(&mut self, value: &str) -> Result<(), EncodeError> {
        self.check_unfinished()?;
        if let Some(&position) = self.key_cache.get(value) {
            self.stack
                .push(StackValue::offset(position, FlexType::Key, BitWidth::W8));
            return Ok(());
        }
        let key_offset = self.offset;
        self.write_terminated(value.as_bytes());
        self.stack
            .push(StackValue::offset(key_offset, FlexType::Key, BitWidth::W8));
        self.key_cache.insert(value.to_owned(), key_offset);
        Ok(())
    }

    /// Pushes a blob: width-aligned length prefix followed by the raw
    /// bytes, no terminator.
    pub fn push_blob(&mut self, value: &[u8]) -> Result<(), EncodeError> {
        self.check_unfinished()?;
        let bit_width = BitWidth::from_uint(value.len() as u64);
        let byte_width = self.align(bit_width);
        self.write_uint(value.len() as u64, byte_width);
        let blob_offset = self.offset;
        self.write_raw(value);
        self.stack
            .push(StackValue::offset(blob_offset, FlexType::Blob, bit_width));
        Ok(())
    }

    /// Pushes a signed integer boxed behind an offset, so storing it
    /// never widens sibling elements.
    pub fn push_indirect_int(&mut self, value: i64) -> Result<(), EncodeError> {
        self.check_unfinished()?;
        let bit_width = BitWidth::from_int(value);
        let byte_width = self.align(bit_width);
        let position = self.offset;
        self.write_uint(value as u64, byte_width);
        self.stack
            .push(StackValue::offset(position, FlexType::IndirectInt, bit_width));
        Ok(())
    }

    /// Pushes an unsigned integer boxed behind an offset.
    pub fn push_indirect_uint(&mut self, value: u64) -> Result<(), EncodeError> {
        self.check_unfinished()?;
        let bit_width = BitWidth::from_uint(value);
        let byte_width = self.align(bit_width);
        let position = self.offset;
        self.write_uint(value, byte_width);
        self.stack.push(StackValue::offset(
            position,
            FlexType::IndirectUInt,
            bit_width,
        ));
        Ok(())
    }

    /// Pushes a double boxed behind an offset.
    pub fn push_indirect_float(&mut self, value: f64) -> Result<(), EncodeError> {
        self.check_unfinished()?;
        let bit_width = BitWidth::from_float(value);
        let byte_width = self.align(bit_width);
        let position = self.offset;
        self.write_float(value, byte_width);
        self.stack.push(StackValue::offset(
            position,
            FlexType::IndirectFloat,
            bit_width,
        ));
        Ok(())
    }

    /// Opens a vector; returns the stack depth to pass to
    /// [`end_vector`](Builder::end_vector).
    pub fn start_vector(&mut self) -> usize {
        self.stack.len()
    }

    /// Opens a map; children are pushed as alternating key/value pairs,
    /// keys already sorted in ascending raw-byte order.
    pub fn start_map(&mut self) -> usize {
        self.stack.len()
    }

    /// Closes a vector: consumes the stack range pushed since `start`
    /// and replaces it with one composite reference.
    pub fn end_vector(&mut self, start: usize) -> Result<(), EncodeError> {
        self.check_unfinished()?;
        let vec_len = self.stack.len() - start;
        let vec = self.create_vector(start, vec_len, 1, None)?;
        self.stack.truncate(start);
        self.stack.push(vec);
        Ok(())
    }

    /// Closes a map: emits the deduplicated sorted key vector and the
    /// values vector as one Map reference.
    pub fn end_map(&mut self, start: usize) -> Result<(), EncodeError> {
        self.check_unfinished()?;
        let vec_len = (self.stack.len() - start) >> 1;
        let key_offsets: Vec<usize> = self.stack[start..]
            .iter()
            .step_by(2)
            .map(|sv| match sv.raw {
                Raw::Offset(position) => position,
                _ => 0,
            })
            .collect();
        let keys = match self.key_vector_cache.get(&key_offsets) {
            Some(&cached) => cached,
            None => {
                let keys = self.create_vector(start, vec_len, 2, None)?;
                self.key_vector_cache.insert(key_offsets, keys);
                keys
            }
        };
        let vec = self.create_vector(start + 1, vec_len, 2, Some(keys))?;
        self.stack.truncate(start);
        self.stack.push(vec);
        Ok(())
    }

    /// Pushes a whole [`Value`] tree: maps get their keys sorted by raw
    /// UTF-8 bytes here, vectors recurse in order.
    pub fn push_value(&mut self, value: &Value<'_>) -> Result<(), EncodeError> {
        match value {
            Value::Null => self.push_null(),
            Value::Bool(b) => self.push_bool(*b),
            Value::Int(i) => self.push_int(*i),
            Value::UInt(u) => self.push_uint(*u),
            Value::Float(f) => self.push_float(*f),
            Value::String(s) => self.push_string(s),
            Value::Blob(b) => self.push_blob(b),
            Value::Vector(items) => {
                let start = self.start_vector();
                for item in items {
                    self.push_value(item)?;
                }
                self.end_vector(start)
            }
            Value::Map(entries) => {
                let start = self.start_map();
                let mut sorted: Vec<&(Cow<'_, str>, Value<'_>)> = entries.iter().collect();
                sorted.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
                for (key, value) in sorted {
                    self.push_key(key)?;
                    self.push_value(value)?;
                }
                self.end_map(start)
            }
        }
    }

    /// Seals the buffer: writes the root value, its packed-type byte
    /// and its byte-width byte, and returns the finished bytes.
    ///
    /// Requires exactly one value on the stack; anything else means
    /// unbalanced open/close calls.
    pub fn finish(&mut self) -> Result<Vec<u8>, EncodeError> {
        self.check_unfinished()?;
        if self.stack.len() != 1 {
            return Err(EncodeError::UnbalancedStack {
                depth: self.stack.len(),
            });
        }
        let root = self.stack[0];
        let width = root.element_width(self.offset, 0)?;
        let byte_width = self.align(width);
        self.write_stack_value(root, byte_width)?;
        let packed = root.stored_packed_type(BitWidth::W8);
        self.write_uint(packed as u64, 1);
        self.write_uint(byte_width as u64, 1);
        self.finished = true;
        self.buffer.truncate(self.offset);
        Ok(std::mem::take(&mut self.buffer))
    }

    /// Vector/map emission over a contiguous stack run: stride 1 for
    /// vectors, stride 2 selecting every other slot for maps.
    fn create_vector(
        &mut self,
        start: usize,
        vec_len: usize,
        step: usize,
        keys: Option<StackValue>,
    ) -> Result<StackValue, EncodeError> {
        // Seed from the width of the count itself, then fold in the key
        // vector reference (maps reserve two extra prefix slots) and
        // every element's reference width.
        let mut bit_width = BitWidth::from_uint(vec_len as u64);
        let mut prefix_elements = 1usize;
        if let Some(keys) = keys {
            bit_width = bit_width.max(keys.element_width(self.offset, 0)?);
            prefix_elements += 2;
        }
        let mut vector_type = FlexType::Key;
        let mut typed = keys.is_none();
        let mut i = start;
        while i < self.stack.len() {
            let elem = self.stack[i];
            bit_width = bit_width.max(elem.element_width(self.offset, i + prefix_elements)?);
            if i == start {
                vector_type = elem.flex_type;
                typed &= vector_type.is_typed_vector_element();
            } else if vector_type != elem.flex_type {
                typed = false;
            }
            i += step;
        }
        let byte_width = self.align(bit_width);
        let fixed = typed && (2..=4).contains(&vec_len) && vector_type.is_number();
        if let Some(keys) = keys {
            self.write_stack_value(keys, byte_width)?;
            self.write_uint(keys.width.byte_width() as u64, byte_width);
        }
        if !fixed {
            self.write_uint(vec_len as u64, byte_width);
        }
        let vec_offset = self.offset;
        let mut i = start;
        while i < self.stack.len() {
            let elem = self.stack[i];
            self.write_stack_value(elem, byte_width)?;
            i += step;
        }
        if !typed {
            let mut i = start;
            while i < self.stack.len() {
                let packed = self.stack[i].stored_packed_type(BitWidth::W8);
                self.write_uint(packed as u64, 1);
                i += step;
            }
        }
        if keys.is_some() {
            return Ok(StackValue::offset(vec_offset, FlexType::Map, bit_width));
        }
        if typed {
            let arity = if fixed { vec_len } else { 0 };
            let tag = vector_type
                .to_typed_vector(arity)
                .unwrap_or(FlexType::Vector);
            return Ok(StackValue::offset(vec_offset, tag, bit_width));
        }
        Ok(StackValue::offset(vec_offset, FlexType::Vector, bit_width))
    }

    /// Pads the write cursor to `width` and returns the byte width.
    /// Padding bytes stay zero: the buffer is zero-filled and never
    /// rewound.
    fn align(&mut self, width: BitWidth) -> usize {
        let byte_width = width.byte_width();
        self.offset += BitWidth::padding_size(self.offset, byte_width);
        byte_width
    }

    /// Doubles the buffer until `new_offset` fits, preserving existing
    /// bytes at their offsets.
    fn grow(&mut self, new_offset: usize) {
        let mut size = self.buffer.len();
        if size >= new_offset {
            return;
        }
        while size < new_offset {
            size <<= 1;
        }
        self.buffer.resize(size, 0);
    }

    /// Writes the low `byte_width` bytes of `value`, little-endian.
    /// Signed values pass through as two's complement.
    fn write_uint(&mut self, value: u64, byte_width: usize) {
        let new_offset = self.offset + byte_width;
        self.grow(new_offset);
        self.buffer[self.offset..new_offset].copy_from_slice(&value.to_le_bytes()[..byte_width]);
        self.offset = new_offset;
    }

    /// Writes a float field. Fields narrower than 4 bytes never occur:
    /// floats carry the 64-bit width from construction.
    fn write_float(&mut self, value: f64, byte_width: usize) {
        if byte_width == 4 {
            let bytes = (value as f32).to_le_bytes();
            let new_offset = self.offset + 4;
            self.grow(new_offset);
            self.buffer[self.offset..new_offset].copy_from_slice(&bytes);
            self.offset = new_offset;
        } else {
            let bytes = value.to_le_bytes();
            let new_offset = self.offset + 8;
            self.grow(new_offset);
            self.buffer[self.offset..new_offset].copy_from_slice(&bytes);
            self.offset = new_offset;
        }
    }

    fn write_raw(&mut self, bytes: &[u8]) {
        let new_offset = self.offset + bytes.len();
        self.grow(new_offset);
        self.buffer[self.offset..new_offset].copy_from_slice(bytes);
        self.offset = new_offset;
    }

    /// Writes `bytes` followed by a NUL terminator.
    fn write_terminated(&mut self, bytes: &[u8]) {
        let new_offset = self.offset + bytes.len() + 1;
        self.grow(new_offset);
        self.buffer[self.offset..new_offset - 1].copy_from_slice(bytes);
        self.buffer[new_offset - 1] = 0;
        self.offset = new_offset;
    }

    /// Writes one element slot: inline values directly, offset values
    /// as the backward relative distance from the field to the payload.
    fn write_stack_value(
        &mut self,
        value: StackValue,
        byte_width: usize,
    ) -> Result<(), EncodeError> {
        match value.raw {
            Raw::Offset(target) => {
                let distance = (self.offset - target) as u64;
                if byte_width == 8 || distance < (1u64 << (byte_width * 8)) {
                    self.write_uint(distance, byte_width);
                    Ok(())
                } else {
                    Err(EncodeError::OffsetOverflow { target })
                }
            }
            Raw::Null => {
                self.write_uint(0, byte_width);
                Ok(())
            }
            Raw::Bool(b) => {
                self.write_uint(b as u64, byte_width);
                Ok(())
            }
            Raw::Int(i) => {
                self.write_uint(i as u64, byte_width);
                Ok(())
            }
            Raw::UInt(u) => {
                self.write_uint(u, byte_width);
                Ok(())
            }
            Raw::Float(f) => {
                self.write_float(f, byte_width);
                Ok(())
            }
        }
    }
}

/// Encodes a [`Value`] tree into a finished buffer in one call.
pub fn encode(value: &Value<'_>) -> Result<Vec<u8>, EncodeError> {
    let mut builder = Builder::new();
    builder.push_value(value)?;
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_vec(values: &[i64]) -> Value<'static> {
        Value::Vector(values.iter().map(|&v| Value::Int(v)).collect())
    }

    #[test]
    fn test_single_values() {
        assert_eq!(encode(&Value::Null).unwrap(), [0, 0, 1]);
        assert_eq!(encode(&Value::Bool(true)).unwrap(), [1, 104, 1]);
        assert_eq!(encode(&Value::Bool(false)).unwrap(), [0, 104, 1]);
        assert_eq!(encode(&Value::Int(1)).unwrap(), [1, 4, 1]);
        assert_eq!(encode(&Value::Int(230)).unwrap(), [230, 0, 5, 2]);
        assert_eq!(encode(&Value::Int(1025)).unwrap(), [1, 4, 5, 2]);
        assert_eq!(encode(&Value::Int(-1025)).unwrap(), [255, 251, 5, 2]);
        assert_eq!(
            encode(&Value::Float(0.1)).unwrap(),
            [154, 153, 153, 153, 153, 153, 185, 63, 15, 8]
        );
    }

    #[test]
    fn test_single_string() {
        assert_eq!(
            encode(&Value::from("Maxim")).unwrap(),
            [5, 77, 97, 120, 105, 109, 0, 6, 20, 1]
        );
        assert_eq!(
            encode(&Value::from("hello 😱")).unwrap(),
            [10, 104, 101, 108, 108, 111, 32, 240, 159, 152, 177, 0, 11, 20, 1]
        );
    }

    #[test]
    fn test_fixed_int_vectors() {
        assert_eq!(encode(&int_vec(&[1, 2])).unwrap(), [1, 2, 2, 64, 1]);
        assert_eq!(
            encode(&int_vec(&[-1, 256])).unwrap(),
            [255, 255, 0, 1, 4, 65, 1]
        );
        assert_eq!(
            encode(&int_vec(&[-45, 256000])).unwrap(),
            [211, 255, 255, 255, 0, 232, 3, 0, 8, 66, 1]
        );
        assert_eq!(encode(&int_vec(&[1, 2, 4])).unwrap(), [1, 2, 4, 3, 76, 1]);
        assert_eq!(
            encode(&int_vec(&[-1, 256, 4])).unwrap(),
            [255, 255, 0, 1, 4, 0, 6, 77, 1]
        );
    }

    #[test]
    fn test_fixed_float_vector() {
        assert_eq!(
            encode(&Value::Vector(vec![Value::Float(1.1), Value::Float(-256.0)])).unwrap(),
            [154, 153, 153, 153, 153, 153, 241, 63, 0, 0, 0, 0, 0, 0, 112, 192, 16, 75, 1]
        );
    }

    #[test]
    fn test_bool_vector_is_typed_not_fixed() {
        // Booleans never qualify for the fixed form regardless of count.
        assert_eq!(
            encode(&Value::Vector(vec![
                Value::Bool(true),
                Value::Bool(false),
                Value::Bool(true),
            ]))
            .unwrap(),
            [3, 1, 0, 1, 3, 144, 1]
        );
    }

    #[test]
    fn test_nested_vector() {
        let value = Value::Vector(vec![int_vec(&[61]), Value::Int(64)]);
        assert_eq!(
            encode(&value).unwrap(),
            [1, 61, 2, 2, 64, 44, 4, 4, 40, 1]
        );
    }

    #[test]
    fn test_string_vector() {
        let value: Value = ["foo", "bar", "baz"].into_iter().collect();
        assert_eq!(
            encode(&value).unwrap(),
            [3, 102, 111, 111, 0, 3, 98, 97, 114, 0, 3, 98, 97, 122, 0, 3, 15, 11, 7, 3, 60, 1]
        );
    }

    #[test]
    fn test_string_vector_dedup() {
        // Repeated strings reuse their payload bytes.
        let value: Value = ["foo", "bar", "baz", "foo", "bar", "baz"].into_iter().collect();
        assert_eq!(
            encode(&value).unwrap(),
            [
                3, 102, 111, 111, 0, 3, 98, 97, 114, 0, 3, 98, 97, 122, 0, 6, 15, 11, 7, 18, 14,
                10, 6, 60, 1
            ]
        );
    }

    #[test]
    fn test_heterogeneous_vector() {
        let value = Value::Vector(vec![
            Value::from("foo"),
            Value::Int(1),
            Value::Int(-5),
            Value::Float(1.3),
            Value::Bool(true),
        ]);
        assert_eq!(
            encode(&value).unwrap(),
            [
                3, 102, 111, 111, 0, 0, 0, 0, //
                5, 0, 0, 0, 0, 0, 0, 0, //
                15, 0, 0, 0, 0, 0, 0, 0, //
                1, 0, 0, 0, 0, 0, 0, 0, //
                251, 255, 255, 255, 255, 255, 255, 255, //
                205, 204, 204, 204, 204, 204, 244, 63, //
                1, 0, 0, 0, 0, 0, 0, 0, //
                20, 4, 4, 15, 104, 45, 43, 1
            ]
        );
    }

    #[test]
    fn test_map() {
        let value = Value::Map(vec![("a".into(), Value::Int(12))]);
        assert_eq!(
            encode(&value).unwrap(),
            [97, 0, 1, 3, 1, 1, 1, 12, 4, 2, 36, 1]
        );
    }

    #[test]
    fn test_map_key_ordering() {
        // "" sorts before "a" regardless of insertion order.
        let value = Value::Map(vec![
            ("a".into(), Value::Int(12)),
            ("".into(), Value::Int(45)),
        ]);
        assert_eq!(
            encode(&value).unwrap(),
            [0, 97, 0, 2, 4, 4, 2, 1, 2, 45, 12, 4, 4, 4, 36, 1]
        );
    }

    #[test]
    fn test_blob() {
        assert_eq!(
            encode(&Value::from(vec![1u8, 2, 3])).unwrap(),
            [3, 1, 2, 3, 3, 100, 1]
        );
    }

    #[test]
    fn test_shared_key_vectors() {
        // Sibling maps with identical key sets share one key vector.
        let value = Value::Vector(vec![
            Value::Map(vec![("something".into(), Value::Int(12))]),
            Value::Map(vec![("something".into(), Value::Int(45))]),
        ]);
        assert_eq!(
            encode(&value).unwrap(),
            [
                115, 111, 109, 101, 116, 104, 105, 110, 103, 0, //
                1, 11, 1, 1, 1, 12, 4, 6, 1, 1, 45, 4, 2, 8, 4, 36, 36, 4, 40, 1
            ]
        );
    }

    #[test]
    fn test_uint_root() {
        let bytes = encode(&Value::UInt(230)).unwrap();
        assert_eq!(bytes, [230, 0, 9, 2]);
    }

    #[test]
    fn test_indirect_int() {
        let mut builder = Builder::new();
        builder.push_indirect_int(42).unwrap();
        let bytes = builder.finish().unwrap();
        // Payload at 0, reference distance 1, IndirectInt at width 8.
        assert_eq!(bytes, [42, 1, 24, 1]);
    }

    #[test]
    fn test_unbalanced_stack() {
        let mut builder = Builder::new();
        builder.push_int(1).unwrap();
        builder.push_int(2).unwrap();
        assert_eq!(
            builder.finish(),
            Err(EncodeError::UnbalancedStack { depth: 2 })
        );
    }

    #[test]
    fn test_write_after_finish() {
        let mut builder = Builder::new();
        builder.push_int(1).unwrap();
        builder.finish().unwrap();
        assert_eq!(builder.push_int(2), Err(EncodeError::AlreadyFinished));
        assert_eq!(builder.finish(), Err(EncodeError::AlreadyFinished));
    }

    #[test]
    fn test_stack_depth_restored_after_close() {
        let mut builder = Builder::new();
        let outer = builder.start_vector();
        builder.push_int(1).unwrap();
        let inner = builder.start_vector();
        builder.push_int(2).unwrap();
        builder.push_int(3).unwrap();
        builder.end_vector(inner).unwrap();
        assert_eq!(builder.stack.len(), outer + 2);
        builder.end_vector(outer).unwrap();
        assert_eq!(builder.stack.len(), 1);
    }

    #[test]
    fn test_buffer_growth_preserves_bytes() {
        let mut builder = Builder::with_capacity(1);
        builder.push_string("a long enough string to force growth").unwrap();
        let bytes = builder.finish().unwrap();
        assert_eq!(bytes[0] as usize, "a long enough string to force growth".len());
        assert_eq!(&bytes[1..5], b"a lo");
    }
}
