//! Type and width model for the FlexBuffers wire format.
//!
//! Pure, stateless rules shared by the encoder and decoder: minimal
//! integer widths, alignment padding, and the packed-type byte that
//! carries `width | (type << 2)` for every heterogeneous element and
//! for the buffer root.

use crate::error::DecodeError;

/// Storage width of a scalar or offset field.
///
/// The two-bit encoding (0..=3) is what goes into a packed-type byte;
/// the byte width in {1, 2, 4, 8} is what the field occupies on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum BitWidth {
    W8 = 0,
    W16 = 1,
    W32 = 2,
    W64 = 3,
}

impl BitWidth {
    /// Minimal width whose signed range holds `value`.
    ///
    /// The magnitude must fit in 7/15/31/63 bits, so e.g. 127 is `W8`
    /// but -128 widens to `W16`.
    #[inline]
    pub fn from_int(value: i64) -> BitWidth {
        BitWidth::from_uint(value.unsigned_abs())
    }

    /// Minimal width whose signed range holds the non-negative `value`.
    #[inline]
    pub fn from_uint(value: u64) -> BitWidth {
        if value >> 7 == 0 {
            BitWidth::W8
        } else if value >> 15 == 0 {
            BitWidth::W16
        } else if value >> 31 == 0 {
            BitWidth::W32
        } else {
            BitWidth::W64
        }
    }

    /// Width of a float value. Always `W64`: the encoder never narrows
    /// to single precision, even when the value would be exactly
    /// representable.
    #[inline]
    pub fn from_float(_value: f64) -> BitWidth {
        BitWidth::W64
    }

    /// Storage size in bytes: 1, 2, 4 or 8.
    #[inline]
    pub fn byte_width(self) -> usize {
        1 << self as usize
    }

    /// Recovers a width from the low two bits of a packed-type byte.
    #[inline]
    pub fn from_packed_bits(bits: u8) -> BitWidth {
        match bits & 3 {
            0 => BitWidth::W8,
            1 => BitWidth::W16,
            2 => BitWidth::W32,
            _ => BitWidth::W64,
        }
    }

    /// Bytes of padding needed to align `offset` to `byte_size`
    /// (a power of two), via two's-complement masking.
    #[inline]
    pub fn padding_size(offset: usize, byte_size: usize) -> usize {
        offset.wrapping_neg() & (byte_size - 1)
    }
}

/// Wire type tags (fixed by the FlexBuffers format, must not be renumbered).
///
/// `VectorString` is deprecated upstream but still emitted for homogeneous
/// string vectors and accepted on decode, for compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum FlexType {
    Null = 0,
    Int = 1,
    UInt = 2,
    Float = 3,
    Key = 4,
    String = 5,
    IndirectInt = 6,
    IndirectUInt = 7,
    IndirectFloat = 8,
    Map = 9,
    Vector = 10,
    VectorInt = 11,
    VectorUInt = 12,
    VectorFloat = 13,
    VectorKey = 14,
    VectorString = 15,
    VectorInt2 = 16,
    VectorUInt2 = 17,
    VectorFloat2 = 18,
    VectorInt3 = 19,
    VectorUInt3 = 20,
    VectorFloat3 = 21,
    VectorInt4 = 22,
    VectorUInt4 = 23,
    VectorFloat4 = 24,
    Blob = 25,
    Bool = 26,
    VectorBool = 36,
}

impl FlexType {
    /// Creates a FlexType from its wire representation.
    pub fn from_u8(v: u8) -> Option<FlexType> {
        match v {
            0 => Some(FlexType::Null),
            1 => Some(FlexType::Int),
            2 => Some(FlexType::UInt),
            3 => Some(FlexType::Float),
            4 => Some(FlexType::Key),
            5 => Some(FlexType::String),
            6 => Some(FlexType::IndirectInt),
            7 => Some(FlexType::IndirectUInt),
            8 => Some(FlexType::IndirectFloat),
            9 => Some(FlexType::Map),
            10 => Some(FlexType::Vector),
            11 => Some(FlexType::VectorInt),
            12 => Some(FlexType::VectorUInt),
            13 => Some(FlexType::VectorFloat),
            14 => Some(FlexType::VectorKey),
            15 => Some(FlexType::VectorString),
            16 => Some(FlexType::VectorInt2),
            17 => Some(FlexType::VectorUInt2),
            18 => Some(FlexType::VectorFloat2),
            19 => Some(FlexType::VectorInt3),
            20 => Some(FlexType::VectorUInt3),
            21 => Some(FlexType::VectorFloat3),
            22 => Some(FlexType::VectorInt4),
            23 => Some(FlexType::VectorUInt4),
            24 => Some(FlexType::VectorFloat4),
            25 => Some(FlexType::Blob),
            26 => Some(FlexType::Bool),
            36 => Some(FlexType::VectorBool),
            _ => None,
        }
    }

    /// Decodes the type half of a packed-type byte.
    pub fn from_packed(packed: u8) -> Result<FlexType, DecodeError> {
        FlexType::from_u8(packed >> 2).ok_or(DecodeError::InvalidType { tag: packed >> 2 })
    }

    /// True for values stored directly in their parent's slot
    /// (never behind an offset).
    #[inline]
    pub fn is_inline(self) -> bool {
        self == FlexType::Bool || self <= FlexType::Float
    }

    /// True for the numeric scalars Int, UInt and Float.
    #[inline]
    pub fn is_number(self) -> bool {
        FlexType::Int <= self && self <= FlexType::Float
    }

    /// True if a homogeneous vector of this element type may drop the
    /// per-element type bytes.
    #[inline]
    pub fn is_typed_vector_element(self) -> bool {
        self == FlexType::Bool || (FlexType::Int <= self && self <= FlexType::String)
    }

    /// True for homogeneous, length-prefixed vector tags.
    #[inline]
    pub fn is_typed_vector(self) -> bool {
        self == FlexType::VectorBool
            || (FlexType::VectorInt <= self && self <= FlexType::VectorString)
    }

    /// True for the fixed-arity numeric vector tags (count 2..=4).
    #[inline]
    pub fn is_fixed_typed_vector(self) -> bool {
        FlexType::VectorInt2 <= self && self <= FlexType::VectorFloat4
    }

    /// True for any vector form, including maps' generic Vector shape.
    #[inline]
    pub fn is_vector(self) -> bool {
        self == FlexType::Vector || self.is_typed_vector() || self.is_fixed_typed_vector()
    }

    /// Maps a typed-vector element type plus an arity to the vector tag.
    ///
    /// `len` 0 selects the dynamic-length typed form; 2/3/4 select the
    /// fixed forms (numeric element types only — the fixed tag block
    /// enumerates `(Int, UInt, Float) x (2, 3, 4)`). Any other length
    /// has no tag.
    pub fn to_typed_vector(self, len: usize) -> Option<FlexType> {
        let base = (self as u8).checked_sub(FlexType::Int as u8)?;
        let tag = match len {
            0 => FlexType::VectorInt as u8 + base,
            2 => FlexType::VectorInt2 as u8 + base,
            3 => FlexType::VectorInt3 as u8 + base,
            4 => FlexType::VectorInt4 as u8 + base,
            _ => return None,
        };
        FlexType::from_u8(tag)
    }

    /// Element type of a dynamic-length typed vector tag.
    pub fn typed_vector_element_type(self) -> Option<FlexType> {
        if !self.is_typed_vector() {
            return None;
        }
        FlexType::from_u8(self as u8 - FlexType::VectorInt as u8 + FlexType::Int as u8)
    }

    /// Element type of a fixed typed vector tag: the fixed block is
    /// interleaved, so the type is the tag offset mod 3.
    pub fn fixed_typed_vector_element_type(self) -> Option<FlexType> {
        if !self.is_fixed_typed_vector() {
            return None;
        }
        let offset = self as u8 - FlexType::VectorInt2 as u8;
        FlexType::from_u8(offset % 3 + FlexType::Int as u8)
    }

    /// Element count of a fixed typed vector tag: offset div 3, plus 2.
    pub fn fixed_typed_vector_element_size(self) -> Option<usize> {
        if !self.is_fixed_typed_vector() {
            return None;
        }
        Some((self as usize - FlexType::VectorInt2 as usize) / 3 + 2)
    }

    /// Builds the packed-type byte `width | (type << 2)`.
    #[inline]
    pub fn packed_type(self, width: BitWidth) -> u8 {
        width as u8 | ((self as u8) << 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_width_selection() {
        assert_eq!(BitWidth::from_int(0), BitWidth::W8);
        assert_eq!(BitWidth::from_int(127), BitWidth::W8);
        assert_eq!(BitWidth::from_int(-127), BitWidth::W8);
        assert_eq!(BitWidth::from_int(128), BitWidth::W16);
        assert_eq!(BitWidth::from_int(-128), BitWidth::W16);
        assert_eq!(BitWidth::from_int(32767), BitWidth::W16);
        assert_eq!(BitWidth::from_int(32768), BitWidth::W32);
        assert_eq!(BitWidth::from_int(i32::MAX as i64), BitWidth::W32);
        assert_eq!(BitWidth::from_int(i32::MAX as i64 + 1), BitWidth::W64);
        assert_eq!(BitWidth::from_int(i64::MAX), BitWidth::W64);
        assert_eq!(BitWidth::from_int(i64::MIN), BitWidth::W64);
        assert_eq!(BitWidth::from_uint(u64::MAX), BitWidth::W64);
    }

    #[test]
    fn test_float_width_is_always_w64() {
        assert_eq!(BitWidth::from_float(0.0), BitWidth::W64);
        assert_eq!(BitWidth::from_float(4.5), BitWidth::W64);
    }

    #[test]
    fn test_padding_size() {
        assert_eq!(BitWidth::padding_size(0, 8), 0);
        assert_eq!(BitWidth::padding_size(1, 8), 7);
        assert_eq!(BitWidth::padding_size(7, 8), 1);
        assert_eq!(BitWidth::padding_size(8, 8), 0);
        assert_eq!(BitWidth::padding_size(3, 4), 1);
        assert_eq!(BitWidth::padding_size(5, 1), 0);
    }

    #[test]
    fn test_byte_width() {
        assert_eq!(BitWidth::W8.byte_width(), 1);
        assert_eq!(BitWidth::W16.byte_width(), 2);
        assert_eq!(BitWidth::W32.byte_width(), 4);
        assert_eq!(BitWidth::W64.byte_width(), 8);
    }

    #[test]
    fn test_packed_type() {
        assert_eq!(FlexType::Int.packed_type(BitWidth::W8), 4);
        assert_eq!(FlexType::Int.packed_type(BitWidth::W16), 5);
        assert_eq!(FlexType::Bool.packed_type(BitWidth::W8), 104);
        assert_eq!(FlexType::Map.packed_type(BitWidth::W8), 36);
        assert_eq!(FlexType::VectorInt2.packed_type(BitWidth::W8), 64);
    }

    #[test]
    fn test_from_packed_roundtrip() {
        for ty in [
            FlexType::Null,
            FlexType::Int,
            FlexType::Float,
            FlexType::Map,
            FlexType::Blob,
            FlexType::Bool,
            FlexType::VectorBool,
        ] {
            let packed = ty.packed_type(BitWidth::W32);
            assert_eq!(FlexType::from_packed(packed).unwrap(), ty);
            assert_eq!(BitWidth::from_packed_bits(packed), BitWidth::W32);
        }
        assert!(matches!(
            FlexType::from_packed(27 << 2),
            Err(DecodeError::InvalidType { tag: 27 })
        ));
    }

    #[test]
    fn test_to_typed_vector() {
        assert_eq!(FlexType::Int.to_typed_vector(0), Some(FlexType::VectorInt));
        assert_eq!(FlexType::Key.to_typed_vector(0), Some(FlexType::VectorKey));
        assert_eq!(
            FlexType::String.to_typed_vector(0),
            Some(FlexType::VectorString)
        );
        assert_eq!(FlexType::Bool.to_typed_vector(0), Some(FlexType::VectorBool));
        assert_eq!(FlexType::Int.to_typed_vector(2), Some(FlexType::VectorInt2));
        assert_eq!(
            FlexType::UInt.to_typed_vector(3),
            Some(FlexType::VectorUInt3)
        );
        assert_eq!(
            FlexType::Float.to_typed_vector(4),
            Some(FlexType::VectorFloat4)
        );
        assert_eq!(FlexType::Int.to_typed_vector(1), None);
        assert_eq!(FlexType::Int.to_typed_vector(5), None);
    }

    #[test]
    fn test_fixed_vector_inverses() {
        // The fixed block enumerates (Int, UInt, Float) x (2, 3, 4).
        for (base, size) in [
            (FlexType::Int, 2),
            (FlexType::UInt, 2),
            (FlexType::Float, 2),
            (FlexType::Int, 3),
            (FlexType::UInt, 3),
            (FlexType::Float, 3),
            (FlexType::Int, 4),
            (FlexType::UInt, 4),
            (FlexType::Float, 4),
        ] {
            let tag = base.to_typed_vector(size).unwrap();
            assert_eq!(tag.fixed_typed_vector_element_type(), Some(base));
            assert_eq!(tag.fixed_typed_vector_element_size(), Some(size));
        }
    }

    #[test]
    fn test_typed_vector_element_type() {
        assert_eq!(
            FlexType::VectorInt.typed_vector_element_type(),
            Some(FlexType::Int)
        );
        assert_eq!(
            FlexType::VectorBool.typed_vector_element_type(),
            Some(FlexType::Bool)
        );
        assert_eq!(
            FlexType::VectorString.typed_vector_element_type(),
            Some(FlexType::String)
        );
        assert_eq!(FlexType::Vector.typed_vector_element_type(), None);
    }

    #[test]
    fn test_predicates() {
        assert!(FlexType::Null.is_inline());
        assert!(FlexType::Bool.is_inline());
        assert!(!FlexType::String.is_inline());
        assert!(!FlexType::Blob.is_inline());

        assert!(FlexType::Int.is_number());
        assert!(!FlexType::Null.is_number());
        assert!(!FlexType::Bool.is_number());

        assert!(FlexType::Key.is_typed_vector_element());
        assert!(FlexType::Bool.is_typed_vector_element());
        assert!(!FlexType::Blob.is_typed_vector_element());
        assert!(!FlexType::Null.is_typed_vector_element());

        assert!(FlexType::Vector.is_vector());
        assert!(FlexType::VectorBool.is_vector());
        assert!(FlexType::VectorFloat4.is_vector());
        assert!(!FlexType::Map.is_vector());
        assert!(!FlexType::Blob.is_vector());
    }
}
