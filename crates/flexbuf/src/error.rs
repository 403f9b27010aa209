//! Error types for FlexBuffers encoding and decoding.

use thiserror::Error;

use crate::types::FlexType;

/// Error while reading a finished buffer.
///
/// Decoder errors are local to the node being read; a failure on one
/// node does not invalidate previously obtained sibling or ancestor
/// views.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("buffer of {len} bytes is too small to hold a root descriptor")]
    BufferTooSmall { len: usize },

    #[error("field width {width} is not one of 1, 2, 4, 8")]
    InvalidWidth { width: usize },

    #[error("read of {width} bytes at offset {offset} exceeds buffer length {len}")]
    OutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },

    #[error("offset {offset} is not aligned to width {width}")]
    Misaligned { offset: usize, width: usize },

    #[error("backward reference of {distance} bytes at offset {offset} underflows the buffer")]
    BadOffset { offset: usize, distance: u64 },

    #[error("unknown value type tag {tag}")]
    InvalidType { tag: u8 },

    #[error("float field has unsupported width {width}")]
    InvalidFloatWidth { width: usize },

    #[error("index {index} out of bounds (length: {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("expected {expected}, found {found:?}")]
    UnexpectedType {
        expected: &'static str,
        found: FlexType,
    },

    #[error("invalid UTF-8 in {context}")]
    InvalidUtf8 { context: &'static str },

    #[error("{context} starting at offset {offset} is not NUL-terminated")]
    Unterminated { context: &'static str, offset: usize },

    #[error("nesting exceeds the depth limit of {limit}")]
    DepthLimit { limit: usize },
}

/// Error while building a buffer.
///
/// A [`Builder`](crate::Builder) that returned an error is in an
/// undefined state and must be discarded, not reused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("finish requires exactly one value on the stack, found {depth}")]
    UnbalancedStack { depth: usize },

    #[error("buffer is already finished")]
    AlreadyFinished,

    #[error("relative offset to position {target} is unrepresentable at any width")]
    OffsetOverflow { target: usize },
}
