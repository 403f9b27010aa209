//! Schema-less binary serialization in the FlexBuffers format.
//!
//! Buffers are built bottom-up: children are written before the parents
//! that reference them, all references are backward relative offsets,
//! and a two-byte descriptor at the end locates the root. Readers can
//! therefore access any element directly, without parsing or copying
//! the rest of the buffer.
//!
//! # Encoding
//!
//! Either hand a [`Value`] tree to [`encode`], or drive a [`Builder`]
//! directly for streaming construction:
//!
//! ```
//! use flexbuf::{encode, Value};
//!
//! let value = Value::Map(vec![
//!     ("name".into(), "Maxim".into()),
//!     ("age".into(), Value::Int(35)),
//! ]);
//! let buffer = encode(&value)?;
//! # Ok::<(), flexbuf::EncodeError>(())
//! ```
//!
//! # Decoding
//!
//! [`Reader`] is a lazy zero-copy cursor over a finished buffer:
//!
//! ```
//! use flexbuf::{encode, Reader, Value};
//!
//! let buffer = encode(&Value::Map(vec![("age".into(), Value::Int(35))]))?;
//! let root = Reader::from_bytes(&buffer)?;
//! assert_eq!(root.get("age")?.unwrap().as_i64()?, 35);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod builder;
pub mod error;
pub mod reader;
pub mod types;
pub mod value;

pub use builder::{Builder, encode};
pub use error::{DecodeError, EncodeError};
pub use reader::Reader;
pub use types::{BitWidth, FlexType};
pub use value::Value;

/// Crate version, for embedding in diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
