//! Binary decoding layer: cursor, LEB128, vector helpers, and the
//! section-stream parser.

pub mod cursor;
pub mod leb128;
pub mod reader;
pub mod sections;

pub use crate::error::DecodeError;

/// Result alias for decoding operations.
pub type Result<T> = core::result::Result<T, DecodeError>;
