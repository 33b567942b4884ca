//! Crate-level error types: decode, link, and runtime taxonomies.
//!
//! The three enums are disjoint by phase. `DecodeError` aborts
//! [`crate::decode`], `LinkError` aborts [`crate::Engine::new`], and
//! `Trap` unwinds the current top-level call. Nothing is caught
//! internally; every failure carries enough context to report without a
//! backtrace.

use thiserror::Error;

/// Malformed or unsupported input rejected by the binary decoder.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid magic header (expected \\0asm)")]
    InvalidMagic,

    #[error("unsupported binary version {found} (expected 1)")]
    UnsupportedVersion { found: u32 },

    #[error("malformed LEB128 integer at offset {offset}")]
    MalformedLeb128 { offset: usize },

    #[error("unexpected end of input at offset {offset}")]
    ShortRead { offset: usize },

    #[error("unsupported section id {id} at offset {offset}")]
    UnsupportedSection { id: u8, offset: usize },

    #[error("unsupported type byte 0x{found:02x} at offset {offset}")]
    UnsupportedType { found: u8, offset: usize },

    #[error("unsupported local type 0x{found:02x} at offset {offset} (only i32 locals execute)")]
    UnsupportedLocalType { found: u8, offset: usize },

    #[error("invalid UTF-8 name at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("inconsistent size at offset {offset}: {msg}")]
    InconsistentSize { offset: usize, msg: &'static str },

    #[error("malformed module at offset {offset}: {msg}")]
    Malformed { offset: usize, msg: &'static str },
}

/// Eager instantiation failures raised by `Engine::new`.
///
/// Missing imports are deliberately absent: import resolution is
/// deferred until the first call, where it surfaces as
/// [`Trap::MissingImport`].
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("memory allocation of {pages} pages exceeds the limit of {limit}")]
    MemoryAllocFailed { pages: u32, limit: u32 },

    #[error("initializer for global {index} failed")]
    GlobalInitFailed {
        index: u32,
        #[source]
        source: Trap,
    },

    #[error("data segment {segment} writes [{offset}, {offset}+{len}) out of bounds")]
    DataOutOfBounds {
        segment: u32,
        offset: u32,
        len: u32,
    },
}

/// Unrecoverable runtime error. Aborts the current top-level call and
/// unwinds all frames.
#[derive(Debug, Error)]
pub enum Trap {
    #[error("unreachable instruction executed")]
    Unreachable,

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("type mismatch: {context}")]
    TypeMismatch { context: &'static str },

    #[error("memory access of {width} bytes at address {addr} out of bounds")]
    MemoryOutOfBounds { addr: u64, width: u32 },

    #[error("integer divide by zero")]
    DivideByZero,

    #[error("integer overflow")]
    IntegerOverflow,

    #[error("unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("undefined {space} index {index}")]
    UndefinedElement { space: &'static str, index: u32 },

    #[error("unresolved import {module}.{name}")]
    MissingImport { module: String, name: String },

    #[error("no exported function named {name:?}")]
    UnknownExport { name: String },

    #[error("malformed code at offset {offset}: {msg}")]
    MalformedCode { offset: usize, msg: &'static str },

    #[error("call stack exhausted")]
    CallStackExhausted,

    #[error("host function error")]
    Host(#[from] HostError),
}

/// Error returned by a host import callback. The engine surfaces it
/// unchanged to its caller, wrapped in [`Trap::Host`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let e = DecodeError::UnsupportedVersion { found: 2 };
        assert_eq!(e.to_string(), "unsupported binary version 2 (expected 1)");

        let t = Trap::Host(HostError::new("backend refused"));
        assert_eq!(t.to_string(), "host function error");
        let src = std::error::Error::source(&t).expect("host error source");
        assert_eq!(src.to_string(), "backend refused");
    }
}
