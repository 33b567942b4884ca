//! miniwasm: a stack-machine interpreter for an i32 subset of
//! WebAssembly 1.0 binary modules.
//!
//! The crate splits along the data flow:
//!
//! - [`binary`] decodes the section stream (preamble, LEB128, sections)
//!   into a [`Module`];
//! - [`model`] is the decoded, immutable module IR;
//! - [`runtime`] holds engine-owned instances (linear memory, globals,
//!   the host import bridge);
//! - [`vm`] executes raw body bytes on an operand stack with call
//!   frames, structured-control blocks, and branch-by-scanning.
//!
//! ```
//! use miniwasm::{decode, Engine, Value};
//!
//! // (module (func (export "answer") (result i32) i32.const 42))
//! let bytes = [
//!     0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00, // \0asm v1
//!     0x01, 0x05, 0x01, 0x60, 0x00, 0x01, 0x7F, // type () -> i32
//!     0x03, 0x02, 0x01, 0x00, // function 0 uses type 0
//!     0x07, 0x0A, 0x01, 0x06, b'a', b'n', b's', b'w', b'e', b'r', 0x00, 0x00,
//!     0x0A, 0x06, 0x01, 0x04, 0x00, 0x41, 0x2A, 0x0B, // i32.const 42; end
//! ];
//! let module = decode(&bytes).unwrap();
//! let mut engine = Engine::new(&module).unwrap();
//! assert_eq!(engine.call("answer", &[]).unwrap(), Some(Value::I32(42)));
//! ```

pub mod binary;
pub mod error;
pub mod model;
pub mod runtime;
pub mod vm;

pub use error::{DecodeError, HostError, LinkError, Trap};
pub use model::{FuncRef, FuncType, Module, ValType, Value};
pub use runtime::{HostContext, MemoryInstance, PAGE_SIZE};
pub use vm::{Engine, EngineConfig};

/// Decode a binary module. The module is a pure function of the input
/// bytes: decoding the same bytes twice yields equal modules.
pub fn decode(bytes: &[u8]) -> Result<Module, DecodeError> {
    binary::sections::parse_module(bytes)
}
