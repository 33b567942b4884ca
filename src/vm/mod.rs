//! The virtual machine: opcode tables, operand stack, call frames, and
//! the dispatch engine.

pub mod engine;
pub mod frame;
pub mod opcodes;
pub mod stack;

pub use engine::{Engine, EngineConfig};
