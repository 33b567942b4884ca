//! The decoded module surface: value/type definitions and the Module IR.

pub mod module;
pub mod types;

pub use module::{CodeBody, DataSegment, Expr, FuncRef, Global, LocalDecl, Module};
pub use types::{
    Export, ExportDesc, FuncIdx, FuncType, GlobalIdx, GlobalType, Import, ImportDesc, Limits,
    MemIdx, MemoryType, TableType, TypeIdx, ValType, Value,
};
