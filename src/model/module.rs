//! Module IR: the owned aggregate of decoded section data, plus the
//! catalog accessors the engine dispatches through.

use super::types::{
    Export, ExportDesc, FuncIdx, FuncType, GlobalType, Import, ImportDesc, MemoryType, TypeIdx,
    ValType,
};

/// One run of local declarations inside a code body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDecl {
    pub count: u32,
    pub val_type: ValType,
}

/// Raw constant-initializer bytes, up to and including the terminating
/// `end`. Captured with an immediate-aware scan so a `0x0B` inside a
/// SLEB128 immediate is never taken for the terminator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Expr {
    pub body: Vec<u8>,
}

/// A defined function's code: expanded-to-be-read locals vector and the
/// raw instruction stream (terminated by `end`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodeBody {
    pub locals: Vec<LocalDecl>,
    pub body: Vec<u8>,
}

/// A global definition with its initializer expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    pub ty: GlobalType,
    pub init: Expr,
}

/// An active data segment for memory 0. The offset is already evaluated
/// from its `i32.const … end` initializer at decode time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment {
    pub memory: u32,
    pub offset: u32,
    pub init: Vec<u8>,
}

/// How a function index resolves: a host import (by import ordinal) or a
/// locally defined function (by code-section index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncRef {
    Host(u32),
    Local(u32),
}

/// The decoded module. Immutable once built; a read-only catalog for the
/// engine. Two decodes of the same bytes compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Module {
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    /// Type indices for each defined (non-imported) function.
    pub func_type_indices: Vec<TypeIdx>,
    pub memories: Vec<MemoryType>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<FuncIdx>,
    /// Code bodies; always the same length as `func_type_indices`.
    pub codes: Vec<CodeBody>,
    pub data: Vec<DataSegment>,
    /// Number of imported functions; these occupy indices
    /// `0..imported_funcs` of the function index space.
    pub imported_funcs: u32,
}

impl Module {
    pub fn imported_func_count(&self) -> u32 {
        self.imported_funcs
    }

    pub fn total_funcs(&self) -> u32 {
        self.imported_funcs + self.func_type_indices.len() as u32
    }

    /// Resolve a function index: imports first, then defined functions.
    pub fn func_ref(&self, idx: FuncIdx) -> Option<FuncRef> {
        if idx < self.imported_funcs {
            Some(FuncRef::Host(idx))
        } else if idx < self.total_funcs() {
            Some(FuncRef::Local(idx - self.imported_funcs))
        } else {
            None
        }
    }

    /// The signature of function `idx`, defined iff `idx < total_funcs()`.
    pub fn type_of_func(&self, idx: FuncIdx) -> Option<&FuncType> {
        let type_idx = match self.func_ref(idx)? {
            FuncRef::Host(ordinal) => match self.func_import(ordinal)?.desc {
                ImportDesc::Func(t) => t,
                _ => return None,
            },
            FuncRef::Local(code_idx) => *self.func_type_indices.get(code_idx as usize)?,
        };
        self.types.get(type_idx as usize)
    }

    /// The `ordinal`-th function import, in declaration order.
    pub fn func_import(&self, ordinal: u32) -> Option<&Import> {
        self.imports
            .iter()
            .filter(|imp| matches!(imp.desc, ImportDesc::Func(_)))
            .nth(ordinal as usize)
    }

    /// Look up an exported function by name.
    pub fn export_func(&self, name: &str) -> Option<FuncIdx> {
        self.exports.iter().find_map(|e| match e.desc {
            ExportDesc::Func(idx) if e.name == name => Some(idx),
            _ => None,
        })
    }
}
