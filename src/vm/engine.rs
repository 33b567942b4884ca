//! The execution engine: a stack machine over raw body bytes.
//!
//! Structured control uses a per-frame block stack recording opener
//! positions plus an on-demand forward scanner that skips matching
//! regions by depth, consuming every immediate it passes so that an
//! `0x0B` byte inside an immediate is never misread as `end`. Global
//! initializers run through the same dispatch loop in a synthetic
//! frame.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::binary::{cursor::Cursor, leb128};
use crate::error::{HostError, LinkError, Trap};
use crate::model::{FuncRef, Module, ValType, Value};
use crate::runtime::{GlobalInstance, HostContext, HostFunc, MemoryInstance};
use crate::vm::frame::{Block, Frame};
use crate::vm::opcodes::{self, op, Imm};
use crate::vm::stack::ValueStack;

/// Engine resource limits.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Largest memory allocation honored at instantiation, in pages.
    pub max_memory_pages: u32,
    /// Call-frame depth before recursion traps.
    pub max_call_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 65536,
            max_call_depth: 1024,
        }
    }
}

/// A module's execution state: operand stack, memories, globals, and
/// the host import registry. One engine drives one synchronous
/// execution at a time.
pub struct Engine<'m> {
    module: &'m Module,
    stack: ValueStack,
    memories: Vec<MemoryInstance>,
    globals: Vec<GlobalInstance>,
    imports: HashMap<(String, String), Arc<HostFunc>>,
    config: EngineConfig,
}

impl<'m> std::fmt::Debug for Engine<'m> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("module", &self.module)
            .field("stack", &self.stack)
            .field("memories", &self.memories)
            .field("globals", &self.globals)
            .field("imports", &self.imports.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

impl<'m> Engine<'m> {
    pub fn new(module: &'m Module) -> Result<Self, LinkError> {
        Self::with_config(module, EngineConfig::default())
    }

    /// Instantiate: allocate memories, evaluate global initializers in
    /// declaration order through the interpreter itself, then copy data
    /// segments. All failures here are eager.
    pub fn with_config(module: &'m Module, config: EngineConfig) -> Result<Self, LinkError> {
        let mut memories = Vec::with_capacity(module.memories.len());
        for mt in &module.memories {
            if mt.limits.min > config.max_memory_pages {
                return Err(LinkError::MemoryAllocFailed {
                    pages: mt.limits.min,
                    limit: config.max_memory_pages,
                });
            }
            memories.push(MemoryInstance::new(mt));
        }

        let mut engine = Engine {
            module,
            stack: ValueStack::new(),
            memories,
            globals: Vec::with_capacity(module.globals.len()),
            imports: HashMap::new(),
            config,
        };

        for (i, global) in module.globals.iter().enumerate() {
            let val = engine
                .eval_init(&global.init.body)
                .map_err(|source| LinkError::GlobalInitFailed {
                    index: i as u32,
                    source,
                })?;
            if val.ty() != global.ty.val_type {
                return Err(LinkError::GlobalInitFailed {
                    index: i as u32,
                    source: Trap::TypeMismatch {
                        context: "global initializer type",
                    },
                });
            }
            engine.globals.push(GlobalInstance::new(global.ty, val));
        }

        for (i, seg) in module.data.iter().enumerate() {
            let len = seg.init.len();
            let mem = engine.memories.get_mut(seg.memory as usize).ok_or(
                LinkError::DataOutOfBounds {
                    segment: i as u32,
                    offset: seg.offset,
                    len: len as u32,
                },
            )?;
            let start = seg.offset as usize;
            let end = start.checked_add(len).filter(|&e| e <= mem.len()).ok_or(
                LinkError::DataOutOfBounds {
                    segment: i as u32,
                    offset: seg.offset,
                    len: len as u32,
                },
            )?;
            mem.data_mut()[start..end].copy_from_slice(&seg.init);
        }

        Ok(engine)
    }

    /// Register a host callback for the `(module, name)` import. May be
    /// called any time before the import's first use; an unregistered
    /// import traps only when called.
    pub fn register_import<F>(&mut self, module: &str, name: &str, f: F)
    where
        F: Fn(&mut HostContext<'_>, &[Value]) -> Result<Option<Value>, HostError>
            + Send
            + Sync
            + 'static,
    {
        self.imports
            .insert((module.to_owned(), name.to_owned()), Arc::new(f));
    }

    /// Invoke an exported function by name.
    pub fn call(&mut self, export: &str, args: &[Value]) -> Result<Option<Value>, Trap> {
        let idx = self
            .module
            .export_func(export)
            .ok_or_else(|| Trap::UnknownExport {
                name: export.to_owned(),
            })?;
        self.call_index(idx, args)
    }

    /// Invoke a function by index (imports first, then defined
    /// functions). On a trap the operand stack unwinds to its height at
    /// entry.
    pub fn call_index(&mut self, func: u32, args: &[Value]) -> Result<Option<Value>, Trap> {
        let entry = self.stack.len();
        let res = self.call_inner(func, args);
        if res.is_err() {
            self.stack.truncate(entry);
        }
        res
    }

    /// Run the start-section function, if the module has one.
    pub fn run_start(&mut self) -> Result<(), Trap> {
        if let Some(idx) = self.module.start {
            self.call_index(idx, &[])?;
        }
        Ok(())
    }

    pub fn memory(&self, idx: u32) -> Option<&MemoryInstance> {
        self.memories.get(idx as usize)
    }

    pub fn global(&self, idx: u32) -> Option<Value> {
        self.globals.get(idx as usize).map(|g| g.get())
    }

    /* ---------- call plumbing ---------- */

    fn call_inner(&mut self, func: u32, args: &[Value]) -> Result<Option<Value>, Trap> {
        let module = self.module;
        let ty = module.type_of_func(func).ok_or(Trap::UndefinedElement {
            space: "function",
            index: func,
        })?;
        if ty.params.len() != args.len() {
            return Err(Trap::TypeMismatch {
                context: "argument count",
            });
        }
        let result_arity = ty.results.len();
        for a in args {
            self.stack.push(*a);
        }
        match module.func_ref(func).expect("index checked above") {
            FuncRef::Host(ordinal) => {
                self.call_host(ordinal)?;
                if result_arity == 1 {
                    Ok(Some(self.stack.pop()?))
                } else {
                    Ok(None)
                }
            }
            FuncRef::Local(code_idx) => {
                let mut frames = Vec::new();
                self.push_frame(&mut frames, func, code_idx)?;
                self.exec(&mut frames)
            }
        }
    }

    /// Dispatch a `call` to a host import: pop the arguments (topmost is
    /// the last parameter), run the callback, push its result.
    fn call_host(&mut self, ordinal: u32) -> Result<(), Trap> {
        let module = self.module;
        let import = module.func_import(ordinal).ok_or(Trap::UndefinedElement {
            space: "import",
            index: ordinal,
        })?;
        let ty = module.type_of_func(ordinal).ok_or(Trap::UndefinedElement {
            space: "import type",
            index: ordinal,
        })?;
        if ty.results.len() > 1 {
            return Err(Trap::TypeMismatch {
                context: "import result arity above 1",
            });
        }

        let f = self
            .imports
            .get(&(import.module.clone(), import.name.clone()))
            .cloned()
            .ok_or_else(|| Trap::MissingImport {
                module: import.module.clone(),
                name: import.name.clone(),
            })?;

        let mut args = Vec::with_capacity(ty.params.len());
        for _ in 0..ty.params.len() {
            args.push(self.stack.pop()?);
        }
        args.reverse();

        debug!(
            target: "wasm.invoke",
            module = %import.module,
            name = %import.name,
            args = args.len(),
            "host call"
        );

        let mut ctx = HostContext {
            memories: &mut self.memories,
            globals: &mut self.globals,
        };
        let ret = f(&mut ctx, &args)?;

        match (ret, ty.results.len()) {
            (Some(v), 1) => {
                self.stack.push(v);
                Ok(())
            }
            (None, 0) => Ok(()),
            _ => Err(Trap::TypeMismatch {
                context: "host import result arity",
            }),
        }
    }

    /// Enter a defined function: pop the arguments into locals (local 0
    /// is the first parameter), append zeroed declared locals, push the
    /// frame.
    fn push_frame(
        &mut self,
        frames: &mut Vec<Frame<'m>>,
        func: u32,
        code_idx: u32,
    ) -> Result<(), Trap> {
        if frames.len() >= self.config.max_call_depth {
            return Err(Trap::CallStackExhausted);
        }
        let module = self.module;
        let code = module
            .codes
            .get(code_idx as usize)
            .ok_or(Trap::UndefinedElement {
                space: "code",
                index: code_idx,
            })?;
        let ty = module.type_of_func(func).ok_or(Trap::UndefinedElement {
            space: "function",
            index: func,
        })?;
        if ty.results.len() > 1 {
            return Err(Trap::TypeMismatch {
                context: "result arity above 1",
            });
        }
        if ty.params.iter().any(|p| *p != ValType::I32) {
            return Err(Trap::TypeMismatch {
                context: "non-i32 parameter",
            });
        }

        let declared: usize = code.locals.iter().map(|d| d.count as usize).sum();
        let mut locals = Vec::with_capacity(ty.params.len() + declared);
        for _ in 0..ty.params.len() {
            locals.push(self.stack.pop()?);
        }
        locals.reverse();
        locals.resize(ty.params.len() + declared, Value::I32(0));

        debug!(target: "wasm.invoke", func, params = ty.params.len(), "enter");
        let base = self.stack.len();
        frames.push(Frame::new(func, &code.body, locals, base, ty.results.len()));
        Ok(())
    }

    /// Finish the top frame: collect its result, restore the operand
    /// stack to the frame's base, and hand the result to the caller.
    /// Returns `Some(result)` when the last frame finished.
    fn finish_frame(
        &mut self,
        frames: &mut Vec<Frame<'m>>,
    ) -> Result<Option<Option<Value>>, Trap> {
        let fr = frames.last().ok_or(Trap::StackUnderflow)?;
        let (func, base, arity) = (fr.func, fr.base, fr.result_arity);
        let result = if arity == 1 {
            Some(self.stack.pop()?)
        } else {
            None
        };
        self.stack.truncate(base);
        frames.pop();
        debug!(target: "wasm.invoke", func, has_value = result.is_some(), "return");
        if frames.is_empty() {
            Ok(Some(result))
        } else {
            if let Some(v) = result {
                self.stack.push(v);
            }
            Ok(None)
        }
    }

    /// Evaluate a constant initializer expression by running it in a
    /// synthetic single-result frame.
    fn eval_init(&mut self, body: &'m [u8]) -> Result<Value, Trap> {
        let mut frames = vec![Frame::new(u32::MAX, body, Vec::new(), self.stack.len(), 1)];
        self.exec(&mut frames)?.ok_or(Trap::TypeMismatch {
            context: "initializer produced no value",
        })
    }

    /* ---------- the dispatch loop ---------- */

    fn exec(&mut self, frames: &mut Vec<Frame<'m>>) -> Result<Option<Value>, Trap> {
        loop {
            let Some(fr) = frames.last_mut() else {
                return Ok(None);
            };
            let op_pos = fr.pos();
            let opcode = fr.read_u8()?;
            trace!(target: "wasm.exec", func = fr.func, pos = op_pos, opcode);

            match opcode {
                op::UNREACHABLE => return Err(Trap::Unreachable),
                op::NOP => {}

                op::BLOCK => {
                    fr.expect_empty_blocktype()?;
                    fr.blocks.push(Block {
                        pos: op_pos,
                        is_loop: false,
                    });
                }
                op::LOOP => {
                    fr.expect_empty_blocktype()?;
                    fr.blocks.push(Block {
                        pos: op_pos,
                        is_loop: true,
                    });
                }
                op::IF => {
                    fr.expect_empty_blocktype()?;
                    let cond = self.stack.pop_i32()?;
                    fr.blocks.push(Block {
                        pos: op_pos,
                        is_loop: false,
                    });
                    if cond == 0 {
                        match scan_if_target(fr.body(), fr.pos())? {
                            IfTarget::Else(p) => fr.set_pos(p)?,
                            IfTarget::End(p) => {
                                fr.set_pos(p)?;
                                fr.blocks.pop();
                            }
                        }
                    }
                }
                op::ELSE => {
                    // The then-branch fell through: skip the else body.
                    let p = scan_past_end(fr.body(), fr.pos(), 1)?;
                    fr.set_pos(p)?;
                    if fr.blocks.pop().is_none() {
                        return Err(Trap::MalformedCode {
                            offset: op_pos,
                            msg: "else outside of if",
                        });
                    }
                }
                op::END => {
                    if fr.blocks.pop().is_none() {
                        if let Some(result) = self.finish_frame(frames)? {
                            return Ok(result);
                        }
                    }
                }

                op::BR => {
                    let depth = fr.read_uleb_u32()? as usize;
                    if depth == fr.blocks.len() {
                        // Branch to the implicit function label.
                        if let Some(result) = self.finish_frame(frames)? {
                            return Ok(result);
                        }
                    } else {
                        branch(fr, depth)?;
                    }
                }
                op::BR_IF => {
                    let depth = fr.read_uleb_u32()? as usize;
                    let cond = self.stack.pop_i32()?;
                    if cond != 0 {
                        if depth == fr.blocks.len() {
                            if let Some(result) = self.finish_frame(frames)? {
                                return Ok(result);
                            }
                        } else {
                            branch(fr, depth)?;
                        }
                    }
                }
                op::RETURN => {
                    if let Some(result) = self.finish_frame(frames)? {
                        return Ok(result);
                    }
                }
                op::CALL => {
                    let idx = fr.read_uleb_u32()?;
                    match self.module.func_ref(idx) {
                        Some(FuncRef::Host(ordinal)) => self.call_host(ordinal)?,
                        Some(FuncRef::Local(code_idx)) => {
                            self.push_frame(frames, idx, code_idx)?
                        }
                        None => {
                            return Err(Trap::UndefinedElement {
                                space: "function",
                                index: idx,
                            })
                        }
                    }
                }

                op::DROP => {
                    self.stack.pop()?;
                }
                op::SELECT => {
                    let cond = self.stack.pop_i32()?;
                    let v2 = self.stack.pop()?;
                    let v1 = self.stack.pop()?;
                    self.stack.push(if cond != 0 { v1 } else { v2 });
                }

                op::LOCAL_GET => {
                    let idx = fr.read_uleb_u32()?;
                    let v = *fr
                        .locals
                        .get(idx as usize)
                        .ok_or(Trap::UndefinedElement {
                            space: "local",
                            index: idx,
                        })?;
                    self.stack.push(v);
                }
                op::LOCAL_SET => {
                    let idx = fr.read_uleb_u32()?;
                    let v = self.stack.pop()?;
                    let slot = fr
                        .locals
                        .get_mut(idx as usize)
                        .ok_or(Trap::UndefinedElement {
                            space: "local",
                            index: idx,
                        })?;
                    *slot = v;
                }
                op::LOCAL_TEE => {
                    let idx = fr.read_uleb_u32()?;
                    let v = self.stack.peek().ok_or(Trap::StackUnderflow)?;
                    let slot = fr
                        .locals
                        .get_mut(idx as usize)
                        .ok_or(Trap::UndefinedElement {
                            space: "local",
                            index: idx,
                        })?;
                    *slot = v;
                }
                op::GLOBAL_GET => {
                    let idx = fr.read_uleb_u32()?;
                    let v = self
                        .globals
                        .get(idx as usize)
                        .ok_or(Trap::UndefinedElement {
                            space: "global",
                            index: idx,
                        })?
                        .get();
                    self.stack.push(v);
                }
                op::GLOBAL_SET => {
                    let idx = fr.read_uleb_u32()?;
                    let v = self.stack.pop()?;
                    let cell = self
                        .globals
                        .get_mut(idx as usize)
                        .ok_or(Trap::UndefinedElement {
                            space: "global",
                            index: idx,
                        })?;
                    cell.set(v).map_err(|_| Trap::TypeMismatch {
                        context: "write to immutable global",
                    })?;
                }

                op::I32_LOAD => {
                    let ea = self.mem_addr(frames)?;
                    let v = self.mem0()?.load_u32(ea).map_err(|_| oob(ea, 4))?;
                    self.stack.push(Value::I32(v as i32));
                }
                op::I32_LOAD8_S => {
                    let ea = self.mem_addr(frames)?;
                    let v = self.mem0()?.load_u8(ea).map_err(|_| oob(ea, 1))?;
                    self.stack.push(Value::I32(v as i8 as i32));
                }
                op::I32_LOAD8_U => {
                    let ea = self.mem_addr(frames)?;
                    let v = self.mem0()?.load_u8(ea).map_err(|_| oob(ea, 1))?;
                    self.stack.push(Value::I32(v as i32));
                }
                op::I32_LOAD16_S => {
                    let ea = self.mem_addr(frames)?;
                    let v = self.mem0()?.load_u16(ea).map_err(|_| oob(ea, 2))?;
                    self.stack.push(Value::I32(v as i16 as i32));
                }
                op::I32_LOAD16_U => {
                    let ea = self.mem_addr(frames)?;
                    let v = self.mem0()?.load_u16(ea).map_err(|_| oob(ea, 2))?;
                    self.stack.push(Value::I32(v as i32));
                }
                op::I32_STORE => {
                    let (ea, v) = self.mem_addr_value(frames)?;
                    self.mem0()?
                        .store_u32(ea, v as u32)
                        .map_err(|_| oob(ea, 4))?;
                }
                op::I32_STORE8 => {
                    let (ea, v) = self.mem_addr_value(frames)?;
                    self.mem0()?
                        .store_u8(ea, v as u8)
                        .map_err(|_| oob(ea, 1))?;
                }
                op::I32_STORE16 => {
                    let (ea, v) = self.mem_addr_value(frames)?;
                    self.mem0()?
                        .store_u16(ea, v as u16)
                        .map_err(|_| oob(ea, 2))?;
                }
                op::MEMORY_SIZE => {
                    fr.read_u8()?; // reserved
                    let pages = self.mem0()?.size_pages();
                    self.stack.push(Value::I32(pages as i32));
                }
                op::MEMORY_GROW => {
                    fr.read_u8()?; // reserved
                    let delta = self.stack.pop_i32()? as u32;
                    let mem = self.mem0()?;
                    let prev = mem.grow(delta).map(|p| p as i32).unwrap_or(-1);
                    self.stack.push(Value::I32(prev));
                }

                op::I32_CONST => {
                    let v = fr.read_sleb_i32()?;
                    self.stack.push(Value::I32(v));
                }

                op::I32_EQZ => self.unop(|a| (a == 0) as i32)?,
                op::I32_EQ => self.cmpop(|a, b| a == b)?,
                op::I32_NE => self.cmpop(|a, b| a != b)?,
                op::I32_LT_S => self.cmpop(|a, b| a < b)?,
                op::I32_LT_U => self.cmpop_u(|a, b| a < b)?,
                op::I32_GT_S => self.cmpop(|a, b| a > b)?,
                op::I32_GT_U => self.cmpop_u(|a, b| a > b)?,
                op::I32_LE_S => self.cmpop(|a, b| a <= b)?,
                op::I32_LE_U => self.cmpop_u(|a, b| a <= b)?,
                op::I32_GE_S => self.cmpop(|a, b| a >= b)?,
                op::I32_GE_U => self.cmpop_u(|a, b| a >= b)?,

                op::I32_CLZ => self.unop(|a| a.leading_zeros() as i32)?,
                op::I32_CTZ => self.unop(|a| a.trailing_zeros() as i32)?,
                op::I32_POPCNT => self.unop(|a| a.count_ones() as i32)?,
                op::I32_ADD => self.binop(i32::wrapping_add)?,
                op::I32_SUB => self.binop(i32::wrapping_sub)?,
                op::I32_MUL => self.binop(i32::wrapping_mul)?,
                op::I32_DIV_S => self.divop(|a, b| {
                    if b == 0 {
                        Err(Trap::DivideByZero)
                    } else if a == i32::MIN && b == -1 {
                        Err(Trap::IntegerOverflow)
                    } else {
                        Ok(a / b)
                    }
                })?,
                op::I32_DIV_U => self.divop(|a, b| {
                    if b == 0 {
                        Err(Trap::DivideByZero)
                    } else {
                        Ok(((a as u32) / (b as u32)) as i32)
                    }
                })?,
                op::I32_REM_S => self.divop(|a, b| {
                    if b == 0 {
                        Err(Trap::DivideByZero)
                    } else {
                        Ok(a.wrapping_rem(b))
                    }
                })?,
                op::I32_REM_U => self.divop(|a, b| {
                    if b == 0 {
                        Err(Trap::DivideByZero)
                    } else {
                        Ok(((a as u32) % (b as u32)) as i32)
                    }
                })?,
                op::I32_AND => self.binop(|a, b| a & b)?,
                op::I32_OR => self.binop(|a, b| a | b)?,
                op::I32_XOR => self.binop(|a, b| a ^ b)?,
                op::I32_SHL => self.binop(|a, b| a.wrapping_shl(b as u32))?,
                op::I32_SHR_S => self.binop(|a, b| a.wrapping_shr(b as u32))?,
                op::I32_SHR_U => self.binop(|a, b| ((a as u32).wrapping_shr(b as u32)) as i32)?,
                op::I32_ROTL => self.binop(|a, b| (a as u32).rotate_left(b as u32) as i32)?,
                op::I32_ROTR => self.binop(|a, b| (a as u32).rotate_right(b as u32) as i32)?,

                _ => {
                    return Err(Trap::UnknownOpcode {
                        opcode,
                        offset: op_pos,
                    })
                }
            }
        }
    }

    /* ---------- dispatch helpers ---------- */

    /// Read a memarg and pop the base address; yields the 64-bit
    /// effective address.
    fn mem_addr(&mut self, frames: &mut [Frame<'m>]) -> Result<u64, Trap> {
        let fr = frames.last_mut().ok_or(Trap::StackUnderflow)?;
        fr.read_uleb_u32()?; // alignment hint, unused
        let offset = fr.read_uleb_u32()?;
        let base = self.stack.pop_i32()?;
        Ok(base as u32 as u64 + offset as u64)
    }

    /// Memarg + popped value + popped base address, for stores.
    fn mem_addr_value(&mut self, frames: &mut [Frame<'m>]) -> Result<(u64, i32), Trap> {
        let fr = frames.last_mut().ok_or(Trap::StackUnderflow)?;
        fr.read_uleb_u32()?; // alignment hint, unused
        let offset = fr.read_uleb_u32()?;
        let v = self.stack.pop_i32()?;
        let base = self.stack.pop_i32()?;
        Ok((base as u32 as u64 + offset as u64, v))
    }

    fn mem0(&mut self) -> Result<&mut MemoryInstance, Trap> {
        self.memories.get_mut(0).ok_or(Trap::UndefinedElement {
            space: "memory",
            index: 0,
        })
    }

    fn unop(&mut self, f: impl FnOnce(i32) -> i32) -> Result<(), Trap> {
        let a = self.stack.pop_i32()?;
        self.stack.push(Value::I32(f(a)));
        Ok(())
    }

    fn binop(&mut self, f: impl FnOnce(i32, i32) -> i32) -> Result<(), Trap> {
        let b = self.stack.pop_i32()?;
        let a = self.stack.pop_i32()?;
        self.stack.push(Value::I32(f(a, b)));
        Ok(())
    }

    fn divop(&mut self, f: impl FnOnce(i32, i32) -> Result<i32, Trap>) -> Result<(), Trap> {
        let b = self.stack.pop_i32()?;
        let a = self.stack.pop_i32()?;
        self.stack.push(Value::I32(f(a, b)?));
        Ok(())
    }

    fn cmpop(&mut self, f: impl FnOnce(i32, i32) -> bool) -> Result<(), Trap> {
        self.binop(|a, b| f(a, b) as i32)
    }

    fn cmpop_u(&mut self, f: impl FnOnce(u32, u32) -> bool) -> Result<(), Trap> {
        self.binop(|a, b| f(a as u32, b as u32) as i32)
    }
}

fn oob(addr: u64, width: u32) -> Trap {
    Trap::MemoryOutOfBounds { addr, width }
}

/* ---------- branching and forward scanning ---------- */

/// Take a branch to the block at `depth`. Loops keep their block entry
/// and re-enter just past the opener; other blocks are popped through
/// and exited past their matching `end`.
fn branch(fr: &mut Frame<'_>, depth: usize) -> Result<(), Trap> {
    if depth >= fr.blocks.len() {
        return Err(Trap::UndefinedElement {
            space: "label",
            index: depth as u32,
        });
    }
    let target_index = fr.blocks.len() - 1 - depth;
    let target = fr.blocks[target_index];
    if target.is_loop {
        fr.blocks.truncate(target_index + 1);
        fr.set_pos(target.pos + 2) // past the loop opcode and block type
    } else {
        let p = scan_past_end(fr.body(), fr.pos(), depth + 1)?;
        fr.blocks.truncate(target_index);
        fr.set_pos(p)
    }
}

enum IfTarget {
    /// Position just past a depth-1 `else`; execution continues there.
    Else(usize),
    /// Position just past the matching `end`.
    End(usize),
}

/// Scan forward for the `else`/`end` belonging to the `if` the cursor
/// sits inside.
fn scan_if_target(body: &[u8], mut pos: usize) -> Result<IfTarget, Trap> {
    let mut depth = 1usize;
    while pos < body.len() {
        let op_pos = pos;
        let opcode = body[pos];
        pos += 1;
        match opcode {
            op::BLOCK | op::LOOP | op::IF => {
                pos = skip_immediates(body, pos, opcode, op_pos)?;
                depth += 1;
            }
            op::ELSE => {
                if depth == 1 {
                    return Ok(IfTarget::Else(pos));
                }
            }
            op::END => {
                depth -= 1;
                if depth == 0 {
                    return Ok(IfTarget::End(pos));
                }
            }
            _ => pos = skip_immediates(body, pos, opcode, op_pos)?,
        }
    }
    Err(Trap::MalformedCode {
        offset: pos,
        msg: "unmatched if",
    })
}

/// Scan forward until `depth` matching `end` opcodes have closed;
/// returns the position just past the last one.
fn scan_past_end(body: &[u8], mut pos: usize, mut depth: usize) -> Result<usize, Trap> {
    while pos < body.len() {
        let op_pos = pos;
        let opcode = body[pos];
        pos += 1;
        match opcode {
            op::BLOCK | op::LOOP | op::IF => {
                pos = skip_immediates(body, pos, opcode, op_pos)?;
                depth += 1;
            }
            op::END => {
                depth -= 1;
                if depth == 0 {
                    return Ok(pos);
                }
            }
            op::ELSE => {}
            _ => pos = skip_immediates(body, pos, opcode, op_pos)?,
        }
    }
    Err(Trap::MalformedCode {
        offset: pos,
        msg: "unmatched end",
    })
}

/// Advance past the immediates of the instruction at `op_pos`.
fn skip_immediates(body: &[u8], pos: usize, opcode: u8, op_pos: usize) -> Result<usize, Trap> {
    let imm = opcodes::immediate(opcode).ok_or(Trap::UnknownOpcode {
        opcode,
        offset: op_pos,
    })?;
    let truncated = |_| Trap::MalformedCode {
        offset: op_pos,
        msg: "truncated immediate",
    };
    let mut cur = Cursor::new(&body[pos..]);
    match imm {
        Imm::None => {}
        Imm::ULeb => {
            leb128::read_uleb_u32(&mut cur).map_err(truncated)?;
        }
        Imm::SLeb32 => {
            leb128::read_sleb_i32(&mut cur).map_err(truncated)?;
        }
        Imm::SLeb64 => {
            leb128::read_sleb_i64(&mut cur).map_err(truncated)?;
        }
        Imm::Bits32 => cur.skip(4).map_err(truncated)?,
        Imm::Bits64 => cur.skip(8).map_err(truncated)?,
        Imm::BlockType | Imm::ReservedByte => cur.skip(1).map_err(truncated)?,
        Imm::MemArg => {
            leb128::read_uleb_u32(&mut cur).map_err(truncated)?;
            leb128::read_uleb_u32(&mut cur).map_err(truncated)?;
        }
        Imm::BrTable => {
            let count = leb128::read_uleb_u32(&mut cur).map_err(truncated)?;
            for _ in 0..count {
                leb128::read_uleb_u32(&mut cur).map_err(truncated)?;
            }
            leb128::read_uleb_u32(&mut cur).map_err(truncated)?;
        }
        Imm::CallIndirect => {
            leb128::read_uleb_u32(&mut cur).map_err(truncated)?;
            cur.skip(1).map_err(truncated)?;
        }
    }
    Ok(pos + cur.offset())
}
