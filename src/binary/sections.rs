//! Section-stream parsing: preamble, section headers, per-section
//! payload decoders, and the top-level module parser.

use tracing::debug;

use super::{
    cursor::Cursor,
    leb128,
    reader::{read_len_prefixed_bytes, read_name, read_vec},
    DecodeError, Result,
};
use crate::model::{
    CodeBody, DataSegment, Expr, Export, ExportDesc, FuncIdx, FuncType, Global, GlobalType,
    Import, ImportDesc, Limits, LocalDecl, MemoryType, Module, TableType, TypeIdx, ValType,
};
use crate::vm::opcodes::{self, op, Imm};

const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];

/// Guard against pathological local declarations; a single ULEB count
/// can otherwise demand gigabytes of zeroed locals.
const MAX_LOCALS: u64 = 1_000_000;

/// Standard section identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionId {
    Custom = 0,
    Type = 1,
    Import = 2,
    Function = 3,
    Table = 4,
    Memory = 5,
    Global = 6,
    Export = 7,
    Start = 8,
    Element = 9,
    Code = 10,
    Data = 11,
    DataCount = 12,
}

impl SectionId {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0 => SectionId::Custom,
            1 => SectionId::Type,
            2 => SectionId::Import,
            3 => SectionId::Function,
            4 => SectionId::Table,
            5 => SectionId::Memory,
            6 => SectionId::Global,
            7 => SectionId::Export,
            8 => SectionId::Start,
            9 => SectionId::Element,
            10 => SectionId::Code,
            11 => SectionId::Data,
            12 => SectionId::DataCount,
            _ => return None,
        })
    }

    /// Sections without a decoded counterpart in this subset; their
    /// payloads are skipped whole, like custom sections.
    fn is_skipped(self) -> bool {
        matches!(
            self,
            SectionId::Table | SectionId::Element | SectionId::DataCount
        )
    }
}

/* ---------- type decoding helpers ---------- */

fn read_val_type(cur: &mut Cursor) -> Result<ValType> {
    let offset = cur.offset();
    let b = cur.read_u8()?;
    ValType::from_byte(b).ok_or(DecodeError::UnsupportedType { found: b, offset })
}

fn read_limits(cur: &mut Cursor) -> Result<Limits> {
    let offset = cur.offset();
    match cur.read_u8()? {
        0x00 => Ok(Limits {
            min: leb128::read_uleb_u32(cur)?,
            max: None,
        }),
        0x01 => {
            let min = leb128::read_uleb_u32(cur)?;
            let max = leb128::read_uleb_u32(cur)?;
            if max < min {
                return Err(DecodeError::Malformed {
                    offset,
                    msg: "limits max below min",
                });
            }
            Ok(Limits {
                min,
                max: Some(max),
            })
        }
        _ => Err(DecodeError::Malformed {
            offset,
            msg: "invalid limits flags byte",
        }),
    }
}

fn read_func_type(cur: &mut Cursor) -> Result<FuncType> {
    let offset = cur.offset();
    let form = cur.read_u8()?;
    if form != 0x60 {
        return Err(DecodeError::UnsupportedType {
            found: form,
            offset,
        });
    }
    let params = read_vec(cur, read_val_type)?;
    let results = read_vec(cur, read_val_type)?;
    Ok(FuncType { params, results })
}

fn read_global_type(cur: &mut Cursor) -> Result<GlobalType> {
    let val_type = read_val_type(cur)?;
    let offset = cur.offset();
    let mutable = match cur.read_u8()? {
        0x00 => false,
        0x01 => true,
        _ => {
            return Err(DecodeError::Malformed {
                offset,
                msg: "invalid global mutability flag",
            })
        }
    };
    Ok(GlobalType { val_type, mutable })
}

/// Capture a constant initializer expression up to and including its
/// terminating `end`. The scan consumes each instruction's immediates
/// so an `0x0B` byte embedded in a SLEB128 immediate is not mistaken
/// for the terminator.
fn read_expr(cur: &mut Cursor) -> Result<Expr> {
    let start = cur.offset();
    let mut depth: u32 = 0;
    loop {
        let op_offset = cur.offset();
        let opcode = cur.read_u8()?;
        match opcode {
            op::END => {
                if depth == 0 {
                    let body = cur.window(start, cur.offset())?.to_vec();
                    return Ok(Expr { body });
                }
                depth -= 1;
            }
            op::BLOCK | op::LOOP | op::IF => {
                cur.read_u8()?; // block type
                depth += 1;
            }
            _ => skip_immediates(cur, opcode, op_offset)?,
        }
    }
}

fn skip_immediates(cur: &mut Cursor, opcode: u8, op_offset: usize) -> Result<()> {
    match opcodes::immediate(opcode).ok_or(DecodeError::Malformed {
        offset: op_offset,
        msg: "unknown opcode in expression",
    })? {
        Imm::None => {}
        Imm::ULeb => {
            leb128::read_uleb_u32(cur)?;
        }
        Imm::SLeb32 => {
            leb128::read_sleb_i32(cur)?;
        }
        Imm::SLeb64 => {
            leb128::read_sleb_i64(cur)?;
        }
        Imm::Bits32 => cur.skip(4)?,
        Imm::Bits64 => cur.skip(8)?,
        Imm::BlockType | Imm::ReservedByte => cur.skip(1)?,
        Imm::MemArg => {
            leb128::read_uleb_u32(cur)?;
            leb128::read_uleb_u32(cur)?;
        }
        Imm::BrTable => {
            let count = leb128::read_uleb_u32(cur)?;
            for _ in 0..count {
                leb128::read_uleb_u32(cur)?;
            }
            leb128::read_uleb_u32(cur)?;
        }
        Imm::CallIndirect => {
            leb128::read_uleb_u32(cur)?;
            cur.skip(1)?;
        }
    }
    Ok(())
}

/// Evaluate a data-segment offset: strictly `i32.const n; end` with a
/// non-negative `n`.
fn read_const_offset(cur: &mut Cursor) -> Result<u32> {
    let offset = cur.offset();
    if cur.read_u8()? != op::I32_CONST {
        return Err(DecodeError::Malformed {
            offset,
            msg: "data offset must be an i32.const expression",
        });
    }
    let value = leb128::read_sleb_i32(cur)?;
    if cur.read_u8()? != op::END {
        return Err(DecodeError::Malformed {
            offset,
            msg: "data offset expression missing end",
        });
    }
    u32::try_from(value).map_err(|_| DecodeError::Malformed {
        offset,
        msg: "negative data offset",
    })
}

/* ---------- per-section readers ---------- */

fn read_type_section(cur: &mut Cursor) -> Result<Vec<FuncType>> {
    read_vec(cur, read_func_type)
}

fn read_import_section(cur: &mut Cursor) -> Result<(Vec<Import>, u32)> {
    let mut funcs = 0u32;
    let imports = read_vec(cur, |c| {
        let module = read_name(c)?;
        let name = read_name(c)?;
        let offset = c.offset();
        let desc = match c.read_u8()? {
            0x00 => {
                funcs += 1;
                ImportDesc::Func(leb128::read_uleb_u32(c)?)
            }
            0x01 => {
                // Table types carry an element-type byte before limits.
                let elem_offset = c.offset();
                if c.read_u8()? != 0x70 {
                    return Err(DecodeError::Malformed {
                        offset: elem_offset,
                        msg: "invalid table element type",
                    });
                }
                ImportDesc::Table(TableType {
                    limits: read_limits(c)?,
                })
            }
            0x02 => ImportDesc::Memory(MemoryType {
                limits: read_limits(c)?,
            }),
            0x03 => ImportDesc::Global(read_global_type(c)?),
            _ => {
                return Err(DecodeError::Malformed {
                    offset,
                    msg: "invalid import descriptor tag",
                })
            }
        };
        Ok(Import { module, name, desc })
    })?;
    Ok((imports, funcs))
}

fn read_function_section(cur: &mut Cursor) -> Result<Vec<TypeIdx>> {
    read_vec(cur, leb128::read_uleb_u32)
}

fn read_memory_section(cur: &mut Cursor) -> Result<Vec<MemoryType>> {
    read_vec(cur, |c| {
        Ok(MemoryType {
            limits: read_limits(c)?,
        })
    })
}

fn read_global_section(cur: &mut Cursor) -> Result<Vec<Global>> {
    read_vec(cur, |c| {
        let ty = read_global_type(c)?;
        let init = read_expr(c)?;
        Ok(Global { ty, init })
    })
}

fn read_export_section(cur: &mut Cursor) -> Result<Vec<Export>> {
    read_vec(cur, |c| {
        let name = read_name(c)?;
        let offset = c.offset();
        let desc = match c.read_u8()? {
            0x00 => ExportDesc::Func(leb128::read_uleb_u32(c)?),
            0x01 => ExportDesc::Table(leb128::read_uleb_u32(c)?),
            0x02 => ExportDesc::Memory(leb128::read_uleb_u32(c)?),
            0x03 => ExportDesc::Global(leb128::read_uleb_u32(c)?),
            _ => {
                return Err(DecodeError::Malformed {
                    offset,
                    msg: "invalid export descriptor tag",
                })
            }
        };
        Ok(Export { name, desc })
    })
}

fn read_code_section(cur: &mut Cursor) -> Result<Vec<CodeBody>> {
    let count = leb128::read_uleb_u32(cur)? as usize;
    let mut out = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let size_offset = cur.offset();
        let body_size = leb128::read_uleb_u32(cur)? as usize;
        let body_bytes = cur.read_bytes(body_size)?;
        let mut sub = Cursor::new(body_bytes);

        // The locals vector is read with LEB128 semantics; the
        // instruction stream is whatever remains of the declared body
        // size, never a fixed-width subtraction.
        let mut total: u64 = 0;
        let locals = read_vec(&mut sub, |c| {
            let count = leb128::read_uleb_u32(c)?;
            let ty_offset = c.offset();
            let b = c.read_u8()?;
            let val_type = ValType::from_byte(b).ok_or(DecodeError::UnsupportedType {
                found: b,
                offset: ty_offset,
            })?;
            if val_type != ValType::I32 {
                return Err(DecodeError::UnsupportedLocalType {
                    found: b,
                    offset: ty_offset,
                });
            }
            total += count as u64;
            Ok(LocalDecl { count, val_type })
        })?;
        if total > MAX_LOCALS {
            return Err(DecodeError::Malformed {
                offset: size_offset,
                msg: "local declaration count too large",
            });
        }

        let body = sub.read_bytes(sub.remaining())?.to_vec();
        if body.last() != Some(&op::END) {
            return Err(DecodeError::Malformed {
                offset: size_offset,
                msg: "code body not terminated by end",
            });
        }
        out.push(CodeBody { locals, body });
    }
    Ok(out)
}

fn read_data_section(cur: &mut Cursor) -> Result<Vec<DataSegment>> {
    read_vec(cur, |c| {
        let offset = c.offset();
        let memory = leb128::read_uleb_u32(c)?;
        if memory != 0 {
            return Err(DecodeError::Malformed {
                offset,
                msg: "data segment must target memory 0",
            });
        }
        let data_offset = read_const_offset(c)?;
        let init = read_len_prefixed_bytes(c)?;
        Ok(DataSegment {
            memory,
            offset: data_offset,
            init,
        })
    })
}

/* ---------- top-level parser ---------- */

/// Parse a complete module from raw bytes.
pub fn parse_module(bytes: &[u8]) -> Result<Module> {
    let mut cur = Cursor::new(bytes);

    let magic = cur.read_bytes(4)?;
    if magic != MAGIC {
        return Err(DecodeError::InvalidMagic);
    }
    let version = cur.read_u32_le()?;
    if version != 1 {
        return Err(DecodeError::UnsupportedVersion { found: version });
    }

    let mut module = Module::default();
    let mut seen = [false; 13];
    let mut last_id: u8 = 0;

    while !cur.is_eof() {
        let id_offset = cur.offset();
        let id_byte = cur.read_u8()?;
        let id = SectionId::from_byte(id_byte).ok_or(DecodeError::UnsupportedSection {
            id: id_byte,
            offset: id_offset,
        })?;
        let payload_len = leb128::read_uleb_u32(&mut cur)? as usize;
        let payload_offset = cur.offset();
        let payload = cur.read_bytes(payload_len)?;

        debug!(
            target: "wasm.decode",
            id = id_byte,
            len = payload_len,
            offset = id_offset,
            "section"
        );

        if id == SectionId::Custom {
            // Custom sections may appear anywhere and are skipped whole.
            continue;
        }

        // Non-custom sections: strictly ordered by id, at most one each.
        if id_byte < last_id {
            return Err(DecodeError::Malformed {
                offset: id_offset,
                msg: "section out of order",
            });
        }
        last_id = id_byte;
        if seen[id_byte as usize] {
            return Err(DecodeError::Malformed {
                offset: id_offset,
                msg: "duplicate section",
            });
        }
        seen[id_byte as usize] = true;

        if id.is_skipped() {
            continue;
        }

        let mut pcur = Cursor::new(payload);
        match id {
            SectionId::Type => module.types = read_type_section(&mut pcur)?,
            SectionId::Import => {
                let (imports, funcs) = read_import_section(&mut pcur)?;
                module.imports = imports;
                module.imported_funcs = funcs;
            }
            SectionId::Function => module.func_type_indices = read_function_section(&mut pcur)?,
            SectionId::Memory => {
                module.memories = read_memory_section(&mut pcur)?;
                if module.memories.len() > 1 {
                    return Err(DecodeError::Malformed {
                        offset: payload_offset,
                        msg: "at most one memory is supported",
                    });
                }
            }
            SectionId::Global => module.globals = read_global_section(&mut pcur)?,
            SectionId::Export => module.exports = read_export_section(&mut pcur)?,
            SectionId::Start => module.start = Some(leb128::read_uleb_u32(&mut pcur)? as FuncIdx),
            SectionId::Code => module.codes = read_code_section(&mut pcur)?,
            SectionId::Data => module.data = read_data_section(&mut pcur)?,
            SectionId::Custom | SectionId::Table | SectionId::Element | SectionId::DataCount => {
                unreachable!("skipped above")
            }
        }

        if pcur.remaining() != 0 {
            return Err(DecodeError::InconsistentSize {
                offset: payload_offset + pcur.offset(),
                msg: "section payload not fully consumed",
            });
        }
    }

    if module.func_type_indices.len() != module.codes.len() {
        return Err(DecodeError::InconsistentSize {
            offset: bytes.len(),
            msg: "function and code section lengths disagree",
        });
    }

    debug!(
        target: "wasm.decode",
        types = module.types.len(),
        funcs = module.total_funcs(),
        globals = module.globals.len(),
        data = module.data.len(),
        "module decoded"
    );

    Ok(module)
}
