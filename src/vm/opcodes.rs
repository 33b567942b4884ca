//! Opcode constants and the immediate-shape table shared by the
//! execution dispatcher, the forward scanner, and the decoder's
//! initializer-expression capture.

/// Opcode byte values for the supported subset.
pub mod op {
    pub const UNREACHABLE: u8 = 0x00;
    pub const NOP: u8 = 0x01;
    pub const BLOCK: u8 = 0x02;
    pub const LOOP: u8 = 0x03;
    pub const IF: u8 = 0x04;
    pub const ELSE: u8 = 0x05;
    pub const END: u8 = 0x0B;
    pub const BR: u8 = 0x0C;
    pub const BR_IF: u8 = 0x0D;
    pub const RETURN: u8 = 0x0F;
    pub const CALL: u8 = 0x10;

    pub const DROP: u8 = 0x1A;
    pub const SELECT: u8 = 0x1B;

    pub const LOCAL_GET: u8 = 0x20;
    pub const LOCAL_SET: u8 = 0x21;
    pub const LOCAL_TEE: u8 = 0x22;
    pub const GLOBAL_GET: u8 = 0x23;
    pub const GLOBAL_SET: u8 = 0x24;

    pub const I32_LOAD: u8 = 0x28;
    pub const I32_LOAD8_S: u8 = 0x2C;
    pub const I32_LOAD8_U: u8 = 0x2D;
    pub const I32_LOAD16_S: u8 = 0x2E;
    pub const I32_LOAD16_U: u8 = 0x2F;
    pub const I32_STORE: u8 = 0x36;
    pub const I32_STORE8: u8 = 0x3A;
    pub const I32_STORE16: u8 = 0x3B;
    pub const MEMORY_SIZE: u8 = 0x3F;
    pub const MEMORY_GROW: u8 = 0x40;

    pub const I32_CONST: u8 = 0x41;

    pub const I32_EQZ: u8 = 0x45;
    pub const I32_EQ: u8 = 0x46;
    pub const I32_NE: u8 = 0x47;
    pub const I32_LT_S: u8 = 0x48;
    pub const I32_LT_U: u8 = 0x49;
    pub const I32_GT_S: u8 = 0x4A;
    pub const I32_GT_U: u8 = 0x4B;
    pub const I32_LE_S: u8 = 0x4C;
    pub const I32_LE_U: u8 = 0x4D;
    pub const I32_GE_S: u8 = 0x4E;
    pub const I32_GE_U: u8 = 0x4F;

    pub const I32_CLZ: u8 = 0x67;
    pub const I32_CTZ: u8 = 0x68;
    pub const I32_POPCNT: u8 = 0x69;
    pub const I32_ADD: u8 = 0x6A;
    pub const I32_SUB: u8 = 0x6B;
    pub const I32_MUL: u8 = 0x6C;
    pub const I32_DIV_S: u8 = 0x6D;
    pub const I32_DIV_U: u8 = 0x6E;
    pub const I32_REM_S: u8 = 0x6F;
    pub const I32_REM_U: u8 = 0x70;
    pub const I32_AND: u8 = 0x71;
    pub const I32_OR: u8 = 0x72;
    pub const I32_XOR: u8 = 0x73;
    pub const I32_SHL: u8 = 0x74;
    pub const I32_SHR_S: u8 = 0x75;
    pub const I32_SHR_U: u8 = 0x76;
    pub const I32_ROTL: u8 = 0x77;
    pub const I32_ROTR: u8 = 0x78;
}

/// Shape of an instruction's immediate operands, for cursor-accurate
/// scanning. Scanners must consume these so that a `0x0B` byte inside
/// an immediate is never mistaken for `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Imm {
    /// No immediate bytes.
    None,
    /// One ULEB128 index (branch depths, call/local/global indices).
    ULeb,
    /// One SLEB128 i32 constant.
    SLeb32,
    /// One SLEB128 i64 constant.
    SLeb64,
    /// Four raw bytes (f32 constant).
    Bits32,
    /// Eight raw bytes (f64 constant).
    Bits64,
    /// One block-type byte.
    BlockType,
    /// One reserved zero byte (memory.size / memory.grow).
    ReservedByte,
    /// Align + offset ULEB128 pair.
    MemArg,
    /// ULEB128 target vector + ULEB128 default (br_table).
    BrTable,
    /// ULEB128 type index + reserved table byte (call_indirect).
    CallIndirect,
}

/// Immediate shape for `opcode`, or `None` for bytes outside the 1.0
/// instruction space (scanning cannot continue past those).
pub fn immediate(opcode: u8) -> Option<Imm> {
    Some(match opcode {
        op::UNREACHABLE | op::NOP | op::ELSE | op::END | op::RETURN => Imm::None,
        op::BLOCK | op::LOOP | op::IF => Imm::BlockType,
        op::BR | op::BR_IF | op::CALL => Imm::ULeb,
        0x0E => Imm::BrTable,
        0x11 => Imm::CallIndirect,
        op::DROP | op::SELECT => Imm::None,
        op::LOCAL_GET..=op::GLOBAL_SET => Imm::ULeb,
        0x28..=0x3E => Imm::MemArg,
        op::MEMORY_SIZE | op::MEMORY_GROW => Imm::ReservedByte,
        op::I32_CONST => Imm::SLeb32,
        0x42 => Imm::SLeb64,
        0x43 => Imm::Bits32,
        0x44 => Imm::Bits64,
        // Numeric, comparison, and conversion operators carry no
        // immediates anywhere in the 1.0 opcode space.
        0x45..=0xBF => Imm::None,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_and_const_shapes() {
        assert_eq!(immediate(op::BLOCK), Some(Imm::BlockType));
        assert_eq!(immediate(op::BR_IF), Some(Imm::ULeb));
        assert_eq!(immediate(op::I32_CONST), Some(Imm::SLeb32));
        assert_eq!(immediate(op::I32_LOAD), Some(Imm::MemArg));
        assert_eq!(immediate(op::I32_ADD), Some(Imm::None));
        assert_eq!(immediate(0xFE), None);
    }
}
