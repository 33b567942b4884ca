//! LEB128 decoding for the integer widths the binary format uses.
//!
//! Unsigned values accumulate 7-bit groups little-endian first; signed
//! values additionally sign-extend from bit 6 of the final group. A u32
//! may occupy at most 5 bytes and a u64 at most 10; longer encodings and
//! values that do not fit the target width are rejected.

use super::{cursor::Cursor, DecodeError, Result};

/// Decode an unsigned LEB128 integer into a u32 (max 5 bytes).
pub fn read_uleb_u32(cur: &mut Cursor) -> Result<u32> {
    read_uleb(cur, 32).map(|v| v as u32)
}

/// Decode an unsigned LEB128 integer into a u64 (max 10 bytes).
pub fn read_uleb_u64(cur: &mut Cursor) -> Result<u64> {
    read_uleb(cur, 64)
}

/// Decode a signed LEB128 integer into an i32 (max 5 bytes).
pub fn read_sleb_i32(cur: &mut Cursor) -> Result<i32> {
    read_sleb(cur, 32).map(|v| v as i32)
}

/// Decode a signed LEB128 integer into an i64 (max 10 bytes).
pub fn read_sleb_i64(cur: &mut Cursor) -> Result<i64> {
    read_sleb(cur, 64)
}

fn read_uleb(cur: &mut Cursor, bits: u32) -> Result<u64> {
    let start = cur.offset();
    let max_bytes = (bits + 6) / 7;
    let mut result: u64 = 0;
    let mut shift: u32 = 0;

    for _ in 0..max_bytes {
        let byte = cur.read_u8()?;
        let low = (byte & 0x7F) as u64;
        // Final group of a maximal encoding: bits beyond the target
        // width must be zero.
        if shift + 7 > bits && (low >> (bits - shift)) != 0 {
            return Err(DecodeError::MalformedLeb128 { offset: start });
        }
        result |= low << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }

    Err(DecodeError::MalformedLeb128 { offset: start })
}

fn read_sleb(cur: &mut Cursor, bits: u32) -> Result<i64> {
    let start = cur.offset();
    let max_bytes = (bits + 6) / 7;
    let mut result: i64 = 0;
    let mut shift: u32 = 0;

    for _ in 0..max_bytes {
        let byte = cur.read_u8()?;
        result |= ((byte & 0x7F) as i64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            if shift < 64 && (byte & 0x40) != 0 {
                result |= -1i64 << shift;
            }
            if bits < 64 {
                let min = -(1i64 << (bits - 1));
                let max = (1i64 << (bits - 1)) - 1;
                if result < min || result > max {
                    return Err(DecodeError::MalformedLeb128 { offset: start });
                }
            }
            return Ok(result);
        }
    }

    Err(DecodeError::MalformedLeb128 { offset: start })
}
