//! Vector and name helpers layered over the cursor.

use super::{cursor::Cursor, leb128, DecodeError, Result};

/// Read a ULEB128-length-prefixed run of raw bytes.
pub fn read_len_prefixed_bytes(cur: &mut Cursor) -> Result<Vec<u8>> {
    let len = leb128::read_uleb_u32(cur)? as usize;
    Ok(cur.read_bytes(len)?.to_vec())
}

/// Read a UTF-8 name (length-prefixed bytes).
pub fn read_name(cur: &mut Cursor) -> Result<String> {
    let offset = cur.offset();
    let bytes = read_len_prefixed_bytes(cur)?;
    String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 { offset })
}

/// Read a ULEB128-counted vector of `T` using the element reader.
pub fn read_vec<T, F>(cur: &mut Cursor, mut elem: F) -> Result<Vec<T>>
where
    F: FnMut(&mut Cursor) -> Result<T>,
{
    let len = leb128::read_uleb_u32(cur)? as usize;
    // Cap the pre-allocation: a hostile length can otherwise reserve
    // gigabytes before the first element read fails.
    let mut out = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        out.push(elem(cur)?);
    }
    Ok(out)
}
