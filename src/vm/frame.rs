//! Call frames and structured-control blocks.
//!
//! A frame owns its locals and block stack and carries a seekable
//! cursor over the function's body bytes, which stay borrowed from the
//! module for the frame's whole life.

use crate::binary::{cursor::Cursor, leb128};
use crate::error::Trap;
use crate::model::Value;

/// An active structured region. `pos` is the byte offset of the opening
/// opcode within the frame's body. A branch to a loop seeks back to
/// `pos + 2`; a branch to a non-loop block forward-scans to its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub pos: usize,
    pub is_loop: bool,
}

/// A call activation: cursor, locals, and block stack, plus the operand
/// stack height and result arity needed to finish the frame.
#[derive(Debug)]
pub struct Frame<'m> {
    /// Function index, for diagnostics only.
    pub func: u32,
    body: &'m [u8],
    pos: usize,
    pub locals: Vec<Value>,
    pub blocks: Vec<Block>,
    /// Operand stack height when the frame was entered (arguments
    /// already popped); the stack is truncated back to this on exit.
    pub base: usize,
    pub result_arity: usize,
}

impl<'m> Frame<'m> {
    pub fn new(
        func: u32,
        body: &'m [u8],
        locals: Vec<Value>,
        base: usize,
        result_arity: usize,
    ) -> Self {
        Self {
            func,
            body,
            pos: 0,
            locals,
            blocks: Vec::new(),
            base,
            result_arity,
        }
    }

    pub fn body(&self) -> &'m [u8] {
        self.body
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) -> Result<(), Trap> {
        if pos > self.body.len() {
            return Err(Trap::MalformedCode {
                offset: pos,
                msg: "seek out of bounds",
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, Trap> {
        let b = *self.body.get(self.pos).ok_or(Trap::MalformedCode {
            offset: self.pos,
            msg: "unexpected end of code",
        })?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_uleb_u32(&mut self) -> Result<u32, Trap> {
        let mut cur = Cursor::new(&self.body[self.pos..]);
        let v = leb128::read_uleb_u32(&mut cur).map_err(|_| Trap::MalformedCode {
            offset: self.pos,
            msg: "malformed index immediate",
        })?;
        self.pos += cur.offset();
        Ok(v)
    }

    pub fn read_sleb_i32(&mut self) -> Result<i32, Trap> {
        let mut cur = Cursor::new(&self.body[self.pos..]);
        let v = leb128::read_sleb_i32(&mut cur).map_err(|_| Trap::MalformedCode {
            offset: self.pos,
            msg: "malformed constant immediate",
        })?;
        self.pos += cur.offset();
        Ok(v)
    }

    /// Consume a block-type byte; only the empty type executes in this
    /// subset.
    pub fn expect_empty_blocktype(&mut self) -> Result<(), Trap> {
        let offset = self.pos;
        match self.read_u8()? {
            0x40 => Ok(()),
            _ => Err(Trap::MalformedCode {
                offset,
                msg: "only the empty block type is supported",
            }),
        }
    }
}
