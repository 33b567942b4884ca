//! Global cell: one value plus its declared type and mutability.

use crate::model::{GlobalType, Value};

#[derive(Debug, Clone)]
pub struct GlobalInstance {
    ty: GlobalType,
    val: Value,
}

impl GlobalInstance {
    pub fn new(ty: GlobalType, init: Value) -> Self {
        Self { ty, val: init }
    }

    pub fn get(&self) -> Value {
        self.val
    }

    /// Write the cell; refused for immutable globals.
    pub fn set(&mut self, v: Value) -> Result<(), ()> {
        if !self.ty.mutable {
            return Err(());
        }
        self.val = v;
        Ok(())
    }

    pub fn ty(&self) -> GlobalType {
        self.ty
    }
}
