//! Host import bridge.
//!
//! A host function receives the engine's memories and globals through a
//! [`HostContext`] so it can observe and mutate engine state (peeking a
//! memory byte, bumping a global) without owning the engine itself.

use crate::error::HostError;
use crate::model::Value;
use crate::runtime::{GlobalInstance, MemoryInstance};

/// Host function callable through `call`. At most one return value; a
/// returned error surfaces unchanged as `Trap::Host`.
pub type HostFunc =
    dyn Fn(&mut HostContext<'_>, &[Value]) -> Result<Option<Value>, HostError> + Send + Sync;

/// Mutable view of engine state handed to a host callback for the
/// duration of the call.
pub struct HostContext<'e> {
    pub(crate) memories: &'e mut Vec<MemoryInstance>,
    pub(crate) globals: &'e mut Vec<GlobalInstance>,
}

impl<'e> HostContext<'e> {
    pub fn memory(&self, idx: u32) -> Option<&MemoryInstance> {
        self.memories.get(idx as usize)
    }

    pub fn memory_mut(&mut self, idx: u32) -> Option<&mut MemoryInstance> {
        self.memories.get_mut(idx as usize)
    }

    pub fn global(&self, idx: u32) -> Option<Value> {
        self.globals.get(idx as usize).map(|g| g.get())
    }

    pub fn set_global(&mut self, idx: u32, v: Value) -> Result<(), ()> {
        self.globals.get_mut(idx as usize).ok_or(())?.set(v)
    }
}
