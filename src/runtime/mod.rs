//! Engine-owned runtime instances: linear memories, global cells, and
//! the host import bridge.

pub mod global;
pub mod host;
pub mod memory;

pub use global::GlobalInstance;
pub use host::{HostContext, HostFunc};
pub use memory::{MemoryInstance, PAGE_SIZE};
