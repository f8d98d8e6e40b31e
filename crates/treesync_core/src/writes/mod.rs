//! Pending local writes: sparse overlays and the write log.

mod compound;
mod write_tree;

pub use compound::CompoundWrite;
pub use write_tree::{UserWriteRecord, WritePayload, WriteTree, WriteTreeRef};
