//! Reference counted I/O buffers and the arena that recycles them.
//!
//! Rather than moving data, readers parse hits as views into these buffers;
//! the reference count decides when a buffer may go back to its pool.

mod arena;
mod refcount;

pub use arena::BufferArena;
pub use refcount::ReferenceCountedBuffer;
