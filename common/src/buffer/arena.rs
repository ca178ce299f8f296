use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::buffer::ReferenceCountedBuffer;
use crate::error::{Error, Result};

/// An unbounded FIFO pool of reference counted buffers.
///
/// `allocate` resizes the front pooled buffer (or a fresh one) to the
/// request, so the pool statistically converges on the largest historical
/// request and stops allocating altogether.  Only unreferenced buffers may
/// come back through `free`.
pub struct BufferArena {
    pool: Mutex<VecDeque<Arc<ReferenceCountedBuffer>>>,
}

impl BufferArena {
    pub fn new() -> BufferArena {
        BufferArena {
            pool: Mutex::new(VecDeque::new()),
        }
    }

    /// Hands out a buffer of at least `n_bytes`, refcount zero.
    pub fn allocate(&self, n_bytes: usize) -> Result<Arc<ReferenceCountedBuffer>> {
        let pooled = self.pool.lock().unwrap().pop_front();
        let mut buffer =
            pooled.unwrap_or_else(|| Arc::new(ReferenceCountedBuffer::new(0)));
        match Arc::get_mut(&mut buffer) {
            Some(b) => b.resize(n_bytes)?,
            // A pooled buffer with outstanding handles should not exist;
            // refuse rather than resize under someone's feet.
            None => return Err(Error::StillReferenced),
        }
        Ok(buffer)
    }

    /// Returns a buffer to the pool.  Buffers with live references are the
    /// caller's bug to resolve first.  The caller should drop its own handle
    /// right after a successful free so the pool ends up sole owner.
    pub fn free(&self, buffer: &Arc<ReferenceCountedBuffer>) -> Result<()> {
        if buffer.is_referenced() {
            return Err(Error::StillReferenced);
        }
        self.pool.lock().unwrap().push_back(Arc::clone(buffer));
        Ok(())
    }

    pub fn pooled(&self) -> usize {
        self.pool.lock().unwrap().len()
    }
}

impl Default for BufferArena {
    fn default() -> Self {
        BufferArena::new()
    }
}
