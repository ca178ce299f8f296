use std::sync::Arc;

use common::buffer::{BufferArena, ReferenceCountedBuffer};

use crate::raw::RawHit;

/// A parsed hit that borrows its bytes from an arena buffer instead of
/// copying them.
///
/// Binding acquires one reference on the buffer; rebinding or dropping
/// releases it, and the release that takes the count to zero hands the
/// buffer back to its arena.  Buffer and arena are held as shared handles
/// so a hit may outlive the stack frame that parsed it.
pub struct ZeroCopyHit {
    buffer: Option<Arc<ReferenceCountedBuffer>>,
    arena: Option<Arc<BufferArena>>,
    offset: usize,
    len_words: usize,

    pub time: f64,
    pub channel: i32,
    pub module_type: u32,
}

impl ZeroCopyHit {
    /// An unbound hit; call `set_hit` before using it.
    pub fn new() -> ZeroCopyHit {
        ZeroCopyHit {
            buffer: None,
            arena: None,
            offset: 0,
            len_words: 0,
            time: 0.0,
            channel: 0,
            module_type: 0,
        }
    }

    pub fn bound(
        offset: usize,
        len_words: usize,
        buffer: Arc<ReferenceCountedBuffer>,
        arena: Arc<BufferArena>,
    ) -> ZeroCopyHit {
        let mut hit = ZeroCopyHit::new();
        hit.set_hit(offset, len_words, buffer, arena);
        hit
    }

    /// Rebinds the view, releasing the current reference first.
    pub fn set_hit(
        &mut self,
        offset: usize,
        len_words: usize,
        buffer: Arc<ReferenceCountedBuffer>,
        arena: Arc<BufferArena>,
    ) {
        self.release();
        buffer.reference();
        self.buffer = Some(buffer);
        self.arena = Some(arena);
        self.offset = offset;
        self.len_words = len_words;
    }

    /// Disassociates from the underlying storage, possibly returning the
    /// buffer to its arena.
    pub fn free_hit(&mut self) {
        self.release();
        self.offset = 0;
        self.len_words = 0;
    }

    pub fn is_bound(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn len_words(&self) -> usize {
        self.len_words
    }

    /// The raw hit bytes.  Panics when unbound; parsing code never hands
    /// out unbound hits.
    pub fn data(&self) -> &[u8] {
        let buffer = self.buffer.as_ref().expect("access to an unbound hit");
        &buffer.data()[self.offset..self.offset + self.len_words * 4]
    }

    pub fn raw(&self) -> RawHit<'_> {
        RawHit::new(self.data())
    }

    /// Extracts and calibrates the timestamp.  Returns false when the hit
    /// is too short to carry the requested stamp.
    pub fn compute_time(&mut self, multiplier: f64, use_external: bool) -> bool {
        let stamp = if use_external {
            self.raw().external_timestamp()
        } else {
            self.raw().coarse_timestamp()
        };
        match stamp {
            Some(t) => {
                self.time = t as f64 * multiplier;
                true
            }
            None => false,
        }
    }

    /// Extracts the channel id from word 0.  Returns false on a short hit.
    pub fn compute_channel(&mut self) -> bool {
        match self.raw().channel() {
            Some(ch) => {
                self.channel = ch as i32;
                true
            }
            None => false,
        }
    }

    fn release(&mut self) {
        if let (Some(buffer), Some(arena)) = (self.buffer.take(), self.arena.take()) {
            buffer.dereference();
            if !buffer.is_referenced() {
                arena
                    .free(&buffer)
                    .expect("buffer regained references during release");
            }
        }
    }
}

impl Drop for ZeroCopyHit {
    fn drop(&mut self) {
        self.release();
    }
}

impl Default for ZeroCopyHit {
    fn default() -> Self {
        ZeroCopyHit::new()
    }
}

impl std::fmt::Debug for ZeroCopyHit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeroCopyHit")
            .field("bound", &self.is_bound())
            .field("offset", &self.offset)
            .field("len_words", &self.len_words)
            .field("time", &self.time)
            .field("channel", &self.channel)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with_buffer(n: usize) -> (Arc<BufferArena>, Arc<ReferenceCountedBuffer>) {
        let arena = Arc::new(BufferArena::new());
        let buffer = arena.allocate(n).unwrap();
        (arena, buffer)
    }

    #[test]
    fn binding_references_the_buffer() {
        let (arena, buffer) = arena_with_buffer(64);
        let hit = ZeroCopyHit::bound(0, 4, Arc::clone(&buffer), Arc::clone(&arena));
        assert!(buffer.is_referenced());
        drop(hit);
        assert!(!buffer.is_referenced());
        drop(buffer);
        assert_eq!(arena.pooled(), 1);
    }

    #[test]
    fn two_views_share_one_buffer() {
        let (arena, buffer) = arena_with_buffer(64);
        let a = ZeroCopyHit::bound(0, 4, Arc::clone(&buffer), Arc::clone(&arena));
        let b = ZeroCopyHit::bound(16, 4, Arc::clone(&buffer), Arc::clone(&arena));
        drop(a);
        assert!(buffer.is_referenced());
        drop(b);
        assert!(!buffer.is_referenced());
        drop(buffer);
        assert_eq!(arena.pooled(), 1);
    }

    #[test]
    fn rebinding_moves_the_reference() {
        let (arena, first) = arena_with_buffer(32);
        let second = arena.allocate(32).unwrap();
        let mut hit = ZeroCopyHit::bound(0, 4, Arc::clone(&first), Arc::clone(&arena));
        hit.set_hit(0, 4, Arc::clone(&second), Arc::clone(&arena));
        assert!(!first.is_referenced());
        assert!(second.is_referenced());
        drop(first);
        assert_eq!(arena.pooled(), 1);
        drop(hit);
        assert!(!second.is_referenced());
    }

    #[test]
    fn free_hit_is_idempotent() {
        let (arena, buffer) = arena_with_buffer(16);
        let mut hit = ZeroCopyHit::bound(0, 2, Arc::clone(&buffer), Arc::clone(&arena));
        hit.free_hit();
        hit.free_hit();
        assert!(!hit.is_bound());
        assert!(!buffer.is_referenced());
    }
}
