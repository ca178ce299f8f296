use std::collections::VecDeque;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use log::{error, info, warn};

use common::buffer::BufferArena;
use common::error::{Error, Result};

use crate::hit::ZeroCopyHit;
use crate::manager::Hit;
use crate::raw;

/// External FIFO read on one digitizer module.  The hardware access layer
/// supplies the implementation; tests script it.
pub trait FifoReader {
    /// Fills `buf` (a whole number of u32 words) from the module's FIFO.
    fn read(&mut self, module: u32, buf: &mut [u8]) -> Result<()>;
}

pub type HitList = VecDeque<Hit>;

const CHANNELS_PER_MODULE: usize = 16;

/// Reads raw word blocks from one module into arena buffers and parses
/// them into zero-copy hits.
///
/// The arena is owned by this reader and never shared across readers; it
/// cycles buffers between the pool and the in-flight hit views.
pub struct ModuleReader {
    module_index: usize,
    expected_event_words: u32,
    ts_multiplier: f64,
    use_external_clock: bool,
    pub module_type: u32,
    arena: Arc<BufferArena>,
    last_stamps: [f64; CHANNELS_PER_MODULE],
}

impl ModuleReader {
    pub fn new(
        module_index: usize,
        expected_event_words: u32,
        module_type: u32,
        ts_multiplier: f64,
    ) -> ModuleReader {
        let mut reader = ModuleReader {
            module_index,
            expected_event_words,
            ts_multiplier,
            use_external_clock: false,
            module_type,
            arena: Arc::new(BufferArena::new()),
            last_stamps: [0.0; CHANNELS_PER_MODULE],
        };
        reader.reset();
        reader
    }

    /// Selects the external clock stamp; requires hits with at least six
    /// header words, shorter ones fall back to being dropped.
    pub fn use_external_clock(&mut self, on: bool) {
        self.use_external_clock = on;
    }

    pub fn module_index(&self) -> usize {
        self.module_index
    }

    /// Reads up to `max_words` u32 words (rounded down to whole events)
    /// and appends the parsed hits to `hits`.  Returns the number of words
    /// actually read.
    ///
    /// A device failure is logged and reads as zero words; a hit whose
    /// length word disagrees with the configured event length is fatal to
    /// the batch.
    pub fn read(
        &mut self,
        fifo: &mut dyn FifoReader,
        hits: &mut HitList,
        max_words: usize,
    ) -> Result<usize> {
        let n_words = max_words - max_words % self.expected_event_words as usize;
        if n_words == 0 {
            return Ok(0);
        }

        let mut buffer = self.arena.allocate(n_words * 4)?;
        let read_ok = {
            let storage = Arc::get_mut(&mut buffer)
                .expect("freshly allocated buffer has outside references");
            match fifo.read(self.module_index as u32, storage.data_mut()) {
                Ok(()) => true,
                Err(e) => {
                    error!(
                        "error reading module {} FIFO ({} words): {}",
                        self.module_index, n_words, e
                    );
                    false
                }
            }
        };
        if !read_ok {
            self.arena.free(&buffer)?;
            return Ok(0);
        }

        self.parse_hits(hits, &buffer, n_words)?;

        // Nothing referenced the buffer (every hit tossed): recycle it now,
        // otherwise the last hit released returns it.
        if !buffer.is_referenced() {
            self.arena.free(&buffer)?;
        }
        Ok(n_words)
    }

    /// Explicitly releases a hit's view of its buffer.
    pub fn free_hit(hit: &mut Hit) {
        hit.1.free_hit();
    }

    /// Clears the per-channel timestamp history, e.g. between runs.
    pub fn reset(&mut self) {
        info!(
            "resetting last channel timestamps on module {}",
            self.module_index
        );
        self.last_stamps = [0.0; CHANNELS_PER_MODULE];
    }

    fn parse_hits(
        &mut self,
        hits: &mut HitList,
        buffer: &Arc<common::buffer::ReferenceCountedBuffer>,
        n_words: usize,
    ) -> Result<()> {
        let mut offset = 0usize;
        let mut words_left = n_words;
        while words_left > 0 {
            let word0 = LittleEndian::read_u32(&buffer.data()[offset..offset + 4]);
            let size = raw::channel_length(word0);
            if size != self.expected_event_words {
                return Err(Error::HitLengthMismatch {
                    module: self.module_index as u32,
                    expected: self.expected_event_words,
                    actual: size,
                });
            }

            let mut hit = ZeroCopyHit::bound(
                offset,
                size as usize,
                Arc::clone(buffer),
                Arc::clone(&self.arena),
            );
            hit.module_type = self.module_type;

            if !hit.compute_time(self.ts_multiplier, self.use_external_clock)
                || !hit.compute_channel()
            {
                warn!(
                    "hit from module {} does not contain a full header, tossing it",
                    self.module_index
                );
                hit.free_hit();
            } else {
                self.check_order(&hit);
                hits.push_back((self.module_index, hit));
            }

            offset += size as usize * 4;
            words_left -= size as usize;
        }
        Ok(())
    }

    /// Per channel, time must increase monotonically; equal stamps rate a
    /// warning, backwards ones an error.
    fn check_order(&mut self, hit: &ZeroCopyHit) {
        let channel = hit.channel as usize & (CHANNELS_PER_MODULE - 1);
        let old = self.last_stamps[channel];
        let new = hit.time;
        self.last_stamps[channel] = new;
        if new == old {
            warn!(
                "module {} channel {} time is not increasing at timestamp {}",
                self.module_index, channel, new
            );
        }
        if new < old {
            error!(
                "module {} channel {} time went backwards, previous {} current {}",
                self.module_index, channel, old, new
            );
        }
    }
}
