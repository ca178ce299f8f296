//! Stream-level hit sorting: consumes a ring-item stream whose physics
//! events carry raw module hit soups, re-emits one time ordered ring item
//! per hit.

use std::collections::VecDeque;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use common::buffer::BufferArena;
use common::error::{Error, Result};
use common::ringitem::io::{RingItemReader, RingItemWriter};
use common::ringitem::{self, RingItemBuilder, END_RUN, PHYSICS_EVENT};

use crate::hit::ZeroCopyHit;
use crate::manager::{Hit, HitManager};
use crate::raw;

/// Module id bit selecting the external clock stamp.
const EXT_CLOCK_BIT: u32 = 1 << 21;

/// Leading words of a physics body: size in u16 units, module id, clock
/// scale.
const BODY_PREFIX_BYTES: usize = 4 + 4 + 8;

/// Re-sorts the hits inside a ring-item stream.
///
/// Physics events are unpacked into zero-copy hits and accumulated in a
/// `HitManager`; everything else passes straight through.  `END_RUN` acts
/// as a barrier: the manager is flushed before the item is forwarded.
pub struct HitStreamSorter {
    arena: Arc<BufferArena>,
    manager: HitManager,
    source_id: u32,
    last_emitted: f64,
}

impl HitStreamSorter {
    /// `window` is the accumulation window in seconds.
    pub fn new(window: f64) -> HitStreamSorter {
        HitStreamSorter {
            arena: Arc::new(BufferArena::new()),
            manager: HitManager::new(window),
            source_id: 0,
            last_emitted: 0.0,
        }
    }

    /// Runs until the source is exhausted; residual hits are flushed on
    /// the way out.
    pub fn run<R: RingItemReader, W: RingItemWriter>(
        &mut self,
        source: &mut R,
        sink: &mut W,
    ) -> Result<()> {
        while let Some(item) = source.read_item()? {
            self.process_item(&item, sink)?;
        }
        self.flush(sink)?;
        Ok(())
    }

    pub fn process_item<W: RingItemWriter>(&mut self, item: &[u8], sink: &mut W) -> Result<()> {
        ringitem::format::check_item(item)?;
        if let Some(bh) = ringitem::body_header(item) {
            self.source_id = bh.source_id;
        }
        match ringitem::item_type(item) {
            PHYSICS_EVENT => self.process_hits(item, sink),
            END_RUN => {
                self.flush(sink)?;
                sink.put_item(item)?;
                self.last_emitted = 0.0;
                Ok(())
            }
            _ => sink.put_item(item),
        }
    }

    /// Flushes every hit still held by the manager.
    pub fn flush<W: RingItemWriter>(&mut self, sink: &mut W) -> Result<()> {
        self.manager.set_flushing(true);
        let result = self.drain(sink);
        self.manager.set_flushing(false);
        result
    }

    /// Unpacks one physics event body into hits.
    ///
    /// Body layout: `u32` size in u16 units (self inclusive), `u32` module
    /// id (bit 21 selects the external clock), `f64` clock scale, then the
    /// raw hit words as the module emitted them.
    fn process_hits<W: RingItemWriter>(&mut self, item: &[u8], sink: &mut W) -> Result<()> {
        let body = ringitem::body(item);
        if body.len() < BODY_PREFIX_BYTES {
            return Err(Error::CorruptRecord(format!(
                "physics body of {} bytes lacks its module prefix",
                body.len()
            )));
        }
        let body_u16 = LittleEndian::read_u32(&body[0..4]) as usize;
        let module_id = LittleEndian::read_u32(&body[4..8]);
        let clock_scale = LittleEndian::read_f64(&body[8..16]);
        let use_external = module_id & EXT_CLOCK_BIT != 0;

        let prefix_u16 = BODY_PREFIX_BYTES / 2;
        if body_u16 < prefix_u16 || (body_u16 - prefix_u16) * 2 > body.len() - BODY_PREFIX_BYTES
        {
            return Err(Error::CorruptRecord(format!(
                "physics body claims {} u16 words, item holds {} bytes",
                body_u16,
                body.len()
            )));
        }
        let hit_bytes = (body_u16 - prefix_u16) * 2;

        let mut buffer = self.arena.allocate(hit_bytes)?;
        {
            let storage = Arc::get_mut(&mut buffer)
                .expect("freshly allocated buffer has outside references");
            storage.data_mut()[..hit_bytes]
                .copy_from_slice(&body[BODY_PREFIX_BYTES..BODY_PREFIX_BYTES + hit_bytes]);
        }

        let mut hits: VecDeque<Hit> = VecDeque::new();
        let mut offset = 0usize;
        let mut warned_late = false;
        while offset < hit_bytes {
            let word0 = LittleEndian::read_u32(&buffer.data()[offset..offset + 4]);
            let size_words = raw::channel_length(word0) as usize;
            if size_words == 0 || offset + size_words * 4 > hit_bytes {
                return Err(Error::CorruptRecord(format!(
                    "hit of {} words at offset {} runs off the event body, \
                     slot {} modevtlen is likely wrong",
                    size_words,
                    offset,
                    raw::slot(word0)
                )));
            }

            let mut hit = ZeroCopyHit::bound(
                offset,
                size_words,
                Arc::clone(&buffer),
                Arc::clone(&self.arena),
            );
            hit.module_type = module_id;
            if !hit.compute_time(clock_scale, use_external) || !hit.compute_channel() {
                warn!("hit without a full header in physics event, tossing it");
                hit.free_hit();
            } else {
                if !warned_late && hit.time < self.last_emitted {
                    warn!(
                        "module slot {} handed a hit at {} earlier than the last \
                         emitted {}; FIFO threshold may be too large",
                        raw::slot(word0),
                        hit.time,
                        self.last_emitted
                    );
                    warned_late = true;
                }
                hits.push_back((0, hit));
            }
            offset += size_words * 4;
        }

        if !buffer.is_referenced() {
            self.arena.free(&buffer)?;
        }
        drop(buffer);

        let mut batches = vec![hits];
        self.manager.add_hits(&mut batches);
        self.drain(sink)
    }

    fn drain<W: RingItemWriter>(&mut self, sink: &mut W) -> Result<()> {
        while self.manager.have_hit() {
            let (_, mut hit) = self.manager.get_hit();
            self.output_hit(&hit, sink)?;
            hit.free_hit();
        }
        Ok(())
    }

    /// Re-wraps one hit as a standalone physics ring item in the same body
    /// layout the unpacker consumes.
    fn output_hit<W: RingItemWriter>(&mut self, hit: &ZeroCopyHit, sink: &mut W) -> Result<()> {
        self.last_emitted = hit.time;
        let body_u16 = (hit.len_words() + BODY_PREFIX_BYTES / 4) * 2;
        let item = RingItemBuilder::new(PHYSICS_EVENT)
            .body_header(hit.time as u64, self.source_id, 0)
            .u32(body_u16 as u32)
            .u32(hit.module_type)
            .f64(1.0)
            .bytes(hit.data())
            .build();
        sink.put_item(&item)
    }
}
