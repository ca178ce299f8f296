//! Multi-producer timestamp re-sort.
//!
//! Workers preserve the order of their own inputs, so each producer's
//! chunks arrive in timestamp order; whenever every producer still in
//! play has a chunk queued, the globally earliest chunk is safe to emit.

use std::collections::{BTreeMap, VecDeque};

use log::{error, info, warn};
use prometheus::Registry;

use common::error::Result;
use common::ringitem::{self, END_RUN};

use crate::builtitem;
use crate::element::ProcessingElement;
use crate::messaging::{Receiver, Sender};
use crate::metrics::ElementCounters;

struct Chunk {
    first_ts: u64,
    data: Vec<u8>,
}

#[derive(Default)]
struct ProducerQueue {
    chunks: VecDeque<Chunk>,
    no_more: bool,
}

/// Fan-in receiver that re-imposes global timestamp order on the chunks
/// the workers emit, treating each chunk as an already sorted atomic unit
/// keyed by its first timestamp.
pub struct RingItemSorter {
    source: Receiver,
    sink: Sender,
    n_producers: usize,
    ends_remaining: usize,
    queues: BTreeMap<u32, ProducerQueue>,
    counters: ElementCounters,
}

impl RingItemSorter {
    pub fn new(
        source: Receiver,
        sink: Sender,
        n_producers: usize,
        registry: &Registry,
    ) -> RingItemSorter {
        RingItemSorter {
            source,
            sink,
            n_producers,
            ends_remaining: n_producers,
            queues: BTreeMap::new(),
            counters: ElementCounters::new(registry, "sorter"),
        }
    }

    fn process(&mut self, mut message: Vec<u8>) -> Result<()> {
        let id = builtitem::producer_id(&message)?;
        message.drain(..4);

        if message.is_empty() {
            // This producer is done.
            let queue = self.queues.entry(id).or_default();
            if queue.no_more {
                warn!(
                    "producer {} announced its end twice; flushing and exiting",
                    id
                );
                self.ends_remaining = 0;
                return Ok(());
            }
            queue.no_more = true;
            self.ends_remaining = self.ends_remaining.saturating_sub(1);
            // Retiring a producer can unblock the emission constraint.
            return self.emit_ready();
        }

        // Reject torn chunks before they can poison the queues.
        match builtitem::chunk_entries(&message) {
            Ok(entries) => {
                for e in &entries {
                    if ringitem::item_type(e.item(&message)) == END_RUN {
                        // The barrier guarantees nothing follows it, but a
                        // chunk handed to a slower worker can still be in
                        // flight; the full drain waits for the end markers
                        // so the output stays non-decreasing.
                        info!("producer {} delivered the run end", id);
                    }
                }
                let first_ts = entries[0].timestamp;
                self.queues.entry(id).or_default().chunks.push_back(Chunk {
                    first_ts,
                    data: message,
                });
                self.counters.blocks.inc();
                self.counters.items.inc_by(entries.len() as u64);
            }
            Err(e) => {
                error!("producer {} sent a corrupt chunk, dropping it: {}", id, e);
                self.counters.drops.inc();
                return Ok(());
            }
        }
        self.emit_ready()
    }

    /// Earliest queued chunk, ties to the lower producer id.
    fn earliest(&self) -> Option<u32> {
        self.queues
            .iter()
            .filter_map(|(id, q)| q.chunks.front().map(|c| (c.first_ts, *id)))
            .min()
            .map(|(_, id)| id)
    }

    fn emit_from(&mut self, id: u32) -> Result<()> {
        let chunk = self
            .queues
            .get_mut(&id)
            .and_then(|q| q.chunks.pop_front())
            .expect("emitting from an empty producer queue");
        self.sink.send(&[&chunk.data])
    }

    /// Emits while a safe decision exists: every producer must be known,
    /// and every one still active must have a chunk queued.
    fn emit_ready(&mut self) -> Result<()> {
        loop {
            if self.queues.len() < self.n_producers {
                return Ok(());
            }
            if self
                .queues
                .values()
                .any(|q| !q.no_more && q.chunks.is_empty())
            {
                return Ok(());
            }
            match self.earliest() {
                Some(id) => self.emit_from(id)?,
                None => return Ok(()),
            }
        }
    }

    fn flush_all(&mut self) -> Result<()> {
        while let Some(id) = self.earliest() {
            self.emit_from(id)?;
        }
        Ok(())
    }
}

impl RingItemSorter {
    fn pump(&mut self) -> Result<()> {
        while self.ends_remaining > 0 {
            let message = self.source.recv()?;
            if message.is_empty() {
                warn!(
                    "fan-in closed with {} producers outstanding; flushing",
                    self.ends_remaining
                );
                break;
            }
            self.process(message)?;
        }
        self.flush_all()?;
        self.sink.end()?;
        Ok(())
    }
}

impl ProcessingElement for RingItemSorter {
    fn run(&mut self) -> Result<()> {
        let result = self.pump();
        if result.is_err() {
            let _ = self.sink.end();
        }
        result
    }
}
