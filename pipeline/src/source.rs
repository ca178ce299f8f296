//! Fan-out data source: reads ring items, stamps each with the running
//! body-header timestamp and ships them in clumps to amortize messaging
//! overhead.

use log::debug;
use prometheus::Registry;

use common::error::Result;
use common::ringitem::io::RingItemReader;
use common::ringitem::{self, NULL_TIMESTAMP, RING_FORMAT};

use crate::element::ProcessingElement;
use crate::messaging::Sender;
use crate::metrics::ElementCounters;

/// Reads the upstream ring-item stream and pushes `[u64 ts][item]` pairs,
/// `clump_size` items at a time, into the fan-out.
///
/// The timestamp attached to an item is the latest body-header timestamp
/// seen; `RING_FORMAT` marks a stream restart and resets it, the null
/// timestamp inherits it.
pub struct RingItemSourceElement {
    source: Box<dyn RingItemReader + Send>,
    fanout: Sender,
    clump_size: usize,
    last_timestamp: u64,
    chunk: Vec<(u64, Vec<u8>)>,
    counters: ElementCounters,
}

impl RingItemSourceElement {
    pub fn new(
        source: Box<dyn RingItemReader + Send>,
        fanout: Sender,
        clump_size: usize,
        registry: &Registry,
    ) -> RingItemSourceElement {
        RingItemSourceElement {
            source,
            fanout,
            clump_size: clump_size.max(1),
            last_timestamp: 0,
            chunk: Vec::new(),
            counters: ElementCounters::new(registry, "source"),
        }
    }

    fn process(&mut self, item: Vec<u8>) -> Result<()> {
        ringitem::format::check_item(&item)?;
        if ringitem::item_type(&item) == RING_FORMAT {
            self.last_timestamp = 0;
        } else if let Some(bh) = ringitem::body_header(&item) {
            if bh.timestamp != NULL_TIMESTAMP {
                self.last_timestamp = bh.timestamp;
            }
        }
        self.chunk.push((self.last_timestamp, item));
        self.counters.items.inc();

        if self.chunk.len() >= self.clump_size {
            self.send_chunk()?;
        }
        Ok(())
    }

    fn send_chunk(&mut self) -> Result<()> {
        let stamps: Vec<[u8; 8]> = self.chunk.iter().map(|(ts, _)| ts.to_le_bytes()).collect();
        let mut parts: Vec<&[u8]> = Vec::with_capacity(self.chunk.len() * 2);
        for (stamp, (_, item)) in stamps.iter().zip(self.chunk.iter()) {
            parts.push(stamp);
            parts.push(item);
        }
        self.fanout.send(&parts)?;
        self.counters.blocks.inc();
        self.chunk.clear();
        Ok(())
    }
}

impl RingItemSourceElement {
    fn pump(&mut self) -> Result<()> {
        loop {
            match self.source.read_item()? {
                Some(item) => self.process(item)?,
                None => {
                    if !self.chunk.is_empty() {
                        self.send_chunk()?;
                    }
                    debug!("ring item source exhausted, propagating end");
                    self.fanout.end()?;
                    return Ok(());
                }
            }
        }
    }
}

impl ProcessingElement for RingItemSourceElement {
    fn run(&mut self) -> Result<()> {
        let result = self.pump();
        if result.is_err() {
            // Failing upstream still owes downstream an end of stream.
            let _ = self.fanout.end();
        }
        result
    }
}
