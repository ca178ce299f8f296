//! Tail of the pipeline: forwarders that move sorted chunks out of the
//! processing fabric.

use prometheus::Registry;

use common::error::Result;
use common::ringitem::io::RingItemWriter;

use crate::builtitem;
use crate::element::ProcessingElement;
use crate::messaging::{Receiver, Sender};
use crate::metrics::ElementCounters;

/// Verbatim forwarder from one transport to another.
pub struct DataSinkElement {
    source: Receiver,
    sink: Sender,
}

impl DataSinkElement {
    pub fn new(source: Receiver, sink: Sender) -> DataSinkElement {
        DataSinkElement { source, sink }
    }
}

impl ProcessingElement for DataSinkElement {
    fn run(&mut self) -> Result<()> {
        loop {
            let data = self.source.recv()?;
            if data.is_empty() {
                self.sink.end()?;
                return Ok(());
            }
            self.sink.send(&[&data])?;
        }
    }
}

/// Final sink: unwraps sorted chunks and writes the bare ring items,
/// without their timestamp prefixes, to the output stream.
pub struct RingBlockSink {
    source: Receiver,
    writer: Box<dyn RingItemWriter + Send>,
    counters: ElementCounters,
}

impl RingBlockSink {
    pub fn new(
        source: Receiver,
        writer: Box<dyn RingItemWriter + Send>,
        registry: &Registry,
    ) -> RingBlockSink {
        RingBlockSink {
            source,
            writer,
            counters: ElementCounters::new(registry, "sink"),
        }
    }
}

impl ProcessingElement for RingBlockSink {
    fn run(&mut self) -> Result<()> {
        loop {
            let data = self.source.recv()?;
            if data.is_empty() {
                return Ok(());
            }
            for entry in builtitem::chunk_entries(&data)? {
                self.writer.put_item(entry.item(&data))?;
                self.counters.items.inc();
            }
            self.counters.blocks.inc();
        }
    }
}
