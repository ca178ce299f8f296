//! The generic pull worker: receive a work item from the fan-out, hand it
//! to a processor, repeat until the end marker.

use common::error::Result;

use crate::element::ProcessingElement;
use crate::messaging::{Receiver, Sender};
use crate::transport::FanoutClientTransport;

/// The application part of a worker.  `process` owns the received message
/// so it can patch sizes in place before gathering its output.
///
/// An empty `data` is the end marker; the processor must forward its own
/// end downstream (workers on a fan-in announce it with an id-only
/// message) before the loop exits.
pub trait Processor: Send {
    fn process(&mut self, data: Vec<u8>, sink: &mut Sender) -> Result<()>;
}

/// Bundles the messaging ends a worker talks through.
pub struct Dispatcher {
    source: Receiver,
    sink: Sender,
}

impl Dispatcher {
    pub fn new(source: Receiver, sink: Sender) -> Dispatcher {
        Dispatcher { source, sink }
    }

    pub fn receive_work_item(&mut self) -> Result<Vec<u8>> {
        self.source.recv()
    }

    pub fn send_work_item(&mut self, parts: &[&[u8]]) -> Result<()> {
        self.sink.send(parts)
    }

    pub fn end(&mut self) -> Result<()> {
        self.sink.end()
    }
}

/// Processor that forwards work untouched, adding only the producer id
/// the sorter routes on.  The do-nothing transform every composition can
/// fall back to.
pub struct ForwardingProcessor {
    id: u32,
}

impl ForwardingProcessor {
    pub fn new(id: u32) -> ForwardingProcessor {
        ForwardingProcessor { id }
    }
}

impl Processor for ForwardingProcessor {
    fn process(&mut self, data: Vec<u8>, sink: &mut Sender) -> Result<()> {
        if data.is_empty() {
            sink.send(&[&self.id.to_le_bytes()])
        } else {
            sink.send(&[&self.id.to_le_bytes(), &data])
        }
    }
}

/// A worker fed by a fan-out transport, running a processor until end of
/// stream.
pub struct ParallelWorker {
    source: Box<dyn FanoutClientTransport>,
    sink: Sender,
    client_id: u64,
    processor: Box<dyn Processor>,
}

impl ParallelWorker {
    pub fn new(
        mut source: Box<dyn FanoutClientTransport>,
        sink: Sender,
        client_id: u64,
        processor: Box<dyn Processor>,
    ) -> ParallelWorker {
        source.set_id(client_id);
        ParallelWorker {
            source,
            sink,
            client_id,
            processor,
        }
    }

    fn pump(&mut self) -> Result<()> {
        loop {
            let data = self.source.recv()?;
            let at_end = data.is_empty();
            // The end marker is processed too so the processor can relay
            // its own end-of-stream downstream.
            self.processor.process(data, &mut self.sink)?;
            if at_end {
                return Ok(());
            }
        }
    }
}

impl ProcessingElement for ParallelWorker {
    fn run(&mut self) -> Result<()> {
        let result = self.pump();
        if result.is_err() {
            // A dying worker still announces its end so the sorter can
            // retire it instead of waiting forever.
            let _ = self.sink.send(&[&(self.client_id as u32).to_le_bytes()]);
        }
        result
    }
}
