//! Thin send/receive surfaces over a transport, so elements talk in
//! messages rather than transport endpoints.

use common::error::Result;

use crate::transport::Transport;

pub struct Sender {
    transport: Box<dyn Transport>,
}

impl Sender {
    pub fn new(transport: Box<dyn Transport>) -> Sender {
        Sender { transport }
    }

    /// Gather-sends a multi part message.
    pub fn send(&mut self, parts: &[&[u8]]) -> Result<()> {
        self.transport.send(parts)
    }

    pub fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.transport.send(&[data])
    }

    pub fn end(&mut self) -> Result<()> {
        self.transport.end()
    }
}

pub struct Receiver {
    transport: Box<dyn Transport>,
}

impl Receiver {
    pub fn new(transport: Box<dyn Transport>) -> Receiver {
        Receiver { transport }
    }

    /// The next message; empty at end of stream.
    pub fn recv(&mut self) -> Result<Vec<u8>> {
        self.transport.recv()
    }
}
