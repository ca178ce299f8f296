//! Scripted transport for exercising elements without threads: canned
//! messages on the receive side, captured messages on the send side.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use common::error::Result;

use super::{gather, FanoutClientTransport, Transport};

#[derive(Default)]
pub struct MockTransport {
    incoming: VecDeque<Vec<u8>>,
    pub sent: Vec<Vec<u8>>,
    pub ended: bool,
    id: Option<u64>,
}

impl MockTransport {
    pub fn new() -> MockTransport {
        MockTransport::default()
    }

    /// Queues one incoming message, gathered from parts like a real send.
    pub fn add_message(&mut self, parts: &[&[u8]]) {
        self.incoming.push_back(gather(parts));
    }

    pub fn client_id(&self) -> Option<u64> {
        self.id
    }
}

impl Transport for MockTransport {
    fn send(&mut self, parts: &[&[u8]]) -> Result<()> {
        self.sent.push(gather(parts));
        Ok(())
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        // Exhausted scripts read as end of stream, forever.
        Ok(self.incoming.pop_front().unwrap_or_default())
    }

    fn end(&mut self) -> Result<()> {
        self.ended = true;
        Ok(())
    }
}

impl FanoutClientTransport for MockTransport {
    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }
}

/// Shared handle onto a mock, for tests that must keep inspecting the
/// transport after an element has taken ownership of it.
#[derive(Clone, Default)]
pub struct SharedMockTransport(Arc<Mutex<MockTransport>>);

impl SharedMockTransport {
    pub fn new() -> SharedMockTransport {
        SharedMockTransport::default()
    }

    pub fn add_message(&self, parts: &[&[u8]]) {
        self.0.lock().unwrap().add_message(parts);
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().sent.clone()
    }

    pub fn ended(&self) -> bool {
        self.0.lock().unwrap().ended
    }
}

impl Transport for SharedMockTransport {
    fn send(&mut self, parts: &[&[u8]]) -> Result<()> {
        self.0.lock().unwrap().send(parts)
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        self.0.lock().unwrap().recv()
    }

    fn end(&mut self) -> Result<()> {
        self.0.lock().unwrap().end()
    }
}

impl FanoutClientTransport for SharedMockTransport {
    fn set_id(&mut self, id: u64) {
        self.0.lock().unwrap().set_id(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_messages_then_end() {
        let mut t = MockTransport::new();
        t.add_message(&[b"ab", b"cd"]);
        assert_eq!(t.recv().unwrap(), b"abcd");
        assert!(t.recv().unwrap().is_empty());
        assert!(t.recv().unwrap().is_empty());

        t.send(&[b"x", b"y"]).unwrap();
        t.end().unwrap();
        assert_eq!(t.sent, vec![b"xy".to_vec()]);
        assert!(t.ended);
    }
}
