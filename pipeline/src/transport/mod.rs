//! Unidirectional byte-message channels between processing elements.
//!
//! A zero length message always means end of stream.  Fan-out transports
//! serve a pull protocol: clients identify themselves with a `u64` id and
//! the server answers one pull with one message, so `end()` can hand every
//! registered client its own end marker.

pub mod channel;
pub mod factory;
pub mod group;
pub mod mock;

use std::collections::BTreeSet;

use common::error::Result;

pub trait Transport: Send {
    /// Gathers `parts` into one message and sends it.
    fn send(&mut self, parts: &[&[u8]]) -> Result<()>;

    /// The next message; empty at end of stream.
    fn recv(&mut self) -> Result<Vec<u8>>;

    /// Tells the peer(s) the stream is over.
    fn end(&mut self) -> Result<()>;
}

/// Receiving side of a fan-out edge; the id must be set before the first
/// `recv`.
pub trait FanoutClientTransport: Transport {
    fn set_id(&mut self, id: u64);
}

/// Ids of the clients a fan-out transport has heard from.  Id assignment
/// policy belongs to the composer; uniqueness is enforced here, and both
/// misuses are sequencing bugs.
#[derive(Default)]
pub struct ClientRegistry {
    clients: BTreeSet<u64>,
}

impl ClientRegistry {
    pub fn new() -> ClientRegistry {
        ClientRegistry::default()
    }

    pub fn add(&mut self, id: u64) {
        if !self.clients.insert(id) {
            panic!("client id {} registered twice", id);
        }
    }

    pub fn remove(&mut self, id: u64) {
        if !self.clients.remove(&id) {
            panic!("removing unknown client id {}", id);
        }
    }

    pub fn has_client(&self, id: u64) -> bool {
        self.clients.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }
}

/// Concatenates gather parts; transports that frame whole messages use
/// this at the send boundary.
pub(crate) fn gather(parts: &[&[u8]]) -> Vec<u8> {
    let total = parts.iter().map(|p| p.len()).sum();
    let mut out = Vec::with_capacity(total);
    for p in parts {
        out.extend_from_slice(p);
    }
    out
}
