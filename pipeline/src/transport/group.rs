//! Process-group transports: the same pull/fan-in/one-to-one shapes as the
//! in-process family, expressed over rank-addressed messaging.
//!
//! Only the communicator contract lives here; the concrete wire (MPI-like
//! launcher, sockets, whatever the deployment provides) is an external
//! collaborator.  The adapters below turn any communicator into pipeline
//! transports, and the in-memory communicator in the tests doubles as the
//! reference for the expected semantics.

use std::sync::{Arc, Mutex};

use byteorder::{ByteOrder, LittleEndian};

use common::error::{Error, Result};

use super::{gather, ClientRegistry, FanoutClientTransport, Transport};

/// Payload-bearing messages.
pub const TAG_DATA: u32 = 1;
/// Pull requests from fan-out clients; the payload is the client's rank.
pub const TAG_DATA_REQUEST: u32 = 2;

/// Rank-addressed messaging within a fixed process group.
pub trait GroupCommunicator: Send {
    fn rank(&self) -> u32;
    fn group_size(&self) -> u32;
    /// Sends `parts`, gathered, to `rank` under `tag`.
    fn send_to(&mut self, rank: u32, tag: u32, parts: &[&[u8]]) -> Result<()>;
    /// Blocks for the next message with `tag`; returns the source rank and
    /// the payload.
    fn recv(&mut self, tag: u32) -> Result<(u32, Vec<u8>)>;
}

pub type SharedCommunicator = Arc<Mutex<dyn GroupCommunicator>>;

/// Point-to-point edge to one fixed peer rank.
pub struct GroupTransport {
    comm: SharedCommunicator,
    peer: u32,
}

impl GroupTransport {
    pub fn new(comm: SharedCommunicator, peer: u32) -> GroupTransport {
        GroupTransport { comm, peer }
    }
}

impl Transport for GroupTransport {
    fn send(&mut self, parts: &[&[u8]]) -> Result<()> {
        self.comm.lock().unwrap().send_to(self.peer, TAG_DATA, parts)
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        let (_, data) = self.comm.lock().unwrap().recv(TAG_DATA)?;
        Ok(data)
    }

    fn end(&mut self) -> Result<()> {
        self.send(&[])
    }
}

/// Fan-in edge: the receiver accepts data messages from any rank.  The
/// sending side is just a `GroupTransport` aimed at the consumer's rank.
pub struct GroupFaninTransport {
    comm: SharedCommunicator,
}

impl GroupFaninTransport {
    pub fn new(comm: SharedCommunicator) -> GroupFaninTransport {
        GroupFaninTransport { comm }
    }
}

impl Transport for GroupFaninTransport {
    fn send(&mut self, _parts: &[&[u8]]) -> Result<()> {
        Err(Error::Transport(
            "send on the receiving end of a fan-in".into(),
        ))
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        let (_, data) = self.comm.lock().unwrap().recv(TAG_DATA)?;
        Ok(data)
    }

    fn end(&mut self) -> Result<()> {
        Err(Error::Transport("end on the receiving end of a fan-in".into()))
    }
}

/// Fan-out server over a communicator: pulls arrive as `TAG_DATA_REQUEST`
/// messages carrying the requester's id, answers go back rank-addressed.
pub struct GroupFanoutTransport {
    comm: SharedCommunicator,
    registry: ClientRegistry,
    /// How many distinct clients `end` must reach.  Without it only
    /// clients that pulled before the end are told.
    expected_clients: Option<usize>,
}

impl GroupFanoutTransport {
    pub fn new(comm: SharedCommunicator) -> GroupFanoutTransport {
        GroupFanoutTransport {
            comm,
            registry: ClientRegistry::new(),
            expected_clients: None,
        }
    }

    /// A fan-out that knows its client population up front, so `end`
    /// reaches clients whose first pull arrives after the stream ended.
    pub fn with_clients(comm: SharedCommunicator, n_clients: usize) -> GroupFanoutTransport {
        GroupFanoutTransport {
            comm,
            registry: ClientRegistry::new(),
            expected_clients: Some(n_clients),
        }
    }

    fn next_pull(&mut self) -> Result<u64> {
        let (_, payload) = self.comm.lock().unwrap().recv(TAG_DATA_REQUEST)?;
        if payload.len() != 8 {
            return Err(Error::Transport(format!(
                "pull request of {} bytes is malformed",
                payload.len()
            )));
        }
        let id = LittleEndian::read_u64(&payload);
        if !self.registry.has_client(id) {
            self.registry.add(id);
        }
        Ok(id)
    }
}

impl Transport for GroupFanoutTransport {
    fn send(&mut self, parts: &[&[u8]]) -> Result<()> {
        let id = self.next_pull()?;
        self.comm.lock().unwrap().send_to(id as u32, TAG_DATA, parts)
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        Err(Error::Transport("recv on a fan-out sending transport".into()))
    }

    fn end(&mut self) -> Result<()> {
        match self.expected_clients {
            Some(expected) => {
                let mut served = std::collections::BTreeSet::new();
                while served.len() < expected {
                    let id = self.next_pull()?;
                    self.comm.lock().unwrap().send_to(id as u32, TAG_DATA, &[])?;
                    if self.registry.has_client(id) {
                        self.registry.remove(id);
                    }
                    served.insert(id);
                }
            }
            None => {
                while !self.registry.is_empty() {
                    let id = self.next_pull()?;
                    self.comm.lock().unwrap().send_to(id as u32, TAG_DATA, &[])?;
                    self.registry.remove(id);
                }
            }
        }
        Ok(())
    }
}

/// Fan-out client end: the client id doubles as the rank answers come
/// back on.
pub struct GroupFanoutClient {
    comm: SharedCommunicator,
    server: u32,
    id: Option<u64>,
}

impl GroupFanoutClient {
    pub fn new(comm: SharedCommunicator, server: u32) -> GroupFanoutClient {
        GroupFanoutClient {
            comm,
            server,
            id: None,
        }
    }
}

impl Transport for GroupFanoutClient {
    fn send(&mut self, _parts: &[&[u8]]) -> Result<()> {
        Err(Error::Transport("send on a fan-out client transport".into()))
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        let id = self
            .id
            .ok_or_else(|| Error::Transport("recv before the client id was set".into()))?;
        let mut comm = self.comm.lock().unwrap();
        comm.send_to(self.server, TAG_DATA_REQUEST, &[&id.to_le_bytes()])?;
        let (_, data) = comm.recv(TAG_DATA)?;
        Ok(data)
    }

    fn end(&mut self) -> Result<()> {
        Err(Error::Transport("end on a fan-out client transport".into()))
    }
}

impl FanoutClientTransport for GroupFanoutClient {
    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }
}
