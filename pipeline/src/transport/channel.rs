//! In-process transports over bounded `std::sync::mpsc` channels, one per
//! pipeline edge.  The bounded depth is what backpressures a fast source
//! against slow workers.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;

use common::error::{Error, Result};

use super::{gather, ClientRegistry, FanoutClientTransport, Transport};

/// Queue depth used by the composers; deep enough to decouple neighbours,
/// shallow enough to bound memory by chunk size.
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Creates a one-to-one (or, by cloning the sender, fan-in) edge.
pub fn pair(depth: usize) -> (ChannelSender, ChannelReceiver) {
    let (tx, rx) = sync_channel(depth);
    (ChannelSender { tx }, ChannelReceiver { rx })
}

/// Sending half of a point-to-point or fan-in edge.  Cloning yields
/// another producer on the same edge.
#[derive(Clone)]
pub struct ChannelSender {
    tx: SyncSender<Vec<u8>>,
}

impl Transport for ChannelSender {
    fn send(&mut self, parts: &[&[u8]]) -> Result<()> {
        self.tx
            .send(gather(parts))
            .map_err(|_| Error::Transport("receiver is gone".into()))
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        Err(Error::Transport("recv on a send-only transport".into()))
    }

    fn end(&mut self) -> Result<()> {
        self.send(&[])
    }
}

pub struct ChannelReceiver {
    rx: Receiver<Vec<u8>>,
}

impl Transport for ChannelReceiver {
    fn send(&mut self, _parts: &[&[u8]]) -> Result<()> {
        Err(Error::Transport("send on a receive-only transport".into()))
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        // Every sender gone without an end marker still means end of
        // stream; the element flushes and exits either way.
        Ok(self.rx.recv().unwrap_or_default())
    }

    fn end(&mut self) -> Result<()> {
        Err(Error::Transport("end on a receive-only transport".into()))
    }
}

/// One pull from a fan-out client: who is asking and where the answer
/// goes.
struct PullRequest {
    id: u64,
    reply: SyncSender<Vec<u8>>,
}

/// Creates a fan-out edge: the router end pushes each message to the next
/// pulling client, the connector mints client ends.
pub fn fanout(depth: usize) -> (RouterTransport, DealerConnector) {
    let (tx, rx) = sync_channel(depth);
    let connected = Arc::new(AtomicUsize::new(0));
    (
        RouterTransport {
            pulls: rx,
            registry: ClientRegistry::new(),
            connected: Arc::clone(&connected),
        },
        DealerConnector {
            pulls: tx,
            connected,
        },
    )
}

/// Fan-out server.  `send` answers the next pull; `end` answers one pull
/// from every connected client with an empty message.
pub struct RouterTransport {
    pulls: Receiver<PullRequest>,
    registry: ClientRegistry,
    connected: Arc<AtomicUsize>,
}

impl RouterTransport {
    fn next_pull(&mut self) -> Result<PullRequest> {
        let request = self
            .pulls
            .recv()
            .map_err(|_| Error::Transport("every fan-out client is gone".into()))?;
        if !self.registry.has_client(request.id) {
            self.registry.add(request.id);
        }
        Ok(request)
    }
}

impl Transport for RouterTransport {
    fn send(&mut self, parts: &[&[u8]]) -> Result<()> {
        let request = self.next_pull()?;
        request
            .reply
            .send(gather(parts))
            .map_err(|_| Error::Transport("fan-out client hung up mid-pull".into()))
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        Err(Error::Transport("recv on a fan-out sending transport".into()))
    }

    fn end(&mut self) -> Result<()> {
        // Every connected client pulls until it sees the end marker, so
        // answering one pull per distinct id reaches them all, including
        // clients whose first-ever pull arrives after the stream ended.
        let mut served: BTreeSet<u64> = BTreeSet::new();
        while served.len() < self.connected.load(Ordering::Acquire) {
            let request = match self.pulls.recv() {
                Ok(r) => r,
                // Remaining clients dropped their handles.
                Err(_) => break,
            };
            if self.registry.has_client(request.id) {
                self.registry.remove(request.id);
            }
            let _ = request.reply.send(Vec::new());
            served.insert(request.id);
        }
        Ok(())
    }
}

/// Hands out client ends of a fan-out edge; clone freely across threads.
#[derive(Clone)]
pub struct DealerConnector {
    pulls: SyncSender<PullRequest>,
    connected: Arc<AtomicUsize>,
}

impl DealerConnector {
    pub fn connect(&self) -> DealerTransport {
        let (reply_tx, reply_rx) = sync_channel(1);
        self.connected.fetch_add(1, Ordering::AcqRel);
        DealerTransport {
            id: None,
            pulls: self.pulls.clone(),
            reply_tx,
            reply_rx,
        }
    }
}

/// Fan-out client: each `recv` sends one pull and blocks for the routed
/// answer.
pub struct DealerTransport {
    id: Option<u64>,
    pulls: SyncSender<PullRequest>,
    reply_tx: SyncSender<Vec<u8>>,
    reply_rx: Receiver<Vec<u8>>,
}

impl Transport for DealerTransport {
    fn send(&mut self, _parts: &[&[u8]]) -> Result<()> {
        Err(Error::Transport("send on a fan-out client transport".into()))
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        let id = self
            .id
            .ok_or_else(|| Error::Transport("recv before the client id was set".into()))?;
        if self
            .pulls
            .send(PullRequest {
                id,
                reply: self.reply_tx.clone(),
            })
            .is_err()
        {
            // Router is gone; same as an end marker.
            return Ok(Vec::new());
        }
        Ok(self.reply_rx.recv().unwrap_or_default())
    }

    fn end(&mut self) -> Result<()> {
        Err(Error::Transport("end on a fan-out client transport".into()))
    }
}

impl FanoutClientTransport for DealerTransport {
    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn pair_delivers_in_order() {
        let (mut tx, mut rx) = pair(4);
        tx.send(&[b"one"]).unwrap();
        tx.send(&[b"two", b"three"]).unwrap();
        assert_eq!(rx.recv().unwrap(), b"one");
        assert_eq!(rx.recv().unwrap(), b"twothree");
    }

    #[test]
    fn end_is_an_empty_message() {
        let (mut tx, mut rx) = pair(1);
        tx.end().unwrap();
        assert!(rx.recv().unwrap().is_empty());
    }

    #[test]
    fn dropped_sender_reads_as_end() {
        let (tx, mut rx) = pair(1);
        drop(tx);
        assert!(rx.recv().unwrap().is_empty());
    }

    #[test]
    fn fanin_merges_producers() {
        let (tx, mut rx) = pair(8);
        let mut a = tx.clone();
        let mut b = tx;
        a.send(&[b"a"]).unwrap();
        b.send(&[b"b"]).unwrap();
        let mut got = vec![rx.recv().unwrap(), rx.recv().unwrap()];
        got.sort();
        assert_eq!(got, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn fanout_routes_to_pulling_clients_and_ends_all() {
        let (mut router, connector) = fanout(8);
        let n_clients = 3;
        let mut handles = Vec::new();
        for i in 0..n_clients {
            let mut client = connector.connect();
            client.set_id(i + 1);
            handles.push(thread::spawn(move || {
                let mut got = Vec::new();
                loop {
                    let msg = client.recv().unwrap();
                    if msg.is_empty() {
                        break;
                    }
                    got.push(msg);
                }
                got
            }));
        }
        drop(connector);

        for i in 0..9u8 {
            router.send(&[&[i]]).unwrap();
        }
        router.end().unwrap();

        let mut all: Vec<u8> = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap().into_iter().map(|m| m[0]));
        }
        all.sort();
        assert_eq!(all, (0..9).collect::<Vec<u8>>());
    }

    #[test]
    fn recv_before_set_id_is_an_error() {
        let (_router, connector) = fanout(1);
        let mut client = connector.connect();
        assert!(client.recv().is_err());
    }
}
