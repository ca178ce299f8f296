//! Communicator factories: the composer asks for transport endpoints by
//! small service ids instead of wiring concrete channels itself, so the
//! same composition code serves the in-process and process-group
//! strategies.

use std::collections::HashMap;
use std::sync::Mutex;

use common::error::{Error, Result};

use super::channel::{self, ChannelReceiver, ChannelSender, DealerConnector, RouterTransport};
use super::{FanoutClientTransport, Transport};

/// Well-known service ids used by the composers.
pub const DISTRIBUTION_SERVICE: u32 = 1;
pub const SORT_SERVICE: u32 = 2;
pub const SORTED_DATA_SERVICE: u32 = 3;

pub trait CommunicatorFactory: Send {
    /// The pushing end of the work distribution fan-out.
    fn fanout_server(&self, service: u32) -> Result<Box<dyn Transport>>;
    /// A pulling client of the fan-out, pre-programmed with `id`.
    fn fanout_client(&self, service: u32, id: u64) -> Result<Box<dyn FanoutClientTransport>>;
    /// A producing end of a fan-in edge (one per worker).
    fn fanin_source(&self, service: u32) -> Result<Box<dyn Transport>>;
    /// The single consuming end of a fan-in edge.
    fn fanin_sink(&self, service: u32) -> Result<Box<dyn Transport>>;
    /// The producing end of a one-to-one edge.
    fn one_to_one_source(&self, service: u32) -> Result<Box<dyn Transport>>;
    /// The consuming end of a one-to-one edge.
    fn one_to_one_sink(&self, service: u32) -> Result<Box<dyn Transport>>;
}

enum Endpoint {
    Fanout {
        server: Option<RouterTransport>,
        connector: DealerConnector,
    },
    Queue {
        sender: ChannelSender,
        receiver: Option<ChannelReceiver>,
    },
}

/// In-process factory: each service id lazily becomes one bounded channel
/// edge; each side of an edge can be claimed once (clients and fan-in
/// producers any number of times).
pub struct ChannelCommunicatorFactory {
    depth: usize,
    endpoints: Mutex<HashMap<u32, Endpoint>>,
}

impl ChannelCommunicatorFactory {
    pub fn new() -> ChannelCommunicatorFactory {
        ChannelCommunicatorFactory::with_depth(channel::DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_depth(depth: usize) -> ChannelCommunicatorFactory {
        ChannelCommunicatorFactory {
            depth,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    fn with_fanout<T>(
        &self,
        service: u32,
        f: impl FnOnce(&mut Option<RouterTransport>, &DealerConnector) -> Result<T>,
    ) -> Result<T> {
        let mut map = self.endpoints.lock().unwrap();
        let entry = map.entry(service).or_insert_with(|| {
            let (server, connector) = channel::fanout(self.depth);
            Endpoint::Fanout {
                server: Some(server),
                connector,
            }
        });
        match entry {
            Endpoint::Fanout { server, connector } => f(server, connector),
            Endpoint::Queue { .. } => Err(Error::Config(format!(
                "service {} is a queue edge, not a fan-out",
                service
            ))),
        }
    }

    fn with_queue<T>(
        &self,
        service: u32,
        f: impl FnOnce(&ChannelSender, &mut Option<ChannelReceiver>) -> Result<T>,
    ) -> Result<T> {
        let mut map = self.endpoints.lock().unwrap();
        let entry = map.entry(service).or_insert_with(|| {
            let (sender, receiver) = channel::pair(self.depth);
            Endpoint::Queue {
                sender,
                receiver: Some(receiver),
            }
        });
        match entry {
            Endpoint::Queue { sender, receiver } => f(sender, receiver),
            Endpoint::Fanout { .. } => Err(Error::Config(format!(
                "service {} is a fan-out edge, not a queue",
                service
            ))),
        }
    }

    fn take_receiver(&self, service: u32) -> Result<Box<dyn Transport>> {
        self.with_queue(service, |_, receiver| {
            receiver
                .take()
                .map(|r| Box::new(r) as Box<dyn Transport>)
                .ok_or_else(|| {
                    Error::Config(format!("service {} receiver already claimed", service))
                })
        })
    }
}

impl Default for ChannelCommunicatorFactory {
    fn default() -> Self {
        ChannelCommunicatorFactory::new()
    }
}

impl CommunicatorFactory for ChannelCommunicatorFactory {
    fn fanout_server(&self, service: u32) -> Result<Box<dyn Transport>> {
        self.with_fanout(service, |server, _| {
            server
                .take()
                .map(|s| Box::new(s) as Box<dyn Transport>)
                .ok_or_else(|| {
                    Error::Config(format!("service {} fan-out server already claimed", service))
                })
        })
    }

    fn fanout_client(&self, service: u32, id: u64) -> Result<Box<dyn FanoutClientTransport>> {
        self.with_fanout(service, |_, connector| {
            let mut client = connector.connect();
            client.set_id(id);
            Ok(Box::new(client) as Box<dyn FanoutClientTransport>)
        })
    }

    fn fanin_source(&self, service: u32) -> Result<Box<dyn Transport>> {
        self.with_queue(service, |sender, _| {
            Ok(Box::new(sender.clone()) as Box<dyn Transport>)
        })
    }

    fn fanin_sink(&self, service: u32) -> Result<Box<dyn Transport>> {
        self.take_receiver(service)
    }

    fn one_to_one_source(&self, service: u32) -> Result<Box<dyn Transport>> {
        self.fanin_source(service)
    }

    fn one_to_one_sink(&self, service: u32) -> Result<Box<dyn Transport>> {
        self.take_receiver(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_edges_connect_by_service_id() {
        let factory = ChannelCommunicatorFactory::new();
        let mut tx = factory.one_to_one_source(SORTED_DATA_SERVICE).unwrap();
        let mut rx = factory.one_to_one_sink(SORTED_DATA_SERVICE).unwrap();
        tx.send(&[b"hello"]).unwrap();
        assert_eq!(rx.recv().unwrap(), b"hello");
    }

    #[test]
    fn receiver_can_only_be_claimed_once() {
        let factory = ChannelCommunicatorFactory::new();
        factory.fanin_sink(SORT_SERVICE).unwrap();
        assert!(factory.fanin_sink(SORT_SERVICE).is_err());
        // More producers are always fine.
        factory.fanin_source(SORT_SERVICE).unwrap();
        factory.fanin_source(SORT_SERVICE).unwrap();
    }

    #[test]
    fn fanout_and_queue_services_do_not_mix() {
        let factory = ChannelCommunicatorFactory::new();
        factory.fanout_server(DISTRIBUTION_SERVICE).unwrap();
        assert!(factory.fanin_sink(DISTRIBUTION_SERVICE).is_err());
        assert!(factory.fanout_server(DISTRIBUTION_SERVICE).is_err());
        factory.fanout_client(DISTRIBUTION_SERVICE, 1).unwrap();
    }
}
