//! The parallel transformation fabric: transports, processing elements,
//! the built-event worker family, the timestamp re-sorter and the sinks.
//!
//! Topology: `source -> fan-out -> workers -> fan-in -> resort -> sink`.
//! Every edge is a transport, every node a thread running a straight
//! receive/process/send loop.

pub mod builtitem;
pub mod classifier;
pub mod editor;
pub mod element;
pub mod extender;
pub mod filter;
pub mod frag;
pub mod full_editor;
pub mod messaging;
pub mod metrics;
pub mod ring_io;
pub mod sink;
pub mod sorter;
pub mod source;
pub mod transport;
pub mod worker;

#[cfg(test)]
pub mod testutil;

pub use element::{ProcessingElement, ThreadedElement};
pub use messaging::{Receiver, Sender};
pub use transport::{FanoutClientTransport, Transport};
