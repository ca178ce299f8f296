//! Composition strategies: build the source/workers/sorter/sink topology
//! over a transport family and run it to completion.

use log::info;
use prometheus::Registry;

use common::error::Result;
use common::ringitem::io::{RingItemReader, RingItemWriter};
use pipeline::element::{ProcessingElement, ThreadedElement};
use pipeline::filter::EventFilter;
use pipeline::messaging::{Receiver, Sender};
use pipeline::ring_io;
use pipeline::sink::RingBlockSink;
use pipeline::sorter::RingItemSorter;
use pipeline::source::RingItemSourceElement;
use pipeline::transport::factory::{
    ChannelCommunicatorFactory, CommunicatorFactory, DISTRIBUTION_SERVICE, SORTED_DATA_SERVICE,
    SORT_SERVICE,
};
use pipeline::transport::group::{
    GroupFaninTransport, GroupFanoutClient, GroupFanoutTransport, GroupTransport,
    SharedCommunicator,
};
use pipeline::worker::{ParallelWorker, Processor};

use crate::config::Arguments;

/// Supplies the application part of each worker; the strategy owns the
/// plumbing around it.
pub trait WorkerFactory: Send + Sync {
    fn make_processor(&self, id: u32) -> Box<dyn Processor>;
}

impl<F> WorkerFactory for F
where
    F: Fn(u32) -> Box<dyn Processor> + Send + Sync,
{
    fn make_processor(&self, id: u32) -> Box<dyn Processor> {
        self(id)
    }
}

/// One process, one thread per element, channel transports between them.
pub struct ThreadedAppStrategy<'a> {
    args: &'a Arguments,
    registry: &'a Registry,
}

impl<'a> ThreadedAppStrategy<'a> {
    pub fn new(args: &'a Arguments, registry: &'a Registry) -> ThreadedAppStrategy<'a> {
        ThreadedAppStrategy { args, registry }
    }

    pub fn run(&self, factory: &dyn WorkerFactory) -> Result<()> {
        self.args.validate()?;
        let reader = ring_io::open_source(&self.args.source)?;
        let writer = ring_io::open_sink(&self.args.sink)?;
        self.run_with(factory, reader, writer)
    }

    /// Same topology with the stream ends supplied by the caller; the
    /// integration tests ride through here.
    pub fn run_with(
        &self,
        factory: &dyn WorkerFactory,
        reader: Box<dyn RingItemReader + Send>,
        writer: Box<dyn RingItemWriter + Send>,
    ) -> Result<()> {
        let comm = ChannelCommunicatorFactory::new();

        let source = RingItemSourceElement::new(
            reader,
            Sender::new(comm.fanout_server(DISTRIBUTION_SERVICE)?),
            self.args.clump_size,
            self.registry,
        );
        let source_thread = ThreadedElement::spawn("source", Box::new(source));

        let sorter = RingItemSorter::new(
            Receiver::new(comm.fanin_sink(SORT_SERVICE)?),
            Sender::new(comm.one_to_one_source(SORTED_DATA_SERVICE)?),
            self.args.workers,
            self.registry,
        );
        let sorter_thread = ThreadedElement::spawn("sorter", Box::new(sorter));

        let sink = RingBlockSink::new(
            Receiver::new(comm.one_to_one_sink(SORTED_DATA_SERVICE)?),
            writer,
            self.registry,
        );
        let sink_thread = ThreadedElement::spawn("sink", Box::new(sink));

        let mut worker_threads = Vec::with_capacity(self.args.workers);
        for i in 1..=self.args.workers {
            let worker = ParallelWorker::new(
                comm.fanout_client(DISTRIBUTION_SERVICE, i as u64)?,
                Sender::new(comm.fanin_source(SORT_SERVICE)?),
                i as u64,
                factory.make_processor(i as u32),
            );
            worker_threads.push(ThreadedElement::spawn(
                &format!("worker-{}", i),
                Box::new(worker),
            ));
        }
        info!(
            "threaded pipeline started: {} workers, clump size {}",
            self.args.workers, self.args.clump_size
        );

        let mut result = Ok(());
        let threads = std::iter::once(source_thread)
            .chain(worker_threads)
            .chain([sorter_thread, sink_thread]);
        for thread in threads {
            let joined = thread.join();
            if result.is_ok() {
                result = joined;
            }
        }
        result
    }
}

/// Rank layout of the distributed composition.
pub const SOURCE_RANK: u32 = 0;
pub const SORTER_RANK: u32 = 1;
pub const SINK_RANK: u32 = 2;
pub const FIRST_WORKER_RANK: u32 = 3;

/// One element per process in a rank-addressed group: rank 0 reads and
/// fans out, rank 1 re-sorts, rank 2 writes, every higher rank is a
/// worker whose rank doubles as its producer id.
///
/// The communicator itself (launcher, wire format) is the deployment's;
/// this strategy only binds the roles onto it.
pub struct GroupAppStrategy<'a> {
    args: &'a Arguments,
    registry: &'a Registry,
}

impl<'a> GroupAppStrategy<'a> {
    pub fn new(args: &'a Arguments, registry: &'a Registry) -> GroupAppStrategy<'a> {
        GroupAppStrategy { args, registry }
    }

    pub fn run(&self, factory: &dyn WorkerFactory, comm: SharedCommunicator) -> Result<()> {
        self.args.validate()?;
        let rank = comm.lock().unwrap().rank();
        match rank {
            SOURCE_RANK => {
                let fanout = GroupFanoutTransport::with_clients(comm, self.args.workers);
                let mut element = RingItemSourceElement::new(
                    ring_io::open_source(&self.args.source)?,
                    Sender::new(Box::new(fanout)),
                    self.args.clump_size,
                    self.registry,
                );
                element.run()
            }
            SORTER_RANK => {
                let mut element = RingItemSorter::new(
                    Receiver::new(Box::new(GroupFaninTransport::new(comm.clone()))),
                    Sender::new(Box::new(GroupTransport::new(comm, SINK_RANK))),
                    self.args.workers,
                    self.registry,
                );
                element.run()
            }
            SINK_RANK => {
                let mut element = RingBlockSink::new(
                    Receiver::new(Box::new(GroupTransport::new(comm, SORTER_RANK))),
                    ring_io::open_sink(&self.args.sink)?,
                    self.registry,
                );
                element.run()
            }
            worker_rank => {
                let client = GroupFanoutClient::new(comm.clone(), SOURCE_RANK);
                let mut element = ParallelWorker::new(
                    Box::new(client),
                    Sender::new(Box::new(GroupTransport::new(comm, SORTER_RANK))),
                    worker_rank as u64,
                    factory.make_processor(worker_rank),
                );
                element.run()
            }
        }
    }
}

/// The single-threaded filter application: classified stream in,
/// accepted (and optionally rejected) stream out.
pub fn run_filter_app(args: &Arguments, registry: &Registry) -> Result<()> {
    args.validate()?;
    let filter_args = args.filter.clone().ok_or_else(|| {
        common::error::Error::Config("filter mode requires filter arguments".into())
    })?;
    let rejected = match &filter_args.rejected_sink {
        Some(uri) => Some(ring_io::open_sink(uri)?),
        None => None,
    };
    let mut filter = EventFilter::new(
        ring_io::open_source(&args.source)?,
        ring_io::open_sink(&args.sink)?,
        rejected,
        filter_args.mask,
        filter_args.value,
        filter_args.sample,
        registry,
    );
    filter.run()
}

/// Convenience entry the binary uses for the default copy pipeline.
pub fn run_threaded(
    args: &Arguments,
    registry: &Registry,
    factory: &dyn WorkerFactory,
) -> Result<()> {
    ThreadedAppStrategy::new(args, registry).run(factory)
}
