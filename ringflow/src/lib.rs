//! Application composition: configuration plus the strategies that wire
//! sources, workers, sorter and sink together and start them.

pub mod app;
pub mod config;

pub use app::{run_threaded, GroupAppStrategy, ThreadedAppStrategy, WorkerFactory};
pub use config::{Arguments, FilterArguments, ParallelStrategy};
