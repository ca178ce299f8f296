use serde::Deserialize;

use common::error::{Error, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParallelStrategy {
    /// Every element on its own thread in one process.
    #[default]
    Threaded,
    /// One element per process in a rank-addressed group.
    Distributed,
}

/// Filter-mode additions: an event passes when
/// `(classification & mask) == value`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FilterArguments {
    pub mask: u32,
    pub value: u32,
    /// Every `sample`-th rejected event is accepted anyway; 0 disables.
    pub sample: u64,
    pub rejected_sink: Option<String>,
}

/// Pipeline composition options.  The binary fills this in directly;
/// deployments may deserialize it from a config file.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Arguments {
    /// URI of the upstream ring-item stream.
    pub source: String,
    /// URI of the downstream ring-item sink.
    pub sink: String,
    /// Parallel worker count.
    pub workers: usize,
    /// Ring items per fan-out chunk.
    pub clump_size: usize,
    pub parallel_strategy: ParallelStrategy,
    /// Accumulation window in nanoseconds before a hit may be emitted.
    pub window: u64,
    pub filter: Option<FilterArguments>,
}

impl Default for Arguments {
    fn default() -> Arguments {
        Arguments {
            source: String::new(),
            sink: String::new(),
            workers: 1,
            clump_size: 1,
            parallel_strategy: ParallelStrategy::Threaded,
            window: 10_000_000_000,
            filter: None,
        }
    }
}

impl Arguments {
    pub fn validate(&self) -> Result<()> {
        if self.source.is_empty() {
            return Err(Error::Config("a source URI is required".into()));
        }
        if self.sink.is_empty() {
            return Err(Error::Config("a sink URI is required".into()));
        }
        if self.workers == 0 {
            return Err(Error::Config("at least one worker is required".into()));
        }
        if self.clump_size == 0 {
            return Err(Error::Config("clump size must be at least 1".into()));
        }
        Ok(())
    }

    /// The accumulation window in seconds, as the hit manager wants it.
    pub fn window_seconds(&self) -> f64 {
        self.window as f64 / 1.0e9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_once_uris_are_set() {
        let mut args = Arguments::default();
        assert!(args.validate().is_err());
        args.source = "file:///tmp/in.evt".into();
        args.sink = "file:///tmp/out.evt".into();
        args.validate().unwrap();
        assert_eq!(args.window_seconds(), 10.0);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let args = Arguments {
            source: "file:///a".into(),
            sink: "file:///b".into(),
            workers: 0,
            ..Arguments::default()
        };
        assert!(matches!(args.validate(), Err(Error::Config(_))));
    }
}
