use anyhow::Context;
use log::info;
use prometheus::Registry;

use pipeline::worker::{ForwardingProcessor, Processor};
use ringflow::{app, Arguments, FilterArguments, ParallelStrategy};

/// Composition options come from the environment; argument-parsing
/// front-ends wrap this binary rather than live in it.
fn arguments_from_env() -> anyhow::Result<Arguments> {
    let mut args = Arguments {
        source: std::env::var("RINGFLOW_SOURCE").unwrap_or_default(),
        sink: std::env::var("RINGFLOW_SINK").unwrap_or_default(),
        ..Arguments::default()
    };
    if let Ok(v) = std::env::var("RINGFLOW_WORKERS") {
        args.workers = v.parse().context("RINGFLOW_WORKERS")?;
    }
    if let Ok(v) = std::env::var("RINGFLOW_CLUMP_SIZE") {
        args.clump_size = v.parse().context("RINGFLOW_CLUMP_SIZE")?;
    }
    if let Ok(v) = std::env::var("RINGFLOW_WINDOW_NS") {
        args.window = v.parse().context("RINGFLOW_WINDOW_NS")?;
    }
    if let Ok(v) = std::env::var("RINGFLOW_STRATEGY") {
        args.parallel_strategy = match v.as_str() {
            "threaded" => ParallelStrategy::Threaded,
            "distributed" => ParallelStrategy::Distributed,
            other => anyhow::bail!("unknown parallel strategy '{}'", other),
        };
    }
    if let Ok(mask) = std::env::var("RINGFLOW_FILTER_MASK") {
        args.filter = Some(FilterArguments {
            mask: mask.parse().context("RINGFLOW_FILTER_MASK")?,
            value: std::env::var("RINGFLOW_FILTER_VALUE")
                .unwrap_or_default()
                .parse()
                .unwrap_or(0),
            sample: std::env::var("RINGFLOW_FILTER_SAMPLE")
                .unwrap_or_default()
                .parse()
                .unwrap_or(0),
            rejected_sink: std::env::var("RINGFLOW_REJECTED_SINK").ok(),
        });
    }
    Ok(args)
}

fn run() -> anyhow::Result<()> {
    let args = arguments_from_env()?;
    let registry = Registry::new();

    if args.filter.is_some() {
        info!("running in filter mode");
        app::run_filter_app(&args, &registry)?;
        return Ok(());
    }

    match args.parallel_strategy {
        ParallelStrategy::Threaded => {
            let factory = |id: u32| Box::new(ForwardingProcessor::new(id)) as Box<dyn Processor>;
            app::run_threaded(&args, &registry, &factory)?;
        }
        ParallelStrategy::Distributed => {
            // The process-group communicator comes from the deployment's
            // launcher; this build has none to offer.
            anyhow::bail!("no process-group communicator is available in this build");
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("ringflow: {:#}", e);
        std::process::exit(1);
    }
}
