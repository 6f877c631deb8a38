use anyhow::{Error, Result};
use clap::Parser;
use rt_trace_replay::{
    cli::Cli, context::TrackerContext, processors::extract_taskset::TasksetExtractor,
    trace::reader::TraceReader, EventProcessor, EventSource,
};

fn init_logging(verbose: u8) -> Result<()> {
    let llv = match verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Off)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    Ok(())
}

pub fn run<C: EventProcessor>(command: C, opts: &Cli, ctx: TrackerContext) -> Result<()> {
    TraceReader::new(&opts.input)
        .start()?
        .process_events(command, &ctx)
}

fn main() -> Result<(), Error> {
    let opts = Cli::parse();

    init_logging(opts.verbose)?;

    let ctx = TrackerContext::try_from(&opts)?;
    let processor = TasksetExtractor::from(&ctx);

    run(processor, &opts, ctx)
}
