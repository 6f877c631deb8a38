//! Command line interface.

use std::path::PathBuf;

use clap::Parser;

use crate::context::DEFAULT_YIELD_SFUNC;

/// Replays a scheduling trace of a real-time taskset experiment and extracts
/// per-taskset job records and scheduler overhead statistics.
#[derive(Debug, Parser)]
#[clap(author, version, about, verbatim_doc_comment)]
pub struct Cli {
    /// Trace to replay: a JSON-lines event file, or a directory of such
    /// files (one per trace stream) merged by timestamp.
    pub input: PathBuf,

    /// Output directory. Defaults to a new time-stamped directory in the
    /// current directory.
    #[clap(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Enable verbose output, including debug and trace logs. Specify
    /// multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Fail on anomalies that are otherwise only reported, such as
    /// sched_switch events whose previous thread disagrees with the tracked
    /// state.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    pub strict: bool,

    /// Do not record per-job execution blocks. Preemption statistics are not
    /// available in that case.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    pub no_exec_blocks: bool,

    /// Additional scheduler function to track through its NAME_entry and
    /// NAME_exit events. Can be repeated.
    #[clap(long = "sfunc", value_name = "NAME")]
    pub sfuncs: Vec<String>,

    /// Scheduler function in which in-kernel release timers are armed.
    #[clap(long, default_value = DEFAULT_YIELD_SFUNC)]
    pub yield_sfunc: String,

    /// hrtimer mode of the timers armed by tasks sleeping until their next
    /// release.
    #[clap(long, value_name = "MODE")]
    pub sleep_timer_mode: Option<u32>,

    /// Do not write statistics files.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    pub no_stats: bool,

    /// Do not write taskset export files.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    pub no_export: bool,
}
