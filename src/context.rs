//! Replay runtime parameters.
//!
//! This module defines the `TrackerContext` struct containing all the
//! parameters needed at runtime. It is meant to be built from command line
//! parameters.
//! ```no_run
//! use rt_trace_replay::{cli::Cli, context::TrackerContext};
//! use clap::Parser;
//!
//! let args = Cli::parse();
//! let ctx = TrackerContext::try_from(&args).unwrap();
//! ```
//! The tracker itself only needs a [`TrackerConfig`], which can be built
//! directly when the crate is used as a library.

use crate::cli::Cli;
use crate::events::SFuncRegistry;
use crate::io::OutputDirectory;

/// Scheduler function whose frame marks in-kernel release timers.
pub const DEFAULT_YIELD_SFUNC: &str = "yield_task_dl";

/// Handling of anomalies that a correct trace may legitimately contain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strictness {
    /// Log the anomaly and keep going.
    #[default]
    Permissive,
    /// Treat the anomaly as a state violation.
    Strict,
}

/// Tracker parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub strictness: Strictness,
    /// If false, jobs carry no execution blocks and the preemption statistic
    /// is empty.
    pub record_exec_blocks: bool,
    /// Scheduler functions whose entry and exit are tracked.
    pub sfuncs: SFuncRegistry,
    pub yield_sfunc: String,
    /// hrtimer mode of userspace sleep-until-release timers, if the traced
    /// workload uses them.
    pub sleep_timer_mode: Option<u32>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            strictness: Strictness::default(),
            record_exec_blocks: true,
            sfuncs: SFuncRegistry::default(),
            yield_sfunc: DEFAULT_YIELD_SFUNC.to_owned(),
            sleep_timer_mode: None,
        }
    }
}

impl From<&Cli> for TrackerConfig {
    fn from(cli: &Cli) -> Self {
        let mut sfuncs = SFuncRegistry::default();

        for name in &cli.sfuncs {
            sfuncs.insert(name.as_str());
        }

        // The release timer policy watches this function's frames.
        sfuncs.insert(cli.yield_sfunc.as_str());

        Self {
            strictness: if cli.strict {
                Strictness::Strict
            } else {
                Strictness::Permissive
            },
            record_exec_blocks: !cli.no_exec_blocks,
            sfuncs,
            yield_sfunc: cli.yield_sfunc.clone(),
            sleep_timer_mode: cli.sleep_timer_mode,
        }
    }
}

/// Contains all runtime parameters.
pub struct TrackerContext {
    /// Output directory.
    pub output_dir: OutputDirectory,
    pub config: TrackerConfig,
    /// If false, no statistics file is written.
    pub write_stats: bool,
    /// If false, no taskset export is written.
    pub write_export: bool,
}

impl TryFrom<&Cli> for TrackerContext {
    type Error = anyhow::Error;

    fn try_from(cli: &Cli) -> anyhow::Result<Self> {
        Ok(Self {
            output_dir: OutputDirectory::try_from(cli)?,
            config: TrackerConfig::from(cli),
            write_stats: !cli.no_stats,
            write_export: !cli.no_export,
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Strictness, TrackerConfig};
    use crate::cli::Cli;

    #[test]
    fn test_config_from_cli() {
        let cli = Cli::parse_from([
            "rt-trace-replay",
            "--strict",
            "--no-exec-blocks",
            "--sfunc",
            "pick_next_task_fair",
            "--sleep-timer-mode",
            "1",
            "trace.json",
        ]);

        let config = TrackerConfig::from(&cli);

        assert_eq!(config.strictness, Strictness::Strict);
        assert!(!config.record_exec_blocks);
        assert!(config.sfuncs.contains("pick_next_task_fair"));
        assert!(config.sfuncs.contains("enqueue_task_dl"));
        assert_eq!(config.yield_sfunc, "yield_task_dl");
        assert_eq!(config.sleep_timer_mode, Some(1));
    }

    #[test]
    fn test_default_config() {
        let cli = Cli::parse_from(["rt-trace-replay", "trace.json"]);

        assert_eq!(TrackerConfig::from(&cli), TrackerConfig::default());
    }
}
