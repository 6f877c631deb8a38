//! Taskset extractor.

use std::io::{BufWriter, Write};

use anyhow::{Context, Result};
use log::{info, warn};

use crate::{
    context::{TrackerConfig, TrackerContext},
    events::{self, RawEvent},
    io::OutputDirectory,
    processors::write_stats::write_stats,
    taskset::CompletedTaskset,
    tracker::TaskTracker,
    EventProcessor,
};

/// Replays the trace and saves every completed taskset.
pub struct TasksetExtractor {
    output_dir: OutputDirectory,
    tracker: Option<TaskTracker>,
    write_stats: bool,
    write_export: bool,
    saved: usize,
}

impl TasksetExtractor {
    pub fn new(output_dir: OutputDirectory, config: TrackerConfig) -> Self {
        Self {
            output_dir,
            tracker: Some(TaskTracker::new(config)),
            write_stats: true,
            write_export: true,
            saved: 0,
        }
    }

    /// Number of tasksets saved so far.
    pub fn saved(&self) -> usize {
        self.saved
    }

    fn save(&mut self, taskset: &CompletedTaskset) -> Result<()> {
        if self.write_export {
            let f = self.output_dir.create_taskset_file(taskset.id)?;
            let mut w = BufWriter::new(f);

            serde_json::to_writer_pretty(&mut w, taskset)?;
            w.flush()?;
        }

        if self.write_stats {
            let f = self.output_dir.create_stats_file(taskset.id)?;
            let mut w = BufWriter::new(f);

            write_stats(&mut w, taskset)?;
            w.flush()?;
        }

        self.saved += 1;

        Ok(())
    }

    fn save_all(&mut self, tasksets: Vec<CompletedTaskset>) -> Result<()> {
        for taskset in tasksets {
            self.save(&taskset)
                .with_context(|| format!("Failed to save taskset {}", taskset.id))?;
        }

        Ok(())
    }
}

impl From<&TrackerContext> for TasksetExtractor {
    fn from(ctx: &TrackerContext) -> Self {
        Self {
            write_stats: ctx.write_stats,
            write_export: ctx.write_export,
            ..Self::new(ctx.output_dir.clone(), ctx.config.clone())
        }
    }
}

impl EventProcessor for TasksetExtractor {
    fn init(&mut self, _ctx: &TrackerContext) -> Result<()> {
        self.output_dir.create_dir()?;

        let existing = self.output_dir.taskset_ids()?;

        if !existing.is_empty() {
            warn!(
                "{} already holds results for {} taskset(s), they will be overwritten",
                self.output_dir.path().display(),
                existing.len()
            );
        }

        Ok(())
    }

    fn consume_event(&mut self, event: RawEvent, _ctx: &TrackerContext) -> Result<()> {
        let tracker = self
            .tracker
            .as_mut()
            .context("Event received after the end of the trace")?;

        let event = events::decode(&event, &tracker.config().sfuncs)?;

        tracker.handle(&event)?;

        if !tracker.completed_tasksets().is_empty() {
            let completed = tracker.take_completed();

            self.save_all(completed)?;
        }

        Ok(())
    }

    fn finalize(&mut self, _ctx: &TrackerContext) -> Result<()> {
        let tracker = self
            .tracker
            .take()
            .context("Trace already finalized")?;

        let remaining = tracker.finish()?;

        self.save_all(remaining)?;

        info!("{} taskset(s) extracted", self.saved);
        eprintln!("Results saved in {}.", self.output_dir.path().display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::TasksetExtractor;
    use crate::{
        context::{TrackerConfig, TrackerContext},
        error::TrackerError,
        events::{FieldValue, RawEvent},
        io::OutputDirectory,
        EventProcessor,
    };

    fn raw(name: &str, ts: u64, fields: &[(&str, u64)]) -> RawEvent {
        fields.iter().fold(RawEvent::new(name, ts), |e, (k, v)| {
            e.with_field(k, FieldValue::Unsigned(*v))
        })
    }

    fn context(name: &str) -> TrackerContext {
        let path = std::env::temp_dir().join(format!("rt-replay-extract-{}", name));

        if path.exists() {
            std::fs::remove_dir_all(&path).unwrap();
        }

        TrackerContext {
            output_dir: OutputDirectory::new(path),
            config: TrackerConfig::default(),
            write_stats: true,
            write_export: true,
        }
    }

    fn trace() -> Vec<RawEvent> {
        vec![
            raw("task_proc:taskset_init", 0, &[]),
            raw(
                "task_proc:task_init",
                0,
                &[("vtid", 5), ("period", 1000), ("deadline", 1000), ("wcet", 100)],
            ),
            raw("task_proc:job_release", 10, &[("vtid", 5)]),
            raw("sched_switch", 12, &[("cpu_id", 0), ("prev_tid", 0), ("next_tid", 5)]),
            raw("pick_task_dl_entry", 13, &[("cpu_id", 1)]),
            raw("pick_task_dl_exit", 15, &[("cpu_id", 1)]),
            raw("irq_handler_entry", 16, &[("irq", 3)]),
            raw("sched_switch", 40, &[("cpu_id", 0), ("prev_tid", 5), ("next_tid", 0)]),
            raw("task_proc:job_completion", 40, &[("vtid", 5)]),
            raw("task_proc:kill_threads", 100, &[]),
        ]
    }

    #[test]
    fn test_extract_tasksets() {
        let ctx = context("ok");
        let mut extractor = TasksetExtractor::from(&ctx);

        extractor.init(&ctx).unwrap();
        for e in trace() {
            extractor.consume_event(e, &ctx).unwrap();
        }
        extractor.finalize(&ctx).unwrap();

        assert_eq!(extractor.saved(), 1);

        let export = std::fs::read_to_string(ctx.output_dir.taskset_file_path(0)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&export).unwrap();

        assert_eq!(json["jobs"][0]["exit_status"], "SUCCESS");
        assert_eq!(json["jobs"][0]["exec_blocks"][0]["start_time"], 12);
        assert_eq!(json["sfunc_blocks"][0]["name"], "pick_task_dl");

        let stats = std::fs::read_to_string(ctx.output_dir.stats_file_path(0)).unwrap();
        assert!(stats.contains("sfunc:pick_task_dl: [2]"));

        std::fs::remove_dir_all(ctx.output_dir.path()).unwrap();
    }

    #[test]
    fn test_incomplete_trace() {
        let ctx = context("incomplete");
        let mut extractor = TasksetExtractor::from(&ctx);

        extractor.init(&ctx).unwrap();
        for e in trace().into_iter().take(5) {
            extractor.consume_event(e, &ctx).unwrap();
        }

        let err = extractor.finalize(&ctx).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<TrackerError>(),
            Some(TrackerError::IncompleteTaskset { taskset: 0, .. })
        ));

        std::fs::remove_dir_all(ctx.output_dir.path()).unwrap();
    }

    #[test]
    fn test_decode_error() {
        let ctx = context("decode");
        let mut extractor = TasksetExtractor::from(&ctx);

        extractor.init(&ctx).unwrap();

        let bad = raw("sched_switch", 1, &[("cpu_id", 0)]);
        assert!(extractor.consume_event(bad, &ctx).is_err());

        std::fs::remove_dir_all(ctx.output_dir.path()).unwrap();
    }
}
