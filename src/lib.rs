//! A real-time scheduling trace replay tool.
//!
//! `rt-trace-replay` replays kernel and userspace traces of real-time taskset
//! experiments. It rebuilds the job-level execution of every task (releases,
//! execution spans, preemptions, migrations, completions) and measures the
//! scheduler's overhead (scheduler function durations, context switches,
//! release delays).
//!
//! The main components are either __event sources__ or __event processors__:
//! - An event source produces a stream of raw events. It implements the
//!   `EventSource` trait. Currently, the only event source is the trace
//!   reader.
//! - An event processor consumes a stream of raw events. It implements the
//!   `EventProcessor` trait. The taskset extractor feeds the events to a
//!   [`tracker::TaskTracker`] and saves every completed taskset.
//!
//! The tracker can also be used on its own with [`tracker::replay`].

pub mod cli;
pub mod utils;

pub mod clock;
pub mod error;

pub mod cpu;
pub mod job;
pub mod task;

pub mod stats;
pub mod taskset;
pub mod tracker;

pub mod events;
pub mod trace;

pub mod context;
pub mod io;
pub mod processors;

use anyhow::Result;

use crate::{context::TrackerContext, events::RawEvent};

/// Feeds an `EventProcessor` with a stream of events.
pub trait EventSource: Sized {
    /// Consume and feed all events to the supplied processor.
    fn event_loop<P: EventProcessor>(&mut self, processor: &mut P, ctx: &TrackerContext)
        -> Result<()>;

    /// Process the events with the supplied `EventProcessor`.
    fn process_events<P: EventProcessor>(
        &mut self,
        mut processor: P,
        ctx: &TrackerContext,
    ) -> Result<()> {
        processor.init(ctx)?;

        self.event_loop(&mut processor, ctx)?;

        processor.finalize(ctx)
    }
}

/// Consumes a stream of events.
pub trait EventProcessor {
    /// Initialize the processor before the first event.
    fn init(&mut self, ctx: &TrackerContext) -> Result<()>;

    /// Process an event. Events are supplied in timestamp order.
    fn consume_event(&mut self, event: RawEvent, ctx: &TrackerContext) -> Result<()>;

    /// Destructor function, called once the stream is exhausted.
    fn finalize(&mut self, ctx: &TrackerContext) -> Result<()>;
}
