//! Recorded trace reader.
//!
//! A trace is either a single event file or a directory holding one event
//! file per trace stream (e.g. one per CPU). Event files are JSON lines, one
//! [`RawEvent`] per line, each file ordered by timestamp. An enclosing JSON
//! array (`[` and `]` on their own lines, records followed by commas) is
//! accepted as well.
//!
//! Streams are merged lazily into one time-ordered sequence. The sequence is
//! forward-only: it cannot be restarted once consumed.

use std::{
    cmp::Ordering,
    fs::File,
    io::{BufRead, BufReader, Lines},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};

use crate::{
    context::TrackerContext, events::RawEvent, utils::InterleaveBy, EventProcessor, EventSource,
};

/// Time-ordered stream of raw events.
pub type RawEvents = Box<dyn Iterator<Item = Result<RawEvent>>>;

struct TraceEvents {
    lines: Lines<BufReader<File>>,
}

impl TraceEvents {
    #[inline]
    fn is_start_line(line: &str) -> bool {
        line.trim() == "["
    }

    #[inline]
    fn is_end_line(line: &str) -> bool {
        line.trim() == "]"
    }

    fn parse_line(maybe_line: Result<String>) -> Result<RawEvent> {
        let line = maybe_line?;
        let start = line
            .find('{')
            .ok_or_else(|| anyhow!("Record start ('{{') not found in line: {}", line))?;
        let end = line
            .rfind('}')
            .ok_or_else(|| anyhow!("Record end ('}}') not found in line: {}", line))?
            + 1;

        if end <= start {
            bail!("Malformed event record: {}", line);
        }

        let event: RawEvent = serde_json::from_str(&line[start..end])
            .with_context(|| format!("Invalid event record: {}", line))?;
        Ok(event)
    }

    fn next_line(&mut self) -> Option<Result<String>> {
        loop {
            let res_line = self.lines.next()?;
            match res_line {
                Ok(ref line) if Self::is_start_line(line) || line.trim().is_empty() => continue,
                Ok(ref line) if Self::is_end_line(line) => return None,
                _ => return Some(res_line.map_err(anyhow::Error::from)),
            }
        }
    }
}

impl Iterator for TraceEvents {
    type Item = Result<RawEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().map(Self::parse_line)
    }
}

impl From<File> for TraceEvents {
    fn from(file: File) -> Self {
        Self {
            lines: BufReader::new(file).lines(),
        }
    }
}

/// Orders events by timestamp. Errors come first so that they stop the
/// replay as soon as they are read.
fn by_timestamp(a: &Result<RawEvent>, b: &Result<RawEvent>) -> Ordering {
    match (a, b) {
        (Ok(a), Ok(b)) => a.ts.cmp(&b.ts),
        (Err(_), Ok(_)) => Ordering::Less,
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Err(_)) => Ordering::Equal,
    }
}

/// Event files of a trace, in name order.
fn stream_paths(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_owned()]);
    }

    let pattern = format!("{}/*.json", path.to_string_lossy());
    let mut paths = Vec::new();

    for entry in glob::glob(&pattern)? {
        paths.push(entry?);
    }

    if paths.is_empty() {
        bail!("No event file found in {}", path.display());
    }

    paths.sort();

    Ok(paths)
}

/// Opens every stream of the trace at `path` and merges them.
pub fn open_trace<P: AsRef<Path>>(path: P) -> Result<RawEvents> {
    let mut merged: Option<RawEvents> = None;

    for p in stream_paths(path.as_ref())? {
        let file = File::open(&p).with_context(|| format!("Failed to open {}", p.display()))?;
        let events: RawEvents = Box::new(TraceEvents::from(file));

        debug!("Reading events from {}", p.display());

        merged = Some(match merged {
            None => events,
            Some(m) => Box::new(InterleaveBy::new(m, events, by_timestamp)),
        });
    }

    merged.ok_or_else(|| anyhow!("No event stream in {}", path.as_ref().display()))
}

pub struct TraceReader {
    path: PathBuf,
    events: Option<RawEvents>,
}

impl TraceReader {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_owned(),
            events: None,
        }
    }

    /// Opens the trace files.
    pub fn start(mut self) -> Result<Self> {
        self.events = Some(open_trace(&self.path)?);

        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSource for TraceReader {
    fn event_loop<P: EventProcessor>(&mut self, processor: &mut P, ctx: &TrackerContext) -> Result<()> {
        let events = self
            .events
            .take()
            .ok_or_else(|| anyhow!("Trace {} is not open or already consumed", self.path.display()))?;

        let mut count = 0usize;

        for event in events {
            processor.consume_event(event?, ctx)?;
            count += 1;
        }

        info!("{} events read from {}", count, self.path.display());

        Ok(())
    }
}
