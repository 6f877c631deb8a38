//! Traced events definition
//!
//! The trace decoder produces [`RawEvent`]s: a name, a timestamp and a bag of
//! typed fields. [`decode`] turns them into the closed [`EventData`] union the
//! tracker consumes.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::task::{TaskParams, Tid};

pub const TASKSET_INIT: &str = "task_proc:taskset_init";
pub const TASK_INIT: &str = "task_proc:task_init";
pub const JOB_RELEASE: &str = "task_proc:job_release";
pub const JOB_COMPLETION: &str = "task_proc:job_completion";
pub const DEADLINE_OVERRUN: &str = "task_proc:deadline_overrun";
pub const KILL_THREADS: &str = "task_proc:kill_threads";
pub const SCHED_SWITCH: &str = "sched_switch";
pub const SCHED_MIGRATE_TASK: &str = "sched_migrate_task";
pub const RCU_UTILIZATION: &str = "rcu_utilization";
pub const HRTIMER_START: &str = "timer_hrtimer_start";
pub const HRTIMER_CANCEL: &str = "timer_hrtimer_cancel";

const CSWITCH_START_STATE: &str = "Start context switch";
const CSWITCH_END_STATE: &str = "End context switch";

/// SCHED_DEADLINE scheduling class routines traced by default.
pub const SCHED_DL_SFUNCS: &[&str] = &[
    "enqueue_task_dl",
    "dequeue_task_dl",
    "yield_task_dl",
    "wakeup_preempt_dl",
    "pick_task_dl",
    "put_prev_task_dl",
    "set_next_task_dl",
    "select_task_rq_dl",
    "migrate_task_rq_dl",
    "task_woken_dl",
    "balance_dl",
    "task_tick_dl",
    "task_fork_dl",
    "switched_from_dl",
    "switched_to_dl",
    "prio_changed_dl",
    "update_curr_dl",
];

/// Deadline timer machinery traced alongside the class routines.
pub const DL_TIMER_SFUNCS: &[&str] = &["timer_hrtimer_expire", "replenish_dl_entity", "dl_task_timer"];

/// Typed value of a raw event field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Unsigned(u64),
    Signed(i64),
    Str(String),
}

/// Decoded trace record, before interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub name: String,
    pub ts: u64,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, ts: u64) -> Self {
        Self {
            name: name.into(),
            ts,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: FieldValue) -> Self {
        self.fields.insert(key.to_owned(), value);
        self
    }

    fn field(&self, key: &str) -> Result<&FieldValue> {
        self.fields
            .get(key)
            .ok_or_else(|| anyhow!("missing field `{}`", key))
    }

    pub fn u64_field(&self, key: &str) -> Result<u64> {
        match self.field(key)? {
            FieldValue::Unsigned(v) => Ok(*v),
            FieldValue::Signed(v) => {
                u64::try_from(*v).with_context(|| format!("field `{}` is negative", key))
            }
            FieldValue::Str(_) => bail!("field `{}` is not an integer", key),
        }
    }

    pub fn u32_field(&self, key: &str) -> Result<u32> {
        let v = self.u64_field(key)?;

        u32::try_from(v).with_context(|| format!("field `{}` out of range: {}", key, v))
    }

    pub fn str_field(&self, key: &str) -> Result<&str> {
        match self.field(key)? {
            FieldValue::Str(s) => Ok(s.as_str()),
            _ => bail!("field `{}` is not a string", key),
        }
    }
}

/// Recognized event with the fields the tracker needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventData {
    TasksetInit,
    TaskInit { tid: Tid, params: TaskParams },
    JobRelease { tid: Tid },
    JobCompletion { tid: Tid },
    DeadlineOverrun { tid: Tid },
    /// End of the experiment.
    KillThreads,
    SchedSwitch { cpu: u32, prev_tid: Tid, next_tid: Tid },
    SchedMigrateTask { tid: Tid, orig_cpu: u32, dest_cpu: u32 },
    ContextSwitchStart { cpu: u32 },
    ContextSwitchEnd { cpu: u32 },
    SFuncEntry { name: String, cpu: u32 },
    SFuncExit { name: String, cpu: u32 },
    HrtimerStart { cpu: u32, hrtimer: u64, mode: u32 },
    HrtimerCancel { hrtimer: u64 },
    /// Any other event. Only advances time.
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub ts: u64,
    pub ev: EventData,
}

impl TraceEvent {
    pub fn new(ts: u64, ev: EventData) -> Self {
        Self { ts, ev }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SFuncEdge {
    Entry,
    Exit,
}

/// Set of scheduler functions whose `<name>_entry`/`<name>_exit` events are
/// tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SFuncRegistry {
    names: BTreeSet<String>,
}

impl SFuncRegistry {
    pub fn empty() -> Self {
        Self {
            names: BTreeSet::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Splits an event name into a registered function and an edge.
    pub fn match_event<'a>(&self, event_name: &'a str) -> Option<(&'a str, SFuncEdge)> {
        if let Some(name) = event_name.strip_suffix("_entry") {
            return self.contains(name).then_some((name, SFuncEdge::Entry));
        }

        if let Some(name) = event_name.strip_suffix("_exit") {
            return self.contains(name).then_some((name, SFuncEdge::Exit));
        }

        None
    }
}

impl Default for SFuncRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();

        for name in SCHED_DL_SFUNCS.iter().chain(DL_TIMER_SFUNCS) {
            registry.insert(*name);
        }

        registry
    }
}

fn decode_data(raw: &RawEvent, sfuncs: &SFuncRegistry) -> Result<EventData> {
    let ev = match raw.name.as_str() {
        TASKSET_INIT => EventData::TasksetInit,
        TASK_INIT => EventData::TaskInit {
            tid: raw.u32_field("vtid")?,
            params: TaskParams::new(
                raw.u64_field("period")?,
                raw.u64_field("deadline")?,
                raw.u64_field("wcet")?,
            ),
        },
        JOB_RELEASE => EventData::JobRelease {
            tid: raw.u32_field("vtid")?,
        },
        JOB_COMPLETION => EventData::JobCompletion {
            tid: raw.u32_field("vtid")?,
        },
        DEADLINE_OVERRUN => EventData::DeadlineOverrun {
            tid: raw.u32_field("vtid")?,
        },
        KILL_THREADS => EventData::KillThreads,
        SCHED_SWITCH => EventData::SchedSwitch {
            cpu: raw.u32_field("cpu_id")?,
            prev_tid: raw.u32_field("prev_tid")?,
            next_tid: raw.u32_field("next_tid")?,
        },
        SCHED_MIGRATE_TASK => EventData::SchedMigrateTask {
            tid: raw.u32_field("tid")?,
            orig_cpu: raw.u32_field("orig_cpu")?,
            dest_cpu: raw.u32_field("dest_cpu")?,
        },
        RCU_UTILIZATION => {
            let cpu = raw.u32_field("cpu_id")?;

            match raw.str_field("s")? {
                CSWITCH_START_STATE => EventData::ContextSwitchStart { cpu },
                CSWITCH_END_STATE => EventData::ContextSwitchEnd { cpu },
                _ => EventData::Unrecognized,
            }
        }
        HRTIMER_START => EventData::HrtimerStart {
            cpu: raw.u32_field("cpu_id")?,
            hrtimer: raw.u64_field("hrtimer")?,
            mode: raw.u32_field("mode")?,
        },
        HRTIMER_CANCEL => EventData::HrtimerCancel {
            hrtimer: raw.u64_field("hrtimer")?,
        },
        other => match sfuncs.match_event(other) {
            Some((name, SFuncEdge::Entry)) => EventData::SFuncEntry {
                name: name.to_owned(),
                cpu: raw.u32_field("cpu_id")?,
            },
            Some((name, SFuncEdge::Exit)) => EventData::SFuncExit {
                name: name.to_owned(),
                cpu: raw.u32_field("cpu_id")?,
            },
            None => EventData::Unrecognized,
        },
    };

    Ok(ev)
}

/// Interprets a raw event. Unknown event names decode to
/// [`EventData::Unrecognized`]; known events with missing or mistyped fields
/// are errors.
pub fn decode(raw: &RawEvent, sfuncs: &SFuncRegistry) -> Result<TraceEvent> {
    let ev = decode_data(raw, sfuncs)
        .with_context(|| format!("Failed to decode `{}` event at {}ns", raw.name, raw.ts))?;

    Ok(TraceEvent { ts: raw.ts, ev })
}
