//! Tracking violations.
//!
//! Every variant of [`TrackerError`] is fatal: the event stream cannot be
//! explained by the task model and replay stops. Benign anomalies are not
//! represented here, they are logged where they are detected.

use std::fmt;

use crate::task::{TaskId, Tid};
use crate::utils::pretty_time;

/// Task and job a state violation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobRef {
    pub task_id: TaskId,
    /// `None` if the task has not released any job yet.
    pub job_id: Option<u32>,
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.job_id {
            Some(job_id) => write!(f, "{} J{}", self.task_id, job_id),
            None => write!(f, "{} (no job)", self.task_id),
        }
    }
}

/// Illegal task, job, CPU or taskset transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateViolation {
    DoubleRelease,
    AlreadyRunning,
    AlreadyPreempted,
    NoJobReleased,
    AlreadyCompleted,
    CompleteWithoutExecuting,
    MigrateWhileRunning,
    MigrateFromWrongCpu { assigned: u32, src: u32 },
    Teleport { assigned: u32, cpu: u32 },
    NoActiveTaskset,
    TasksetAlreadyActive,
    UnresolvedCorrelations { pending: usize, unhandled: usize },
    DuplicateThread { tid: Tid },
    UnknownThread { tid: Tid },
    SwitchMismatch { cpu: u32, recorded: Tid, traced: Tid },
    ContextSwitchReopened { cpu: u32, open_since: u64 },
}

impl fmt::Display for StateViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DoubleRelease => write!(f, "released new job before old job completed"),
            Self::AlreadyRunning => write!(f, "already running"),
            Self::AlreadyPreempted => write!(f, "already preempted"),
            Self::NoJobReleased => write!(f, "has not released any jobs"),
            Self::AlreadyCompleted => write!(f, "already finished"),
            Self::CompleteWithoutExecuting => write!(f, "cannot complete without executing"),
            Self::MigrateWhileRunning => write!(f, "cannot migrate while running"),
            Self::MigrateFromWrongCpu { assigned, src } => {
                write!(f, "migration from cpu{} but task is assigned to cpu{}", src, assigned)
            }
            Self::Teleport { assigned, cpu } => {
                write!(f, "scheduled on cpu{} but task is assigned to cpu{}", cpu, assigned)
            }
            Self::NoActiveTaskset => write!(f, "no active taskset"),
            Self::TasksetAlreadyActive => {
                write!(f, "cannot create new taskset when current one is not complete")
            }
            Self::UnresolvedCorrelations { pending, unhandled } => write!(
                f,
                "cannot create new taskset with unresolved release timers \
                 (pending timers: {}, unhandled releases: {})",
                pending,
                unhandled
            ),
            Self::DuplicateThread { tid } => write!(f, "multiple tasks mapped to tid={}", tid),
            Self::UnknownThread { tid } => write!(f, "tid={} is not mapped to any task", tid),
            Self::SwitchMismatch {
                cpu,
                recorded,
                traced,
            } => write!(
                f,
                "cpu{} marked as running tid={} but switch indicates tid={}",
                cpu,
                recorded,
                traced
            ),
            Self::ContextSwitchReopened { cpu, open_since } => write!(
                f,
                "cpu{} starts a context switch while one is open since {}",
                cpu,
                pretty_time(*open_since)
            ),
        }
    }
}

/// Fatal tracking error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// Timestamp regression.
    Ordering { now: u64, time: u64 },
    State {
        time: u64,
        job: Option<JobRef>,
        violation: StateViolation,
    },
    /// Scheduler function exit not matching the top of the CPU's call stack.
    StackMismatch {
        time: u64,
        cpu: u32,
        top: Option<String>,
        name: String,
    },
    /// A release timer fired for a task that still has an unconsumed release.
    DuplicateCorrelation {
        time: u64,
        timer: u64,
        task_id: TaskId,
    },
    /// The event stream ended inside a taskset.
    IncompleteTaskset { taskset: usize, init_time: u64 },
}

impl TrackerError {
    pub fn state(time: u64, violation: StateViolation) -> Self {
        Self::State {
            time,
            job: None,
            violation,
        }
    }

    /// Returns the state violation, if this is one.
    pub fn violation(&self) -> Option<&StateViolation> {
        match self {
            Self::State { violation, .. } => Some(violation),
            _ => None,
        }
    }
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ordering { now, time } => write!(
                f,
                "[{}] attempted to go back in time (new time: {} < current time: {})",
                pretty_time(*now),
                time,
                now
            ),
            Self::State {
                time,
                job: Some(job),
                violation,
            } => write!(f, "[{}] {}: {}", pretty_time(*time), job, violation),
            Self::State {
                time,
                job: None,
                violation,
            } => write!(f, "[{}] {}", pretty_time(*time), violation),
            Self::StackMismatch {
                time,
                cpu,
                top: Some(top),
                name,
            } => write!(
                f,
                "[{}] cpu{}: exit from {} while {} is on top of the scheduler function stack",
                pretty_time(*time),
                cpu,
                name,
                top
            ),
            Self::StackMismatch {
                time,
                cpu,
                top: None,
                name,
            } => write!(
                f,
                "[{}] cpu{}: exit from {} with an empty scheduler function stack",
                pretty_time(*time),
                cpu,
                name
            ),
            Self::DuplicateCorrelation {
                time,
                timer,
                task_id,
            } => write!(
                f,
                "[{}] multiple unhandled releases on {} (hrtimer={:#x})",
                pretty_time(*time),
                task_id,
                timer
            ),
            Self::IncompleteTaskset { taskset, init_time } => write!(
                f,
                "taskset {} started at {} never completed (likely missing tracepoints)",
                taskset,
                pretty_time(*init_time)
            ),
        }
    }
}

impl std::error::Error for TrackerError {}
