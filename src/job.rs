//! Job records.

use serde::Serialize;

use crate::task::TaskId;

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitStatus {
    /// Executed to completion.
    Success,
    /// Killed because the experiment ended.
    Aborted,
    /// The scheduler reported a deadline miss.
    DeadlineOverrun,
}

/// Maximal contiguous interval `[start_time, end_time)` a job spent executing
/// on one CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskExecBlock {
    pub task_id: TaskId,
    pub job_id: u32,
    pub cpu_id: u32,
    pub start_time: u64,
    pub end_time: u64,
}

/// CPU reassignment of a task while it is not executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Migration {
    pub time: u64,
    pub src_cpu_id: u32,
    pub dst_cpu_id: u32,
}

/// Terminal record of a completed (or aborted) job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedJob {
    pub task_id: TaskId,
    pub job_id: u32,
    /// Release decision point, when it could be correlated with a timer.
    pub release_time: Option<u64>,
    /// Time of the task's own release tracepoint.
    pub userspace_release_time: u64,
    pub absolute_deadline: u64,
    pub completion_time: u64,
    pub exit_status: ExitStatus,
    /// `None` when execution block recording is disabled.
    pub exec_blocks: Option<Vec<TaskExecBlock>>,
    pub migrations: u32,
}

impl CompletedJob {
    /// Latency between the release decision and the userspace release.
    pub fn release_delay(&self) -> Option<u64> {
        self.release_time
            .map(|r| self.userspace_release_time.saturating_sub(r))
    }

    /// Earliest known release time of the job.
    pub fn release(&self) -> u64 {
        self.release_time.unwrap_or(self.userspace_release_time)
    }

    /// Number of times the job was preempted: one less than its block count,
    /// so `-1` for a job that never ran. `None` if blocks were not recorded.
    pub fn preemptions(&self) -> Option<i64> {
        self.exec_blocks
            .as_ref()
            .map(|blocks| blocks.len() as i64 - 1)
    }

    pub fn response_time(&self) -> u64 {
        self.completion_time.saturating_sub(self.release())
    }

    pub fn missed_deadline(&self) -> bool {
        self.exit_status == ExitStatus::DeadlineOverrun
            || self.completion_time > self.absolute_deadline
    }
}
