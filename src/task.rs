//! Task model and per-task job state machine.

use std::fmt::Display;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::{
    error::{JobRef, StateViolation, TrackerError},
    job::{CompletedJob, ExitStatus, Migration, TaskExecBlock},
};

/// Kernel thread id. `0` is the per-CPU idle (swapper) thread.
pub type Tid = u32;

pub const IDLE_TID: Tid = 0;

/// Dense task identifier, assigned in creation order within a taskset.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(usize);

impl TaskId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Task parameters, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskParams {
    pub period: u64,
    pub deadline: u64,
    pub wcet: u64,
}

impl TaskParams {
    pub fn new(period: u64, deadline: u64, wcet: u64) -> Self {
        Self {
            period,
            deadline,
            wcet,
        }
    }

    pub fn has_implicit_deadline(&self) -> bool {
        self.deadline == self.period
    }
}

impl Display for TaskParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_implicit_deadline() {
            write!(f, "(P={}, C={})", self.period, self.wcet)
        } else {
            write!(f, "(P={}, C={}, D={})", self.period, self.wcet, self.deadline)
        }
    }
}

/// Job-level state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// No job released, or the current job is finished.
    Idle,
    /// A job is active but not on a CPU.
    ReleasedWaiting,
    /// A job is active and running.
    Executing,
}

/// Execution state of a task, and record of its finished jobs.
///
/// CPU occupancy (`execute`/`preempt`) is tracked separately from the job
/// lifecycle (`release`/`complete`/`abort`): the task's thread may be on a CPU
/// while no job is active, e.g. between a completion and the following
/// switch-out. Only time spent on a CPU while a job is active is accounted to
/// that job.
///
/// A job's open span is closed when the job completes or aborts, not at the
/// next switch-out, so its blocks never extend past its completion time.
#[derive(Debug, Clone)]
pub struct Task {
    task_id: TaskId,
    tid: Tid,
    params: TaskParams,
    init_time: u64,
    job_id: Option<u32>,
    cpu_id: Option<u32>,
    is_executing: bool,
    is_completed: bool,
    has_executed: bool,
    migrations: u32,
    migration_history: Vec<Migration>,
    release_time: Option<u64>,
    userspace_release_time: u64,
    absolute_deadline: u64,
    exec_start_time: u64,
    record_exec_blocks: bool,
    exec_blocks: Option<Vec<TaskExecBlock>>,
    completed_jobs: Vec<CompletedJob>,
}

impl Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.task_id, self.params)
    }
}

impl Task {
    /// Creates a task at `init_time`. If the task's thread is currently
    /// running on `cpu_id`, the task starts on that CPU.
    pub fn new(
        task_id: TaskId,
        tid: Tid,
        params: TaskParams,
        init_time: u64,
        cpu_id: Option<u32>,
        record_exec_blocks: bool,
    ) -> Self {
        let task = Self {
            task_id,
            tid,
            params,
            init_time,
            job_id: None,
            cpu_id,
            is_executing: cpu_id.is_some(),
            is_completed: true,
            has_executed: false,
            migrations: 0,
            migration_history: Vec::new(),
            release_time: None,
            userspace_release_time: 0,
            absolute_deadline: 0,
            exec_start_time: init_time,
            record_exec_blocks,
            exec_blocks: None,
            completed_jobs: Vec::new(),
        };

        trace!("{}: init (tid={}, cpu={:?})", task, tid, cpu_id);

        task
    }

    fn job_ref(&self) -> JobRef {
        JobRef {
            task_id: self.task_id,
            job_id: self.job_id,
        }
    }

    fn violation(&self, time: u64, violation: StateViolation) -> TrackerError {
        TrackerError::State {
            time,
            job: Some(self.job_ref()),
            violation,
        }
    }

    fn has_active_job(&self) -> bool {
        self.job_id.is_some() && !self.is_completed
    }

    /// Closes the running span at `time` into the current job's blocks.
    fn close_exec_block(&mut self, time: u64) {
        if let (Some(job_id), Some(cpu_id), Some(blocks)) =
            (self.job_id, self.cpu_id, self.exec_blocks.as_mut())
        {
            blocks.push(TaskExecBlock {
                task_id: self.task_id,
                job_id,
                cpu_id,
                start_time: self.exec_start_time,
                end_time: time,
            });
        }
    }

    pub fn release(
        &mut self,
        release_time: Option<u64>,
        userspace_release_time: u64,
        cpu_id: Option<u32>,
    ) -> Result<(), TrackerError> {
        trace!(
            "{}: release({:?}, {}, {:?})",
            self,
            release_time,
            userspace_release_time,
            cpu_id
        );

        if !self.is_completed {
            return Err(self.violation(userspace_release_time, StateViolation::DoubleRelease));
        }

        if let (true, Some(assigned), Some(cpu)) = (self.is_executing, self.cpu_id, cpu_id) {
            if assigned != cpu {
                return Err(self.violation(
                    userspace_release_time,
                    StateViolation::Teleport { assigned, cpu },
                ));
            }
        }

        self.job_id = Some(self.job_id.map_or(0, |j| j + 1));
        self.is_completed = false;
        self.has_executed = false;
        self.migrations = 0;
        self.release_time = release_time;
        self.userspace_release_time = userspace_release_time;
        self.absolute_deadline = release_time
            .unwrap_or(userspace_release_time)
            .saturating_add(self.params.deadline);
        self.exec_blocks = self.record_exec_blocks.then(Vec::new);

        if self.is_executing {
            // The thread emitting the release is already on its CPU.
            self.exec_start_time = userspace_release_time;
            self.has_executed = true;
        } else if let Some(cpu) = cpu_id {
            self.execute(userspace_release_time, cpu)?;
        }

        Ok(())
    }

    pub fn execute(&mut self, time: u64, cpu_id: u32) -> Result<(), TrackerError> {
        trace!("{}: execute({}, {})", self, time, cpu_id);

        if self.is_executing {
            return Err(self.violation(time, StateViolation::AlreadyRunning));
        }

        if let Some(assigned) = self.cpu_id {
            if assigned != cpu_id {
                return Err(self.violation(
                    time,
                    StateViolation::Teleport {
                        assigned,
                        cpu: cpu_id,
                    },
                ));
            }
        }

        self.cpu_id = Some(cpu_id);
        self.is_executing = true;
        self.exec_start_time = time;

        if self.has_active_job() {
            self.has_executed = true;
        }

        Ok(())
    }

    pub fn preempt(&mut self, time: u64) -> Result<(), TrackerError> {
        trace!("{}: preempt({})", self, time);

        if !self.is_executing {
            return Err(self.violation(time, StateViolation::AlreadyPreempted));
        }

        self.is_executing = false;

        if self.has_active_job() {
            self.close_exec_block(time);
        }

        Ok(())
    }

    pub fn complete(&mut self, time: u64) -> Result<(), TrackerError> {
        trace!("{}: complete({})", self, time);

        if self.job_id.is_none() {
            return Err(self.violation(time, StateViolation::NoJobReleased));
        }

        if self.is_completed {
            return Err(self.violation(time, StateViolation::AlreadyCompleted));
        }

        if !self.has_executed {
            return Err(self.violation(time, StateViolation::CompleteWithoutExecuting));
        }

        self.finish_job(time, ExitStatus::Success);

        Ok(())
    }

    /// Ends the current job prematurely. Does nothing if no job is active.
    pub fn abort(&mut self, time: u64, is_deadline_overrun: bool) {
        trace!("{}: abort({}, {})", self, time, is_deadline_overrun);

        if !self.has_active_job() {
            return;
        }

        let status = if is_deadline_overrun {
            ExitStatus::DeadlineOverrun
        } else {
            ExitStatus::Aborted
        };

        self.finish_job(time, status);
    }

    fn finish_job(&mut self, time: u64, exit_status: ExitStatus) {
        if self.is_executing {
            // The thread stays on its CPU; the rest of the span is not
            // accounted to any job.
            self.close_exec_block(time);
            self.exec_start_time = time;
        }

        let Some(job_id) = self.job_id else {
            return;
        };

        self.completed_jobs.push(CompletedJob {
            task_id: self.task_id,
            job_id,
            release_time: self.release_time,
            userspace_release_time: self.userspace_release_time,
            absolute_deadline: self.absolute_deadline,
            completion_time: time,
            exit_status,
            exec_blocks: self.exec_blocks.take(),
            migrations: self.migrations,
        });
        self.is_completed = true;
    }

    pub fn migrate(&mut self, time: u64, src_cpu_id: u32, dst_cpu_id: u32) -> Result<(), TrackerError> {
        trace!("{}: migrate({}, {}, {})", self, time, src_cpu_id, dst_cpu_id);

        if self.is_executing {
            return Err(self.violation(time, StateViolation::MigrateWhileRunning));
        }

        if let Some(assigned) = self.cpu_id {
            if assigned != src_cpu_id {
                return Err(self.violation(
                    time,
                    StateViolation::MigrateFromWrongCpu {
                        assigned,
                        src: src_cpu_id,
                    },
                ));
            }
        }

        self.migration_history.push(Migration {
            time,
            src_cpu_id,
            dst_cpu_id,
        });
        self.migrations += 1;
        self.cpu_id = Some(dst_cpu_id);

        Ok(())
    }

    pub fn state(&self) -> TaskState {
        match (self.has_active_job(), self.is_executing) {
            (false, _) => TaskState::Idle,
            (true, false) => TaskState::ReleasedWaiting,
            (true, true) => TaskState::Executing,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn params(&self) -> &TaskParams {
        &self.params
    }

    pub fn init_time(&self) -> u64 {
        self.init_time
    }

    pub fn job_id(&self) -> Option<u32> {
        self.job_id
    }

    pub fn cpu_id(&self) -> Option<u32> {
        self.cpu_id
    }

    pub fn is_executing(&self) -> bool {
        self.is_executing
    }

    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    pub fn absolute_deadline(&self) -> u64 {
        self.absolute_deadline
    }

    /// Migrations of the current job.
    pub fn migrations(&self) -> u32 {
        self.migrations
    }

    pub fn migration_history(&self) -> &[Migration] {
        &self.migration_history
    }

    pub fn completed_jobs(&self) -> &[CompletedJob] {
        &self.completed_jobs
    }

    /// Splits the task into its migration history and finished jobs.
    pub fn into_history(self) -> (Vec<Migration>, Vec<CompletedJob>) {
        (self.migration_history, self.completed_jobs)
    }
}
