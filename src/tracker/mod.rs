//! Taskset tracking.
//!
//! [`TaskTracker`] replays a time-ordered stream of [`TraceEvent`]s and
//! maintains the state of the active taskset: its tasks, the CPUs they run
//! on, the scheduler functions running on each CPU, and the release timers
//! in flight. Each taskset ends as an immutable [`CompletedTaskset`].
//!
//! CPU state outlives tasksets: threads and hardware persist from one
//! experiment to the next, only the task list is reset.

pub mod release;

use std::collections::HashMap;

use log::{debug, info, trace, warn};

use crate::{
    clock::Clock,
    context::{Strictness, TrackerConfig},
    cpu::{CpuState, ExecBlock, SFuncBlock},
    error::{StateViolation, TrackerError},
    events::{EventData, TraceEvent},
    task::{Task, TaskId, TaskParams, Tid, IDLE_TID},
    taskset::CompletedTaskset,
    utils::{pretty_time, Dispatcher},
};

use self::release::{ReleaseCorrelator, ReleaseTimerPolicy, YieldTimerPolicy};

pub struct TaskTracker {
    config: TrackerConfig,
    policy: Box<dyn ReleaseTimerPolicy>,
    clock: Clock,
    tasks: Vec<Task>,
    id_map: HashMap<Tid, TaskId>,
    /// Threads currently running, and their CPU.
    thread_cpu: HashMap<Tid, u32>,
    cpus: Dispatcher<u32, CpuState>,
    correlator: ReleaseCorrelator,
    active: bool,
    /// Id of the active (or last) taskset.
    taskset_id: Option<usize>,
    taskset_init_time: u64,
    completed: Vec<CompletedTaskset>,
}

impl TaskTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let policy = YieldTimerPolicy::from(&config);

        Self::with_policy(config, policy)
    }

    /// Creates a tracker with a custom release timer policy.
    pub fn with_policy<P: ReleaseTimerPolicy + 'static>(config: TrackerConfig, policy: P) -> Self {
        Self {
            config,
            policy: Box::new(policy),
            clock: Clock::new(),
            tasks: Vec::new(),
            id_map: HashMap::new(),
            thread_cpu: HashMap::new(),
            cpus: Dispatcher::new(),
            correlator: ReleaseCorrelator::new(),
            active: false,
            taskset_id: None,
            taskset_init_time: 0,
            completed: Vec::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Advances the clock to the event's timestamp and applies the event.
    pub fn handle(&mut self, event: &TraceEvent) -> Result<(), TrackerError> {
        self.clock.advance(event.ts)?;

        match &event.ev {
            EventData::TasksetInit => self.new_taskset(),
            EventData::TaskInit { tid, params } => self.add_task(*tid, *params),
            EventData::JobRelease { tid } => self.release(*tid),
            EventData::JobCompletion { tid } => self.complete(*tid),
            EventData::DeadlineOverrun { tid } => self.deadline_overrun(*tid),
            EventData::KillThreads => self.complete_taskset(),
            EventData::SchedSwitch {
                cpu,
                prev_tid,
                next_tid,
            } => self.switch(*cpu, *prev_tid, *next_tid),
            EventData::SchedMigrateTask {
                tid,
                orig_cpu,
                dest_cpu,
            } => self.migrate(*tid, *orig_cpu, *dest_cpu),
            EventData::ContextSwitchStart { cpu } => self.cswitch_start(*cpu),
            EventData::ContextSwitchEnd { cpu } => {
                self.cswitch_end(*cpu);
                Ok(())
            }
            EventData::SFuncEntry { name, cpu } => {
                self.sfunc_entry(name, *cpu);
                Ok(())
            }
            EventData::SFuncExit { name, cpu } => self.sfunc_exit(name, *cpu),
            EventData::HrtimerStart { cpu, hrtimer, mode } => {
                self.timer_armed(*cpu, *hrtimer, *mode);
                Ok(())
            }
            EventData::HrtimerCancel { hrtimer } => self.timer_cancelled(*hrtimer),
            EventData::Unrecognized => Ok(()),
        }
    }

    fn now(&self) -> u64 {
        self.clock.now()
    }

    fn violation(&self, violation: StateViolation) -> TrackerError {
        TrackerError::state(self.now(), violation)
    }

    fn cpu_mut(&mut self, cpu_id: u32) -> &mut CpuState {
        self.cpus.get_or_new(&cpu_id, || CpuState::new(cpu_id))
    }

    /// Task of the active taskset mapped to `tid`, if any.
    fn task_mut(&mut self, tid: Tid) -> Option<&mut Task> {
        if !self.active {
            return None;
        }

        let task_id = self.id_map.get(&tid)?;

        self.tasks.get_mut(task_id.index())
    }

    /// Like `task_mut`, for events that must refer to a task.
    fn expect_task(&mut self, tid: Tid) -> Result<&mut Task, TrackerError> {
        if !self.active {
            return Err(self.violation(StateViolation::NoActiveTaskset));
        }

        let now = self.now();

        self.task_mut(tid)
            .ok_or_else(|| TrackerError::state(now, StateViolation::UnknownThread { tid }))
    }

    pub fn new_taskset(&mut self) -> Result<(), TrackerError> {
        if self.active {
            return Err(self.violation(StateViolation::TasksetAlreadyActive));
        }

        if !self.correlator.is_empty() {
            return Err(self.violation(StateViolation::UnresolvedCorrelations {
                pending: self.correlator.pending_len(),
                unhandled: self.correlator.unhandled_len(),
            }));
        }

        let id = self.taskset_id.map_or(0, |id| id + 1);

        self.taskset_id = Some(id);
        self.tasks.clear();
        self.id_map.clear();
        self.active = true;
        self.taskset_init_time = self.now();

        info!("[{}] taskset {} started", pretty_time(self.now()), id);

        Ok(())
    }

    pub fn add_task(&mut self, tid: Tid, params: TaskParams) -> Result<(), TrackerError> {
        if !self.active {
            return Err(self.violation(StateViolation::NoActiveTaskset));
        }

        if self.id_map.contains_key(&tid) {
            return Err(self.violation(StateViolation::DuplicateThread { tid }));
        }

        let task_id = TaskId::new(self.tasks.len());
        let task = Task::new(
            task_id,
            tid,
            params,
            self.now(),
            self.thread_cpu.get(&tid).copied(),
            self.config.record_exec_blocks,
        );

        debug!("tid={} mapped to task {}", tid, task);

        self.tasks.push(task);
        self.id_map.insert(tid, task_id);

        Ok(())
    }

    pub fn release(&mut self, tid: Tid) -> Result<(), TrackerError> {
        let now = self.now();
        let cpu_id = self.thread_cpu.get(&tid).copied();
        let task = self.expect_task(tid)?;
        let task_id = task.task_id();

        // The first job has no release timer.
        let release_time = match task.job_id() {
            Some(job_id) => {
                let release_time = self.correlator.take_release(task_id);

                if release_time.is_none() {
                    debug!(
                        "[{}] {} J{}: no release timer fired",
                        pretty_time(now),
                        task_id,
                        job_id + 1
                    );
                }

                release_time
            }
            None => None,
        };

        self.expect_task(tid)?.release(release_time, now, cpu_id)
    }

    pub fn complete(&mut self, tid: Tid) -> Result<(), TrackerError> {
        let now = self.now();

        self.expect_task(tid)?.complete(now)
    }

    pub fn deadline_overrun(&mut self, tid: Tid) -> Result<(), TrackerError> {
        let now = self.now();
        let task = self.expect_task(tid)?;

        warn!("[{}] {}: deadline overrun", pretty_time(now), task);
        task.abort(now, true);

        Ok(())
    }

    pub fn complete_taskset(&mut self) -> Result<(), TrackerError> {
        if !self.active {
            return Err(self.violation(StateViolation::NoActiveTaskset));
        }

        let now = self.now();
        let init_time = self.taskset_init_time;
        let id = self.taskset_id.unwrap_or_default();

        for task in self.tasks.iter_mut() {
            task.abort(now, false);
        }

        let sfunc_blocks = self.collect_sfunc_blocks(init_time);

        let mut cswitch_blocks: Vec<ExecBlock> = self
            .cpus
            .values()
            .flat_map(|cpu| cpu.cswitch_blocks_since(init_time).copied())
            .collect();
        cswitch_blocks.sort_by_key(|b| (b.start_time, b.cpu_id));

        let tasks = std::mem::take(&mut self.tasks);
        self.id_map.clear();
        self.active = false;

        let taskset = CompletedTaskset::new(id, tasks, sfunc_blocks, cswitch_blocks, init_time, now);

        info!(
            "[{}] taskset {} completed: {} tasks, {} jobs, {} scheduler function calls",
            pretty_time(now),
            id,
            taskset.tasks.len(),
            taskset.jobs.len(),
            taskset.sfunc_blocks.len()
        );

        self.completed.push(taskset);

        Ok(())
    }

    /// Finished scheduler function blocks of every CPU entered since
    /// `since`, sorted by entry time, with parent indices pointing into the
    /// returned list.
    fn collect_sfunc_blocks(&self, since: u64) -> Vec<SFuncBlock> {
        let mut blocks: Vec<(u32, usize, &SFuncBlock)> = self
            .cpus
            .values()
            .flat_map(|cpu| {
                cpu.sfunc_blocks_since(since)
                    .map(move |(index, block)| (cpu.cpu_id(), index, block))
            })
            .collect();

        blocks.sort_by_key(|(cpu_id, _, b)| (b.entry_time, *cpu_id, b.depth));

        let positions: HashMap<(u32, usize), usize> = blocks
            .iter()
            .enumerate()
            .map(|(pos, (cpu_id, index, _))| ((*cpu_id, *index), pos))
            .collect();

        blocks
            .into_iter()
            .map(|(cpu_id, _, block)| SFuncBlock {
                parent: block
                    .parent
                    .and_then(|p| positions.get(&(cpu_id, p)).copied()),
                ..block.clone()
            })
            .collect()
    }

    pub fn switch(&mut self, cpu_id: u32, prev_tid: Tid, next_tid: Tid) -> Result<(), TrackerError> {
        let now = self.now();
        let strictness = self.config.strictness;
        let recorded = self.cpu_mut(cpu_id).switch(next_tid, now);

        match recorded.filter(|&r| r != prev_tid) {
            None => {
                if let Some(prev_task) = self.task_mut(prev_tid) {
                    prev_task.preempt(now)?;
                }

                self.leave_cpu(prev_tid, cpu_id);
            }
            Some(recorded) => {
                let violation = StateViolation::SwitchMismatch {
                    cpu: cpu_id,
                    recorded,
                    traced: prev_tid,
                };

                if strictness == Strictness::Strict {
                    return Err(self.violation(violation));
                }

                warn!("[{}] {}", pretty_time(now), violation);

                // Either thread may be the one actually leaving the CPU.
                for tid in [recorded, prev_tid] {
                    if let Some(task) = self
                        .task_mut(tid)
                        .filter(|t| t.is_executing() && t.cpu_id() == Some(cpu_id))
                    {
                        task.preempt(now)?;
                    }

                    self.leave_cpu(tid, cpu_id);
                }
            }
        }

        if let Some(next_task) = self.task_mut(next_tid) {
            next_task.execute(now, cpu_id)?;
        }

        if next_tid != IDLE_TID {
            self.thread_cpu.insert(next_tid, cpu_id);
        }

        Ok(())
    }

    /// Forgets that `tid` runs on `cpu_id`, if it was recorded there.
    fn leave_cpu(&mut self, tid: Tid, cpu_id: u32) {
        if self.thread_cpu.get(&tid) == Some(&cpu_id) {
            self.thread_cpu.remove(&tid);
        }
    }

    /// Migrations of threads that are not tasks are ignored.
    pub fn migrate(&mut self, tid: Tid, src_cpu_id: u32, dst_cpu_id: u32) -> Result<(), TrackerError> {
        let now = self.now();

        match self.task_mut(tid) {
            Some(task) => task.migrate(now, src_cpu_id, dst_cpu_id),
            None => Ok(()),
        }
    }

    pub fn sfunc_entry(&mut self, name: &str, cpu_id: u32) {
        let now = self.now();

        self.cpu_mut(cpu_id).sfunc_entry(name, now);
    }

    pub fn sfunc_exit(&mut self, name: &str, cpu_id: u32) -> Result<(), TrackerError> {
        let now = self.now();

        self.cpu_mut(cpu_id).sfunc_exit(name, now)
    }

    pub fn cswitch_start(&mut self, cpu_id: u32) -> Result<(), TrackerError> {
        let now = self.now();
        let strictness = self.config.strictness;

        if let Some(open_since) = self.cpu_mut(cpu_id).cswitch_start(now) {
            let violation = StateViolation::ContextSwitchReopened {
                cpu: cpu_id,
                open_since,
            };

            match strictness {
                Strictness::Strict => return Err(self.violation(violation)),
                Strictness::Permissive => warn!("[{}] {}", pretty_time(now), violation),
            }
        }

        Ok(())
    }

    pub fn cswitch_end(&mut self, cpu_id: u32) {
        let now = self.now();

        if !self.cpu_mut(cpu_id).cswitch_end(now) {
            trace!("[{}] cpu{}: context switch end without start", pretty_time(now), cpu_id);
        }
    }

    pub fn timer_armed(&mut self, cpu_id: u32, hrtimer: u64, mode: u32) {
        let now = self.now();
        let cpu = self.cpus.get_or_new(&cpu_id, || CpuState::new(cpu_id));
        let curr_tid = cpu.curr_tid();

        if !self.policy.is_release_timer(cpu, mode) {
            return;
        }

        let task_id = curr_tid.and_then(|tid| self.task_mut(tid).map(|t| t.task_id()));

        match task_id {
            Some(task_id) => {
                trace!("[{}] {}: release timer {:#x} armed", pretty_time(now), task_id, hrtimer);
                self.correlator.arm(hrtimer, task_id);
            }
            None => debug!(
                "[{}] cpu{}: release timer {:#x} armed by tid={:?}, which is not a task",
                pretty_time(now),
                cpu_id,
                hrtimer,
                curr_tid
            ),
        }
    }

    pub fn timer_cancelled(&mut self, hrtimer: u64) -> Result<(), TrackerError> {
        let now = self.now();

        self.correlator.cancel(hrtimer, now)
    }

    /// True if no taskset is active.
    pub fn is_complete(&self) -> bool {
        !self.active
    }

    pub fn completed_tasksets(&self) -> &[CompletedTaskset] {
        &self.completed
    }

    /// Removes and returns the tasksets completed so far.
    pub fn take_completed(&mut self) -> Vec<CompletedTaskset> {
        std::mem::take(&mut self.completed)
    }

    pub fn cpu(&self, cpu_id: u32) -> Option<&CpuState> {
        self.cpus.get(&cpu_id)
    }

    /// Ends the replay. Fails if the stream ended inside a taskset.
    pub fn finish(self) -> Result<Vec<CompletedTaskset>, TrackerError> {
        if !self.is_complete() {
            return Err(TrackerError::IncompleteTaskset {
                taskset: self.taskset_id.unwrap_or_default(),
                init_time: self.taskset_init_time,
            });
        }

        Ok(self.completed)
    }
}

/// Replays `events` with a fresh tracker and returns every completed
/// taskset.
///
/// The event sequence is consumed once, in order.
pub fn replay<I>(events: I, config: TrackerConfig) -> Result<Vec<CompletedTaskset>, TrackerError>
where
    I: IntoIterator<Item = TraceEvent>,
{
    let mut tracker = TaskTracker::new(config);

    for event in events {
        tracker.handle(&event)?;
    }

    tracker.finish()
}
