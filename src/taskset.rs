//! Completed taskset snapshot.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::{
    cpu::{ExecBlock, SFuncBlock},
    job::{CompletedJob, Migration},
    stats::{self, ExecData},
    task::{Task, TaskId, TaskParams, Tid},
};

/// Static description of a task of a completed taskset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub tid: Tid,
    pub params: TaskParams,
    pub init_time: u64,
    pub migrations: Vec<Migration>,
}

/// Immutable record of one taskset, from its initialization to its
/// completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedTaskset {
    pub id: usize,
    pub tasks: Vec<TaskRecord>,
    /// Ordered by userspace release time.
    pub jobs: Vec<CompletedJob>,
    /// Ordered by entry time.
    pub sfunc_blocks: Vec<SFuncBlock>,
    /// Ordered by start time.
    pub cswitch_blocks: Vec<ExecBlock>,
    pub exec_data: Vec<ExecData>,
    pub init_time: u64,
    pub completion_time: u64,
    pub cpu_ids: BTreeSet<u32>,
}

impl CompletedTaskset {
    /// Freezes a taskset. The blocks must already be sorted.
    pub fn new(
        id: usize,
        tasks: Vec<Task>,
        sfunc_blocks: Vec<SFuncBlock>,
        cswitch_blocks: Vec<ExecBlock>,
        init_time: u64,
        completion_time: u64,
    ) -> Self {
        let mut records = Vec::with_capacity(tasks.len());
        let mut jobs = Vec::new();

        for task in tasks {
            let (task_id, tid, params, init_time) =
                (task.task_id(), task.tid(), *task.params(), task.init_time());
            let (migrations, completed_jobs) = task.into_history();

            records.push(TaskRecord {
                task_id,
                tid,
                params,
                init_time,
                migrations,
            });
            jobs.extend(completed_jobs);
        }

        jobs.sort_by_key(|j| (j.userspace_release_time, j.task_id, j.job_id));

        let exec_data = stats::aggregate(&sfunc_blocks, &jobs);

        let cpu_ids = sfunc_blocks
            .iter()
            .map(|b| b.cpu_id)
            .chain(cswitch_blocks.iter().map(|b| b.cpu_id))
            .chain(
                jobs.iter()
                    .filter_map(|j| j.exec_blocks.as_ref())
                    .flatten()
                    .map(|b| b.cpu_id),
            )
            .collect();

        Self {
            id,
            tasks: records,
            jobs,
            sfunc_blocks,
            cswitch_blocks,
            exec_data,
            init_time,
            completion_time,
            cpu_ids,
        }
    }

    /// Looks up a statistic by name.
    pub fn exec_data(&self, name: &str) -> Option<&ExecData> {
        self.exec_data.iter().find(|d| d.name == name)
    }

    pub fn duration(&self) -> u64 {
        self.completion_time - self.init_time
    }
}

#[cfg(test)]
mod tests {
    use super::CompletedTaskset;
    use crate::{
        cpu::{ExecBlock, SFuncBlock},
        job::ExitStatus,
        stats::MIGRATIONS,
        task::{Task, TaskId, TaskParams},
    };

    #[test]
    fn test_snapshot() {
        let params = TaskParams::new(100, 100, 10);
        let mut t0 = Task::new(TaskId::new(0), 10, params, 0, None, true);
        let mut t1 = Task::new(TaskId::new(1), 11, params, 0, None, true);

        t0.release(None, 50, Some(3)).unwrap();
        t1.release(None, 20, None).unwrap();
        t1.migrate(21, 0, 1).unwrap();
        t1.execute(25, 1).unwrap();
        t0.complete(60).unwrap();
        t1.abort(70, false);

        let sfunc = SFuncBlock {
            name: "pick_task_dl".to_owned(),
            cpu_id: 5,
            parent: None,
            depth: 0,
            entry_time: 30,
            exit_time: Some(31),
        };
        let cswitch = ExecBlock {
            cpu_id: 2,
            start_time: 40,
            end_time: 41,
        };

        let ts = CompletedTaskset::new(4, vec![t0, t1], vec![sfunc], vec![cswitch], 0, 80);

        assert_eq!(ts.id, 4);
        assert_eq!(ts.duration(), 80);
        assert_eq!(ts.tasks.len(), 2);
        assert_eq!(ts.tasks[1].migrations.len(), 1);

        // Sorted by userspace release time.
        assert_eq!(ts.jobs[0].task_id, TaskId::new(1));
        assert_eq!(ts.jobs[0].exit_status, ExitStatus::Aborted);
        assert_eq!(ts.jobs[1].task_id, TaskId::new(0));

        assert_eq!(ts.cpu_ids.iter().copied().collect::<Vec<_>>(), &[1, 2, 3, 5]);
        assert_eq!(ts.exec_data(MIGRATIONS).map(|d| d.max), Some(1));
    }
}
