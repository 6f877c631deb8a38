//! Per-CPU scheduler activity.

use serde::Serialize;

use crate::{error::TrackerError, task::Tid};

/// Context-switch bracket: an interval spent in the kernel's low-level context
/// switch, independent of which task owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecBlock {
    pub cpu_id: u32,
    pub start_time: u64,
    pub end_time: u64,
}

/// One invocation of a named scheduler function.
///
/// `parent` indexes the block list the block is stored in: the owning CPU's
/// arena while tracking, the snapshot's sorted list once a taskset completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SFuncBlock {
    pub name: String,
    pub cpu_id: u32,
    pub parent: Option<usize>,
    pub depth: usize,
    pub entry_time: u64,
    /// `None` while the invocation is still on the stack.
    pub exit_time: Option<u64>,
}

impl SFuncBlock {
    pub fn duration(&self) -> Option<u64> {
        self.exit_time.map(|exit| exit - self.entry_time)
    }
}

/// State of one CPU.
///
/// Scheduler function invocations live in an append-only arena ordered by
/// entry time; the call stack holds arena indices.
#[derive(Debug, Clone)]
pub struct CpuState {
    cpu_id: u32,
    /// `None` until the first switch on this CPU is traced.
    curr_tid: Option<Tid>,
    prev_tid: Option<Tid>,
    last_switch_time: Option<u64>,
    cswitch_start: Option<u64>,
    cswitch_blocks: Vec<ExecBlock>,
    sfunc_stack: Vec<usize>,
    sfunc_blocks: Vec<SFuncBlock>,
}

impl CpuState {
    pub fn new(cpu_id: u32) -> Self {
        Self {
            cpu_id,
            curr_tid: None,
            prev_tid: None,
            last_switch_time: None,
            cswitch_start: None,
            cswitch_blocks: Vec::new(),
            sfunc_stack: Vec::new(),
            sfunc_blocks: Vec::new(),
        }
    }

    /// Switches to `tid` and returns the thread the CPU was running before,
    /// if known.
    pub fn switch(&mut self, tid: Tid, time: u64) -> Option<Tid> {
        self.prev_tid = self.curr_tid;
        self.curr_tid = Some(tid);
        self.last_switch_time = Some(time);

        self.prev_tid
    }

    pub fn sfunc_entry(&mut self, name: &str, time: u64) {
        let index = self.sfunc_blocks.len();

        self.sfunc_blocks.push(SFuncBlock {
            name: name.to_owned(),
            cpu_id: self.cpu_id,
            parent: self.sfunc_stack.last().copied(),
            depth: self.sfunc_stack.len(),
            entry_time: time,
            exit_time: None,
        });
        self.sfunc_stack.push(index);
    }

    pub fn sfunc_exit(&mut self, name: &str, time: u64) -> Result<(), TrackerError> {
        let top = self.sfunc_stack.last().map(|&i| &self.sfunc_blocks[i]);

        match top {
            Some(block) if block.name == name => {}
            _ => {
                return Err(TrackerError::StackMismatch {
                    time,
                    cpu: self.cpu_id,
                    top: top.map(|b| b.name.clone()),
                    name: name.to_owned(),
                })
            }
        }

        if let Some(index) = self.sfunc_stack.pop() {
            self.sfunc_blocks[index].exit_time = Some(time);
        }

        Ok(())
    }

    /// Name of the innermost running scheduler function.
    pub fn top_sfunc(&self) -> Option<&str> {
        self.sfunc_stack
            .last()
            .map(|&i| self.sfunc_blocks[i].name.as_str())
    }

    /// Opens a context-switch bracket. Returns the start of the bracket that
    /// was still open, if any; that bracket is discarded.
    pub fn cswitch_start(&mut self, time: u64) -> Option<u64> {
        self.cswitch_start.replace(time)
    }

    /// Closes the open context-switch bracket. Returns `false` if there was
    /// none, which happens when the trace starts inside a bracket.
    pub fn cswitch_end(&mut self, time: u64) -> bool {
        match self.cswitch_start.take() {
            Some(start_time) => {
                self.cswitch_blocks.push(ExecBlock {
                    cpu_id: self.cpu_id,
                    start_time,
                    end_time: time,
                });
                true
            }
            None => false,
        }
    }

    /// Finished scheduler function invocations entered at or after `since`,
    /// latest first, with their arena index.
    pub fn sfunc_blocks_since(&self, since: u64) -> impl Iterator<Item = (usize, &SFuncBlock)> {
        self.sfunc_blocks
            .iter()
            .enumerate()
            .rev()
            .take_while(move |(_, b)| b.entry_time >= since)
            .filter(|(_, b)| b.exit_time.is_some())
    }

    /// Context-switch brackets started at or after `since`, latest first.
    pub fn cswitch_blocks_since(&self, since: u64) -> impl Iterator<Item = &ExecBlock> {
        self.cswitch_blocks
            .iter()
            .rev()
            .take_while(move |b| b.start_time >= since)
    }

    pub fn cpu_id(&self) -> u32 {
        self.cpu_id
    }

    pub fn curr_tid(&self) -> Option<Tid> {
        self.curr_tid
    }

    pub fn prev_tid(&self) -> Option<Tid> {
        self.prev_tid
    }

    pub fn last_switch_time(&self) -> Option<u64> {
        self.last_switch_time
    }

    pub fn sfunc_blocks(&self) -> &[SFuncBlock] {
        &self.sfunc_blocks
    }

    pub fn cswitch_blocks(&self) -> &[ExecBlock] {
        &self.cswitch_blocks
    }
}

#[cfg(test)]
mod tests {
    use super::{CpuState, ExecBlock};
    use crate::error::TrackerError;

    #[test]
    fn test_switch() {
        let mut cpu = CpuState::new(1);

        assert_eq!(cpu.switch(5, 10), None);
        assert_eq!(cpu.switch(0, 20), Some(5));
        assert_eq!(cpu.curr_tid(), Some(0));
        assert_eq!(cpu.prev_tid(), Some(5));
        assert_eq!(cpu.last_switch_time(), Some(20));
    }

    #[test]
    fn test_sfunc_nesting() {
        let mut cpu = CpuState::new(0);

        cpu.sfunc_entry("pick_task_dl", 10);
        cpu.sfunc_entry("update_curr_dl", 12);
        assert_eq!(cpu.top_sfunc(), Some("update_curr_dl"));
        cpu.sfunc_exit("update_curr_dl", 15).unwrap();
        cpu.sfunc_exit("pick_task_dl", 20).unwrap();
        assert_eq!(cpu.top_sfunc(), None);

        let blocks = cpu.sfunc_blocks();
        assert_eq!(blocks[0].parent, None);
        assert_eq!(blocks[0].depth, 0);
        assert_eq!(blocks[0].duration(), Some(10));
        assert_eq!(blocks[1].parent, Some(0));
        assert_eq!(blocks[1].depth, 1);
        assert_eq!(blocks[1].duration(), Some(3));
    }

    #[test]
    fn test_sfunc_mismatch() {
        let mut cpu = CpuState::new(3);

        assert_eq!(
            cpu.sfunc_exit("enqueue_task_dl", 5),
            Err(TrackerError::StackMismatch {
                time: 5,
                cpu: 3,
                top: None,
                name: "enqueue_task_dl".to_owned(),
            })
        );

        cpu.sfunc_entry("enqueue_task_dl", 6);
        assert_eq!(
            cpu.sfunc_exit("dequeue_task_dl", 7),
            Err(TrackerError::StackMismatch {
                time: 7,
                cpu: 3,
                top: Some("enqueue_task_dl".to_owned()),
                name: "dequeue_task_dl".to_owned(),
            })
        );
        // The stack is left untouched on mismatch.
        assert_eq!(cpu.top_sfunc(), Some("enqueue_task_dl"));
    }

    #[test]
    fn test_cswitch_brackets() {
        let mut cpu = CpuState::new(0);

        // Bracket opened before the trace started.
        assert!(!cpu.cswitch_end(3));

        assert_eq!(cpu.cswitch_start(10), None);
        assert!(cpu.cswitch_end(14));
        assert_eq!(cpu.cswitch_start(20), None);
        assert_eq!(cpu.cswitch_start(22), Some(20));
        assert!(cpu.cswitch_end(25));

        assert_eq!(
            cpu.cswitch_blocks(),
            &[
                ExecBlock {
                    cpu_id: 0,
                    start_time: 10,
                    end_time: 14
                },
                ExecBlock {
                    cpu_id: 0,
                    start_time: 22,
                    end_time: 25
                }
            ]
        );
    }

    #[test]
    fn test_blocks_since() {
        let mut cpu = CpuState::new(0);

        cpu.sfunc_entry("a", 5);
        cpu.sfunc_exit("a", 6).unwrap();
        cpu.sfunc_entry("b", 10);
        cpu.sfunc_entry("c", 11);
        cpu.sfunc_exit("c", 12).unwrap();
        cpu.cswitch_start(4);
        cpu.cswitch_end(5);
        cpu.cswitch_start(12);
        cpu.cswitch_end(13);

        // "b" is still open and "a" predates the window.
        let names: Vec<&str> = cpu
            .sfunc_blocks_since(10)
            .map(|(_, b)| b.name.as_str())
            .collect();
        assert_eq!(names, &["c"]);

        let starts: Vec<u64> = cpu.cswitch_blocks_since(10).map(|b| b.start_time).collect();
        assert_eq!(starts, &[12]);
    }
}
