//! Correlation of deferred-wake timers with job releases.
//!
//! A job of a periodic task is released by a timer armed when the previous
//! job yields (or when the task sleeps until its next release). The timer
//! cancellation marks the release decision; the task's userspace release
//! tracepoint follows after a measurable delay. Timers are identified by
//! address only, so they are mapped to tasks when armed.

use std::collections::BTreeMap;

use log::debug;

use crate::{context::TrackerConfig, cpu::CpuState, error::TrackerError, task::TaskId};

/// Decides whether a timer armed on a CPU releases the next job of the task
/// running there.
pub trait ReleaseTimerPolicy {
    fn is_release_timer(&self, cpu: &CpuState, mode: u32) -> bool;
}

impl<F> ReleaseTimerPolicy for F
where
    F: Fn(&CpuState, u32) -> bool,
{
    fn is_release_timer(&self, cpu: &CpuState, mode: u32) -> bool {
        self(cpu, mode)
    }
}

/// Matches timers armed from within the yield scheduler function, or armed
/// with the sleep-until-release mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YieldTimerPolicy {
    pub yield_sfunc: String,
    pub sleep_mode: Option<u32>,
}

impl ReleaseTimerPolicy for YieldTimerPolicy {
    fn is_release_timer(&self, cpu: &CpuState, mode: u32) -> bool {
        cpu.top_sfunc() == Some(self.yield_sfunc.as_str()) || self.sleep_mode == Some(mode)
    }
}

impl From<&TrackerConfig> for YieldTimerPolicy {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            yield_sfunc: config.yield_sfunc.clone(),
            sleep_mode: config.sleep_timer_mode,
        }
    }
}

/// Timer to task to release time tables.
#[derive(Debug, Default, Clone)]
pub struct ReleaseCorrelator {
    /// Armed release timers.
    pending: BTreeMap<u64, TaskId>,
    /// Cancellation time of fired release timers, per task, waiting for the
    /// task's release event.
    unhandled: BTreeMap<TaskId, u64>,
}

impl ReleaseCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `timer` as the release timer of `task_id`. Re-arming a
    /// pending timer reassigns it.
    pub fn arm(&mut self, timer: u64, task_id: TaskId) {
        if let Some(prev) = self.pending.insert(timer, task_id) {
            debug!("hrtimer={:#x} re-armed ({} -> {})", timer, prev, task_id);
        }
    }

    /// Resolves a timer cancellation at `time`. Timers that were not armed
    /// as release timers are ignored.
    pub fn cancel(&mut self, timer: u64, time: u64) -> Result<(), TrackerError> {
        let Some(task_id) = self.pending.remove(&timer) else {
            return Ok(());
        };

        if self.unhandled.contains_key(&task_id) {
            return Err(TrackerError::DuplicateCorrelation {
                time,
                timer,
                task_id,
            });
        }

        self.unhandled.insert(task_id, time);

        Ok(())
    }

    /// Consumes the raw release time of `task_id`, if a release timer fired
    /// for it.
    pub fn take_release(&mut self, task_id: TaskId) -> Option<u64> {
        self.unhandled.remove(&task_id)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.unhandled.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn unhandled_len(&self) -> usize {
        self.unhandled.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{ReleaseCorrelator, ReleaseTimerPolicy, YieldTimerPolicy};
    use crate::{cpu::CpuState, error::TrackerError, task::TaskId};

    #[test]
    fn test_yield_policy() {
        let policy = YieldTimerPolicy {
            yield_sfunc: "yield_task_dl".to_owned(),
            sleep_mode: Some(1),
        };
        let mut cpu = CpuState::new(0);

        assert!(!policy.is_release_timer(&cpu, 0));
        assert!(policy.is_release_timer(&cpu, 1));

        cpu.sfunc_entry("yield_task_dl", 10);
        assert!(policy.is_release_timer(&cpu, 0));

        // Only the innermost frame counts.
        cpu.sfunc_entry("update_curr_dl", 11);
        assert!(!policy.is_release_timer(&cpu, 0));
    }

    #[test]
    fn test_closure_policy() {
        let policy = |cpu: &CpuState, mode: u32| cpu.cpu_id() == 2 && mode == 5;

        assert!(policy.is_release_timer(&CpuState::new(2), 5));
        assert!(!policy.is_release_timer(&CpuState::new(1), 5));
    }

    #[test]
    fn test_correlation() {
        let mut c = ReleaseCorrelator::new();
        let t0 = TaskId::new(0);

        c.arm(0xa0, t0);
        assert_eq!(c.pending_len(), 1);

        // Not a release timer.
        c.cancel(0xb0, 5).unwrap();
        assert_eq!(c.unhandled_len(), 0);

        c.cancel(0xa0, 10).unwrap();
        assert_eq!(c.pending_len(), 0);
        assert_eq!(c.unhandled_len(), 1);
        assert!(!c.is_empty());

        assert_eq!(c.take_release(t0), Some(10));
        assert_eq!(c.take_release(t0), None);
        assert!(c.is_empty());
    }

    #[test]
    fn test_duplicate_correlation() {
        let mut c = ReleaseCorrelator::new();
        let t1 = TaskId::new(1);

        c.arm(0xa0, t1);
        c.cancel(0xa0, 10).unwrap();
        c.arm(0xa8, t1);

        assert_eq!(
            c.cancel(0xa8, 20),
            Err(TrackerError::DuplicateCorrelation {
                time: 20,
                timer: 0xa8,
                task_id: t1
            })
        );
    }
}
