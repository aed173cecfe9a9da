//! The scheduler: re-evaluate blocked threads, pick the next thread to
//! run, and commit the switch.
//!
//! Grounded in `original_source/RTE/RTOS/Source/scheduler.c`'s
//! `scheduler()` / `os_ThreadGetBestThread()` /
//! `os_ReevaluateBlockedThread()` rather than the teacher's intrusive
//! per-priority run queues: the spec this follows calls for a full linear
//! scan of the live thread table on every tick and yield, which gets no
//! benefit from an intrusive list (see DESIGN.md for the dropped
//! `cordyceps` dependency this implies).

use abi::{ThreadId, FOREVER};

use crate::semaphore::SemaphoreTable;
use crate::thread::{ThreadStatus, ThreadTable};

#[derive(Debug)]
pub(crate) struct Scheduler {
    pub(crate) current: ThreadId,
}

impl Scheduler {
    pub(crate) fn new(idle: ThreadId) -> Self {
        Scheduler { current: idle }
    }

    /// Decrements or clears the timeout on every blocked thread, waking
    /// any whose semaphore now has a free token or whose deadline has been
    /// reached. "Reached" uses `>=`/`ticks_remaining == 0` semantics
    /// throughout (the original firmware's fragile `==` compare is not
    /// reproduced here; see SPEC_FULL.md §9 item 2).
    fn reevaluate_blocked(threads: &mut ThreadTable, semaphores: &mut SemaphoreTable) {
        for (_tid, tcb) in threads.iter_mut() {
            if tcb.status != ThreadStatus::Blocked {
                continue;
            }
            let Some((sid, slot)) = tcb.sem_ref else {
                continue;
            };
            let Some(scb) = semaphores.get_mut(sid) else {
                continue;
            };
            if (scb.owner_q.len() as u32) < scb.initial_count {
                tcb.status = ThreadStatus::Ready;
                continue;
            }
            let waiter = &mut scb.blocked_q[slot];
            if waiter.deadline == FOREVER {
                continue;
            }
            if waiter.ticks_remaining == 0 {
                tcb.status = ThreadStatus::Ready;
            } else {
                waiter.ticks_remaining -= 1;
            }
        }
    }

    /// Highest priority wins; ties broken by lowest thread index. Only
    /// `Ready`/`Running` threads are candidates; the idle thread is always
    /// one of them, so this never fails to produce a choice.
    fn select_best(threads: &ThreadTable) -> ThreadId {
        threads
            .iter()
            .filter(|(_, tcb)| {
                matches!(tcb.status, ThreadStatus::Ready | ThreadStatus::Running)
            })
            .max_by(|(ia, a), (ib, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then(ib.0.cmp(&ia.0))
            })
            .map(|(tid, _)| tid)
            .expect("the idle thread is always Ready or Running")
    }

    /// Runs the full algorithm and commits the result, returning
    /// `Some(next)` if a different thread should now run.
    pub(crate) fn schedule(
        &mut self,
        threads: &mut ThreadTable,
        semaphores: &mut SemaphoreTable,
    ) -> Option<ThreadId> {
        Self::reevaluate_blocked(threads, semaphores);
        let chosen = Self::select_best(threads);
        if chosen == self.current {
            return None;
        }
        if let Some(tcb) = threads.get_mut(self.current) {
            if tcb.status == ThreadStatus::Running {
                tcb.status = ThreadStatus::Ready;
            }
        }
        if let Some(tcb) = threads.get_mut(chosen) {
            tcb.status = ThreadStatus::Running;
        }
        self.current = chosen;
        Some(chosen)
    }
}
