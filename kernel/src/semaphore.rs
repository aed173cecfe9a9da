//! Counting semaphore: creation, acquire/release, deletion, and the
//! thread-purge performed on `thread_terminate`.
//!
//! This component has no counterpart in the teacher repo (its kernel does
//! capability-IPC endpoints, not semaphores); the state machine below
//! follows the original firmware's `sem0.c`/`sem1.c` usage shape and the
//! semantics spelled out for this module directly.

use abi::{SemaphoreId, ThreadId, FOREVER};
use heapless::Vec;

use crate::config::MAX_SEMAPHORES;
use crate::space::Space;
use crate::thread::{ThreadStatus, ThreadTable};
use crate::KernelError;

pub(crate) const MAX_WAITERS: usize = crate::config::MAX_THREADS_PER_SEM;

#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockedWaiter {
    pub(crate) tid: ThreadId,
    /// `FOREVER` means "no deadline".
    pub(crate) deadline: u32,
    /// Decremented once per tick by the scheduler; `FOREVER` never
    /// decrements.
    pub(crate) ticks_remaining: u32,
}

#[derive(Debug)]
pub(crate) struct Scb {
    pub(crate) initial_count: u32,
    pub(crate) owner_q: Vec<ThreadId, MAX_WAITERS>,
    pub(crate) blocked_q: Vec<BlockedWaiter, MAX_WAITERS>,
}

impl Scb {
    fn new(count: u32) -> Self {
        Scb {
            initial_count: count,
            owner_q: Vec::new(),
            blocked_q: Vec::new(),
        }
    }

    fn has_token(&self) -> bool {
        (self.owner_q.len() as u32) < self.initial_count
    }

    /// Removes the waiter at `slot` from `blocked_q`, rewriting every
    /// later waiter's `sem_ref` back-pointer since a shift moves it down
    /// by one.
    fn remove_waiter(&mut self, slot: usize, threads: &mut ThreadTable, sid: SemaphoreId) {
        self.blocked_q.remove(slot);
        for (i, waiter) in self.blocked_q.iter().enumerate().skip(slot) {
            if let Some(tcb) = threads.get_mut(waiter.tid) {
                tcb.sem_ref = Some((sid, i));
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct SemaphoreTable {
    slots: Space<Scb, MAX_SEMAPHORES>,
}

impl SemaphoreTable {
    pub(crate) fn get(&self, id: SemaphoreId) -> Option<&Scb> {
        self.slots.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: SemaphoreId) -> Option<&mut Scb> {
        self.slots.get_mut(id.0)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (SemaphoreId, &mut Scb)> {
        self.slots.iter_mut().map(|(i, s)| (SemaphoreId(i), s))
    }

    pub(crate) fn create(&mut self, count: u32) -> Result<SemaphoreId, KernelError> {
        if count == 0 || count as usize > MAX_WAITERS {
            return Err(KernelError::InvalidCount);
        }
        let idx = self
            .slots
            .push(Scb::new(count))
            .ok_or(KernelError::SemaphoreTableFull)?;
        Ok(SemaphoreId(idx))
    }

    /// Fails with `DeleteBusy` while any owner or waiter remains.
    pub(crate) fn delete(&mut self, id: SemaphoreId) -> Result<(), KernelError> {
        let scb = self.get(id).ok_or(KernelError::InvalidSemaphoreId)?;
        if !scb.owner_q.is_empty() || !scb.blocked_q.is_empty() {
            return Err(KernelError::DeleteBusy);
        }
        self.slots.remove(id.0);
        Ok(())
    }

    /// Immediate or non-blocking acquire path. Returns `Ok(remaining)` on
    /// success, `Err(NoToken)` when `millis == 0` and no token is free, or
    /// when `caller` already holds one of this semaphore's tokens (§4.4:
    /// "the calling thread is not already an owner") — a second
    /// acquire by the same owner is treated the same as no free token,
    /// never as a second `owner_q` entry for the same thread.
    fn try_acquire(
        &mut self,
        id: SemaphoreId,
        caller: ThreadId,
    ) -> Result<u32, KernelError> {
        let scb = self.get_mut(id).ok_or(KernelError::InvalidSemaphoreId)?;
        if !scb.has_token() || scb.owner_q.iter().any(|&t| t == caller) {
            return Err(KernelError::NoToken);
        }
        scb.owner_q
            .push(caller)
            .map_err(|_| KernelError::WaitQueueFull)?;
        Ok(scb.initial_count - scb.owner_q.len() as u32)
    }

    /// Places `caller` on `blocked_q`, computing its deadline from
    /// `millis` and the current `tick_count`. Returns the waiter's queue
    /// slot.
    fn enqueue_waiter(
        &mut self,
        id: SemaphoreId,
        caller: ThreadId,
        millis: u32,
        tick_count: u32,
    ) -> Result<usize, KernelError> {
        let scb = self.get_mut(id).ok_or(KernelError::InvalidSemaphoreId)?;
        let (deadline, ticks_remaining) = if millis == FOREVER {
            (FOREVER, FOREVER)
        } else {
            let ticks = ((millis as u64 * 1000 + crate::config::TICK_PERIOD_US as u64 - 1)
                / crate::config::TICK_PERIOD_US as u64) as u32;
            (tick_count.wrapping_add(ticks), ticks)
        };
        let slot = scb.blocked_q.len();
        scb.blocked_q
            .push(BlockedWaiter {
                tid: caller,
                deadline,
                ticks_remaining,
            })
            .map_err(|_| KernelError::WaitQueueFull)?;
        Ok(slot)
    }

    /// First half of the blocking protocol: try an immediate acquire, and
    /// if that fails either reject outright (`millis == 0`) or enqueue the
    /// caller as a blocked waiter. Returns `Ok(Some(remaining))` on an
    /// immediate acquire, `Ok(None)` once the caller has been enqueued and
    /// blocked (the caller must now invoke trap A and, once resumed, call
    /// [`SemaphoreTable::poll_wait`]), or `Err` on immediate failure.
    pub(crate) fn begin_wait(
        &mut self,
        id: SemaphoreId,
        millis: u32,
        caller: ThreadId,
        tick_count: u32,
        threads: &mut ThreadTable,
    ) -> Result<Option<u32>, KernelError> {
        match self.try_acquire(id, caller) {
            Ok(remaining) => return Ok(Some(remaining)),
            Err(KernelError::InvalidSemaphoreId) => return Err(KernelError::InvalidSemaphoreId),
            Err(_) => {}
        }
        if millis == 0 {
            return Err(KernelError::NoToken);
        }
        let slot = self.enqueue_waiter(id, caller, millis, tick_count)?;
        if let Some(tcb) = threads.get_mut(caller) {
            tcb.sem_ref = Some((id, slot));
            tcb.status = ThreadStatus::Blocked;
        }
        Ok(None)
    }

    /// True once the scheduler has resolved `caller`'s wait one way or
    /// another (a token became available, or its deadline was reached).
    /// The caller is expected to poll this right after resuming from trap
    /// A, in a loop that re-enters trap A (`yield_now`) until it returns
    /// `true`.
    pub(crate) fn wait_resolved(&self, id: SemaphoreId, slot: usize) -> bool {
        let Some(scb) = self.get(id) else {
            return true;
        };
        if scb.has_token() {
            return true;
        }
        let Some(waiter) = scb.blocked_q.get(slot) else {
            return true;
        };
        waiter.deadline != FOREVER && waiter.ticks_remaining == 0
    }

    /// Second half: once [`Self::wait_resolved`] is true, finishes the
    /// protocol by either joining `owner_q` or reporting a timeout, and
    /// removes the waiter from `blocked_q` either way.
    pub(crate) fn finish_wait(
        &mut self,
        id: SemaphoreId,
        slot: usize,
        caller: ThreadId,
        threads: &mut ThreadTable,
    ) -> Result<u32, KernelError> {
        let scb = self.get_mut(id).ok_or(KernelError::InvalidSemaphoreId)?;
        let has_token = scb.has_token();
        scb.remove_waiter(slot, threads, id);
        if let Some(tcb) = threads.get_mut(caller) {
            tcb.sem_ref = None;
        }
        if !has_token {
            return Err(KernelError::Timeout);
        }
        let scb = self.get_mut(id).ok_or(KernelError::InvalidSemaphoreId)?;
        scb.owner_q
            .push(caller)
            .map_err(|_| KernelError::WaitQueueFull)?;
        Ok(scb.initial_count - scb.owner_q.len() as u32)
    }

    /// Removing `caller` from `owner_q` is a no-op (not an error) when the
    /// caller does not currently hold a token — a common idempotent
    /// pattern in CMSIS-style release calls.
    ///
    /// Returns the thread that should be woken, if any, so the caller can
    /// ask the scheduler to re-evaluate.
    pub(crate) fn release(
        &mut self,
        id: SemaphoreId,
        caller: ThreadId,
        threads: &ThreadTable,
    ) -> Result<Option<ThreadId>, KernelError> {
        let scb = self.get_mut(id).ok_or(KernelError::InvalidSemaphoreId)?;
        if let Some(pos) = scb.owner_q.iter().position(|&t| t == caller) {
            scb.owner_q.remove(pos);
        } else {
            return Ok(None);
        }

        if scb.blocked_q.is_empty() {
            return Ok(None);
        }

        // Highest priority wins; ties broken by earliest deadline, then
        // lowest thread index.
        let best = scb
            .blocked_q
            .iter()
            .enumerate()
            .filter_map(|(i, w)| threads.get(w.tid).map(|tcb| (i, w, tcb.priority)))
            .max_by(|(_, wa, pa), (_, wb, pb)| {
                pa.cmp(pb)
                    .then(wb.deadline.cmp(&wa.deadline))
                    .then(wb.tid.0.cmp(&wa.tid.0))
            })
            .map(|(_, w, _)| w.tid);

        Ok(best)
    }

    /// Removes `tid` from every owner/blocked queue across all
    /// semaphores, rewriting the `sem_ref` back-pointer of any waiter
    /// shifted down by the removal. Called when a thread terminates.
    pub(crate) fn purge_thread(&mut self, tid: ThreadId, threads: &mut ThreadTable) {
        let sids: Vec<SemaphoreId, MAX_SEMAPHORES> =
            self.slots.iter().map(|(i, _)| SemaphoreId(i)).collect();
        for sid in sids {
            let scb = match self.get_mut(sid) {
                Some(scb) => scb,
                None => continue,
            };
            if let Some(pos) = scb.owner_q.iter().position(|&t| t == tid) {
                scb.owner_q.remove(pos);
            }
            if let Some(pos) = scb.blocked_q.iter().position(|w| w.tid == tid) {
                scb.remove_waiter(pos, threads, sid);
            }
        }
    }
}
