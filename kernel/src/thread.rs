//! Thread control blocks and the thread table.

use abi::{Priority, SemaphoreId, ThreadId};
use heapless::Vec;

use crate::config::{DEFAULT_STACK_SIZE, MAX_THREADS};
use crate::KernelError;

/// One stack row per thread slot, taken directly from the original
/// firmware's static `task_stack[MAX_THREADS][DEFAULT_STACK_SIZE]`. Each
/// thread's stack grows down from the top of its own row.
static mut STACK_ARENA: [[u8; DEFAULT_STACK_SIZE]; MAX_THREADS] =
    [[0; DEFAULT_STACK_SIZE]; MAX_THREADS];

/// Lifecycle state of a thread.
///
/// `Asleep` is part of the data model but nothing in this kernel's public
/// API transitions a thread into or out of it yet; it is reserved for a
/// future delay/sleep primitive, matching the original firmware's state
/// enum which also carried more states than it had opcodes for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum ThreadStatus {
    Ready,
    Running,
    Blocked,
    Asleep,
    Dead,
}

/// Where a blocked thread is waiting: which semaphore, and its slot index
/// within that semaphore's `blocked_q`.
pub(crate) type SemRef = (SemaphoreId, usize);

#[derive(Debug)]
pub(crate) struct Tcb {
    /// Address of the thread's entry function. Used to recognize a dead
    /// slot as eligible for recycling by a later `thread_create` call with
    /// the same entry point.
    pub(crate) entry: usize,
    pub(crate) priority: Priority,
    pub(crate) status: ThreadStatus,
    pub(crate) stack_size: usize,
    pub(crate) stack_ptr: usize,
    /// `Some` iff `status == Blocked`; points at the semaphore and queue
    /// slot this thread is waiting on.
    pub(crate) sem_ref: Option<SemRef>,
}

impl Tcb {
    fn recycle(&mut self, priority: Priority, stack_size: usize) {
        self.priority = priority;
        self.status = ThreadStatus::Ready;
        self.stack_size = stack_size;
        self.stack_ptr = 0;
        self.sem_ref = None;
    }
}

#[derive(Debug, Default)]
pub(crate) struct ThreadTable {
    threads: Vec<Tcb, MAX_THREADS>,
}

impl ThreadTable {
    pub(crate) fn get(&self, id: ThreadId) -> Option<&Tcb> {
        self.threads.get(id.0)
    }

    /// Address one past the top of `id`'s stack row in the static arena —
    /// where a full, empty stack's pointer starts.
    pub(crate) fn stack_top(&self, id: ThreadId) -> usize {
        // Safety: only the address of the row is taken, never its
        // contents; each thread owns a disjoint row by construction.
        let row = unsafe { STACK_ARENA[id.0].as_ptr() as usize };
        row + DEFAULT_STACK_SIZE
    }

    pub(crate) fn get_mut(&mut self, id: ThreadId) -> Option<&mut Tcb> {
        self.threads.get_mut(id.0)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (ThreadId, &Tcb)> {
        self.threads
            .iter()
            .enumerate()
            .map(|(i, t)| (ThreadId(i), t))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (ThreadId, &mut Tcb)> {
        self.threads
            .iter_mut()
            .enumerate()
            .map(|(i, t)| (ThreadId(i), t))
    }

    /// Registers the idle thread. Must be called exactly once, before any
    /// other thread is created; the idle thread always ends up at slot 0.
    pub(crate) fn register_idle(&mut self, entry: usize, stack_size: usize) -> ThreadId {
        debug_assert!(self.threads.is_empty());
        let tcb = Tcb {
            entry,
            priority: Priority::Idle,
            status: ThreadStatus::Running,
            stack_size,
            stack_ptr: 0,
            sem_ref: None,
        };
        // Capacity is MAX_THREADS >= 1; this cannot fail.
        self.threads.push(tcb).ok();
        ThreadId(0)
    }

    /// Creates a thread, recycling a dead slot with a matching entry point
    /// if one exists, otherwise appending a new slot.
    ///
    /// `max_instances` bounds the number of live-or-dead slots that may
    /// ever share this entry point; the count is taken across *all*
    /// slots, not just live ones, so a thread that terminates still
    /// counts against its own entry point's budget until its slot is
    /// recycled by a later call.
    pub(crate) fn create(
        &mut self,
        entry: usize,
        priority: Priority,
        stack_size: usize,
        max_instances: u32,
    ) -> Result<ThreadId, KernelError> {
        if priority == Priority::Idle {
            return Err(KernelError::InvalidPriority);
        }
        if stack_size == 0 || stack_size > crate::config::DEFAULT_STACK_SIZE {
            return Err(KernelError::InvalidStackSize);
        }
        if max_instances == 0 {
            return Err(KernelError::InvalidInstanceCount);
        }

        let existing = self.threads.iter().filter(|t| t.entry == entry).count();
        if existing as u32 >= max_instances {
            return Err(KernelError::InstanceLimitReached);
        }

        if let Some(slot) = self
            .threads
            .iter_mut()
            .position(|t| t.entry == entry && t.status == ThreadStatus::Dead)
        {
            self.threads[slot].recycle(priority, stack_size);
            return Ok(ThreadId(slot));
        }

        let tcb = Tcb {
            entry,
            priority,
            status: ThreadStatus::Ready,
            stack_size,
            stack_ptr: 0,
            sem_ref: None,
        };
        let id = ThreadId(self.threads.len());
        self.threads
            .push(tcb)
            .map_err(|_| KernelError::ThreadTableFull)?;
        Ok(id)
    }

    pub(crate) fn set_priority(
        &mut self,
        id: ThreadId,
        priority: Priority,
    ) -> Result<(), KernelError> {
        if id == ThreadId::idle() {
            return Err(KernelError::InvalidPriority);
        }
        let tcb = self.get_mut(id).ok_or(KernelError::InvalidThreadId)?;
        if tcb.status == ThreadStatus::Dead {
            return Err(KernelError::InvalidThreadId);
        }
        if priority == Priority::Idle {
            return Err(KernelError::InvalidPriority);
        }
        tcb.priority = priority;
        Ok(())
    }

    pub(crate) fn get_priority(&self, id: ThreadId) -> Result<Priority, KernelError> {
        let tcb = self.get(id).ok_or(KernelError::InvalidThreadId)?;
        if tcb.status == ThreadStatus::Dead {
            return Err(KernelError::InvalidThreadId);
        }
        Ok(tcb.priority)
    }

    pub(crate) fn terminate(&mut self, id: ThreadId) -> Result<(), KernelError> {
        if id == ThreadId::idle() {
            return Err(KernelError::InvalidThreadId);
        }
        let tcb = self.get_mut(id).ok_or(KernelError::InvalidThreadId)?;
        if tcb.status == ThreadStatus::Dead {
            return Err(KernelError::InvalidThreadId);
        }
        tcb.status = ThreadStatus::Dead;
        tcb.sem_ref = None;
        Ok(())
    }
}
