#![cfg_attr(not(feature = "std"), no_std)]

//! A small preemptive, priority-based kernel for a single-core 32-bit MCU.
//!
//! Four components, in dependency order: the trap/context-switch layer
//! (`arch`), thread management (`thread`), the scheduler
//! (`scheduler`), and a counting semaphore (`semaphore`).

mod arch;
pub mod builder;
mod config;
mod defmt_log;
mod scheduler;
mod semaphore;
mod space;
mod thread;

#[cfg(test)]
mod tests;

pub use abi::{Priority, SemaphoreId, ThreadId};
pub use config::*;
pub use thread::ThreadStatus;

use abi::Status;
use scheduler::Scheduler;
use semaphore::SemaphoreTable;
use thread::ThreadTable;

/// Recoverable error type for every public kernel operation.
///
/// Invariant violations (a corrupted `sem_ref`, a blocked thread with no
/// queue entry) are programmer faults and `panic!` instead of surfacing
/// here — the same split the original firmware draws between a returned
/// error code and `stop_cpu`/an assert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum KernelError {
    InvalidThreadId,
    InvalidSemaphoreId,
    InvalidPriority,
    InvalidStackSize,
    InvalidInstanceCount,
    InstanceLimitReached,
    ThreadTableFull,
    SemaphoreTableFull,
    InvalidCount,
    WaitQueueFull,
    /// No token was available and the caller asked not to block.
    NoToken,
    Timeout,
    /// `semaphore_delete` was called while owners or waiters remain.
    DeleteBusy,
}

impl From<KernelError> for Status {
    fn from(err: KernelError) -> Status {
        match err {
            KernelError::InvalidThreadId
            | KernelError::InvalidSemaphoreId
            | KernelError::InvalidStackSize => Status::ErrorParameter,
            KernelError::InvalidPriority
            | KernelError::InvalidInstanceCount
            | KernelError::InstanceLimitReached
            | KernelError::InvalidCount => Status::ErrorValue,
            KernelError::ThreadTableFull
            | KernelError::SemaphoreTableFull
            | KernelError::WaitQueueFull
            | KernelError::NoToken => Status::ErrorResource,
            KernelError::Timeout => Status::ErrorTimeoutResource,
            KernelError::DeleteBusy => Status::ErrorResourceBusy,
        }
    }
}

/// Diagnostic snapshot published by the fatal-error hook, the Rust
/// equivalent of the original firmware's `HardFault_Handler_C`.
#[derive(Clone, Copy, Debug, defmt::Format)]
pub struct HardFaultInfo {
    pub current: ThreadId,
    pub current_sp: usize,
}

/// Owns every piece of kernel state: the thread table, the scheduler's
/// current/next bookkeeping, the semaphore table, and the tick count.
pub struct Kernel {
    threads: ThreadTable,
    scheduler: Scheduler,
    semaphores: SemaphoreTable,
    tick_count: u32,
    running: bool,
}

impl Kernel {
    pub(crate) fn new() -> Self {
        Kernel {
            threads: ThreadTable::default(),
            scheduler: Scheduler::new(ThreadId::idle()),
            semaphores: SemaphoreTable::default(),
            tick_count: 0,
            running: false,
        }
    }

    pub(crate) fn register_idle_thread(&mut self, entry: usize, stack_size: usize) -> ThreadId {
        self.threads.register_idle(entry, stack_size)
    }

    pub fn kernel_is_running(&self) -> bool {
        self.running
    }

    pub fn tick_count(&self) -> u32 {
        self.tick_count
    }

    // --- thread management -------------------------------------------

    pub fn thread_create(
        &mut self,
        entry: usize,
        priority: Priority,
        stack_size: usize,
        max_instances: u32,
    ) -> Result<ThreadId, KernelError> {
        let id = self
            .threads
            .create(entry, priority, stack_size, max_instances)?;
        let stack_top = self.stack_top(id);
        let sp = arch::allocate_stack(id, entry, stack_top);
        self.set_stack_pointer(id, sp);
        Ok(id)
    }

    pub fn thread_terminate(&mut self, id: ThreadId) -> Result<(), KernelError> {
        if self.thread_terminate_locked(id)? {
            // Request the switch via trap A rather than calling the
            // scheduler directly: on the real backend this is what pends
            // trap B, so control never returns to the dead thread's stack.
            self.arch_yield_now();
        }
        Ok(())
    }

    /// The state-mutation half of [`Self::thread_terminate`], with no call
    /// into the trap layer — safe to run inside a masked critical section.
    /// Returns whether the caller must now request a reschedule (`id` was
    /// the running thread).
    fn thread_terminate_locked(&mut self, id: ThreadId) -> Result<bool, KernelError> {
        self.threads.terminate(id)?;
        self.semaphores.purge_thread(id, &mut self.threads);
        Ok(id == self.scheduler.current)
    }

    pub fn thread_set_priority(&mut self, id: ThreadId, priority: Priority) -> Result<(), KernelError> {
        self.threads.set_priority(id, priority)
    }

    pub fn thread_get_priority(&self, id: ThreadId) -> Result<Priority, KernelError> {
        self.threads.get_priority(id)
    }

    pub fn thread_status(&self, id: ThreadId) -> Option<ThreadStatus> {
        self.threads.get(id).map(|t| t.status)
    }

    pub fn thread_self(&self) -> ThreadId {
        self.scheduler.current
    }

    /// Wrapper for the trap layer's `yield_now` primitive (§4.2).
    pub fn thread_yield(&mut self) {
        self.arch_yield_now();
    }

    // --- counting semaphore --------------------------------------------

    pub fn semaphore_create(&mut self, count: u32) -> Result<SemaphoreId, KernelError> {
        self.semaphores.create(count)
    }

    pub fn semaphore_delete(&mut self, id: SemaphoreId) -> Status {
        match self.semaphores.delete(id) {
            Ok(()) => Status::Ok,
            Err(e) => e.into(),
        }
    }

    pub fn semaphore_release(&mut self, id: SemaphoreId) -> Status {
        match self.semaphore_release_locked(id) {
            Ok(true) => {
                // A token is not handed over directly; this only asks the
                // scheduler to re-run, via trap A, so the woken waiter
                // re-races through its own `semaphore_wait` loop (§4.4,
                // §9 item 4).
                self.arch_yield_now();
                Status::Ok
            }
            Ok(false) => Status::Ok,
            Err(e) => e.into(),
        }
    }

    /// The state-mutation half of [`Self::semaphore_release`]: removes the
    /// caller from `owner_q` and, if it had a token to give up, marks the
    /// highest-priority blocked waiter `Ready`. Returns whether a
    /// reschedule should now be requested.
    fn semaphore_release_locked(&mut self, id: SemaphoreId) -> Result<bool, KernelError> {
        let caller = self.scheduler.current;
        match self.semaphores.release(id, caller, &self.threads)? {
            Some(woken) => {
                if let Some(tcb) = self.threads.get_mut(woken) {
                    tcb.status = ThreadStatus::Ready;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Returns the remaining token count on success, or `-1` on failure
    /// (no token with `millis == 0`, an invalid semaphore, or a timeout).
    pub fn semaphore_wait(&mut self, id: SemaphoreId, millis: u32) -> i32 {
        let caller = self.scheduler.current;
        let slot = match self.begin_semaphore_wait(id, millis, caller) {
            Ok(Some(remaining)) => return remaining as i32,
            Ok(None) => match self.pending_wait_slot(caller) {
                Some(slot) => slot,
                None => return -1,
            },
            Err(_) => return -1,
        };

        loop {
            self.arch_yield_now();
            if self.semaphore_wait_resolved(id, slot) {
                break;
            }
            self.reassert_blocked(caller);
        }

        match self.finish_semaphore_wait(id, slot, caller) {
            Ok(remaining) => remaining as i32,
            Err(_) => -1,
        }
    }

    /// First half of the blocking wait protocol (§4.4): an immediate
    /// acquire, or enqueuing the caller onto `blocked_q`. No trap-layer
    /// call happens here — safe to run inside a masked critical section.
    fn begin_semaphore_wait(
        &mut self,
        id: SemaphoreId,
        millis: u32,
        caller: ThreadId,
    ) -> Result<Option<u32>, KernelError> {
        self.semaphores
            .begin_wait(id, millis, caller, self.tick_count, &mut self.threads)
    }

    /// The blocked-waiter queue slot `caller` was just enqueued into by
    /// [`Self::begin_semaphore_wait`].
    fn pending_wait_slot(&self, caller: ThreadId) -> Option<usize> {
        self.threads
            .get(caller)
            .and_then(|t| t.sem_ref)
            .map(|(_, slot)| slot)
    }

    /// True once a token became available or `caller`'s deadline was
    /// reached; poll this in a loop around `yield_now`/`tick`.
    fn semaphore_wait_resolved(&self, id: SemaphoreId, slot: usize) -> bool {
        self.semaphores.wait_resolved(id, slot)
    }

    /// Re-marks `caller` as `Blocked` after a wait iteration that did not
    /// resolve (§4.4: "while no token available and ticks_remaining > 0,
    /// re-assert Blocked and invoke yield_now"). The scheduler's own
    /// free-token check in `reevaluate_blocked` optimistically flips
    /// *every* blocked waiter on a semaphore to `Ready` the moment a
    /// token frees up, not just the one that ends up claiming it; a
    /// waiter that loses that race must go back to `Blocked` itself, or
    /// it is never re-examined by `reevaluate_blocked` again (which only
    /// looks at `Blocked` threads) and spins forever without its deadline
    /// advancing.
    fn reassert_blocked(&mut self, caller: ThreadId) {
        if let Some(tcb) = self.threads.get_mut(caller) {
            tcb.status = ThreadStatus::Blocked;
        }
    }

    /// Second half: join `owner_q` or report the timeout, removing the
    /// waiter from `blocked_q` either way.
    fn finish_semaphore_wait(
        &mut self,
        id: SemaphoreId,
        slot: usize,
        caller: ThreadId,
    ) -> Result<u32, KernelError> {
        self.semaphores.finish_wait(id, slot, caller, &mut self.threads)
    }

    // --- scheduler glue -------------------------------------------------

    fn run_scheduler(&mut self) -> Option<ThreadId> {
        self.scheduler.schedule(&mut self.threads, &mut self.semaphores)
    }

    /// Advances the tick clock by one and re-runs the scheduler. Called
    /// from the `SysTick` handler in the real backend.
    pub fn tick(&mut self) -> Option<ThreadId> {
        self.tick_count = self.tick_count.wrapping_add(1);
        self.run_scheduler()
    }

    #[cfg(feature = "cortex_m")]
    fn arch_yield_now(&mut self) {
        arch::yield_now();
    }

    #[cfg(all(feature = "std", not(feature = "cortex_m")))]
    fn arch_yield_now(&mut self) {
        arch::yield_now(self);
    }

    fn stack_top(&self, id: ThreadId) -> usize {
        self.threads.stack_top(id)
    }

    pub(crate) fn stack_pointer(&self, id: ThreadId) -> usize {
        self.threads.get(id).map(|t| t.stack_ptr).unwrap_or(0)
    }

    pub(crate) fn set_stack_pointer(&mut self, id: ThreadId, sp: usize) {
        if let Some(tcb) = self.threads.get_mut(id) {
            tcb.stack_ptr = sp;
        }
    }

    /// Boots the kernel: enters the scheduler for the first time and
    /// transfers control to the initial thread. Never returns.
    pub fn start(&mut self) -> ! {
        self.running = true;
        let sp = self.stack_pointer(self.scheduler.current);
        arch::start_root_task(sp)
    }
}

/// Top-level entry points application and demo thread code calls.
///
/// Every function here reaches the single [`Kernel`] installed by
/// [`builder::KernelBuilder::start`] through [`arch::with_kernel`], which
/// masks interrupts only for the duration of a single state mutation —
/// this is the "application code calls API functions; those mutate
/// shared kernel state under interrupt masking" path §2 describes.
/// Crucially, the *trap-layer* call a function makes (`arch::yield_now`,
/// which lowers to the `svc` instruction) always happens **outside** any
/// masked section: taking a supervisor call while interrupts are masked
/// is a documented Cortex-M footgun, and masking across the whole of a
/// blocking [`semaphore_wait`] would also starve the tick ISR that is
/// supposed to be resolving it. So each function here is split into short
/// `with_kernel` critical sections around the state mutation, with any
/// trap-layer call stitched in around them — mirroring the
/// `begin_wait`/`yield_now`/`finish_wait` shape [`Kernel::semaphore_wait`]
/// already uses internally for the host test backend.
///
/// Only available on the `cortex_m` backend: the host test backend drives
/// a [`Kernel`] value directly instead (see `kernel::tests`), the same
/// split the teacher draws for its own `arch/dummy.rs`.
#[cfg(feature = "cortex_m")]
pub mod api {
    use super::{HardFaultInfo, KernelError};
    use crate::arch;
    use abi::{Priority, SemaphoreId, Status, ThreadId};

    pub fn kernel_is_running() -> bool {
        arch::with_kernel(|k| k.kernel_is_running())
    }

    pub fn kernel_systick() -> u32 {
        arch::with_kernel(|k| k.tick_count())
    }

    pub fn thread_create(
        entry: usize,
        priority: Priority,
        stack_size: usize,
        max_instances: u32,
    ) -> Result<ThreadId, KernelError> {
        arch::with_kernel(|k| k.thread_create(entry, priority, stack_size, max_instances))
    }

    pub fn thread_terminate(id: ThreadId) -> Result<(), KernelError> {
        let needs_yield = arch::with_kernel(|k| k.thread_terminate_locked(id))?;
        if needs_yield {
            arch::yield_now();
        }
        Ok(())
    }

    pub fn thread_yield() {
        arch::yield_now();
    }

    pub fn thread_self() -> ThreadId {
        arch::with_kernel(|k| k.thread_self())
    }

    pub fn thread_set_priority(id: ThreadId, priority: Priority) -> Result<(), KernelError> {
        arch::with_kernel(|k| k.thread_set_priority(id, priority))
    }

    pub fn thread_get_priority(id: ThreadId) -> Result<Priority, KernelError> {
        arch::with_kernel(|k| k.thread_get_priority(id))
    }

    pub fn semaphore_create(count: u32) -> Result<SemaphoreId, KernelError> {
        arch::with_kernel(|k| k.semaphore_create(count))
    }

    /// Mirrors [`Kernel::semaphore_wait`]'s three phases, but takes the
    /// trap-layer `yield_now` call outside of `with_kernel` so the tick
    /// ISR (and every other thread's own syscalls) can still run while
    /// this thread is blocked.
    pub fn semaphore_wait(id: SemaphoreId, millis: u32) -> i32 {
        let caller = thread_self();
        let slot = match arch::with_kernel(|k| k.begin_semaphore_wait(id, millis, caller)) {
            Ok(Some(remaining)) => return remaining as i32,
            Ok(None) => match arch::with_kernel(|k| k.pending_wait_slot(caller)) {
                Some(slot) => slot,
                None => return -1,
            },
            Err(_) => return -1,
        };

        loop {
            arch::yield_now();
            if arch::with_kernel(|k| k.semaphore_wait_resolved(id, slot)) {
                break;
            }
            arch::with_kernel(|k| k.reassert_blocked(caller));
        }

        match arch::with_kernel(|k| k.finish_semaphore_wait(id, slot, caller)) {
            Ok(remaining) => remaining as i32,
            Err(_) => -1,
        }
    }

    pub fn semaphore_release(id: SemaphoreId) -> Status {
        match arch::with_kernel(|k| k.semaphore_release_locked(id)) {
            Ok(true) => {
                arch::yield_now();
                Status::Ok
            }
            Ok(false) => Status::Ok,
            Err(e) => e.into(),
        }
    }

    pub fn semaphore_delete(id: SemaphoreId) -> Status {
        arch::with_kernel(|k| k.semaphore_delete(id))
    }

    /// Reads the diagnostic snapshot a fatal-error hook would publish
    /// (§7): current thread index and its saved/live stack pointer.
    pub fn hard_fault_info() -> HardFaultInfo {
        arch::with_kernel(|k| HardFaultInfo {
            current: k.thread_self(),
            current_sp: k.stack_pointer(k.thread_self()),
        })
    }
}
