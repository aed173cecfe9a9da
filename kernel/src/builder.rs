//! Fluent setup API for assembling a [`Kernel`] before booting it.
//!
//! Adapted from the teacher's `KernelBuilder`/`ThreadBuilder`, with the
//! capability/endpoint wiring and the budget/cooldown round-robin fields
//! dropped: this scheduler has neither concept (see DESIGN.md).

use abi::{Priority, ThreadId};

use crate::config::DEFAULT_STACK_SIZE;
use crate::Kernel;

/// Builds and boots the kernel.
///
/// You must register exactly one idle thread with
/// [`KernelBuilder::idle_thread`] before calling [`KernelBuilder::start`].
/// The idle thread always runs at [`Priority::Idle`] and is the fallback
/// the scheduler picks whenever no other thread is runnable.
pub struct KernelBuilder {
    kernel: Kernel,
    idle_set: bool,
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self {
            kernel: Kernel::new(),
            idle_set: false,
        }
    }

    /// Registers the idle thread. Must be called exactly once.
    pub fn idle_thread(&mut self, thread: ThreadBuilder) -> ThreadId {
        assert!(!self.idle_set, "idle thread already registered");
        let id = self
            .kernel
            .register_idle_thread(thread.entry, thread.stack_size);
        self.idle_set = true;
        id
    }

    /// Spawns an application thread.
    pub fn thread(&mut self, thread: ThreadBuilder) -> ThreadId {
        self.kernel
            .thread_create(
                thread.entry,
                thread.priority,
                thread.stack_size,
                thread.max_instances,
            )
            .expect("thread_create failed while building the kernel")
    }

    /// Installs the kernel into its backend-owned static and starts it.
    /// Never returns.
    pub fn start(self) -> ! {
        assert!(self.idle_set, "an idle thread is mandatory");
        // Safety: called at most once, before interrupts are enabled.
        let kernel = unsafe { crate::arch::init_kernel(self.kernel) };
        kernel.start()
    }
}

/// A builder for a single thread, passed into [`KernelBuilder`].
pub struct ThreadBuilder {
    entry: usize,
    priority: Priority,
    stack_size: usize,
    max_instances: u32,
}

impl ThreadBuilder {
    /// `entry` is the thread's entry-point address.
    ///
    /// # Safety
    /// `entry` must be the address of a function with the calling
    /// convention the trap layer expects (no arguments, never returns).
    /// This isn't truly unsafe to construct, but is marked as such to
    /// discourage passing an arbitrary integer.
    pub const unsafe fn new(entry: usize) -> Self {
        Self {
            entry,
            priority: Priority::Normal,
            stack_size: DEFAULT_STACK_SIZE,
            max_instances: 1,
        }
    }

    pub fn priority(mut self, p: Priority) -> Self {
        self.priority = p;
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Caps the number of live-or-dead slots that may ever share this
    /// entry point.
    pub fn max_instances(mut self, n: u32) -> Self {
        self.max_instances = n;
        self
    }
}
