#![no_std]

//! Shared, plain-old-data types for the kernel's public surface.
//!
//! These are kept in their own crate so that application/demo threads can
//! depend on the identifiers and status codes without pulling in the whole
//! kernel implementation.

use core::ops::Deref;
use defmt::Format;

/// Handle to a slot in the kernel's thread table.
///
/// Indices are stable for the lifetime of the process: a thread that has
/// terminated keeps its slot (and therefore its `ThreadId`) rather than
/// having it reused by an unrelated thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
#[repr(transparent)]
pub struct ThreadId(pub usize);

impl Deref for ThreadId {
    type Target = usize;

    fn deref(&self) -> &usize {
        &self.0
    }
}

impl ThreadId {
    /// The idle thread is always created first and always occupies slot 0.
    pub const fn idle() -> ThreadId {
        ThreadId(0)
    }
}

/// Handle to a slot in the kernel's semaphore table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
#[repr(transparent)]
pub struct SemaphoreId(pub usize);

impl Deref for SemaphoreId {
    type Target = usize;

    fn deref(&self) -> &usize {
        &self.0
    }
}

/// Thread scheduling priority. `Idle` is reserved for the kernel's idle
/// thread and must not be assigned to application threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Format)]
#[repr(u8)]
pub enum Priority {
    Idle = 0,
    Low = 1,
    BelowNormal = 2,
    Normal = 3,
    AboveNormal = 4,
    High = 5,
    Realtime = 6,
}

impl Priority {
    pub const COUNT: usize = 7;

    pub const fn as_index(self) -> usize {
        self as u8 as usize
    }

    pub const fn from_index(index: usize) -> Option<Priority> {
        match index {
            0 => Some(Priority::Idle),
            1 => Some(Priority::Low),
            2 => Some(Priority::BelowNormal),
            3 => Some(Priority::Normal),
            4 => Some(Priority::AboveNormal),
            5 => Some(Priority::High),
            6 => Some(Priority::Realtime),
            _ => None,
        }
    }
}

/// Closed set of status codes returned across the kernel's API surface.
///
/// Wire values are stable: they are used verbatim in trace/diagnostic dumps,
/// so existing values must never be renumbered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    ErrorResource = 0x80,
    ErrorParameter = 0x81,
    ErrorResourceBusy = 0x82,
    ErrorTimeoutResource = 0x83,
    ErrorValue = 0x84,
}

impl From<Status> for u8 {
    fn from(status: Status) -> u8 {
        status as u8
    }
}

/// Sentinel timeout meaning "wait with no deadline".
pub const FOREVER: u32 = u32::MAX;

/// Selector passed to trap A (the supervisor-call trap), distinguishing the
/// three voluntary kernel entry points it understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Format)]
#[repr(u8)]
pub enum TrapA {
    /// Enter the scheduler for the first time; never returns.
    Start = 0,
    /// Ask the kernel to re-run the scheduler and possibly switch away.
    Yield = 1,
    /// Fabricate the initial exception frame for `threads[arg]`.
    StackAlloc = 2,
}
