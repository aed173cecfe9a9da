//! Compile-time sizing. Every table in this kernel is fixed-capacity and
//! stack/static allocated; there is no dynamic growth anywhere.

/// Number of thread-table slots, including the mandatory idle thread at
/// slot 0. Matches the original firmware's `MAX_THREADS` (valid range
/// 2..32; the original's own default is 10).
pub const MAX_THREADS: usize = 10;

/// Bytes of stack given to each thread slot. Must comfortably exceed the
/// fabricated initial exception frame (see [`EXCEPTION_FRAME_WORDS`]).
pub const DEFAULT_STACK_SIZE: usize = 512;

/// A fabricated initial frame needs the eight hardware-stacked registers
/// (r0-r3, r12, lr, pc, xpsr) plus the eight callee-saved registers
/// (r4-r11) software-restored by trap B, plus two reserved words for the
/// saved `EXC_RETURN`/stack-alignment bookkeeping. `DEFAULT_STACK_SIZE`
/// must be large enough to hold this many words before any application
/// stack usage.
pub const EXCEPTION_FRAME_WORDS: usize = 18;

/// Number of semaphore-table slots. Default 10, per the original firmware.
pub const MAX_SEMAPHORES: usize = 10;

/// Maximum combined owners + blocked waiters a single semaphore can track.
/// Default 10, independent of [`MAX_THREADS`] (the original firmware sizes
/// both tables off the same `#define` by convention, not by requirement).
pub const MAX_THREADS_PER_SEM: usize = 10;

/// Scheduler tick frequency in Hz. The original firmware drove this off
/// `SysTick` with `os_sysTickTicks = 16000` at a 16 MHz core clock; here it
/// is expressed directly in Hz and converted to a tick period in the
/// scheduler.
pub const TICK_HZ: u32 = 1000;

/// Tick period in microseconds, derived from [`TICK_HZ`].
pub const TICK_PERIOD_US: u32 = 1_000_000 / TICK_HZ;

const _: () = assert!(DEFAULT_STACK_SIZE >= EXCEPTION_FRAME_WORDS * 4);
