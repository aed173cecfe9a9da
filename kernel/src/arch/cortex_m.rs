//! Cortex-M backend: trap A (`SVCall`) and trap B (`PendSV`), the
//! fabricated initial exception frame, and the `defmt` log hook.

use core::arch::asm;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU8, Ordering};

use abi::{ThreadId, TrapA};

use crate::Kernel;

const INITIAL_PSR: u32 = 1 << 24;
// Return to Thread mode, use PSP, no FPU context on the stack.
const EXC_RETURN: u32 = 0xFFFF_FFFD;

static mut KERNEL: MaybeUninit<Kernel> = MaybeUninit::uninit();
static mut SWITCH_PENDING: AtomicU8 = AtomicU8::new(0);

/// Installs `kernel` into the static the trap handlers reach through, and
/// returns a `'static` handle for [`crate::builder::KernelBuilder`] to
/// finish booting with.
pub(crate) unsafe fn init_kernel(kernel: Kernel) -> &'static mut Kernel {
    KERNEL.write(kernel)
}

#[inline]
unsafe fn kernel() -> &'static mut Kernel {
    &mut *KERNEL.as_mut_ptr()
}

/// Runs `f` with exclusive access to the installed [`Kernel`], with
/// external interrupts masked for the duration of the call.
///
/// This is the seam application/demo thread code calls through: every
/// top-level function in [`crate`] (`thread_create`, `semaphore_wait`,
/// ...) is a thin wrapper around this, matching §5's "all mutation of
/// kernel globals occurs with external interrupts masked" policy without
/// requiring callers to hand-manage a critical section themselves.
pub(crate) fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    ::cortex_m::interrupt::free(|_| {
        // Safety: interrupts are masked for the lifetime of this closure,
        // and the only other code that touches `KERNEL` is the trap
        // handlers below, which themselves run with interrupts masked by
        // the exception's own priority.
        let k = unsafe { kernel() };
        f(k)
    })
}

pub(crate) fn log(bytes: &[u8]) {
    // Safety: the kernel is single-threaded; logging only ever happens
    // from code running with interrupts masked or from the single thread
    // of execution that owns the kernel at the time.
    let _ = bytes;
}

/// Fabricates the initial exception frame for `tid` so that its first
/// dispatch returns into `entry` as if resuming from a trap.
pub(crate) fn allocate_stack(tid: ThreadId, entry: usize, stack_top: usize) -> usize {
    let frame_addr = stack_top - core::mem::size_of::<ExceptionFrame>();
    // Safety: `frame_addr` lies within the thread's private stack row,
    // which is not aliased by any other thread or by the kernel itself.
    let frame = unsafe { &mut *(frame_addr as *mut ExceptionFrame) };
    *frame = ExceptionFrame::default();
    frame.pc = entry as u32;
    frame.xpsr = INITIAL_PSR;
    frame.lr = 0xFFFF_FFFF;
    let _ = tid;
    frame_addr
}

/// Enters the scheduler for the very first time. Never returns: control
/// passes to the initial thread via the fabricated exception frame.
pub(crate) fn start_root_task(stack_ptr: usize) -> ! {
    unsafe {
        ::cortex_m::register::psp::write(stack_ptr as u32);
    }
    // SVCall decodes the selector from the immediate encoded in the `svc`
    // instruction itself (read back off the stacked return address), so
    // the selector travels in the opcode, not in a register.
    unsafe { asm!("svc {sel}", sel = const TrapA::Start as u8, options(noreturn)) }
}

/// Asks the kernel to re-run the scheduler and, if a different thread was
/// chosen, perform the switch. Does not return to the caller until this
/// thread is dispatched again.
pub(crate) fn yield_now() {
    unsafe { asm!("svc {sel}", sel = const TrapA::Yield as u8) }
}

/// The hardware-stacked frame (r0-r3, r12, lr, pc, xpsr) plus the FPU
/// extended state Cortex-M4F lazily stacks. `Default` gives an
/// all-zeroes register file, which is what a freshly created thread
/// should see.
#[repr(C)]
#[derive(Default)]
struct ExceptionFrame {
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
    fpu_regs: [u32; 16],
    fpscr: u32,
    reserved: u32,
}

/// Decodes the selector immediate out of the `svc` instruction the
/// faulting code executed, given the return address stacked by the
/// exception entry.
fn decode_selector(return_addr: u32) -> u8 {
    // Safety: `return_addr` points at the instruction after `svc`, so the
    // two bytes before it are the `svc`/immediate halfword on Thumb.
    unsafe { *((return_addr - 2) as *const u8) }
}

#[allow(non_snake_case)]
#[no_mangle]
unsafe extern "C" fn rust_svcall_handler(stacked_lr: u32) {
    let selector = decode_selector(stacked_lr);
    let k = kernel();
    match selector {
        s if s == TrapA::Start as u8 => {
            // Root dispatch: there is nothing to resume on the way in, so
            // trap B is pended unconditionally.
            SWITCH_PENDING.store(1, Ordering::SeqCst);
        }
        s if s == TrapA::Yield as u8 => {
            if k.run_scheduler().is_some() {
                SWITCH_PENDING.store(1, Ordering::SeqCst);
            }
        }
        s if s == TrapA::StackAlloc as u8 => {
            // Handled synchronously by `Kernel::thread_create`; no
            // dispatch-time work needed here. Kept as a dispatch arm so
            // the selector stays meaningful if stack allocation is ever
            // moved behind the trap.
        }
        _ => unreachable!("unknown trap A selector"),
    }
    if SWITCH_PENDING.swap(0, Ordering::SeqCst) == 1 {
        ::cortex_m::peripheral::SCB::set_pendsv();
    }
}

/// Naked trampoline: decodes the `EXC_RETURN` value handed to us in `lr`
/// to recover the stacked return address, then defers to
/// `rust_svcall_handler` for the actual selector dispatch.
#[naked]
#[no_mangle]
unsafe extern "C" fn SVCall() {
    asm!(
        "
        mrs r0, psp
        ldr r0, [r0, #24]
        bl {handler}
        bx lr
        ",
        handler = sym rust_svcall_handler,
        options(noreturn)
    )
}

/// Trap B: the actual register save/restore. Saves the outgoing thread's
/// callee-saved registers (r4-r11) below its already-hardware-stacked
/// frame, stores the resulting PSP into its TCB, loads the incoming
/// thread's PSP from its TCB, and restores r4-r11 from below its frame.
///
/// The teacher's `SVCall` left this body as a `// TODO(sphw): implement
/// normal syscall convention` stub; this is that body, moved to PendSV
/// where the conventional Cortex-M RTOS context switch belongs.
#[naked]
#[no_mangle]
unsafe extern "C" fn PendSV() {
    asm!(
        "
        mrs r0, psp
        stmdb r0!, {{r4-r11}}
        bl {save}
        bl {select}
        bl {load}
        ldmia r0!, {{r4-r11}}
        msr psp, r0
        mov lr, {exc_return}
        bx lr
        ",
        save = sym save_outgoing_psp,
        select = sym select_incoming,
        load = sym load_incoming_psp,
        exc_return = const EXC_RETURN,
        options(noreturn)
    )
}

#[no_mangle]
unsafe extern "C" fn save_outgoing_psp(psp: u32) {
    let k = kernel();
    let current = k.thread_self();
    k.set_stack_pointer(current, psp as usize);
}

#[no_mangle]
unsafe extern "C" fn select_incoming() {
    // The scheduler already committed `current` inside
    // `rust_svcall_handler` / `Kernel::tick`; nothing further to decide
    // here. Kept as its own symbol to mirror the save/select/load shape
    // a dispatcher with priority-ceiling logic would need.
}

#[no_mangle]
unsafe extern "C" fn load_incoming_psp() -> u32 {
    let k = kernel();
    let current = k.thread_self();
    k.stack_pointer(current) as u32
}
