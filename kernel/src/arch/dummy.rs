//! Host-side backend used by `cargo test`. There is no real interrupt
//! controller or second stack to switch to, so `yield_now` stands in for
//! the hardware context switch by advancing the tick clock instead:
//! whatever would eventually release this thread on real hardware (a
//! timer tick, another thread's release call already applied to kernel
//! state) gets a chance to do so before we check again.

use abi::ThreadId;

use crate::Kernel;

pub(crate) fn log(_bytes: &[u8]) {}

/// No real singleton to install into on the host; tests construct a
/// [`Kernel`] directly instead of going through [`crate::builder`]. Kept
/// for builder.rs to call under the `std` feature without a second cfg
/// branch.
pub(crate) fn init_kernel(kernel: Kernel) -> &'static mut Kernel {
    Box::leak(Box::new(kernel))
}

pub(crate) fn allocate_stack(_tid: ThreadId, _entry: usize, stack_top: usize) -> usize {
    stack_top
}

pub(crate) fn start_root_task(_stack_ptr: usize) -> ! {
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}

pub(crate) fn yield_now(kernel: &mut Kernel) {
    kernel.tick();
}

/// No shared singleton on the host backend — tests drive a [`Kernel`]
/// value directly instead of going through the top-level free-function
/// API, the same split the teacher's own `arch/dummy.rs` draws for its
/// `init_kernel`. The top-level wrappers in `lib.rs` that call through
/// [`with_kernel`] are therefore `cortex_m`-only.
#[allow(dead_code)]
pub(crate) fn with_kernel<R>(_f: impl FnOnce(&mut Kernel) -> R) -> R {
    unimplemented!("the std test backend drives a Kernel value directly instead")
}
