use defmt::global_logger;

#[global_logger]
struct KernelLogger;

static mut ENCODER: defmt::Encoder = ::defmt::Encoder::new();

::defmt::timestamp!("{=u32:us}", 0);

// Safety: defmt::Logger requires that only one thread access Logger at once.
// The kernel runs on a single core with interrupts masked around every
// logging call site, so this is safe without an additional lock.
unsafe impl defmt::Logger for KernelLogger {
    fn acquire() {
        unsafe { ENCODER.start_frame(|b| log(b)) };
    }

    unsafe fn flush() {}

    unsafe fn release() {
        ENCODER.end_frame(|b| log(b));
    }

    unsafe fn write(bytes: &[u8]) {
        ENCODER.write(bytes, |b| log(b));
    }
}

fn log(log_buf: &[u8]) {
    crate::arch::log(log_buf);
}
