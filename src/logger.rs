use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicUsize, Ordering, compiler_fence},
};
use critical_section::RestoreState;
use defmt::Encoder;

#[cfg(feature = "qemu-test")]
mod semihosting;

#[defmt::global_logger]
struct Logger;

struct LoggerState {
    cs_state: UnsafeCell<RestoreState>,
    encoder: UnsafeCell<Encoder>,
    /// Reentrancy depth counter. 0 = not logging, 1 = logging (owner), 2+ = reentrant.
    /// Reentrant calls (from a fault or a fatal error raised while logging) are dropped.
    depth: AtomicUsize,
}

// SAFETY: `cs_state` and `encoder` are only touched between `acquire` and
// `release`, inside the critical section taken by `acquire`.
unsafe impl Sync for LoggerState {}

static LOGGER_STATE: LoggerState = LoggerState {
    cs_state: UnsafeCell::new(RestoreState::invalid()),
    encoder: UnsafeCell::new(Encoder::new()),
    depth: AtomicUsize::new(0),
};

/// Writes encoded frame bytes to every configured output.
///
/// Frames go to the TTY without waiting: interrupts are off here, so the DMA
/// could never make room. What does not fit is dropped and counted in
/// [`crate::board::tty::tx_lost`].
///
/// # Safety
///
/// Must be called from within a critical section.
#[inline(always)]
unsafe fn write_all(data: &[u8]) {
    #[cfg(feature = "defmt-tty")]
    crate::board::tty::try_write(data);
    #[cfg(feature = "qemu-test")]
    // SAFETY: Caller guarantees we're in a critical section.
    unsafe {
        semihosting::write(data)
    };
}

// SAFETY: This impl upholds the `defmt::Logger` safety contract:
// - `acquire` enters a critical section before any logging operations.
// - `release` exits the critical section after logging is complete.
// - All mutable state access is protected by the critical section.
// - Reentrant calls are detected and dropped.
unsafe impl defmt::Logger for Logger {
    fn acquire() {
        // Increment depth. If we weren't at 0, we're reentrant and skip all setup.
        let was_depth = LOGGER_STATE.depth.fetch_add(1, Ordering::Acquire);
        if was_depth > 0 {
            return;
        }

        // SAFETY: This is the start of a logging operation. The critical section
        // will be released in `release()`, defmt guarantees balanced calls.
        let restore = unsafe { critical_section::acquire() };

        compiler_fence(Ordering::SeqCst);

        // SAFETY: We're in a critical section, so exclusive access to `cs_state` is guaranteed.
        unsafe { LOGGER_STATE.cs_state.get().write(restore) };

        compiler_fence(Ordering::SeqCst);

        // SAFETY: We're in a critical section, so exclusive access to `encoder` is guaranteed.
        unsafe { &mut *LOGGER_STATE.encoder.get() }.start_frame(|b| unsafe { write_all(b) });
    }

    unsafe fn flush() {
        // Waiting for the TTY to drain needs the DMA interrupt, which cannot
        // run inside the critical section. Semihosting writes synchronously.
    }

    unsafe fn release() {
        // Decrement depth. If we weren't at 1, we're reentrant and skip all cleanup.
        let was_depth = LOGGER_STATE.depth.fetch_sub(1, Ordering::Release);
        if was_depth != 1 {
            return;
        }

        // SAFETY: We're still in the critical section from `acquire()`.
        unsafe { &mut *LOGGER_STATE.encoder.get() }.end_frame(|b| unsafe { write_all(b) });

        compiler_fence(Ordering::SeqCst);

        // SAFETY: We read the restore state saved in `acquire()` and release the
        // critical section.
        unsafe { critical_section::release(LOGGER_STATE.cs_state.get().read()) };

        compiler_fence(Ordering::SeqCst);
    }

    unsafe fn write(bytes: &[u8]) {
        // Skip if reentrant (depth != 1). The reentrant log is silently dropped.
        if LOGGER_STATE.depth.load(Ordering::Relaxed) != 1 {
            return;
        }

        // SAFETY: defmt calls this between acquire() and release(), so we're
        // within a critical section.
        unsafe { &mut *LOGGER_STATE.encoder.get() }.write(bytes, |b| unsafe { write_all(b) });
    }
}
