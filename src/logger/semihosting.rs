//! defmt frames on semihosting stdout, for the QEMU testsuite.
//!
//! QEMU does not model the STM32F446 USART or DMA, so the testsuite takes the
//! frames from the host side of the debugger instead.

use core::cell::RefCell;
use cortex_m_semihosting::hio::{self, HostStream};
use critical_section::{CriticalSection, Mutex};

/// Opened on first use. Reopening would truncate the output.
static STDOUT: Mutex<RefCell<Option<HostStream>>> = Mutex::new(RefCell::new(None));

/// Writes bytes to semihosting stdout, dropping them if the host refuses.
///
/// # Safety
///
/// Must be called from within a critical section.
pub(crate) unsafe fn write(bytes: &[u8]) {
    // SAFETY: Caller guarantees we're in a critical section.
    let cs = unsafe { CriticalSection::new() };
    let mut stdout = STDOUT.borrow_ref_mut(cs);

    if stdout.is_none() {
        *stdout = hio::hstdout().ok();
    }
    if let Some(stream) = stdout.as_mut() {
        let _ = stream.write_all(bytes);
    }
}
