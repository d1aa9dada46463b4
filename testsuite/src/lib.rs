#![no_std]

pub mod soft_dma;
pub mod uart;

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m_semihosting::debug::{self, EXIT_FAILURE, EXIT_SUCCESS};

pub use cortex_m_rt::{entry, exception};

pub fn exit_success() -> ! {
    debug::exit(EXIT_SUCCESS);
    #[allow(clippy::empty_loop)]
    loop {}
}

pub fn exit_failure() -> ! {
    debug::exit(EXIT_FAILURE);
    #[allow(clippy::empty_loop)]
    loop {}
}

/// Starts SysTick firing every `cycles` core clocks, with its interrupt on.
///
/// The examples use the SysTick exception as the interrupt under test.
pub fn start_systick(cycles: u32) {
    // SAFETY: The examples own SysTick, nothing else configures it.
    let mut syst = unsafe { cortex_m::Peripherals::steal() }.SYST;
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(cycles - 1);
    syst.clear_current();
    syst.enable_counter();
    syst.enable_interrupt();
}
