//! NUCLEO-F446RE board glue.
//!
//! Everything in here drives the STM32F446 through its peripheral access crate,
//! re-exported as [`pac`]. The interrupt handlers are plain functions; wire
//! them into the vector table of the application:
//!
//! | vector          | handler                     |
//! |-----------------|-----------------------------|
//! | `DMA1_STREAM6`  | [`tty::on_dma1_stream6`]    |
//! | `USART2`        | [`tty::on_usart2`]          |
//! | `EXTI15_10`     | [`exti::on_exti15_10`]      |
//! | `SysTick`       | [`on_systick`]              |

pub mod exti;
pub mod gpio;
pub mod tty;

pub use stm32f4::stm32f446 as pac;

use crate::{InitError, config, fatal::Fatal};
use cortex_m::peripheral::NVIC;
#[cfg(feature = "systick")]
use core::sync::atomic::{AtomicU32, Ordering};
use pac::Interrupt;

/// Turns on the clocks, configures the board pins and brings up the TTY at
/// [`config::TTY_BAUDRATE`].
///
/// Also installs a fatal error handler that blinks the LED; install your own
/// with [`crate::fatal::set_handler`] afterwards to replace it.
pub fn chip_init() -> Result<(), InitError> {
    clock_init();
    gpio::init();
    crate::fatal::set_handler(blink_forever);
    tty::init(config::TTY_BAUDRATE)
}

/// The RCC register block.
pub(crate) fn rcc() -> &'static pac::rcc::RegisterBlock {
    // SAFETY: The pointer is the fixed RCC address. The board only does
    // read-modify-write of enable bits outside of `clock_init`.
    unsafe { &*pac::RCC::ptr() }
}

/// Switches the core to the PLL fed by the ST-LINK clock and enables the
/// peripheral clocks the board needs.
///
/// HSE bypass 8 MHz / 8 * 400 / 4 = 100 MHz, APB1 50 MHz, APB2 100 MHz.
pub fn clock_init() {
    let rcc = rcc();
    // SAFETY: Fixed FLASH address, only the wait states are changed.
    let flash = unsafe { &*pac::FLASH::ptr() };

    // 3 wait states for 90 to 120 MHz at 3.3 V.
    flash.acr.modify(|_, w| unsafe { w.latency().bits(3) });

    rcc.cr.modify(|_, w| w.hsebyp().set_bit());
    rcc.cr.modify(|_, w| w.hseon().on());
    while rcc.cr.read().hserdy().is_not_ready() {}

    rcc.pllcfgr.modify(|_, w| unsafe {
        w.pllsrc()
            .set_bit()
            .pllm()
            .bits(config::PLL_M)
            .plln()
            .bits(config::PLL_N)
            .pllp()
            .bits(config::PLL_P / 2 - 1)
    });
    rcc.cr.modify(|_, w| w.pllon().set_bit());
    while rcc.cr.read().pllrdy().bit_is_clear() {}

    // AHB / 1, APB1 / 2, APB2 / 1, then switch SYSCLK to the PLL.
    rcc.cfgr
        .modify(|_, w| unsafe { w.hpre().bits(0).ppre1().bits(0b100).ppre2().bits(0) });
    rcc.cfgr.modify(|_, w| unsafe { w.sw().bits(SW_PLL) });
    while rcc.cfgr.read().sws().bits() != SW_PLL {}

    #[cfg(feature = "systick")]
    systick_init();

    // The TTY needs the DMA controller and the USART.
    rcc.ahb1enr.modify(|_, w| w.dma1en().enabled());
    rcc.apb1enr.modify(|_, w| w.usart2en().enabled());
    let _ = rcc.apb1enr.read();

    debug!("clocks up, sysclk {} Hz", config::SYSCLK_HZ);
}

/// PLL as system clock, in SW and SWS.
const SW_PLL: u8 = 0b10;

/// Sets the priority of `irq` and unmasks it.
pub(crate) fn enable_irq(irq: Interrupt, prio: u8) {
    // SAFETY: Only the NVIC priority and enable registers of `irq` are touched,
    // the board owns these interrupts.
    let mut cp = unsafe { cortex_m::Peripherals::steal() };
    // SAFETY: The handlers for the board interrupts do not rely on priority based
    // critical sections beyond the ones documented in `config`.
    unsafe {
        cp.NVIC.set_priority(irq, prio << (8 - pac::NVIC_PRIO_BITS));
        NVIC::unmask(irq);
    }
}

/// Fatal handler installed by [`chip_init`]: toggles the LED every 50 ms.
fn blink_forever(_reason: Fatal) -> ! {
    loop {
        gpio::toggle(gpio::LED);
        // Busy wait, the SysTick interrupt may not be able to preempt us.
        cortex_m::asm::delay(config::SYSCLK_HZ / 1000 * 50);
    }
}

#[cfg(feature = "systick")]
static TICKS: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "systick")]
fn systick_init() {
    use cortex_m::peripheral::{scb::SystemHandler, syst::SystClkSource};

    // SAFETY: The board owns SysTick when the `systick` feature is enabled.
    let mut cp = unsafe { cortex_m::Peripherals::steal() };
    cp.SYST.set_clock_source(SystClkSource::Core);
    cp.SYST.set_reload(config::SYSCLK_HZ / config::SYSTICK_HZ - 1);
    cp.SYST.clear_current();
    cp.SYST.enable_counter();
    cp.SYST.enable_interrupt();
    // SAFETY: See `enable_irq`.
    unsafe {
        cp.SCB.set_priority(
            SystemHandler::SysTick,
            config::IRQ_PRIO_SYSTICK << (8 - pac::NVIC_PRIO_BITS),
        )
    };
}

/// SysTick handler, counts milliseconds.
#[cfg(feature = "systick")]
pub fn on_systick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Milliseconds since [`clock_init`], wrapping.
#[cfg(feature = "systick")]
pub fn ticks() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

/// Waits at least `ms` milliseconds.
#[cfg(feature = "systick")]
pub fn delay_ms(ms: u32) {
    let start = ticks();
    let wait = min_wait(ms);
    while ticks().wrapping_sub(start) < wait {
        core::hint::spin_loop();
    }
}

/// The first tick may be almost over when waiting starts, add one to
/// guarantee the minimum wait.
#[cfg(feature = "systick")]
fn min_wait(ms: u32) -> u32 {
    if ms < config::MAX_DELAY { ms + 1 } else { ms }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pll_gives_sysclk() {
        let vco_in = config::HSE_HZ / u32::from(config::PLL_M);
        assert_eq!(vco_in, 1_000_000);
        let vco = vco_in * u32::from(config::PLL_N);
        assert!((100_000_000..=432_000_000).contains(&vco));
        assert!(matches!(config::PLL_P, 2 | 4 | 6 | 8));
        assert_eq!(vco / u32::from(config::PLL_P), config::SYSCLK_HZ);
    }

    #[cfg(feature = "systick")]
    #[test]
    fn delay_adds_a_tick() {
        assert_eq!(min_wait(0), 1);
        assert_eq!(min_wait(10), 11);
        assert_eq!(min_wait(u32::MAX), u32::MAX);
    }
}
