//! Policy for errors the board cannot recover from.
//!
//! Only two kinds of failure end up here: a hardware transfer error on the TTY
//! DMA stream and an interrupt nobody is prepared to handle. Both mean the
//! system is misconfigured or the hardware state is unknown, so there is no
//! way back. The integrator can install a [`Handler`] (log, reset, blink);
//! without one the core halts in a spin loop.

use core::cell::Cell;
use critical_section::Mutex;

/// Interrupt sources that can fail fatally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Source {
    /// The user button on EXTI line 13.
    Button,
    /// The shared EXTI lines 10 to 15 vector.
    Exti15_10,
    /// The TTY transmit DMA stream.
    TtyTxDma,
}

/// Reason passed to the fatal [`Handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Fatal {
    /// A DMA block transfer failed in hardware.
    TransferError,
    /// An interrupt fired for which no callback is registered.
    MissingCallback(Source),
    /// An interrupt fired without any of the flags it is enabled for.
    UnexpectedInterrupt(Source),
}

/// Called on fatal errors. Must not return.
pub type Handler = fn(Fatal) -> !;

static HANDLER: Mutex<Cell<Option<Handler>>> = Mutex::new(Cell::new(None));

/// Installs the handler called by [`fatal`], replacing the previous one.
pub fn set_handler(handler: Handler) {
    critical_section::with(|cs| HANDLER.borrow(cs).set(Some(handler)));
}

/// Escalates an unrecoverable error to the installed [`Handler`].
pub fn fatal(reason: Fatal) -> ! {
    error!("fatal error: {}", reason);

    match critical_section::with(|cs| HANDLER.borrow(cs).get()) {
        Some(handler) => handler(reason),
        None => halt(),
    }
}

fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Handler used by every test in the crate, turns fatal errors into panics
    /// carrying the reason.
    pub(crate) fn panicking(reason: Fatal) -> ! {
        panic!("fatal: {reason:?}")
    }

    #[test]
    #[should_panic(expected = "fatal: TransferError")]
    fn handler_receives_reason() {
        set_handler(panicking);
        fatal(Fatal::TransferError);
    }

    #[test]
    #[should_panic(expected = "fatal: UnexpectedInterrupt(Exti15_10)")]
    fn handler_receives_source() {
        set_handler(panicking);
        fatal(Fatal::UnexpectedInterrupt(Source::Exti15_10));
    }
}
