//! User callbacks for interrupt-sourced events.
//!
//! An interrupt the BSP forwards to application code needs a callback. Firing
//! one that was never registered is an integration bug and escalates to
//! [`fatal`](crate::fatal::fatal).

use crate::fatal::{self, Fatal, Source};
use core::cell::Cell;
use critical_section::Mutex;

/// A slot holding the application callback for one interrupt source.
pub struct Callback {
    source: Source,
    f: Mutex<Cell<Option<fn()>>>,
}

/// Called on a falling edge of the user button.
pub static BUTTON: Callback = Callback::new(Source::Button);

impl Callback {
    /// Creates an empty slot for `source`.
    pub const fn new(source: Source) -> Self {
        Callback {
            source,
            f: Mutex::new(Cell::new(None)),
        }
    }

    /// Registers `f`, replacing the previous callback.
    pub fn set(&self, f: fn()) {
        critical_section::with(|cs| self.f.borrow(cs).set(Some(f)));
    }

    /// Removes the callback.
    pub fn clear(&self) {
        critical_section::with(|cs| self.f.borrow(cs).set(None));
    }

    /// Returns `true` if a callback is registered.
    pub fn is_set(&self) -> bool {
        critical_section::with(|cs| self.f.borrow(cs).get().is_some())
    }

    /// Runs the registered callback outside of the critical section.
    ///
    /// Escalates [`Fatal::MissingCallback`] if none is registered.
    pub fn dispatch(&self) {
        match critical_section::with(|cs| self.f.borrow(cs).get()) {
            Some(f) => f(),
            None => fatal::fatal(Fatal::MissingCallback(self.source)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    static CALLS: AtomicU32 = AtomicU32::new(0);

    fn count() {
        CALLS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn dispatch_runs_callback() {
        let slot = Callback::new(Source::Button);
        slot.set(count);
        assert!(slot.is_set());
        let before = CALLS.load(Ordering::Relaxed);
        slot.dispatch();
        slot.dispatch();
        assert_eq!(CALLS.load(Ordering::Relaxed), before + 2);
    }

    #[test]
    #[should_panic(expected = "fatal: MissingCallback(Button)")]
    fn dispatch_without_callback_is_fatal() {
        fatal::set_handler(fatal::test::panicking);
        let slot = Callback::new(Source::Button);
        slot.dispatch();
    }

    #[test]
    #[should_panic(expected = "fatal: MissingCallback(Button)")]
    fn cleared_callback_is_fatal() {
        fatal::set_handler(fatal::test::panicking);
        let slot = Callback::new(Source::Button);
        slot.set(count);
        slot.clear();
        assert!(!slot.is_set());
        slot.dispatch();
    }
}
