use super::{TransferError, TransferEvent, TxDma};
use crate::fifo::Consumer;
use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicU32, AtomicUsize, Ordering},
};

/// Drains a transmit [`Fifo`](crate::fifo::Fifo) with DMA block transfers.
///
/// The link is idle while nothing is in flight. [`TxLink::kick`] arms a
/// transfer of the contiguous readable run of the queue. The bytes stay in the
/// queue, reserved, until the hardware reports completion through
/// [`TxLink::on_transfer_event`]; then they are freed and the next run (for
/// example the part that wrapped around the end of the storage) is armed right
/// away. Once the queue is empty the link goes idle again.
///
/// Shared between foreground code, which kicks with the transfer-complete
/// interrupt masked, and that interrupt.
pub struct TxLink<'a, D, const N: usize> {
    inner: UnsafeCell<Inner<'a, D, N>>,
    /// Bytes of the running transfer, 0 when idle.
    in_flight: AtomicUsize,
    /// Bytes the writer could not place into the queue, saturating.
    lost: AtomicU32,
}

struct Inner<'a, D, const N: usize> {
    consumer: Consumer<'a, N>,
    dma: D,
}

// SAFETY: `inner` is only accessed through `kick` and `on_transfer_event`, whose
// contracts rule out concurrent access: foreground code masks the interrupt, the
// interrupt cannot preempt itself. The counters are atomics.
unsafe impl<D: Send, const N: usize> Sync for TxLink<'_, D, N> {}

impl<'a, D: TxDma, const N: usize> TxLink<'a, D, N> {
    /// Creates an idle link draining `consumer` through `dma`.
    pub const fn new(consumer: Consumer<'a, N>, dma: D) -> Self {
        TxLink {
            inner: UnsafeCell::new(Inner { consumer, dma }),
            in_flight: AtomicUsize::new(0),
            lost: AtomicU32::new(0),
        }
    }

    /// Starts a transfer if none is running and there is data.
    ///
    /// # Safety
    ///
    /// Must be called with the transfer-complete interrupt masked, or from
    /// that interrupt. Only one context may run `kick` or
    /// [`TxLink::on_transfer_event`] at a time.
    pub unsafe fn kick(&self) {
        if self.in_flight.load(Ordering::Relaxed) != 0 {
            return;
        }
        // SAFETY: The caller guarantees exclusive access to `inner`.
        let inner = unsafe { &mut *self.inner.get() };
        self.arm(inner);
    }

    /// Handles the transfer-complete interrupt.
    ///
    /// On [`TransferEvent::Complete`] the transferred bytes are freed and the
    /// next block is armed. A [`TransferEvent::Error`] leaves everything as it
    /// is and is handed back for escalation; no retry is attempted.
    ///
    /// # Safety
    ///
    /// Must be called once per hardware event, from the transfer-complete
    /// interrupt (or with it masked), never concurrently with
    /// [`TxLink::kick`].
    pub unsafe fn on_transfer_event(&self, event: TransferEvent) -> Result<(), TransferError> {
        // SAFETY: The caller guarantees exclusive access to `inner`.
        let inner = unsafe { &mut *self.inner.get() };

        match event {
            TransferEvent::Error => Err(TransferError),
            TransferEvent::Complete => {
                inner.dma.stop();
                inner.consumer.free(self.in_flight.load(Ordering::Relaxed));
                self.in_flight.store(0, Ordering::Relaxed);
                self.arm(inner);
                Ok(())
            }
        }
    }

    fn arm(&self, inner: &mut Inner<'a, D, N>) {
        let block = inner.consumer.read_block();
        let len = block.len();
        if len != 0 {
            self.in_flight.store(len, Ordering::Relaxed);
            // The block stays reserved in the queue until `free` in
            // `on_transfer_event`, so the engine may read it after this borrow.
            inner.dma.start(block);
        }
    }

    /// Number of bytes in the running transfer, 0 when idle.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Number of bytes dropped because the transmit queue was full.
    ///
    /// Diagnostic only; the value saturates at `u32::MAX`.
    pub fn lost(&self) -> u32 {
        self.lost.load(Ordering::Relaxed)
    }

    pub(crate) fn record_lost(&self, bytes: usize) {
        let bytes = u32::try_from(bytes).unwrap_or(u32::MAX);
        let _ = self
            .lost
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |lost| {
                Some(lost.saturating_add(bytes))
            });
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::*;
    use crate::fifo::Fifo;
    use crate::tty::mock::{DmaState, MockDma, complete};
    use std::sync::Mutex;

    #[test]
    fn kick_arms_once() {
        let dma = Mutex::new(DmaState::default());
        let mut fifo = Fifo::<8>::new();
        let (mut p, c) = fifo.split();
        let link = TxLink::new(c, MockDma(&dma));

        // SAFETY: Single context.
        unsafe { link.kick() };
        assert_eq!(dma.lock().unwrap().started, 0);

        p.write(b"abc");
        // SAFETY: Single context.
        unsafe { link.kick() };
        assert_eq!(link.in_flight(), 3);
        p.write(b"de");
        // SAFETY: Single context.
        unsafe { link.kick() };
        assert_eq!(link.in_flight(), 3);
        assert_eq!(dma.lock().unwrap().started, 1);
    }

    #[test]
    fn completion_rearms_with_wrapped_remainder() {
        let dma = Mutex::new(DmaState::default());
        let mut fifo = Fifo::<8>::new();
        let (mut p, c) = fifo.split();
        let link = TxLink::new(c, MockDma(&dma));

        p.write(b"123456");
        // SAFETY: Single context.
        unsafe { link.kick() };
        assert_eq!(complete(&link, &dma).unwrap(), b"123456");
        assert_eq!(link.in_flight(), 0);

        assert_eq!(p.write(b"ABCDE"), 5);
        // SAFETY: Single context.
        unsafe { link.kick() };
        assert_eq!(complete(&link, &dma).unwrap(), b"AB");
        assert_eq!(link.in_flight(), 3);
        assert_eq!(complete(&link, &dma).unwrap(), b"CDE");
        assert_eq!(link.in_flight(), 0);
        assert_eq!(complete(&link, &dma), None);
        assert_eq!(p.used(), 0);

        let state = dma.lock().unwrap();
        assert_eq!(state.started, 3);
        assert_eq!(state.stopped, 3);
    }

    #[test]
    fn in_flight_bytes_are_not_overwritten() {
        let dma = Mutex::new(DmaState::default());
        let mut fifo = Fifo::<4>::new();
        let (mut p, c) = fifo.split();
        let link = TxLink::new(c, MockDma(&dma));

        p.write(b"AB");
        // SAFETY: Single context.
        unsafe { link.kick() };
        assert_eq!(p.write(b"CDEF"), 2);
        assert_eq!(complete(&link, &dma).unwrap(), b"AB");
        assert_eq!(complete(&link, &dma).unwrap(), b"CD");
    }

    #[test]
    fn error_keeps_bytes() {
        let dma = Mutex::new(DmaState::default());
        let mut fifo = Fifo::<8>::new();
        let (mut p, c) = fifo.split();
        let link = TxLink::new(c, MockDma(&dma));

        p.write(b"xyz");
        // SAFETY: Single context.
        unsafe { link.kick() };
        // SAFETY: Single context.
        let res = unsafe { link.on_transfer_event(TransferEvent::Error) };
        assert_eq!(res, Err(TransferError));
        assert_eq!(p.used(), 3);
        assert_eq!(link.in_flight(), 3);
        assert_eq!(dma.lock().unwrap().stopped, 0);
    }

    #[test]
    fn lost_saturates() {
        let dma = Mutex::new(DmaState::default());
        let mut fifo = Fifo::<1>::new();
        let (_p, c) = fifo.split();
        let link = TxLink::new(c, MockDma(&dma));

        link.record_lost(3);
        assert_eq!(link.lost(), 3);
        link.record_lost(usize::MAX);
        assert_eq!(link.lost(), u32::MAX);
        link.record_lost(1);
        assert_eq!(link.lost(), u32::MAX);
    }
}
