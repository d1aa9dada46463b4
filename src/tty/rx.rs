use super::TtyRead;
use crate::fifo::{Consumer, Producer};
use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicU32, Ordering},
};

/// Feeds the receive [`Fifo`](crate::fifo::Fifo) from the byte-ready interrupt.
///
/// There is no flow control towards the sender, a byte arriving while the
/// queue is full is dropped and counted.
pub struct RxLink<'a, const N: usize> {
    producer: UnsafeCell<Producer<'a, N>>,
    lost: AtomicU32,
}

// SAFETY: `producer` is only accessed from `on_byte_received`, whose contract
// restricts it to a single interrupt context.
unsafe impl<const N: usize> Sync for RxLink<'_, N> {}

impl<'a, const N: usize> RxLink<'a, N> {
    /// Creates a link filling the queue behind `producer`.
    pub const fn new(producer: Producer<'a, N>) -> Self {
        RxLink {
            producer: UnsafeCell::new(producer),
            lost: AtomicU32::new(0),
        }
    }

    /// Queues a received byte, or drops and counts it if the queue is full.
    ///
    /// # Safety
    ///
    /// Must only be called from the byte-ready interrupt, or from one other
    /// context that never runs concurrently with it.
    pub unsafe fn on_byte_received(&self, byte: u8) {
        // SAFETY: The caller guarantees a single context.
        let producer = unsafe { &mut *self.producer.get() };
        if !producer.put(byte) {
            let lost = self.lost.load(Ordering::Relaxed);
            self.lost.store(lost.saturating_add(1), Ordering::Relaxed);
        }
    }

    /// Number of received bytes dropped because the queue was full.
    ///
    /// Diagnostic only; the value saturates at `u32::MAX`.
    pub fn lost(&self) -> u32 {
        self.lost.load(Ordering::Relaxed)
    }
}

/// Reading end of the interrupt driven TTY.
pub struct TtyReader<'a, const N: usize> {
    consumer: Consumer<'a, N>,
    link: &'a RxLink<'a, N>,
}

impl<'a, const N: usize> TtyReader<'a, N> {
    /// Creates a reader draining the queue `link` fills.
    pub fn new(consumer: Consumer<'a, N>, link: &'a RxLink<'a, N>) -> Self {
        TtyReader { consumer, link }
    }

    /// Moves up to `buf.len()` received bytes into `buf`, returns how many.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            let block = self.consumer.read_block();
            if block.is_empty() {
                break;
            }
            let len = block.len().min(buf.len() - n);
            buf[n..n + len].copy_from_slice(&block[..len]);
            self.consumer.free(len);
            n += len;
        }
        n
    }

    /// Number of received bytes waiting.
    pub fn used(&self) -> usize {
        self.consumer.used()
    }

    /// Number of received bytes dropped because the queue was full.
    pub fn lost(&self) -> u32 {
        self.link.lost()
    }
}

impl<const N: usize> TtyRead for TtyReader<'_, N> {
    fn data_available(&self) -> bool {
        !self.consumer.is_empty()
    }

    fn try_get_char(&mut self) -> Option<u8> {
        self.consumer.get()
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::*;
    use crate::fifo::Fifo;
    use std::vec::Vec;

    #[test]
    fn overflow_drops_and_counts() {
        let mut fifo = Fifo::<4>::new();
        let (p, c) = fifo.split();
        let link = RxLink::new(p);
        let mut r = TtyReader::new(c, &link);

        for byte in *b"abcd" {
            // SAFETY: Single context.
            unsafe { link.on_byte_received(byte) };
        }
        assert_eq!(link.lost(), 0);
        // SAFETY: Single context.
        unsafe { link.on_byte_received(b'e') };
        assert_eq!(link.lost(), 1);
        assert_eq!(r.used(), 4);

        let mut buf = [0; 8];
        assert_eq!(r.read(&mut buf), 4);
        assert_eq!(&buf[..4], b"abcd");
        assert_eq!(r.lost(), 1);
    }

    #[test]
    fn get_char_in_order() {
        let mut fifo = Fifo::<4>::new();
        let (p, c) = fifo.split();
        let link = RxLink::new(p);
        let mut r = TtyReader::new(c, &link);

        assert!(!r.data_available());
        assert_eq!(r.try_get_char(), None);

        let mut out = Vec::new();
        for byte in *b"hello world" {
            // SAFETY: Single context.
            unsafe { link.on_byte_received(byte) };
            assert!(r.data_available());
            out.push(r.get_char());
        }
        assert_eq!(out, b"hello world");
        assert!(!r.data_available());
    }

    #[test]
    fn read_across_wrap() {
        let mut fifo = Fifo::<4>::new();
        let (p, c) = fifo.split();
        let link = RxLink::new(p);
        let mut r = TtyReader::new(c, &link);

        for byte in *b"xyz" {
            // SAFETY: Single context.
            unsafe { link.on_byte_received(byte) };
        }
        let mut buf = [0; 2];
        assert_eq!(r.read(&mut buf), 2);
        for byte in *b"123" {
            // SAFETY: Single context.
            unsafe { link.on_byte_received(byte) };
        }
        let mut buf = [0; 8];
        assert_eq!(r.read(&mut buf), 4);
        assert_eq!(&buf[..4], b"z123");
    }

    #[test]
    fn get_char_waits_for_interrupt() {
        let mut fifo = Fifo::<4>::new();
        let (p, c) = fifo.split();
        let link = RxLink::new(p);
        let mut r = TtyReader::new(c, &link);

        let out = std::thread::scope(|s| {
            s.spawn(|| {
                for byte in *b"ping" {
                    std::thread::yield_now();
                    // SAFETY: Only this thread plays the interrupt.
                    unsafe { link.on_byte_received(byte) };
                }
            });
            [r.get_char(), r.get_char(), r.get_char(), r.get_char()]
        });
        assert_eq!(&out, b"ping");
        assert_eq!(link.lost(), 0);
    }
}
