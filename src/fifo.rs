//! A fixed-capacity single-producer, single-consumer (SPSC) byte queue.

use core::{
    cell::UnsafeCell,
    ptr, slice,
    sync::atomic::{AtomicUsize, Ordering},
};

/// A single-producer, single-consumer byte queue storing up to `N` bytes.
///
/// The storage is owned by the queue and never resized. Use [`Fifo::split`] to
/// obtain the [`Producer`] and [`Consumer`] halves; each half must only ever be
/// used from one execution context (foreground code or one interrupt handler).
///
/// Besides byte and bulk access the consumer can hand out the contiguous run
/// of readable bytes with [`Consumer::read_block`] and commit it later with
/// [`Consumer::free`]. This lets a DMA engine read directly from the queue
/// storage while the bytes stay reserved.
pub struct Fifo<const N: usize> {
    buf: [UnsafeCell<u8>; N],
    /// Where the next read starts. Owned by the consumer.
    ///
    /// The Fifo always guarantees `read < N`.
    read: AtomicUsize,
    /// Where the next write starts. Owned by the producer.
    ///
    /// The Fifo always guarantees `write < N`.
    write: AtomicUsize,
    /// Number of bytes currently held, `0..=N`.
    ///
    /// Only the producer increments and only the consumer decrements it.
    count: AtomicUsize,
}

// SAFETY: The byte storage is partitioned between the two halves by `count`:
// the producer only touches the free region starting at `write`, the consumer
// only the used region starting at `read`. Ownership of a byte moves between
// them with Release/Acquire operations on `count`.
unsafe impl<const N: usize> Sync for Fifo<N> {}

/// Appends data to a [`Fifo`].
pub struct Producer<'a, const N: usize> {
    fifo: &'a Fifo<N>,
}

/// Reads data previously written to a [`Fifo`].
pub struct Consumer<'a, const N: usize> {
    fifo: &'a Fifo<N>,
}

// SAFETY: Only one Producer exists per queue (enforced by `split`) and all
// shared state is synchronized through atomics.
unsafe impl<const N: usize> Send for Producer<'_, N> {}
// SAFETY: Only one Consumer exists per queue (enforced by `split`) and all
// shared state is synchronized through atomics.
unsafe impl<const N: usize> Send for Consumer<'_, N> {}

impl<const N: usize> Fifo<N> {
    const NON_EMPTY: () = assert!(N > 0, "a Fifo needs at least one byte of storage");

    /// Creates an empty queue.
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::NON_EMPTY;
        Fifo {
            buf: [const { UnsafeCell::new(0) }; N],
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
        }
    }

    /// Total number of bytes the queue can hold.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of bytes currently held.
    #[inline]
    pub fn used(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Number of bytes that can still be written.
    #[inline]
    pub fn free_space(&self) -> usize {
        N - self.used()
    }

    /// Splits the queue into its producer and consumer halves.
    #[inline]
    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        let this: &Self = self;
        (Producer { fifo: this }, Consumer { fifo: this })
    }

    #[inline]
    fn buf_ptr(&self) -> *mut u8 {
        // `UnsafeCell<u8>` has the same layout as `u8`.
        self.buf.as_ptr().cast_mut().cast()
    }
}

impl<const N: usize> Default for Fifo<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Producer<'_, N> {
    /// Appends a single byte.
    ///
    /// Returns `false` and drops the byte if the queue is full. Counting the
    /// loss is up to the caller.
    #[inline]
    pub fn put(&mut self, byte: u8) -> bool {
        // Acquire: synchronizes with the consumer's Release in `get`/`free`, so the
        // slot we are about to write is no longer read.
        if self.fifo.count.load(Ordering::Acquire) >= N {
            return false;
        }
        // Relaxed: producer owns `write`.
        let write = self.fifo.write.load(Ordering::Relaxed);

        // SAFETY: `write < N` by field invariant and the slot is producer-owned
        // because `count < N`.
        unsafe { self.fifo.buf_ptr().add(write).write(byte) };

        self.fifo.write.store((write + 1) % N, Ordering::Relaxed);
        // Release: publishes the byte to the consumer.
        self.fifo.count.fetch_add(1, Ordering::Release);
        true
    }

    /// Appends as many leading bytes of `data` as fit.
    ///
    /// Never blocks. Returns the number of bytes copied, which may be anything
    /// from zero to `data.len()`.
    #[inline]
    pub fn write(&mut self, data: &[u8]) -> usize {
        let free = N - self.fifo.count.load(Ordering::Acquire);
        let len = data.len().min(free);
        if len == 0 {
            return 0;
        }
        let write = self.fifo.write.load(Ordering::Relaxed);
        let buf = self.fifo.buf_ptr();

        // For both `copy_nonoverlapping` calls below:
        // - src is a sub-slice of `data`, valid for reads.
        // - dst is inside the producer-owned region of `buf`: it starts at `write`
        //   and spans `len <= free` bytes, wrapping at `N`.
        // - `data` cannot overlap `buf`, the consumer never hands out the
        //   producer-owned region and the producer never hands out anything.
        if write + len > N {
            let pivot = N - write;
            // SAFETY: data[0..pivot] -> buf[write..N], pivot < len <= data.len().
            unsafe { ptr::copy_nonoverlapping(data.as_ptr(), buf.add(write), pivot) };
            // SAFETY: data[pivot..len] -> buf[0..len - pivot]. The wrapped part ends
            // before `read` because `len <= free`.
            unsafe { ptr::copy_nonoverlapping(data.as_ptr().add(pivot), buf, len - pivot) };
        } else {
            // SAFETY: data[0..len] -> buf[write..write + len], write + len <= N.
            unsafe { ptr::copy_nonoverlapping(data.as_ptr(), buf.add(write), len) };
        }

        self.fifo.write.store((write + len) % N, Ordering::Relaxed);
        self.fifo.count.fetch_add(len, Ordering::Release);
        len
    }

    /// Number of bytes currently held.
    #[inline]
    pub fn used(&self) -> usize {
        self.fifo.used()
    }

    /// Number of bytes that can still be written.
    #[inline]
    pub fn free_space(&self) -> usize {
        self.fifo.free_space()
    }

    /// Total number of bytes the queue can hold.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Consumer<'_, N> {
    /// Returns `true` if there is no data available to read.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fifo.used() == 0
    }

    /// Removes and returns the oldest byte, or `None` if the queue is empty.
    #[inline]
    pub fn get(&mut self) -> Option<u8> {
        // Acquire: synchronizes with the producer's Release, the byte is written.
        if self.fifo.count.load(Ordering::Acquire) == 0 {
            return None;
        }
        // Relaxed: consumer owns `read`.
        let read = self.fifo.read.load(Ordering::Relaxed);

        // SAFETY: `read < N` by field invariant and the slot holds published data
        // because `count > 0`.
        let byte = unsafe { self.fifo.buf_ptr().add(read).read() };

        self.fifo.read.store((read + 1) % N, Ordering::Relaxed);
        // Release: hands the slot back to the producer.
        self.fifo.count.fetch_sub(1, Ordering::Release);
        Some(byte)
    }

    /// Returns the contiguous run of readable bytes without consuming them.
    ///
    /// If the data crosses the end of the storage only the part up to the end
    /// is returned, `min(used, N - read)` bytes. After committing it with
    /// [`Consumer::free`] the next call returns the wrapped remainder.
    ///
    /// The returned bytes stay untouched by the producer until they are freed,
    /// so it is sound to hand their address to a DMA engine that keeps reading
    /// after the borrow has ended, as long as [`Consumer::free`] is only called
    /// once the transfer has finished.
    #[inline]
    pub fn read_block(&self) -> &[u8] {
        let count = self.fifo.count.load(Ordering::Acquire);
        let read = self.fifo.read.load(Ordering::Relaxed);
        let len = count.min(N - read);

        // SAFETY:
        // - Non-null, valid, aligned: sub-slice buf[read..read + len] with
        //   read + len <= N.
        // - Initialized: the bytes were published by the producer (count).
        // - Not mutated for the lifetime: the producer only writes to the free
        //   region, and these bytes only become free through `free`, which
        //   takes `&mut self` and therefore ends this borrow.
        unsafe { slice::from_raw_parts(self.fifo.buf_ptr().add(read), len) }
    }

    /// Commits the consumption of `n` bytes returned by [`Consumer::read_block`].
    ///
    /// `n` is clamped to the length `read_block` would return right now.
    #[inline]
    pub fn free(&mut self, n: usize) {
        let count = self.fifo.count.load(Ordering::Acquire);
        let read = self.fifo.read.load(Ordering::Relaxed);
        let n = n.min(count.min(N - read));
        if n == 0 {
            return;
        }
        self.fifo.read.store((read + n) % N, Ordering::Relaxed);
        self.fifo.count.fetch_sub(n, Ordering::Release);
    }

    /// Number of bytes currently held.
    #[inline]
    pub fn used(&self) -> usize {
        self.fifo.used()
    }

    /// Number of bytes that can still be written.
    #[inline]
    pub fn free_space(&self) -> usize {
        self.fifo.free_space()
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::*;
    use std::vec::Vec;

    const BUF_SIZE: usize = 4;

    /// Moves both cursors to `pos` on an empty queue.
    fn start_at<const N: usize>(fifo: &mut Fifo<N>, pos: usize) {
        let (mut p, mut c) = fifo.split();
        for _ in 0..pos {
            assert!(p.put(0));
            assert_eq!(c.get(), Some(0));
        }
    }

    #[test]
    fn put_get() {
        let mut f = Fifo::<BUF_SIZE>::new();
        let (mut p, mut c) = f.split();
        assert!(p.put(1));
        assert!(p.put(2));
        assert_eq!(c.get(), Some(1));
        assert_eq!(c.get(), Some(2));
        assert_eq!(c.get(), None);
    }

    #[test]
    fn put_full_drops_byte() {
        let mut f = Fifo::<BUF_SIZE>::new();
        let (mut p, c) = f.split();
        assert_eq!(p.write(&[1, 2, 3, 4]), 4);
        assert!(!p.put(5));
        assert_eq!(p.used(), BUF_SIZE);
        assert_eq!(c.read_block(), &[1, 2, 3, 4]);
    }

    #[test]
    fn used_plus_free_is_capacity() {
        let mut f = Fifo::<BUF_SIZE>::new();
        let (mut p, mut c) = f.split();
        for step in 0..20u8 {
            if step % 3 == 2 {
                c.get();
            } else {
                p.put(step);
            }
            assert_eq!(p.used() + p.free_space(), BUF_SIZE);
            assert_eq!(c.used() + c.free_space(), BUF_SIZE);
        }
    }

    #[test]
    fn write_is_bounded_by_free_space() {
        let mut f = Fifo::<BUF_SIZE>::new();
        let (mut p, _c) = f.split();
        assert_eq!(p.write(&[1]), 1);
        let free = p.free_space();
        assert_eq!(p.write(&[2, 3, 4, 5, 6]), free);
        assert_eq!(p.write(&[7]), 0);
        assert_eq!(p.write(&[]), 0);
    }

    #[test]
    fn write_partial() {
        let mut f = Fifo::<BUF_SIZE>::new();
        let (mut p, c) = f.split();
        assert_eq!(p.write(b"WXYZ!"), 4);
        assert_eq!(c.read_block(), b"WXYZ");
    }

    #[test]
    fn fill_crossing_end() {
        let mut f = Fifo::<BUF_SIZE>::new();
        start_at(&mut f, BUF_SIZE - 2);
        let (mut p, mut c) = f.split();
        assert_eq!(p.write(&[1, 2, 3]), 3);

        assert_eq!(c.read_block(), &[1, 2]);
        c.free(2);
        assert_eq!(c.read_block(), &[3]);
        c.free(1);
        assert!(c.read_block().is_empty());
    }

    #[test]
    fn read_block_stops_at_end() {
        let mut f = Fifo::<BUF_SIZE>::new();
        start_at(&mut f, BUF_SIZE - 1);
        let (mut p, mut c) = f.split();
        assert_eq!(p.write(&[1, 2]), 2);

        assert_eq!(c.read_block(), &[1]);
        assert_eq!(c.used(), 2);
        c.free(1);
        assert_eq!(c.used(), 1);
        assert_eq!(c.read_block(), &[2]);
    }

    #[test]
    fn free_is_clamped_to_block() {
        let mut f = Fifo::<BUF_SIZE>::new();
        start_at(&mut f, BUF_SIZE - 1);
        let (mut p, mut c) = f.split();
        p.write(&[1, 2, 3]);

        c.free(usize::MAX);
        assert_eq!(c.used(), 2);
        assert_eq!(c.read_block(), &[2, 3]);
    }

    #[test]
    fn zero_free() {
        let mut f = Fifo::<BUF_SIZE>::new();
        let (mut p, mut c) = f.split();
        p.write(&[1, 2]);
        c.free(0);
        assert_eq!(c.read_block(), &[1, 2]);
    }

    #[test]
    fn partial_free() {
        let mut f = Fifo::<BUF_SIZE>::new();
        let (mut p, mut c) = f.split();
        p.write(&[1, 2]);
        c.free(1);
        assert_eq!(c.read_block(), &[2]);
    }

    #[test]
    fn put_and_write_agree() {
        let mut a = Fifo::<BUF_SIZE>::new();
        let mut b = Fifo::<BUF_SIZE>::new();
        start_at(&mut a, 3);
        start_at(&mut b, 3);
        let (mut pa, mut ca) = a.split();
        let (mut pb, mut cb) = b.split();

        for byte in [9, 8, 7] {
            assert!(pa.put(byte));
            assert_eq!(pb.write(&[byte]), 1);
        }
        fn drain(c: &mut Consumer<'_, BUF_SIZE>) -> Vec<u8> {
            let mut out = Vec::new();
            while let Some(byte) = c.get() {
                out.push(byte);
            }
            out
        }
        assert_eq!(drain(&mut ca), drain(&mut cb));
    }

    #[test]
    fn block_drain_reproduces_input() {
        let mut f = Fifo::<8>::new();
        start_at(&mut f, 5);
        let (mut p, mut c) = f.split();
        let input = b"hello!!";
        assert_eq!(p.write(input), input.len());

        let mut out = Vec::new();
        let mut blocks = 0;
        loop {
            let block = c.read_block();
            if block.is_empty() {
                break;
            }
            out.extend_from_slice(block);
            let n = block.len();
            c.free(n);
            blocks += 1;
        }
        assert_eq!(out, input);
        assert_eq!(blocks, 2);
        assert!(c.is_empty());
    }

    #[test]
    fn interleaved_put_get_preserves_order() {
        let mut f = Fifo::<3>::new();
        let (mut p, mut c) = f.split();
        let mut out = Vec::new();
        for byte in 0..50u8 {
            while !p.put(byte) {
                out.push(c.get().unwrap());
            }
        }
        while let Some(byte) = c.get() {
            out.push(byte);
        }
        assert_eq!(out, (0..50).collect::<Vec<u8>>());
    }

    #[test]
    fn threads_transfer_every_byte() {
        let mut f = Fifo::<16>::new();
        let (mut p, mut c) = f.split();
        let input: Vec<u8> = (0..=255).cycle().take(10_000).collect();

        let out = std::thread::scope(|s| {
            s.spawn(|| {
                let mut pos = 0;
                while pos < input.len() {
                    pos += p.write(&input[pos..]);
                }
            });
            let reader = s.spawn(move || {
                let mut out = Vec::new();
                while out.len() < 10_000 {
                    let block = c.read_block();
                    out.extend_from_slice(block);
                    let n = block.len();
                    c.free(n);
                }
                out
            });
            reader.join().unwrap()
        });
        assert_eq!(out, input);
    }
}
