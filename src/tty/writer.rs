use super::{IrqMask, TtyWrite, TxDma, TxLink, WriteMode};
use crate::fifo::Producer;
use core::fmt;

/// Writing end of the DMA driven TTY.
///
/// Pushes bytes into the transmit queue and kicks the [`TxLink`] whenever it
/// is idle. Depending on the [`WriteMode`] a full queue either makes the
/// writer spin until the DMA interrupt freed space, or cuts the write short.
/// Bytes that did not fit in non-blocking mode are counted in
/// [`TxLink::lost`].
///
/// A return from [`TtyWriter::write`] means the bytes are in the pipeline, not
/// that they are on the wire.
pub struct TtyWriter<'a, D, M, const N: usize> {
    producer: Producer<'a, N>,
    link: &'a TxLink<'a, D, N>,
    mask: M,
    mode: WriteMode,
}

impl<'a, D: TxDma, M: IrqMask, const N: usize> TtyWriter<'a, D, M, N> {
    /// Creates a writer feeding `link` through `producer`.
    ///
    /// `producer` must belong to the queue `link` drains, and `mask` must mask
    /// the interrupt that calls [`TxLink::on_transfer_event`].
    pub fn new(producer: Producer<'a, N>, link: &'a TxLink<'a, D, N>, mask: M, mode: WriteMode) -> Self {
        TtyWriter {
            producer,
            link,
            mask,
            mode,
        }
    }

    /// The configured write mode.
    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Changes the write mode.
    pub fn set_mode(&mut self, mode: WriteMode) {
        self.mode = mode;
    }

    /// Writes `data` in the configured [`WriteMode`].
    ///
    /// In blocking mode this returns `data.len()` once every byte was accepted.
    /// There is no timeout: if the transfer-complete interrupt cannot preempt
    /// the caller this spins forever.
    pub fn write(&mut self, data: &[u8]) -> usize {
        self.write_with(data, self.mode)
    }

    /// Writes what fits right now, whatever the configured mode.
    pub fn try_write(&mut self, data: &[u8]) -> usize {
        self.write_with(data, WriteMode::NonBlocking)
    }

    fn write_with(&mut self, data: &[u8], mode: WriteMode) -> usize {
        let mut done = 0;

        loop {
            // The check for an idle link and the arming must not interleave with
            // the completion interrupt, or the wake-up for new data is lost.
            self.mask.mask();
            done += match &data[done..] {
                [byte] => usize::from(self.producer.put(*byte)),
                rest => self.producer.write(rest),
            };
            // SAFETY: The transfer-complete interrupt is masked.
            unsafe { self.link.kick() };
            self.mask.unmask();

            if mode == WriteMode::NonBlocking || done == data.len() {
                break;
            }
            while self.producer.free_space() == 0 {
                core::hint::spin_loop();
            }
        }

        if done < data.len() {
            self.link.record_lost(data.len() - done);
        }
        done
    }

    /// Number of free bytes in the transmit queue.
    pub fn free_space(&self) -> usize {
        self.producer.free_space()
    }

    /// Number of bytes dropped because the transmit queue was full.
    pub fn lost(&self) -> u32 {
        self.link.lost()
    }
}

impl<D: TxDma, M: IrqMask, const N: usize> TtyWrite for TtyWriter<'_, D, M, N> {
    fn write(&mut self, data: &[u8]) -> usize {
        TtyWriter::write(self, data)
    }
}

impl<D: TxDma, M: IrqMask, const N: usize> fmt::Write for TtyWriter<'_, D, M, N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.send_data(s.as_bytes()).map_err(|_| fmt::Error)
    }
}
