//! Buffered serial terminal (TTY).
//!
//! Two [`Fifo`](crate::fifo::Fifo)s carry the bytes:
//!
//! - Transmit: application code pushes through [`TtyWriter`], the
//!   [`TxLink`] drains the queue with DMA block transfers straight out of the
//!   queue storage and re-arms itself from the transfer-complete interrupt
//!   until the queue is empty.
//! - Receive: the byte-ready interrupt pushes into the queue through
//!   [`RxLink`], application code pulls through [`TtyReader`].
//!
//! Without DMA or receive interrupts [`DirectWriter`] and [`DirectReader`]
//! poll the hardware instead.
//!
//! The hardware is reached through the traits in this module, the STM32F446
//! implementation lives in [`crate::board::tty`].

mod direct;
mod rx;
mod tx;
mod writer;

pub use direct::{DirectReader, DirectWriter};
pub use rx::{RxLink, TtyReader};
pub use tx::TxLink;
pub use writer::TtyWriter;

/// A DMA engine moving blocks of memory to the transmit data register.
pub trait TxDma {
    /// Starts a transfer of `block`.
    ///
    /// The engine keeps reading `block` after this call returns. The caller
    /// guarantees the memory stays valid and unchanged until the transfer
    /// completes.
    fn start(&mut self, block: &[u8]);

    /// Disables the stream after a completed transfer.
    fn stop(&mut self);
}

/// Masks the interrupt that signals completed transmit transfers.
pub trait IrqMask {
    /// Prevents the interrupt from running. Pending events are kept.
    fn mask(&self);

    /// Allows the interrupt to run again.
    fn unmask(&self);
}

/// Polled transmit side of a serial port.
pub trait SerialTx {
    /// Returns `true` if the data register can take a byte.
    fn tx_ready(&self) -> bool;

    /// Writes a byte to the data register.
    fn write_byte(&mut self, byte: u8);
}

/// Polled receive side of a serial port.
pub trait SerialRx {
    /// Returns `true` if a received byte is waiting in the data register.
    fn rx_ready(&self) -> bool;

    /// Reads the received byte.
    fn read_byte(&mut self) -> u8;
}

/// How [`TtyWriter::write`] deals with a full transmit queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum WriteMode {
    /// Wait until the DMA made room and accept every byte.
    Blocking,
    /// Accept what fits and return a short count.
    NonBlocking,
}

impl Default for WriteMode {
    fn default() -> Self {
        if cfg!(feature = "tty-blocking") {
            WriteMode::Blocking
        } else {
            WriteMode::NonBlocking
        }
    }
}

/// Hardware events reported by the transmit DMA interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum TransferEvent {
    /// The armed block was transferred.
    Complete,
    /// The stream stopped on a transfer error.
    Error,
}

/// A DMA block transfer failed. The stream state is unknown afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct TransferError;

/// Error returned by [`TtyWrite::send_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum TtyError {
    /// Only part of the data was accepted into the transmit path.
    Incomplete {
        /// Number of leading bytes that were accepted.
        accepted: usize,
    },
}

/// Byte stream output of a TTY.
pub trait TtyWrite {
    /// Hands `data` to the transmit path and returns the number of bytes
    /// accepted.
    fn write(&mut self, data: &[u8]) -> usize;

    /// Like [`TtyWrite::write`] but fails unless every byte was accepted.
    fn send_data(&mut self, data: &[u8]) -> Result<(), TtyError> {
        let accepted = self.write(data);
        if accepted == data.len() {
            Ok(())
        } else {
            Err(TtyError::Incomplete { accepted })
        }
    }
}

/// Byte stream input of a TTY.
pub trait TtyRead {
    /// Returns `true` if [`TtyRead::get_char`] would not wait.
    fn data_available(&self) -> bool;

    /// Returns the next received byte, if any.
    fn try_get_char(&mut self) -> Option<u8>;

    /// Waits for the next received byte.
    ///
    /// Spins without bound, there is no timeout.
    fn get_char(&mut self) -> u8 {
        loop {
            if let Some(byte) = self.try_get_char() {
                return byte;
            }
            core::hint::spin_loop();
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    extern crate std;

    use super::*;
    use core::sync::atomic::{AtomicBool, Ordering};
    use std::{sync::Mutex, vec::Vec};

    /// State of the simulated DMA stream.
    #[derive(Default)]
    pub struct DmaState {
        /// Address and length of the running transfer.
        pub active: Option<(usize, usize)>,
        pub started: usize,
        pub stopped: usize,
    }

    pub struct MockDma<'s>(pub &'s Mutex<DmaState>);

    impl TxDma for MockDma<'_> {
        fn start(&mut self, block: &[u8]) {
            let mut state = self.0.lock().unwrap();
            assert!(state.active.is_none(), "transfer started twice");
            assert!(!block.is_empty(), "empty transfer started");
            state.active = Some((block.as_ptr() as usize, block.len()));
            state.started += 1;
        }

        fn stop(&mut self) {
            self.0.lock().unwrap().stopped += 1;
        }
    }

    /// Masking modelled as a spin lock which the simulated interrupt takes too.
    pub struct SpinMask<'a>(pub &'a AtomicBool);

    impl IrqMask for SpinMask<'_> {
        fn mask(&self) {
            while self
                .0
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                core::hint::spin_loop();
            }
        }

        fn unmask(&self) {
            self.0.store(false, Ordering::Release);
        }
    }

    /// Finishes the running transfer like the hardware would: the engine reads
    /// the block at completion time, then the interrupt runs.
    ///
    /// Returns the transferred bytes, or `None` if no transfer was running.
    pub fn complete<const N: usize>(
        link: &TxLink<'_, MockDma<'_>, N>,
        dma: &Mutex<DmaState>,
    ) -> Option<Vec<u8>> {
        let (addr, len) = dma.lock().unwrap().active.take()?;
        // SAFETY: The address was handed out by `Consumer::read_block` and the
        // bytes stay reserved until the completion below.
        let bytes = unsafe { core::slice::from_raw_parts(addr as *const u8, len) }.to_vec();
        // SAFETY: Tests call this from a single context standing in for the
        // interrupt.
        unsafe { link.on_transfer_event(TransferEvent::Complete) }.unwrap();
        Some(bytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Sink {
        room: usize,
    }

    impl TtyWrite for Sink {
        fn write(&mut self, data: &[u8]) -> usize {
            data.len().min(self.room)
        }
    }

    #[test]
    fn send_data_reports_short_write() {
        assert_eq!(Sink { room: 8 }.send_data(b"hello"), Ok(()));
        assert_eq!(
            Sink { room: 3 }.send_data(b"hello"),
            Err(TtyError::Incomplete { accepted: 3 })
        );
    }

    #[test]
    fn default_write_mode_follows_feature() {
        let expected = if cfg!(feature = "tty-blocking") {
            WriteMode::Blocking
        } else {
            WriteMode::NonBlocking
        };
        assert_eq!(WriteMode::default(), expected);
    }
}
