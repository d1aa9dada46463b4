use super::{SerialRx, SerialTx, TtyRead, TtyWrite};
use core::fmt;

/// Unbuffered TTY output that waits for the data register on every byte.
///
/// Used when no DMA stream is available. Always accepts everything.
pub struct DirectWriter<S> {
    serial: S,
}

impl<S: SerialTx> DirectWriter<S> {
    /// Wraps the transmit side of a serial port.
    pub const fn new(serial: S) -> Self {
        DirectWriter { serial }
    }

    /// Writes every byte of `data`, returns `data.len()`.
    pub fn write(&mut self, data: &[u8]) -> usize {
        for &byte in data {
            while !self.serial.tx_ready() {
                core::hint::spin_loop();
            }
            self.serial.write_byte(byte);
        }
        data.len()
    }
}

impl<S: SerialTx> TtyWrite for DirectWriter<S> {
    fn write(&mut self, data: &[u8]) -> usize {
        DirectWriter::write(self, data)
    }
}

impl<S: SerialTx> fmt::Write for DirectWriter<S> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s.as_bytes());
        Ok(())
    }
}

/// Unbuffered TTY input polling the data register.
pub struct DirectReader<S> {
    serial: S,
}

impl<S: SerialRx> DirectReader<S> {
    /// Wraps the receive side of a serial port.
    pub const fn new(serial: S) -> Self {
        DirectReader { serial }
    }
}

impl<S: SerialRx> TtyRead for DirectReader<S> {
    fn data_available(&self) -> bool {
        self.serial.rx_ready()
    }

    fn try_get_char(&mut self) -> Option<u8> {
        self.serial.rx_ready().then(|| self.serial.read_byte())
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::*;
    use core::cell::Cell;
    use core::fmt::Write as _;
    use std::{collections::VecDeque, vec::Vec};

    /// A port whose data register frees up every other poll.
    #[derive(Default)]
    struct SlowPort {
        polls: Cell<u32>,
        wire: Vec<u8>,
        rx: VecDeque<u8>,
    }

    impl SerialTx for SlowPort {
        fn tx_ready(&self) -> bool {
            self.polls.set(self.polls.get() + 1);
            self.polls.get() % 2 == 0
        }

        fn write_byte(&mut self, byte: u8) {
            self.wire.push(byte);
        }
    }

    impl SerialRx for &mut SlowPort {
        fn rx_ready(&self) -> bool {
            !self.rx.is_empty()
        }

        fn read_byte(&mut self) -> u8 {
            self.rx.pop_front().unwrap()
        }
    }

    #[test]
    fn writes_everything_in_order() {
        let mut w = DirectWriter::new(SlowPort::default());
        assert_eq!(w.write(b"abc"), 3);
        write!(w, "{}-{}", 1, 2).unwrap();
        assert_eq!(w.send_data(b"!"), Ok(()));
        assert_eq!(w.serial.wire, b"abc1-2!");
        assert!(w.serial.polls.get() >= 14);
    }

    #[test]
    fn reads_what_arrived() {
        let mut port = SlowPort::default();
        port.rx.extend(*b"ok");
        let mut r = DirectReader::new(&mut port);

        assert!(r.data_available());
        assert_eq!(r.get_char(), b'o');
        assert_eq!(r.try_get_char(), Some(b'k'));
        assert_eq!(r.try_get_char(), None);
        assert!(!r.data_available());
    }
}
