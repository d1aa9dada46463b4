//! The board TTY: USART2 on the ST-LINK virtual COM port.
//!
//! Transmit goes through DMA1 stream 6 channel 4 out of a
//! [`TTY_TX_BUF_SIZE`](config::TTY_TX_BUF_SIZE) byte queue, receive through
//! the RXNE interrupt into a [`TTY_RX_BUF_SIZE`](config::TTY_RX_BUF_SIZE) byte
//! queue. Without the `tty-tx-dma` or `tty-rx-irq` features the respective
//! direction polls the data register instead.
//!
//! The free functions here reach a single static writer and reader. They
//! return early (0 bytes written, no data) before [`init`], and refuse a
//! nested call from an interrupt that preempted another call in the same
//! direction instead of corrupting the queue. Refused writes count towards
//! [`tx_lost`].

use super::pac;
use crate::{
    InitError, config,
    tty::{SerialRx, SerialTx, TtyError, TtyRead, TtyWrite},
};
use core::{
    cell::UnsafeCell,
    fmt,
    mem::MaybeUninit,
    ops::Deref,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

#[cfg(any(feature = "tty-tx-dma", feature = "tty-rx-irq"))]
use super::enable_irq;
#[cfg(any(feature = "tty-tx-dma", feature = "tty-rx-irq"))]
use crate::fifo::Fifo;
#[cfg(any(feature = "tty-tx-dma", feature = "tty-rx-irq"))]
use pac::Interrupt;

#[cfg(feature = "tty-tx-dma")]
use crate::{
    fatal::{Fatal, Source, fatal},
    tty::{IrqMask, TransferEvent, TxDma, TxLink, TtyWriter, WriteMode},
};
#[cfg(not(feature = "tty-tx-dma"))]
use crate::tty::DirectWriter;

#[cfg(feature = "tty-rx-irq")]
use crate::tty::{RxLink, TtyReader};
#[cfg(not(feature = "tty-rx-irq"))]
use crate::tty::DirectReader;

fn usart2() -> &'static <pac::USART2 as Deref>::Target {
    // SAFETY: Fixed USART2 address. The data register is shared by the writer
    // and the reader, the control registers are only written by `init` and the
    // DMA stream.
    unsafe { &*pac::USART2::ptr() }
}

#[cfg(feature = "tty-tx-dma")]
mod dma {
    use super::{Deref, pac};

    /// DMA1 stream 6 channel 4 is USART2 TX.
    pub(super) const STREAM: usize = 6;
    pub(super) const CHANNEL: u8 = 4;
    /// Memory to peripheral, in CR.DIR.
    pub(super) const DIR_M2P: u8 = 0b01;
    /// High priority, in CR.PL.
    pub(super) const PL_HIGH: u8 = 0b10;

    pub(super) fn dma1() -> &'static <pac::DMA1 as Deref>::Target {
        // SAFETY: Fixed DMA1 address. Only stream 6 and its flags are used.
        unsafe { &*pac::DMA1::ptr() }
    }

    /// Clears every stream 6 flag.
    pub(super) fn clear_flags() {
        dma1().hifcr.write(|w| {
            w.ctcif6()
                .set_bit()
                .chtif6()
                .set_bit()
                .cteif6()
                .set_bit()
                .cdmeif6()
                .set_bit()
                .cfeif6()
                .set_bit()
        });
    }
}

/// USART2 data register access.
pub struct Usart2;

impl SerialTx for Usart2 {
    fn tx_ready(&self) -> bool {
        usart2().sr.read().txe().bit_is_set()
    }

    fn write_byte(&mut self, byte: u8) {
        usart2().dr.write(|w| w.dr().bits(u16::from(byte)));
    }
}

impl SerialRx for Usart2 {
    fn rx_ready(&self) -> bool {
        usart2().sr.read().rxne().bit_is_set()
    }

    fn read_byte(&mut self) -> u8 {
        usart2().dr.read().dr().bits() as u8
    }
}

/// DMA1 stream 6, feeding the USART2 data register.
#[cfg(feature = "tty-tx-dma")]
pub struct Dma1Stream6;

#[cfg(feature = "tty-tx-dma")]
impl TxDma for Dma1Stream6 {
    fn start(&mut self, block: &[u8]) {
        let stream = &dma::dma1().st[dma::STREAM];
        // SAFETY: The block stays valid until the transfer completes, see
        // `TxDma::start`. Addresses are 32 bits wide on this chip.
        stream
            .m0ar
            .write(|w| unsafe { w.m0a().bits(block.as_ptr().expose_provenance() as u32) });
        // NDTR is 16 bits wide, the queue is smaller than that.
        // SAFETY: Any count is valid while the stream is disabled.
        stream.ndtr.write(|w| unsafe { w.ndt().bits(block.len() as u16) });
        usart2().cr3.modify(|_, w| w.dmat().set_bit());
        stream.cr.modify(|_, w| w.en().set_bit());
    }

    fn stop(&mut self) {
        usart2().cr3.modify(|_, w| w.dmat().clear_bit());
        dma::dma1().st[dma::STREAM].cr.modify(|_, w| w.en().clear_bit());
    }
}

/// Masks the DMA1 stream 6 interrupt in the NVIC.
#[cfg(feature = "tty-tx-dma")]
pub struct TxIrqMask;

#[cfg(feature = "tty-tx-dma")]
impl IrqMask for TxIrqMask {
    fn mask(&self) {
        cortex_m::peripheral::NVIC::mask(Interrupt::DMA1_STREAM6);
        // The write to ICER must take effect before the next instruction.
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    fn unmask(&self) {
        // SAFETY: The handler only touches the link, which is built to share
        // with the foreground.
        unsafe { cortex_m::peripheral::NVIC::unmask(Interrupt::DMA1_STREAM6) };
    }
}

#[cfg(feature = "tty-tx-dma")]
type Writer = TtyWriter<'static, Dma1Stream6, TxIrqMask, { config::TTY_TX_BUF_SIZE }>;
#[cfg(not(feature = "tty-tx-dma"))]
type Writer = DirectWriter<Usart2>;

#[cfg(feature = "tty-rx-irq")]
type Reader = TtyReader<'static, { config::TTY_RX_BUF_SIZE }>;
#[cfg(not(feature = "tty-rx-irq"))]
type Reader = DirectReader<Usart2>;

/// Storage for a value created at runtime and never dropped.
struct Slot<T> {
    value: UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: Access goes through the unsafe methods below, callers synchronize.
unsafe impl<T> Sync for Slot<T> {}

impl<T> Slot<T> {
    const fn new() -> Self {
        Slot {
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// # Safety
    ///
    /// Must be called at most once, before any other access.
    #[allow(clippy::mut_from_ref)]
    unsafe fn write(&'static self, value: T) -> &'static mut T {
        // SAFETY: The caller guarantees no other access exists yet.
        unsafe { (*self.value.get()).write(value) }
    }

    /// # Safety
    ///
    /// [`Slot::write`] must have completed and no mutable reference obtained
    /// through [`Slot::get_mut`] may be alive.
    unsafe fn get(&'static self) -> &'static T {
        // SAFETY: Initialized and shared per the caller.
        unsafe { (*self.value.get()).assume_init_ref() }
    }

    /// # Safety
    ///
    /// [`Slot::write`] must have completed and the caller must hold the only
    /// reference for as long as the returned one is used.
    #[allow(clippy::mut_from_ref)]
    unsafe fn get_mut(&'static self) -> &'static mut T {
        // SAFETY: Initialized and exclusive per the caller.
        unsafe { (*self.value.get()).assume_init_mut() }
    }
}

/// Why [`Lent::lend`] did not run its closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refused {
    /// The value was not created yet.
    Down,
    /// The value is in use by the context this call preempted.
    Busy,
}

/// A [`Slot`] handed to one caller at a time.
///
/// A call that preempts another one in progress is refused rather than given a
/// second mutable reference.
struct Lent<T> {
    slot: Slot<T>,
    ready: AtomicBool,
    busy: AtomicBool,
    /// Bytes of refused writes, saturating.
    refused: AtomicU32,
}

impl<T> Lent<T> {
    const fn new() -> Self {
        Lent {
            slot: Slot::new(),
            ready: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            refused: AtomicU32::new(0),
        }
    }

    /// # Safety
    ///
    /// Must be called at most once.
    unsafe fn init(&'static self, value: T) {
        // SAFETY: `ready` is still false, nobody else looks at the slot.
        unsafe { self.slot.write(value) };
        self.ready.store(true, Ordering::Release);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn lend<R>(&'static self, f: impl FnOnce(&mut T) -> R) -> Result<R, Refused> {
        if !self.is_ready() {
            return Err(Refused::Down);
        }
        if self.busy.swap(true, Ordering::Acquire) {
            return Err(Refused::Busy);
        }
        // SAFETY: Initialized, and the busy flag makes this the only reference.
        let r = f(unsafe { self.slot.get_mut() });
        self.busy.store(false, Ordering::Release);
        Ok(r)
    }

    /// Like [`Lent::lend`] for a write of `bytes`. If the value is in use
    /// the bytes are dropped and counted in [`Lent::refused`].
    fn lend_for_write<R>(&'static self, bytes: usize, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        match self.lend(f) {
            Ok(r) => Some(r),
            Err(Refused::Busy) => {
                let bytes = u32::try_from(bytes).unwrap_or(u32::MAX);
                let _ = self
                    .refused
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                        Some(n.saturating_add(bytes))
                    });
                None
            }
            Err(Refused::Down) => None,
        }
    }

    fn refused(&self) -> u32 {
        self.refused.load(Ordering::Relaxed)
    }
}

#[cfg(feature = "tty-tx-dma")]
static TX_FIFO: Slot<Fifo<{ config::TTY_TX_BUF_SIZE }>> = Slot::new();
#[cfg(feature = "tty-tx-dma")]
static TX_LINK: Slot<TxLink<'static, Dma1Stream6, { config::TTY_TX_BUF_SIZE }>> = Slot::new();
#[cfg(feature = "tty-rx-irq")]
static RX_FIFO: Slot<Fifo<{ config::TTY_RX_BUF_SIZE }>> = Slot::new();
#[cfg(feature = "tty-rx-irq")]
static RX_LINK: Slot<RxLink<'static, { config::TTY_RX_BUF_SIZE }>> = Slot::new();

static WRITER: Lent<Writer> = Lent::new();
static READER: Lent<Reader> = Lent::new();

static INIT_STARTED: AtomicBool = AtomicBool::new(false);

/// Brings up USART2 at `baud` 8N1 and the transmit and receive paths.
///
/// The pins must be configured already, see [`super::gpio::init`].
///
/// # Errors
///
/// - [`InitError::InvalidBaudRate`] if `baud` cannot be generated from the
///   APB1 clock. A later call with a valid rate still succeeds.
/// - [`InitError::AlreadyInitialized`] on every call after the first
///   successful one.
pub fn init(baud: u32) -> Result<(), InitError> {
    let brr = brr(config::APB1_HZ, baud).ok_or(InitError::InvalidBaudRate)?;
    if INIT_STARTED.swap(true, Ordering::AcqRel) {
        return Err(InitError::AlreadyInitialized);
    }

    let usart = usart2();
    usart.cr1.reset();
    usart
        .brr
        .write(|w| w.div_mantissa().bits(brr >> 4).div_fraction().bits((brr & 0xF) as u8));
    usart.cr1.write(|w| w.ue().enabled().te().enabled().re().enabled());

    #[cfg(feature = "tty-tx-dma")]
    {
        let stream = &dma::dma1().st[dma::STREAM];
        stream.cr.reset();
        while stream.cr.read().en().bit_is_set() {}
        dma::clear_flags();
        // SAFETY: The data register address is valid for the lifetime of the
        // program.
        stream
            .par
            .write(|w| unsafe { w.pa().bits((&raw const usart.dr).expose_provenance() as u32) });
        // SAFETY: Channel, direction and priority values are from the
        // reference manual.
        stream.cr.write(|w| unsafe {
            w.chsel()
                .bits(dma::CHANNEL)
                .pl()
                .bits(dma::PL_HIGH)
                .minc()
                .set_bit()
                .dir()
                .bits(dma::DIR_M2P)
                .tcie()
                .set_bit()
                .teie()
                .set_bit()
        });

        // SAFETY: `INIT_STARTED` lets exactly one caller get here.
        let fifo = unsafe { TX_FIFO.write(Fifo::new()) };
        let (producer, consumer) = fifo.split();
        // SAFETY: As above.
        let link = unsafe { TX_LINK.write(TxLink::new(consumer, Dma1Stream6)) };
        // SAFETY: As above.
        unsafe { WRITER.init(TtyWriter::new(producer, link, TxIrqMask, WriteMode::default())) };

        enable_irq(Interrupt::DMA1_STREAM6, config::IRQ_PRIO_TTY_TX_DMA);
    }
    #[cfg(not(feature = "tty-tx-dma"))]
    {
        // SAFETY: `INIT_STARTED` lets exactly one caller get here.
        unsafe { WRITER.init(DirectWriter::new(Usart2)) };
    }

    #[cfg(feature = "tty-rx-irq")]
    {
        // SAFETY: `INIT_STARTED` lets exactly one caller get here.
        let fifo = unsafe { RX_FIFO.write(Fifo::new()) };
        let (producer, consumer) = fifo.split();
        // SAFETY: As above.
        let link = unsafe { RX_LINK.write(RxLink::new(producer)) };
        // SAFETY: As above.
        unsafe { READER.init(TtyReader::new(consumer, link)) };

        enable_irq(Interrupt::USART2, config::IRQ_PRIO_TTY_USART);
        usart.cr1.modify(|_, w| w.rxneie().enabled());
    }
    #[cfg(not(feature = "tty-rx-irq"))]
    {
        // SAFETY: `INIT_STARTED` lets exactly one caller get here.
        unsafe { READER.init(DirectReader::new(Usart2)) };
    }

    debug!("tty up at {} baud", baud);
    Ok(())
}

/// BRR value for 16x oversampling: `pclk / baud` rounded, the low four bits
/// being the fraction.
///
/// `None` unless the divider lies between 1 and the 12 bit mantissa maximum.
fn brr(pclk: u32, baud: u32) -> Option<u16> {
    if baud == 0 {
        return None;
    }
    let div = (u64::from(pclk) + u64::from(baud / 2)) / u64::from(baud);
    u16::try_from(div).ok().filter(|div| *div >= 16)
}

/// Writes `data`, in blocking or non-blocking mode depending on the
/// `tty-blocking` feature, and returns the number of bytes accepted.
pub fn write(data: &[u8]) -> usize {
    WRITER.lend_for_write(data.len(), |w| w.write(data)).unwrap_or(0)
}

/// Writes what fits into the transmit queue right now.
///
/// Safe to call with interrupts disabled, which makes it the path for the
/// defmt logger. Without `tty-tx-dma` this polls the data register.
pub fn try_write(data: &[u8]) -> usize {
    #[cfg(feature = "tty-tx-dma")]
    let written = WRITER.lend_for_write(data.len(), |w| w.try_write(data));
    #[cfg(not(feature = "tty-tx-dma"))]
    let written = WRITER.lend_for_write(data.len(), |w| w.write(data));
    written.unwrap_or(0)
}

/// Writes `data` and fails unless every byte was accepted.
pub fn send_data(data: &[u8]) -> Result<(), TtyError> {
    WRITER
        .lend_for_write(data.len(), |w| w.send_data(data))
        .unwrap_or(Err(TtyError::Incomplete { accepted: 0 }))
}

/// Returns `true` if [`get_char`] would not wait.
pub fn data_available() -> bool {
    READER.lend(|r| r.data_available()).unwrap_or(false)
}

/// Returns the next received byte, if any.
pub fn try_get_char() -> Option<u8> {
    READER.lend(|r| r.try_get_char()).ok().flatten()
}

/// Waits for the next received byte. There is no timeout.
pub fn get_char() -> u8 {
    loop {
        if let Some(byte) = try_get_char() {
            return byte;
        }
        core::hint::spin_loop();
    }
}

/// Bytes dropped on the transmit side: those that did not fit into the queue
/// and those of writes refused because they preempted another write.
pub fn tx_lost() -> u32 {
    #[cfg(feature = "tty-tx-dma")]
    let queue = if WRITER.is_ready() {
        // SAFETY: The writer is only created after the link, and nothing takes
        // a mutable reference to the link.
        unsafe { TX_LINK.get() }.lost()
    } else {
        0
    };
    #[cfg(not(feature = "tty-tx-dma"))]
    let queue: u32 = 0;
    queue.saturating_add(WRITER.refused())
}

/// Bytes dropped on the receive side because the queue was full.
#[cfg(feature = "tty-rx-irq")]
pub fn rx_lost() -> u32 {
    if !READER.is_ready() {
        return 0;
    }
    // SAFETY: The reader is only created after the link, and nothing takes a
    // mutable reference to the link.
    unsafe { RX_LINK.get() }.lost()
}

/// `DMA1_STREAM6` handler.
#[cfg(feature = "tty-tx-dma")]
pub fn on_dma1_stream6() {
    let status = dma::dma1().hisr.read();
    let event = if status.teif6().bit_is_set() || status.dmeif6().bit_is_set() {
        TransferEvent::Error
    } else if status.tcif6().bit_is_set() {
        TransferEvent::Complete
    } else {
        fatal(Fatal::UnexpectedInterrupt(Source::TtyTxDma))
    };
    dma::clear_flags();

    // SAFETY: The interrupt is only unmasked after the link was stored, and the
    // writer masks it around every `kick`.
    let result = unsafe { TX_LINK.get().on_transfer_event(event) };
    if result.is_err() {
        fatal(Fatal::TransferError);
    }
}

/// `USART2` handler.
#[cfg(feature = "tty-rx-irq")]
pub fn on_usart2() {
    let usart = usart2();
    // Reading SR then DR also clears an overrun.
    if usart.sr.read().rxne().bit_is_set() {
        let byte = usart.dr.read().dr().bits() as u8;
        // SAFETY: Only this interrupt feeds the receive queue. It is enabled
        // after the link was stored.
        unsafe { RX_LINK.get().on_byte_received(byte) };
    }
}

/// [`fmt::Write`] into the TTY.
///
/// Fails if any part of the output was not accepted.
pub struct Stdout;

impl fmt::Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        send_data(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

/// Formats to the board TTY, ignoring errors.
#[macro_export]
macro_rules! tty_print {
    ($($arg:tt)*) => {{
        let _ = ::core::fmt::Write::write_fmt(
            &mut $crate::board::tty::Stdout,
            ::core::format_args!($($arg)*),
        );
    }};
}

/// Like [`tty_print!`], with a trailing newline.
#[macro_export]
macro_rules! tty_println {
    () => {
        $crate::tty_print!("\n")
    };
    ($($arg:tt)*) => {
        $crate::tty_print!("{}\n", ::core::format_args!($($arg)*))
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn brr_for_console_baud_rates() {
        // 50 MHz / 115200 = 434.03
        assert_eq!(brr(config::APB1_HZ, 115_200), Some(434));
        // 50 MHz / 9600 = 5208.33
        assert_eq!(brr(config::APB1_HZ, 9_600), Some(5208));
        // Rounds to nearest.
        // 1000 / 60 = 16.67
        assert_eq!(brr(1_000, 60), Some(17));
    }

    #[test]
    fn brr_out_of_range() {
        assert_eq!(brr(config::APB1_HZ, 0), None);
        // Faster than pclk / 16.
        assert_eq!(brr(config::APB1_HZ, config::APB1_HZ / 8), None);
        assert_eq!(brr(config::APB1_HZ, config::APB1_HZ / 16), Some(16));
        // Divider above 16 bits.
        assert_eq!(brr(config::APB1_HZ, 300), None);
        assert_eq!(brr(config::APB1_HZ, u32::MAX), None);
    }

    #[test]
    fn invalid_baud_rate_is_rejected_before_touching_hardware() {
        assert_eq!(init(0), Err(InitError::InvalidBaudRate));
        assert_eq!(init(config::APB1_HZ), Err(InitError::InvalidBaudRate));
        assert!(!INIT_STARTED.load(Ordering::Relaxed));
    }

    #[test]
    fn calls_before_init_are_refused() {
        assert_eq!(write(b"early"), 0);
        assert_eq!(try_write(b"early"), 0);
        assert_eq!(send_data(b"x"), Err(TtyError::Incomplete { accepted: 0 }));
        assert!(!data_available());
        assert_eq!(try_get_char(), None);
        // Nothing was created that could have dropped them.
        assert_eq!(tx_lost(), 0);
    }

    #[test]
    fn nested_write_is_refused_and_counted() {
        static VALUE: Lent<u32> = Lent::new();

        assert_eq!(VALUE.lend(|v| *v), Err(Refused::Down));
        assert_eq!(VALUE.lend_for_write(4, |v| *v), None);
        assert_eq!(VALUE.refused(), 0);

        // SAFETY: Only call.
        unsafe { VALUE.init(7) };
        let nested = VALUE.lend(|v| {
            *v += 1;
            // An interrupt writing while the foreground is.
            VALUE.lend_for_write(5, |v| *v)
        });
        assert_eq!(nested, Ok(None));
        assert_eq!(VALUE.refused(), 5);
        assert_eq!(VALUE.lend(|v| *v), Ok(8));
        assert_eq!(VALUE.lend_for_write(3, |v| *v), Some(8));
        assert_eq!(VALUE.refused(), 5);
    }

    #[test]
    fn refused_bytes_saturate() {
        static VALUE: Lent<()> = Lent::new();

        // SAFETY: Only call.
        unsafe { VALUE.init(()) };
        let _ = VALUE.lend(|_| {
            VALUE.lend_for_write(usize::MAX, |_| ());
            VALUE.lend_for_write(1, |_| ());
        });
        assert_eq!(VALUE.refused(), u32::MAX);
    }
}
