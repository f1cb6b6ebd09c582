//! External collaborators the session controller consumes but does not
//! implement (spec.md §1, §6): the physical serial port, firmware/partition
//! sourcing, progress reporting, and the in-RAM stub loader image.

use crate::chip::Chip;

/// Options passed to [`SerialPort::open`].
#[derive(Debug, Clone, Copy)]
pub struct PortOptions {
    pub baud: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub flow: FlowControl,
    pub buffer: usize,
}

impl Default for PortOptions {
    fn default() -> Self {
        Self {
            baud: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            flow: FlowControl::None,
            buffer: 255,
        }
    }
}

/// Serial parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Serial flow-control setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    #[default]
    None,
    Hardware,
    Software,
}

/// The DTR/RTS control-line state used to pulse a hardware reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Signals {
    pub dtr: bool,
    pub rts: bool,
}

/// Vendor/product identification for a USB-serial adapter, used only by
/// the optional reconnection hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbPortInfo {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// The physical serial-port collaborator (spec.md §6).
///
/// This crate never implements this trait itself: opening ports, raw
/// reads/writes, and control-line toggling are all host concerns.
pub trait SerialPort {
    /// Open the port with the given options.
    fn open(&mut self, options: PortOptions) -> std::io::Result<()>;

    /// Close the port.
    fn close(&mut self) -> std::io::Result<()>;

    /// Set the DTR/RTS control lines, used for the reset pulse.
    fn set_signals(&mut self, signals: Signals) -> std::io::Result<()>;

    /// Non-blocking-friendly read: returns the number of bytes read, which
    /// may be zero if none are currently available. Implementations are
    /// expected to apply their own internal read timeout so this returns
    /// promptly rather than blocking indefinitely.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Write a buffer to the port.
    fn write(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Switch the baud rate on an already-open port.
    fn set_baud_rate(&mut self, baud: u32) -> std::io::Result<()>;

    /// Vendor/product id pair, when known.
    fn info(&self) -> Option<UsbPortInfo>;
}

/// A single progress or state-change event the session may emit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionEvent {
    /// Progress through the sync handshake, `0..=100`.
    SyncProgress { progress: u8 },
    /// Progress through flashing a single partition, `0..=100`.
    FlashProgress { progress: u8, partition: String },
    /// Cumulative progress through flashing an entire image, `0..=100`.
    FlashImageProgress {
        progress: u8,
        partition: Option<String>,
    },
}

/// Fire-and-forget event sink; delivery order matches emission order.
pub trait EventSink {
    /// Handle one event.
    fn emit(&mut self, event: SessionEvent);
}

/// An event sink that discards every event.
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&mut self, _event: SessionEvent) {}
}

/// Resolves a named flash target to the bytes that should be written
/// there. The core never reads firmware from disk or network itself.
pub trait PartitionSource {
    /// Read the full contents that should be flashed at `name`.
    fn read(&mut self, name: &str) -> std::io::Result<Vec<u8>>;
}

/// The in-RAM stub loader image for a given chip (spec.md §6).
#[derive(Debug, Clone)]
pub struct StubDescriptor {
    /// Address the stub jumps to once loaded.
    pub entry: u32,
    /// Base address of the `.text` section.
    pub text_start: u32,
    /// `.text` section bytes.
    pub text: Vec<u8>,
    /// Base address of the `.data` section.
    pub data_start: u32,
    /// `.data` section bytes.
    pub data: Vec<u8>,
}

/// Resolves a [`Chip`] to its stub loader image. The stub binary may be
/// embedded, read from disk, or fetched over the network — all outside
/// this crate's scope.
pub trait StubProvider {
    /// Return the stub descriptor for `chip`, or `None` if unavailable.
    fn stub_for(&self, chip: Chip) -> Option<StubDescriptor>;
}
