//! The bootloader session controller (spec.md §4.4): reset, sync,
//! chip detection, stub upload, flash attach, and partition writes, all
//! driven as a linear sequence of blocking calls over a [`SerialPort`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::chip::{Chip, CHIP_MAGIC_REGISTER};
use crate::command::{Command, CommandType};
use crate::error::Error;
use crate::interfaces::{
    EventSink, PortOptions, SerialPort, SessionEvent, Signals, StubDescriptor, StubProvider,
};
use crate::packet::ResponsePacket;
use crate::slip::{self, Decoder};

const SYNC_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
const FLASH_DATA_TIMEOUT: Duration = Duration::from_secs(5);
const MEM_DATA_TIMEOUT: Duration = Duration::from_secs(1);
const OHAI_TIMEOUT: Duration = Duration::from_secs(2);

const SYNC_ATTEMPTS: u32 = 10;
const MEM_CHUNK_SIZE: usize = 1460;
const FLASH_BLOCK_SIZE: usize = 4096;

const OHAI: [u8; 4] = [0x4F, 0x48, 0x41, 0x49];

/// Poll interval while waiting for more bytes from a port whose `read`
/// returned zero. The port itself owns any real read timeout; this just
/// keeps the wait loop from spinning.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// The session's lifecycle state (spec.md §4.4).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionState {
    Disconnected,
    Connected,
    Synced,
    ChipKnown,
    StubRunning,
    FlashAttached,
    Flashing,
    Idle,
    Reset,
}

/// Which reset-pulse sequence to drive before sync and after flashing
/// (spec.md §6, §9 Open Question: offered as an explicit choice rather
/// than hard-coded).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ResetPulse {
    /// Skip the reset pulse entirely (e.g. the target is already in the
    /// bootloader).
    None,
    /// Classic two-step DTR/RTS sequence for USB-UART bridges.
    #[default]
    Classic,
    /// Extended five-step sequence recommended for native-USB chips
    /// (S3/C3/C6/H2).
    ExtendedUsb,
}

enum FrameWait {
    Frame(Vec<u8>),
    TimedOut,
    Closed,
}

/// A stateful client for the Espressif ROM/stub bootloader protocol,
/// generic over the concrete [`SerialPort`] implementation.
pub struct Session<P: SerialPort> {
    port: Option<P>,
    state: SessionState,
    connected: bool,
    synced: bool,
    chip: Option<Chip>,
    cancel: Arc<AtomicBool>,
    decoder: Decoder,
    frame_queue: VecDeque<Vec<u8>>,
}

impl<P: SerialPort> Default for Session<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: SerialPort> Session<P> {
    /// Create an empty session with no port attached.
    pub fn new() -> Self {
        Self {
            port: None,
            state: SessionState::Disconnected,
            connected: false,
            synced: false,
            chip: None,
            cancel: Arc::new(AtomicBool::new(false)),
            decoder: Decoder::new(),
            frame_queue: VecDeque::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The chip family, once known.
    pub fn chip(&self) -> Option<Chip> {
        self.chip
    }

    /// A clone of the cancellation handle; setting it aborts any
    /// in-flight blocking read with [`Error::Cancelled`].
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Attach a port to the session. Does not open it.
    pub fn request_port(&mut self, port: P) {
        self.port = Some(port);
    }

    /// Borrow the attached port, if any.
    pub fn port(&self) -> Option<&P> {
        self.port.as_ref()
    }

    /// Mutably borrow the attached port, if any.
    pub fn port_mut(&mut self) -> Option<&mut P> {
        self.port.as_mut()
    }

    /// Reassign the port reference, e.g. from a reconnection hook. Only
    /// permitted while the session is `Disconnected` (spec.md §5 "Shared
    /// resources").
    pub fn replace_port(&mut self, port: P) -> Result<(), Error> {
        if self.state != SessionState::Disconnected {
            return Err(Error::NotConnected);
        }
        self.port = Some(port);
        Ok(())
    }

    /// Open the attached port at 115200 8N1 and prepare the response
    /// stream. Returns [`Error::NotConnected`] if no port was attached.
    pub fn open(&mut self, options: PortOptions) -> Result<(), Error> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        port.open(options)?;
        self.connected = true;
        self.state = SessionState::Connected;
        self.decoder = Decoder::new();
        self.frame_queue.clear();
        self.cancel = Arc::new(AtomicBool::new(false));
        debug!("port opened at {} baud", options.baud);
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), Error> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    fn reset_pulse(&mut self, pulse: ResetPulse) -> Result<(), Error> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        match pulse {
            ResetPulse::None => {}
            ResetPulse::Classic => {
                port.set_signals(Signals { dtr: false, rts: true })?;
                std::thread::sleep(Duration::from_millis(100));
                port.set_signals(Signals { dtr: true, rts: false })?;
                std::thread::sleep(Duration::from_millis(100));
            }
            ResetPulse::ExtendedUsb => {
                port.set_signals(Signals { dtr: false, rts: false })?;
                std::thread::sleep(Duration::from_millis(100));
                port.set_signals(Signals { dtr: true, rts: false })?;
                std::thread::sleep(Duration::from_millis(200));
                port.set_signals(Signals { dtr: true, rts: true })?;
                std::thread::sleep(Duration::from_millis(200));
                port.set_signals(Signals { dtr: true, rts: false })?;
                std::thread::sleep(Duration::from_millis(200));
                port.set_signals(Signals { dtr: false, rts: false })?;
                std::thread::sleep(Duration::from_millis(100));
            }
        }
        Ok(())
    }

    fn write_command(&mut self, command: Command<'_>) -> Result<(), Error> {
        self.check_cancelled()?;
        let packet = command.build();
        let encoded = slip::encode(&packet.to_bytes());
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        port.write(&encoded)?;
        Ok(())
    }

    /// Pull the next complete SLIP frame out of the port, blocking (with
    /// short polling sleeps) until one arrives, the deadline passes, or
    /// the port signals closure.
    fn next_frame(&mut self, deadline: Instant) -> Result<FrameWait, Error> {
        loop {
            if let Some(frame) = self.frame_queue.pop_front() {
                return Ok(FrameWait::Frame(frame));
            }
            self.check_cancelled()?;
            if Instant::now() >= deadline {
                return Ok(FrameWait::TimedOut);
            }

            let port = self.port.as_mut().ok_or(Error::NotConnected)?;
            let mut buf = [0u8; 256];
            match port.read(&mut buf) {
                Ok(0) => std::thread::sleep(POLL_INTERVAL),
                Ok(n) => self.frame_queue.extend(self.decoder.feed(&buf[..n])),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(FrameWait::Closed)
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Wait for a response to `opcode`, discarding any frame that fails
    /// to parse or whose opcode doesn't match (spec.md §7: stray frames
    /// are tolerated, only timeout/closure are fatal).
    fn read_response(&mut self, opcode: CommandType, timeout: Duration) -> Result<ResponsePacket, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.next_frame(deadline)? {
                FrameWait::Frame(bytes) => match ResponsePacket::parse(&bytes) {
                    Ok(packet) if packet.opcode == opcode.opcode() => {
                        if let Some(code) = packet.error {
                            return Err(Error::DeviceError { opcode, code });
                        }
                        return Ok(packet);
                    }
                    _ => continue,
                },
                FrameWait::TimedOut => return Err(Error::Timeout { opcode, ms: timeout }),
                FrameWait::Closed => return Err(Error::StreamClosed(opcode)),
            }
        }
    }

    fn wait_for_ohai(&mut self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.next_frame(deadline)? {
                FrameWait::Frame(bytes) => {
                    if bytes == OHAI {
                        return Ok(());
                    }
                }
                FrameWait::TimedOut | FrameWait::Closed => return Err(Error::StubHandshakeFailed),
            }
        }
    }

    /// Reset the target and attempt the SYNC handshake up to
    /// [`SYNC_ATTEMPTS`] times, 500 ms per attempt.
    pub fn sync(&mut self, reset: ResetPulse, events: &mut impl EventSink) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        self.reset_pulse(reset)?;

        for attempt in 1..=SYNC_ATTEMPTS {
            self.check_cancelled()?;
            self.write_command(Command::Sync)?;
            match self.read_response(CommandType::Sync, SYNC_TIMEOUT) {
                Ok(_) => {
                    self.synced = true;
                    self.state = SessionState::Synced;
                    events.emit(SessionEvent::SyncProgress { progress: 100 });
                    info!("synchronized after {attempt} attempt(s)");
                    return Ok(());
                }
                Err(Error::Timeout { .. }) => {
                    events.emit(SessionEvent::SyncProgress {
                        progress: ((attempt * 100 / SYNC_ATTEMPTS) as u8).min(99),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        warn!("failed to synchronize after {SYNC_ATTEMPTS} attempts");
        Err(Error::SyncFailed { attempts: SYNC_ATTEMPTS })
    }

    /// Read the chip-magic register and resolve it to a [`Chip`].
    pub fn detect_chip(&mut self) -> Result<Chip, Error> {
        if !self.synced {
            return Err(Error::NotSynced);
        }

        self.write_command(Command::ReadReg {
            address: CHIP_MAGIC_REGISTER,
        })?;
        let response = self.read_response(CommandType::ReadReg, DEFAULT_TIMEOUT)?;
        let chip = Chip::from_magic(response.value).ok_or(Error::UnknownChip(response.value))?;
        self.chip = Some(chip);
        self.state = SessionState::ChipKnown;
        debug!("detected chip: {chip}");
        Ok(chip)
    }

    /// Upload a binary to RAM in 1460-byte chunks, optionally jumping to
    /// it once uploaded (spec.md §4.4 step 5).
    fn load_to_ram(&mut self, binary: &[u8], offset: u32, execute: bool, entry_point: u32) -> Result<(), Error> {
        let num_chunks = ceil_div(binary.len(), MEM_CHUNK_SIZE).max(1);

        self.write_command(Command::MemBegin {
            total_size: binary.len() as u32,
            num_packets: num_chunks as u32,
            packet_size: MEM_CHUNK_SIZE as u32,
            offset,
        })?;
        self.read_response(CommandType::MemBegin, DEFAULT_TIMEOUT)?;

        for i in 0..num_chunks {
            self.check_cancelled()?;
            let start = i * MEM_CHUNK_SIZE;
            let end = (start + MEM_CHUNK_SIZE).min(binary.len());
            let chunk = &binary[start..end];
            self.write_command(Command::MemData {
                data: chunk,
                packet_size: chunk.len() as u32,
                seq: i as u32,
            })?;
            self.read_response(CommandType::MemData, MEM_DATA_TIMEOUT)?;
        }

        if execute {
            self.write_command(Command::MemEnd {
                execute: true,
                entry_point,
            })?;
            self.read_response(CommandType::MemEnd, DEFAULT_TIMEOUT)?;
        }

        Ok(())
    }

    /// Upload the stub loader's text and data sections, jump to its
    /// entry point, and wait for its "OHAI" handshake (spec.md §4.4
    /// step 4).
    pub fn upload_stub(&mut self, stub: &StubDescriptor) -> Result<(), Error> {
        if self.chip.is_none() {
            return Err(Error::NotSynced);
        }

        self.state = SessionState::StubRunning;
        self.load_to_ram(&stub.text, stub.text_start, false, 0)?;
        self.load_to_ram(&stub.data, stub.data_start, false, 0)?;
        self.write_command(Command::MemEnd {
            execute: true,
            entry_point: stub.entry,
        })?;
        self.wait_for_ohai(OHAI_TIMEOUT)?;
        debug!("stub loader running");
        Ok(())
    }

    /// Attach the SPI flash and describe its geometry with the default
    /// 4 MiB parameters (spec.md §4.4 step 6).
    pub fn attach_flash(&mut self) -> Result<(), Error> {
        if !self.synced {
            return Err(Error::NotSynced);
        }

        self.write_command(Command::SpiAttach)?;
        self.read_response(CommandType::SpiAttach, DEFAULT_TIMEOUT)?;
        self.write_command(Command::spi_set_params_default())?;
        self.read_response(CommandType::SpiSetParams, DEFAULT_TIMEOUT)?;
        self.state = SessionState::FlashAttached;
        Ok(())
    }

    /// Write one partition's binary in 4096-byte blocks, calling `on_block`
    /// after each block's response arrives with `(block_index, num_blocks,
    /// block_len)`. Shared by [`Session::flash_partition`] and
    /// [`Session::flash_image`] so the latter can layer cumulative
    /// image-wide progress on top without duplicating the wire protocol
    /// (spec.md §9: "replaced by an explicit child observer that the
    /// per-partition flash notifies").
    fn flash_blocks(
        &mut self,
        offset: u32,
        binary: &[u8],
        mut on_block: impl FnMut(usize, usize, usize),
    ) -> Result<(), Error> {
        self.state = SessionState::Flashing;
        let num_blocks = ceil_div(binary.len(), FLASH_BLOCK_SIZE).max(1);

        self.write_command(Command::FlashBegin {
            erase_size: binary.len() as u32,
            num_packets: num_blocks as u32,
            packet_size: FLASH_BLOCK_SIZE as u32,
            flash_offset: offset,
        })?;
        self.read_response(CommandType::FlashBegin, DEFAULT_TIMEOUT)?;

        for i in 0..num_blocks {
            self.check_cancelled()?;
            let start = i * FLASH_BLOCK_SIZE;
            let end = (start + FLASH_BLOCK_SIZE).min(binary.len());
            let block = &binary[start..end];
            self.write_command(Command::FlashData {
                data: block,
                packet_size: FLASH_BLOCK_SIZE as u32,
                seq: i as u32,
            })?;
            self.read_response(CommandType::FlashData, FLASH_DATA_TIMEOUT)?;

            on_block(i, num_blocks, block.len());
        }

        Ok(())
    }

    /// Write one partition's binary in 4096-byte blocks, emitting
    /// `flash-progress` events per block (spec.md §4.4 step 7).
    pub fn flash_partition(
        &mut self,
        name: &str,
        offset: u32,
        binary: &[u8],
        events: &mut impl EventSink,
    ) -> Result<(), Error> {
        self.flash_blocks(offset, binary, |i, num_blocks, _len| {
            let progress = ((i + 1) * 100 / num_blocks) as u8;
            events.emit(SessionEvent::FlashProgress {
                progress,
                partition: name.to_string(),
            });
        })
    }

    /// Full image flash: sync (if needed), detect the chip (if needed),
    /// upload the stub, attach flash, write every partition in order,
    /// then reset (spec.md §4.4 step 8). No `FLASH_END` is sent; the
    /// stub exits on reset.
    pub fn flash_image(
        &mut self,
        partitions: &[(String, u32, Vec<u8>)],
        stub_provider: &dyn StubProvider,
        reset: ResetPulse,
        events: &mut impl EventSink,
    ) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if !self.synced {
            self.sync(reset, events)?;
        }
        if self.chip.is_none() {
            self.detect_chip()?;
        }
        let chip = self.chip.expect("chip detected above");

        let stub = stub_provider.stub_for(chip).ok_or(Error::NoStubAvailable)?;
        self.upload_stub(&stub)?;
        self.attach_flash()?;

        let total_bytes: u64 = partitions.iter().map(|(_, _, bytes)| bytes.len() as u64).sum();
        let mut bytes_done: u64 = 0;

        for (name, offset, binary) in partitions {
            self.flash_blocks(*offset, binary, |i, num_blocks, block_len| {
                bytes_done += block_len as u64;
                let partition_progress = ((i + 1) * 100 / num_blocks) as u8;
                events.emit(SessionEvent::FlashProgress {
                    progress: partition_progress,
                    partition: name.clone(),
                });
                let image_progress = if total_bytes == 0 {
                    100
                } else {
                    (bytes_done * 100 / total_bytes) as u8
                };
                events.emit(SessionEvent::FlashImageProgress {
                    progress: image_progress,
                    partition: Some(name.clone()),
                });
            })?;
        }

        self.reset_pulse(reset)?;
        self.state = SessionState::Reset;
        Ok(())
    }

    /// Signal cancellation, close the port, and reset the session to
    /// `Disconnected` — but keep the port handle so the caller can
    /// re-open it (spec.md §4.4 "Disconnect").
    pub fn disconnect(&mut self) -> Result<(), Error> {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(port) = self.port.as_mut() {
            port.close()?;
        }
        self.connected = false;
        self.synced = false;
        self.chip = None;
        self.state = SessionState::Disconnected;
        self.frame_queue.clear();
        self.decoder = Decoder::new();
        self.cancel = Arc::new(AtomicBool::new(false));
        Ok(())
    }
}

fn ceil_div(a: usize, b: usize) -> usize {
    if a == 0 {
        0
    } else {
        (a + b - 1) / b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::{PortOptions, UsbPortInfo};
    use std::collections::VecDeque as Deque;

    struct MockPort {
        inbound: Deque<u8>,
        written: Vec<u8>,
    }

    impl MockPort {
        fn new() -> Self {
            Self {
                inbound: Deque::new(),
                written: Vec::new(),
            }
        }

        fn push_frame(&mut self, frame: &[u8]) {
            self.inbound.extend(slip::encode(frame));
        }
    }

    impl SerialPort for MockPort {
        fn open(&mut self, _options: PortOptions) -> std::io::Result<()> {
            Ok(())
        }

        fn close(&mut self) -> std::io::Result<()> {
            Ok(())
        }

        fn set_signals(&mut self, _signals: Signals) -> std::io::Result<()> {
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let mut n = 0;
            while n < buf.len() {
                match self.inbound.pop_front() {
                    Some(byte) => {
                        buf[n] = byte;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> std::io::Result<()> {
            self.written.extend_from_slice(buf);
            Ok(())
        }

        fn set_baud_rate(&mut self, _baud: u32) -> std::io::Result<()> {
            Ok(())
        }

        fn info(&self) -> Option<UsbPortInfo> {
            None
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Vec<SessionEvent>,
    }

    impl EventSink for RecordingSink {
        fn emit(&mut self, event: SessionEvent) {
            self.events.push(event);
        }
    }

    fn response_frame(opcode: u8, value: u32, status: u8, error_code: u8) -> Vec<u8> {
        let payload = [status, error_code];
        let mut out = vec![0x01, opcode];
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
        out.extend_from_slice(&payload);
        out
    }

    fn open_session() -> Session<MockPort> {
        let mut session = Session::new();
        session.request_port(MockPort::new());
        session.open(PortOptions::default()).unwrap();
        session
    }

    #[test]
    fn sync_succeeds_on_first_matching_response() {
        let mut session = open_session();
        let frame = response_frame(CommandType::Sync.opcode(), 0, 0, 0);
        session.port.as_mut().unwrap().push_frame(&frame);

        let mut sink = RecordingSink::default();
        session.sync(ResetPulse::None, &mut sink).unwrap();

        assert!(session.synced);
        assert_eq!(session.state(), SessionState::Synced);
        assert_eq!(
            sink.events.last(),
            Some(&SessionEvent::SyncProgress { progress: 100 })
        );
    }

    #[test]
    fn sync_fails_after_exhausting_attempts() {
        let mut session = open_session();
        let mut sink = RecordingSink::default();
        let err = session.sync(ResetPulse::None, &mut sink).unwrap_err();
        assert!(matches!(err, Error::SyncFailed { attempts: 10 }));
        assert!(!session.synced);
    }

    #[test]
    fn sync_requires_connected_port() {
        let mut session: Session<MockPort> = Session::new();
        session.request_port(MockPort::new());
        let mut sink = RecordingSink::default();
        let err = session.sync(ResetPulse::None, &mut sink).unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[test]
    fn detect_chip_resolves_known_magic() {
        let mut session = open_session();
        session.port.as_mut().unwrap().push_frame(&response_frame(CommandType::Sync.opcode(), 0, 0, 0));
        let mut sink = RecordingSink::default();
        session.sync(ResetPulse::None, &mut sink).unwrap();

        session
            .port
            .as_mut()
            .unwrap()
            .push_frame(&response_frame(CommandType::ReadReg.opcode(), 0x00F0_1D83, 0, 0));

        let chip = session.detect_chip().unwrap();
        assert_eq!(chip, Chip::Esp32);
        assert_eq!(session.state(), SessionState::ChipKnown);
    }

    #[test]
    fn detect_chip_rejects_unknown_magic() {
        let mut session = open_session();
        session.port.as_mut().unwrap().push_frame(&response_frame(CommandType::Sync.opcode(), 0, 0, 0));
        let mut sink = RecordingSink::default();
        session.sync(ResetPulse::None, &mut sink).unwrap();

        session
            .port
            .as_mut()
            .unwrap()
            .push_frame(&response_frame(CommandType::ReadReg.opcode(), 0xDEAD_BEEF, 0, 0));

        let err = session.detect_chip().unwrap_err();
        assert!(matches!(err, Error::UnknownChip(0xDEAD_BEEF)));
    }

    #[test]
    fn detect_chip_requires_sync() {
        let mut session = open_session();
        let err = session.detect_chip().unwrap_err();
        assert!(matches!(err, Error::NotSynced));
    }

    #[test]
    fn device_error_status_surfaces_decoded_code() {
        let mut session = open_session();
        session
            .port
            .as_mut()
            .unwrap()
            .push_frame(&response_frame(CommandType::Sync.opcode(), 0, 1, 0x07));

        let mut sink = RecordingSink::default();
        // The device error should be surfaced on the first attempt rather
        // than retried, since it is not a Timeout.
        let err = session.sync(ResetPulse::None, &mut sink).unwrap_err();
        assert!(matches!(
            err,
            Error::DeviceError {
                opcode: CommandType::Sync,
                ..
            }
        ));
    }

    #[test]
    fn flash_partition_emits_progress_per_block() {
        let mut session = open_session();
        session.synced = true;

        let port = session.port.as_mut().unwrap();
        port.push_frame(&response_frame(CommandType::FlashBegin.opcode(), 0, 0, 0));
        port.push_frame(&response_frame(CommandType::FlashData.opcode(), 0, 0, 0));
        port.push_frame(&response_frame(CommandType::FlashData.opcode(), 0, 0, 0));

        let binary = vec![0xAAu8; FLASH_BLOCK_SIZE + 100];
        let mut sink = RecordingSink::default();
        session
            .flash_partition("factory", 0x10000, &binary, &mut sink)
            .unwrap();

        assert_eq!(
            sink.events,
            vec![
                SessionEvent::FlashProgress {
                    progress: 50,
                    partition: "factory".into(),
                },
                SessionEvent::FlashProgress {
                    progress: 100,
                    partition: "factory".into(),
                },
            ]
        );
        assert!(!session.port.as_ref().unwrap().written.is_empty());
    }

    #[test]
    fn disconnect_preserves_port_for_reopen() {
        let mut session = open_session();
        session.synced = true;
        session.disconnect().unwrap();

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.synced);

        // The port handle was preserved, so re-opening doesn't require
        // calling request_port again.
        session.open(PortOptions::default()).unwrap();
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn cancellation_aborts_an_in_flight_read() {
        let mut session = open_session();
        let handle = session.cancel_handle();
        handle.store(true, Ordering::SeqCst);

        let mut sink = RecordingSink::default();
        let err = session.sync(ResetPulse::None, &mut sink).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
