//! Error types returned by this crate.

use std::time::Duration;

use thiserror::Error;

use crate::command::CommandType;

/// The error code a device reports in a failed response's payload.
///
/// See the serial protocol documentation for the full table; only the
/// values the core protocol cares about are named here.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceErrorCode {
    /// Received message is invalid (parameters or length field is invalid)
    InvalidMessage,
    /// Failed to act on received message
    FailedToAct,
    /// Invalid CRC in message
    InvalidCrc,
    /// flash write error
    FlashWriteError,
    /// flash read error
    FlashReadError,
    /// flash read length error
    FlashReadLengthError,
    /// Deflate error
    DeflateError,
    /// A code not in the table above.
    Other(u8),
}

impl DeviceErrorCode {
    pub(crate) fn from_byte(code: u8) -> Self {
        match code {
            0x05 => DeviceErrorCode::InvalidMessage,
            0x06 => DeviceErrorCode::FailedToAct,
            0x07 => DeviceErrorCode::InvalidCrc,
            0x08 => DeviceErrorCode::FlashWriteError,
            0x09 => DeviceErrorCode::FlashReadError,
            0x0A => DeviceErrorCode::FlashReadLengthError,
            0x0B => DeviceErrorCode::DeflateError,
            other => DeviceErrorCode::Other(other),
        }
    }
}

/// Errors produced by the bootloader session, the image builders, or the
/// framing/command layers underneath them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An operation was attempted before a port was opened.
    #[error("not connected to a serial port")]
    NotConnected,

    /// An operation requiring a synchronized session was attempted first.
    #[error("session is not synchronized with the target device")]
    NotSynced,

    /// All sync attempts were exhausted without a matching response.
    #[error("failed to synchronize with the target device after {attempts} attempts")]
    SyncFailed {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The chip-magic register returned a value not present in the chip
    /// family table.
    #[error("unrecognized chip magic value: {0:#010x}")]
    UnknownChip(u32),

    /// The stub loader did not send its "OHAI" greeting in time.
    #[error("stub loader did not respond with its handshake in time")]
    StubHandshakeFailed,

    /// No stub descriptor was available for the detected chip.
    #[error("no stub loader available for this chip")]
    NoStubAvailable,

    /// No response matching the expected opcode arrived within the
    /// command's deadline.
    #[error("timed out waiting {ms:?} for a response to {opcode}")]
    Timeout {
        /// The command whose response was awaited.
        opcode: CommandType,
        /// The configured deadline.
        ms: Duration,
    },

    /// The underlying response stream ended before a matching frame
    /// arrived.
    #[error("response stream closed before a matching frame for {0} arrived")]
    StreamClosed(CommandType),

    /// The device returned `status = 1` for a command.
    #[error("device reported an error for {opcode}: {code:?}")]
    DeviceError {
        /// The command that failed.
        opcode: CommandType,
        /// The decoded error code.
        code: DeviceErrorCode,
    },

    /// A partition-table definition was invalid.
    #[error("invalid partition table: {0}")]
    InvalidPartition(String),

    /// An NVS write was invalid.
    #[error("invalid NVS entry: {0}")]
    InvalidNvs(String),

    /// The session-level cancellation signal was observed.
    #[error("operation cancelled")]
    Cancelled,

    /// An I/O error from the serial port collaborator.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
