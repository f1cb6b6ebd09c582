//! Host-side implementation of the Espressif ROM/stub bootloader wire
//! protocol, plus binary generators for the partition-table and NVS flash
//! partitions.
//!
//! This crate owns the protocol and image-format logic only. Serial I/O,
//! firmware sourcing, and UI/progress surfaces are external collaborators,
//! consumed through the traits in [`interfaces`].

pub mod checksum;
pub mod chip;
pub mod command;
pub mod error;
pub mod interfaces;
pub mod nvs;
pub mod partition_table;
pub mod packet;
pub mod session;
pub mod slip;

pub use chip::Chip;
pub use command::{Command, CommandType};
pub use error::{DeviceErrorCode, Error};
pub use interfaces::{EventSink, PartitionSource, SerialPort, SessionEvent, StubProvider};
pub use session::{ResetPulse, Session, SessionState};
