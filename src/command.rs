//! Command builders: one variant per opcode, each producing its request
//! payload bytes.
//!
//! Per the re-architecture note in spec.md §9, this is a single data-driven
//! encoder keyed by opcode rather than a family of near-duplicate builder
//! types: `Command` is a tagged sum, and [`Command::build`] matches on it to
//! produce a [`RequestPacket`].

use bytemuck::{bytes_of, Pod, Zeroable};
use strum::Display;

use crate::packet::RequestPacket;

/// Opcode identifying a command, used for response correlation and
/// timeout lookup.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
#[non_exhaustive]
#[repr(u8)]
pub enum CommandType {
    FlashBegin = 0x02,
    FlashData = 0x03,
    FlashEnd = 0x04,
    MemBegin = 0x05,
    MemEnd = 0x06,
    MemData = 0x07,
    Sync = 0x08,
    WriteReg = 0x09,
    ReadReg = 0x0A,
    SpiSetParams = 0x0B,
    SpiAttach = 0x0D,
    ChangeBaudrate = 0x0F,
}

impl CommandType {
    /// The raw opcode byte.
    pub fn opcode(self) -> u8 {
        self as u8
    }
}

/// 36-byte SYNC frame: `07 07 12 20` followed by 32 bytes of `0x55`.
const SYNC_FRAME: [u8; 36] = {
    let mut frame = [0x55u8; 36];
    frame[0] = 0x07;
    frame[1] = 0x07;
    frame[2] = 0x12;
    frame[3] = 0x20;
    frame
};

/// Default 4 MiB SPI flash geometry used by `SPI_SET_PARAMS`.
pub const DEFAULT_FLASH_TOTAL_SIZE: u32 = 4 * 1024 * 1024;
const DEFAULT_BLOCK_SIZE: u32 = 0x10000;
const DEFAULT_SECTOR_SIZE: u32 = 0x1000;
const DEFAULT_PAGE_SIZE: u32 = 0x100;
const DEFAULT_STATUS_MASK: u32 = 0xFFFF_FFFF;

/// Every command the session controller can issue, per spec.md §4.3.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Command<'a> {
    /// `FLASH_BEGIN`: announce an upcoming flash write.
    FlashBegin {
        erase_size: u32,
        num_packets: u32,
        packet_size: u32,
        flash_offset: u32,
    },
    /// `FLASH_DATA`: one block of flash data. `data` is padded with
    /// `0xFF` up to `packet_size` before checksumming/sending, per
    /// spec.md §4.3's boundary rule.
    FlashData {
        data: &'a [u8],
        packet_size: u32,
        seq: u32,
    },
    /// `FLASH_END`: conclude a flash write.
    FlashEnd { run_user_code: bool },
    /// `MEM_BEGIN`: announce an upcoming RAM write.
    MemBegin {
        total_size: u32,
        num_packets: u32,
        packet_size: u32,
        offset: u32,
    },
    /// `MEM_END`: conclude a RAM write, optionally jumping to `entry_point`.
    MemEnd { execute: bool, entry_point: u32 },
    /// `MEM_DATA`: one chunk of RAM data.
    MemData {
        data: &'a [u8],
        packet_size: u32,
        seq: u32,
    },
    /// `SYNC`: the handshake frame.
    Sync,
    /// `WRITE_REG`: write a 32-bit register.
    WriteReg {
        address: u32,
        value: u32,
        mask: u32,
        delay_us: u32,
    },
    /// `READ_REG`: read a 32-bit register.
    ReadReg { address: u32 },
    /// `SPI_SET_PARAMS`: describe the attached flash's geometry.
    SpiSetParams {
        total_size: u32,
        block_size: u32,
        sector_size: u32,
        page_size: u32,
        status_mask: u32,
    },
    /// `SPI_ATTACH`: attach the SPI flash.
    SpiAttach,
    /// `CHANGE_BAUDRATE`: switch to a new baud rate.
    ChangeBaudrate { new_baud: u32, old_baud: u32 },
}

impl<'a> Command<'a> {
    /// The opcode this command carries.
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::FlashBegin { .. } => CommandType::FlashBegin,
            Command::FlashData { .. } => CommandType::FlashData,
            Command::FlashEnd { .. } => CommandType::FlashEnd,
            Command::MemBegin { .. } => CommandType::MemBegin,
            Command::MemEnd { .. } => CommandType::MemEnd,
            Command::MemData { .. } => CommandType::MemData,
            Command::Sync => CommandType::Sync,
            Command::WriteReg { .. } => CommandType::WriteReg,
            Command::ReadReg { .. } => CommandType::ReadReg,
            Command::SpiSetParams { .. } => CommandType::SpiSetParams,
            Command::SpiAttach => CommandType::SpiAttach,
            Command::ChangeBaudrate { .. } => CommandType::ChangeBaudrate,
        }
    }

    /// Construct the default 4 MiB `SPI_SET_PARAMS` command.
    pub fn spi_set_params_default() -> Self {
        Command::SpiSetParams {
            total_size: DEFAULT_FLASH_TOTAL_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            sector_size: DEFAULT_SECTOR_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            status_mask: DEFAULT_STATUS_MASK,
        }
    }

    /// Build the request packet for this command.
    pub fn build(&self) -> RequestPacket {
        let opcode = self.command_type().opcode();

        match *self {
            Command::FlashBegin {
                erase_size,
                num_packets,
                packet_size,
                flash_offset,
            } => {
                #[derive(Zeroable, Pod, Copy, Clone)]
                #[repr(C)]
                struct FlashBeginParams {
                    erase_size: u32,
                    num_packets: u32,
                    packet_size: u32,
                    flash_offset: u32,
                }
                let params = FlashBeginParams {
                    erase_size,
                    num_packets,
                    packet_size,
                    flash_offset,
                };
                RequestPacket::new(opcode, bytes_of(&params).to_vec(), 0)
            }
            Command::FlashData {
                data,
                packet_size,
                seq,
            } => build_data_command(opcode, data, packet_size, seq),
            Command::FlashEnd { run_user_code } => {
                let value: u32 = if run_user_code { 1 } else { 0 };
                RequestPacket::new(opcode, bytes_of(&value).to_vec(), 0)
            }
            Command::MemBegin {
                total_size,
                num_packets,
                packet_size,
                offset,
            } => {
                #[derive(Zeroable, Pod, Copy, Clone)]
                #[repr(C)]
                struct MemBeginParams {
                    total_size: u32,
                    num_packets: u32,
                    packet_size: u32,
                    offset: u32,
                }
                let params = MemBeginParams {
                    total_size,
                    num_packets,
                    packet_size,
                    offset,
                };
                RequestPacket::new(opcode, bytes_of(&params).to_vec(), 0)
            }
            Command::MemEnd {
                execute,
                entry_point,
            } => {
                #[derive(Zeroable, Pod, Copy, Clone)]
                #[repr(C)]
                struct MemEndParams {
                    execute: u32,
                    entry_point: u32,
                }
                let params = MemEndParams {
                    execute: execute as u32,
                    entry_point,
                };
                RequestPacket::new(opcode, bytes_of(&params).to_vec(), 0)
            }
            Command::MemData {
                data,
                packet_size,
                seq,
            } => build_data_command(opcode, data, packet_size, seq),
            Command::Sync => RequestPacket::new(opcode, SYNC_FRAME.to_vec(), 0),
            Command::WriteReg {
                address,
                value,
                mask,
                delay_us,
            } => {
                #[derive(Zeroable, Pod, Copy, Clone)]
                #[repr(C)]
                struct WriteRegParams {
                    address: u32,
                    value: u32,
                    mask: u32,
                    delay_us: u32,
                }
                let params = WriteRegParams {
                    address,
                    value,
                    mask,
                    delay_us,
                };
                RequestPacket::new(opcode, bytes_of(&params).to_vec(), 0)
            }
            Command::ReadReg { address } => {
                RequestPacket::new(opcode, bytes_of(&address).to_vec(), 0)
            }
            Command::SpiSetParams {
                total_size,
                block_size,
                sector_size,
                page_size,
                status_mask,
            } => {
                #[derive(Zeroable, Pod, Copy, Clone)]
                #[repr(C)]
                struct SpiSetParamsParams {
                    flash_id: u32,
                    total_size: u32,
                    block_size: u32,
                    sector_size: u32,
                    page_size: u32,
                    status_mask: u32,
                }
                let params = SpiSetParamsParams {
                    flash_id: 0,
                    total_size,
                    block_size,
                    sector_size,
                    page_size,
                    status_mask,
                };
                RequestPacket::new(opcode, bytes_of(&params).to_vec(), 0)
            }
            Command::SpiAttach => RequestPacket::new(opcode, vec![0u8; 8], 0),
            Command::ChangeBaudrate { new_baud, old_baud } => {
                #[derive(Zeroable, Pod, Copy, Clone)]
                #[repr(C)]
                struct ChangeBaudrateParams {
                    new_baud: u32,
                    old_baud: u32,
                }
                let params = ChangeBaudrateParams { new_baud, old_baud };
                RequestPacket::new(opcode, bytes_of(&params).to_vec(), 0)
            }
        }
    }
}

/// Shared layout for `FLASH_DATA`/`MEM_DATA`: a 16-byte header
/// (`size, seq, 0, 0`) followed by the (possibly padded) data block, with
/// the checksum computed only over the data portion including any padding.
fn build_data_command(opcode: u8, data: &[u8], packet_size: u32, seq: u32) -> RequestPacket {
    let packet_size = packet_size as usize;
    let pad_len = packet_size.saturating_sub(data.len());

    let mut block = Vec::with_capacity(data.len() + pad_len);
    block.extend_from_slice(data);
    block.resize(data.len() + pad_len, 0xFF);

    let checksum = crate::checksum::xor_checksum(&block);

    let mut payload = Vec::with_capacity(16 + block.len());
    payload.extend_from_slice(&(block.len() as u32).to_le_bytes());
    payload.extend_from_slice(&seq.to_le_bytes());
    payload.extend_from_slice(&0u32.to_le_bytes());
    payload.extend_from_slice(&0u32.to_le_bytes());
    payload.extend_from_slice(&block);

    RequestPacket::new(opcode, payload, checksum as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s2_flash_begin_serialization() {
        let cmd = Command::FlashBegin {
            erase_size: 1024,
            num_packets: 4,
            packet_size: 256,
            flash_offset: 0x1000,
        };
        let packet = cmd.build();
        let bytes = packet.to_bytes();
        assert_eq!(
            bytes,
            vec![
                0x00, 0x02, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x04,
                0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00,
            ]
        );
    }

    #[test]
    fn s3_flash_data_checksum_and_header() {
        let block = [0xAAu8; 4096];
        let cmd = Command::FlashData {
            data: &block,
            packet_size: 4096,
            seq: 5,
        };
        let packet = cmd.build();
        let bytes = packet.to_bytes();

        // header(8) + data-header(16) + 4096 bytes of data
        assert_eq!(bytes.len(), 8 + 16 + 4096);
        let checksum = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        assert_eq!(checksum, 0xEF ^ 0xAA);
        assert_eq!(
            &bytes[8..24],
            &[
                0x00, 0x10, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00,
            ]
        );
        assert!(bytes[24..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn flash_data_short_block_is_padded_with_0xff() {
        let data = [0x01, 0x02, 0x03];
        let cmd = Command::FlashData {
            data: &data,
            packet_size: 8,
            seq: 0,
        };
        let packet = cmd.build();
        let bytes = packet.to_bytes();
        let data_start = 8 + 16;
        assert_eq!(&bytes[data_start..data_start + 3], &[0x01, 0x02, 0x03]);
        assert!(bytes[data_start + 3..].iter().all(|&b| b == 0xFF));

        let checksum = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let mut expected = 0xEFu8;
        for b in [0x01, 0x02, 0x03, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF] {
            expected ^= b;
        }
        assert_eq!(checksum, expected as u32);
    }

    #[test]
    fn sync_frame_layout() {
        let packet = Command::Sync.build();
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), 8 + 36);
        assert_eq!(&bytes[8..12], &[0x07, 0x07, 0x12, 0x20]);
        assert!(bytes[12..].iter().all(|&b| b == 0x55));
    }

    #[test]
    fn spi_set_params_default_geometry() {
        let cmd = Command::spi_set_params_default();
        let packet = cmd.build();
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), 8 + 24);
        let total_size = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        assert_eq!(total_size, DEFAULT_FLASH_TOTAL_SIZE);
        let status_mask = u32::from_le_bytes(bytes[28..32].try_into().unwrap());
        assert_eq!(status_mask, 0xFFFF_FFFF);
    }
}
