//! The on-wire command/response packet: an 8-byte header followed by a
//! variable-length payload.
//!
//! The header's last four bytes are a single shared field: on a request
//! they hold the XOR checksum (only meaningful for data-carrying
//! commands), on a response they hold a 32-bit value. The two accessors
//! below read the same bytes rather than duplicating storage.

use crate::error::DeviceErrorCode;

const DIRECTION_REQUEST: u8 = 0x00;
const DIRECTION_RESPONSE: u8 = 0x01;

/// The direction tag in byte 0 of a packet header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Host to device.
    Request,
    /// Device to host.
    Response,
}

impl Direction {
    fn to_byte(self) -> u8 {
        match self {
            Direction::Request => DIRECTION_REQUEST,
            Direction::Response => DIRECTION_RESPONSE,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            DIRECTION_REQUEST => Some(Direction::Request),
            DIRECTION_RESPONSE => Some(Direction::Response),
            _ => None,
        }
    }
}

/// A request packet ready to be SLIP-encoded and written to the port.
#[derive(Debug, Clone)]
pub struct RequestPacket {
    opcode: u8,
    checksum: u32,
    payload: Vec<u8>,
}

impl RequestPacket {
    /// Build a request packet for `opcode` carrying `payload`, with the
    /// given checksum (zero for commands that don't use one).
    pub fn new(opcode: u8, payload: Vec<u8>, checksum: u32) -> Self {
        Self {
            opcode,
            checksum,
            payload,
        }
    }

    /// The opcode this request carries.
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Serialize the header and payload into a single buffer, ready for
    /// SLIP encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.payload.len());
        out.push(Direction::Request.to_byte());
        out.push(self.opcode);
        out.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.checksum.to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// A parsed response packet.
#[derive(Debug, Clone)]
pub struct ResponsePacket {
    /// The opcode this response corresponds to.
    pub opcode: u8,
    /// The 32-bit value field (register value, or command-specific result).
    pub value: u32,
    /// The full payload, including the trailing status/error bytes.
    pub payload: Vec<u8>,
    /// `Some` when `status == 1` in the payload's final bytes.
    pub error: Option<DeviceErrorCode>,
}

/// Errors encountered while parsing a frame as a response packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The frame is shorter than the fixed 8-byte header.
    TooShort,
    /// The length field in the header does not match the actual payload.
    LengthMismatch,
    /// Byte 0 was neither 0x00 nor 0x01.
    UnknownDirection,
}

impl ResponsePacket {
    /// Parse a SLIP-decoded frame as a response packet.
    ///
    /// Returns `Err` for malformed frames (too short, bad direction, or a
    /// length field that disagrees with the actual payload) so the caller
    /// can discard/tolerate stray bytes per spec.md §7.
    pub fn parse(frame: &[u8]) -> Result<Self, ParseError> {
        if frame.len() < 8 {
            return Err(ParseError::TooShort);
        }

        let direction = Direction::from_byte(frame[0]).ok_or(ParseError::UnknownDirection)?;
        if direction != Direction::Response {
            return Err(ParseError::UnknownDirection);
        }

        let opcode = frame[1];
        let length = u16::from_le_bytes([frame[2], frame[3]]) as usize;
        let value = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
        let payload = frame[8..].to_vec();

        if payload.len() != length {
            return Err(ParseError::LengthMismatch);
        }

        // Legacy ROM responses append two extra device-state bytes after
        // status/error_code, so the trailer is 4 bytes instead of 2 with
        // status/error_code immediately preceding the extras, not at the
        // very end. A 4-byte-or-longer payload is read as the legacy
        // layout; a 2-byte payload as the plain one.
        let error = if payload.len() >= 4 {
            let status = payload[payload.len() - 4];
            let error_code = payload[payload.len() - 3];
            if status == 1 {
                Some(DeviceErrorCode::from_byte(error_code))
            } else {
                None
            }
        } else if payload.len() >= 2 {
            let status = payload[payload.len() - 2];
            let error_code = payload[payload.len() - 1];
            if status == 1 {
                Some(DeviceErrorCode::from_byte(error_code))
            } else {
                None
            }
        } else {
            None
        };

        Ok(ResponsePacket {
            opcode,
            value,
            payload,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_header_layout() {
        let req = RequestPacket::new(0x08, vec![1, 2, 3], 0);
        let bytes = req.to_bytes();
        assert_eq!(bytes[0], 0x00);
        assert_eq!(bytes[1], 0x08);
        assert_eq!(&bytes[2..4], &3u16.to_le_bytes());
        assert_eq!(&bytes[4..8], &0u32.to_le_bytes());
        assert_eq!(&bytes[8..], &[1, 2, 3]);
    }

    #[test]
    fn response_roundtrip_preserves_opcode_and_length() {
        let mut frame = vec![0x01, 0x08, 0x02, 0x00, 0xAA, 0xBB, 0xCC, 0xDD, 0x00, 0x00];
        let parsed = ResponsePacket::parse(&frame).unwrap();
        assert_eq!(parsed.opcode, 0x08);
        assert_eq!(parsed.value, u32::from_le_bytes([0xAA, 0xBB, 0xCC, 0xDD]));
        assert!(parsed.error.is_none());

        frame[9] = 1; // error_code byte, but status (frame[8]) is still 0
        let parsed = ResponsePacket::parse(&frame).unwrap();
        assert!(parsed.error.is_none());
    }

    #[test]
    fn response_with_failure_status_surfaces_error_code() {
        let frame = vec![0x01, 0x03, 0x02, 0x00, 0, 0, 0, 0, 1, 0x07];
        let parsed = ResponsePacket::parse(&frame).unwrap();
        assert_eq!(parsed.error, Some(DeviceErrorCode::InvalidCrc));
    }

    #[test]
    fn legacy_extra_trailer_bytes_are_tolerated() {
        // status/error_code followed by two legacy device-state bytes: the
        // real trailer sits at payload[len-4]/payload[len-3], not at the
        // very end, so the two trailing device-state bytes don't get
        // mistaken for status/error_code.
        let frame = vec![0x01, 0x03, 0x04, 0x00, 0, 0, 0, 0, 1, 0x07, 0xDE, 0xAD];
        let parsed = ResponsePacket::parse(&frame).unwrap();
        assert_eq!(parsed.error, Some(DeviceErrorCode::InvalidCrc));
    }

    #[test]
    fn legacy_trailer_with_ok_status_reports_no_error() {
        let frame = vec![0x01, 0x03, 0x04, 0x00, 0, 0, 0, 0, 0, 0, 0xDE, 0xAD];
        let parsed = ResponsePacket::parse(&frame).unwrap();
        assert!(parsed.error.is_none());
    }

    #[test]
    fn rejects_too_short_frame() {
        assert_eq!(ResponsePacket::parse(&[0x01, 0x08]), Err(ParseError::TooShort));
    }

    #[test]
    fn rejects_length_mismatch() {
        let frame = vec![0x01, 0x08, 0x05, 0x00, 0, 0, 0, 0, 1, 2];
        assert_eq!(
            ResponsePacket::parse(&frame),
            Err(ParseError::LengthMismatch)
        );
    }

    #[test]
    fn rejects_request_direction() {
        let frame = vec![0x00, 0x08, 0x00, 0x00, 0, 0, 0, 0];
        assert_eq!(
            ResponsePacket::parse(&frame),
            Err(ParseError::UnknownDirection)
        );
    }
}
