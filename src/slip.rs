//! SLIP (RFC 1055) framing, used to turn the duplex byte stream to/from a
//! target device into discrete command packets.

const END: u8 = 0xC0;
const ESC: u8 = 0xDB;
const ESC_END: u8 = 0xDC;
const ESC_ESC: u8 = 0xDD;

/// Encode a single buffer as one SLIP frame: `END`, the buffer with `END`
/// and `ESC` bytes escaped, then `END`.
///
/// Exactly one framed chunk is produced per call; an input is never split
/// across multiple frames.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    out.push(END);
    for &byte in data {
        match byte {
            END => {
                out.push(ESC);
                out.push(ESC_END);
            }
            ESC => {
                out.push(ESC);
                out.push(ESC_ESC);
            }
            other => out.push(other),
        }
    }
    out.push(END);
    out
}

/// Incremental SLIP decoder.
///
/// Feed it bytes as they arrive over the wire; each call to [`Decoder::feed`]
/// returns the frames that completed as a result of the bytes just fed.
/// Empty frames are never emitted, and a trailing partial frame at the end
/// of a byte stream is simply left buffered (not an error) until more bytes
/// arrive or the decoder is dropped.
#[derive(Debug, Default)]
pub struct Decoder {
    in_frame: bool,
    in_escape: bool,
    buffer: Vec<u8>,
}

impl Decoder {
    /// Create a new decoder, initially not inside a frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of raw bytes, returning any frames completed by them,
    /// in the order they completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for &byte in bytes {
            if !self.in_frame {
                if byte == END {
                    self.in_frame = true;
                    self.buffer.clear();
                }
                continue;
            }

            if self.in_escape {
                match byte {
                    ESC_END => self.buffer.push(END),
                    ESC_ESC => self.buffer.push(ESC),
                    other => self.buffer.push(other),
                }
                self.in_escape = false;
                continue;
            }

            match byte {
                ESC => self.in_escape = true,
                END => {
                    if !self.buffer.is_empty() {
                        frames.push(std::mem::take(&mut self.buffer));
                    }
                }
                other => self.buffer.push(other),
            }
        }
        frames
    }

    /// Decode a complete, finite byte stream in one call, discarding any
    /// trailing partial frame.
    pub fn decode_all(bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut decoder = Self::new();
        decoder.feed(bytes)
    }
}
