//! Binary packet codec
//!
//! Packets are `[0xD5][length][payload...][crc8]` where `length` counts the
//! payload bytes (opcode included) and the CRC covers the payload only.
//! Multi-byte arguments are little-endian.

use printlink_core::ProtocolError;

/// First byte of every packet
pub const START_BYTE: u8 = 0xD5;

/// Largest payload a packet may carry
pub const MAX_PAYLOAD: usize = 32;

/// Running CRC-8 of the payload, seeded at zero
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, byte| {
        let mut crc = crc ^ byte;
        for _ in 0..8 {
            crc = if crc & 0x01 != 0 {
                (crc >> 1) ^ 0x8C
            } else {
                crc >> 1
            };
        }
        crc
    })
}

/// Builds one packet from an opcode and typed arguments
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    payload: Vec<u8>,
}

impl PacketBuilder {
    /// Start a packet with its opcode
    pub fn new(opcode: u8) -> Self {
        Self {
            payload: vec![opcode],
        }
    }

    /// Append a byte
    pub fn u8(mut self, value: u8) -> Self {
        self.payload.push(value);
        self
    }

    /// Append a little-endian u16
    pub fn u16(mut self, value: u16) -> Self {
        self.payload.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a little-endian u32
    pub fn u32(mut self, value: u32) -> Self {
        self.payload.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a little-endian i32
    pub fn i32(mut self, value: i32) -> Self {
        self.payload.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a little-endian f32
    pub fn f32(mut self, value: f32) -> Self {
        self.payload.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a NUL-terminated string, truncated to fit the packet
    pub fn text(mut self, value: &str) -> Self {
        let room = MAX_PAYLOAD.saturating_sub(self.payload.len() + 1);
        self.payload
            .extend(value.bytes().filter(|b| *b != 0).take(room));
        self.payload.push(0);
        self
    }

    /// Finish the packet
    pub fn build(self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(self.payload.len() + 3);
        packet.push(START_BYTE);
        packet.push(self.payload.len() as u8);
        packet.extend_from_slice(&self.payload);
        packet.push(crc8(&self.payload));
        packet
    }
}

/// A decoded packet payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    payload: Vec<u8>,
}

impl Packet {
    /// Wrap a payload
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// First payload byte (opcode or response code)
    pub fn code(&self) -> u8 {
        self.payload.first().copied().unwrap_or_default()
    }

    /// Payload after the code byte
    pub fn args(&self) -> &[u8] {
        self.payload.get(1..).unwrap_or_default()
    }

    /// Little-endian u16 at an argument offset
    pub fn arg_u16(&self, offset: usize) -> Option<u16> {
        let bytes = self.args().get(offset..offset + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Little-endian i32 at an argument offset
    pub fn arg_i32(&self, offset: usize) -> Option<i32> {
        let bytes = self.args().get(offset..offset + 4)?;
        Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Incremental packet decoder
///
/// Bytes before a start byte are discarded. A frame that fails its CRC drops
/// only its start byte so decoding can resynchronize on the next one.
#[derive(Debug, Clone, Default)]
pub struct PacketDecoder {
    buffer: Vec<u8>,
}

impl PacketDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add received bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered bytes
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete packet, `None` when more bytes are needed
    pub fn next_packet(&mut self) -> Option<Result<Packet, ProtocolError>> {
        loop {
            let start = match self.buffer.iter().position(|b| *b == START_BYTE) {
                Some(start) => start,
                None => {
                    if !self.buffer.is_empty() {
                        tracing::debug!("Discarding {} stray bytes", self.buffer.len());
                        self.buffer.clear();
                    }
                    return None;
                }
            };
            if start > 0 {
                tracing::debug!("Discarding {} bytes before packet start", start);
                self.buffer.drain(..start);
            }

            let length = *self.buffer.get(1)? as usize;
            if length == 0 || length > MAX_PAYLOAD {
                self.buffer.remove(0);
                continue;
            }
            if self.buffer.len() < length + 3 {
                return None;
            }

            let payload = self.buffer[2..2 + length].to_vec();
            let carried = self.buffer[2 + length];
            let expected = crc8(&payload);
            if carried != expected {
                self.buffer.remove(0);
                return Some(Err(ProtocolError::CrcMismatch {
                    expected,
                    actual: carried,
                }));
            }

            self.buffer.drain(..length + 3);
            return Some(Ok(Packet::new(payload)));
        }
    }
}
