//! Message unit framing for the wire protocol.
//!
//! Every unit starts with one opcode byte. Control opcodes carry either no
//! payload or a single token byte; application opcodes carry a big-endian
//! `u32` length followed by that many bytes of ciphertext.

use crate::error::WireError;
use crate::opcode::Opcode;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Default limit on an application payload (16 MiB)
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Size of the length prefix on application units
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// One decoded message unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Session open request
    Connect,
    /// Session open acknowledgement
    ConnectOk,
    /// Heartbeat request with its token
    Ping(u8),
    /// Heartbeat reply echoing a token
    PingOk(u8),
    /// Graceful close
    Disconnect,
    /// Ciphertext of a codec-serialized message
    Message(Bytes),
    /// Ciphertext of a raw byte payload
    Raw(Bytes),
    /// A byte that is not a known opcode; it has been consumed
    Unknown(u8),
}

impl WireMessage {
    /// Opcode of this unit, `None` for unknown bytes
    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            WireMessage::Connect => Some(Opcode::Connect),
            WireMessage::ConnectOk => Some(Opcode::ConnectOk),
            WireMessage::Ping(_) => Some(Opcode::Ping),
            WireMessage::PingOk(_) => Some(Opcode::PingOk),
            WireMessage::Disconnect => Some(Opcode::Disconnect),
            WireMessage::Message(_) => Some(Opcode::Message),
            WireMessage::Raw(_) => Some(Opcode::Raw),
            WireMessage::Unknown(_) => None,
        }
    }

    /// Number of bytes this unit occupies on the wire
    pub fn encoded_len(&self) -> usize {
        match self {
            WireMessage::Connect
            | WireMessage::ConnectOk
            | WireMessage::Disconnect
            | WireMessage::Unknown(_) => 1,
            WireMessage::Ping(_) | WireMessage::PingOk(_) => 2,
            WireMessage::Message(cipher) | WireMessage::Raw(cipher) => {
                1 + LENGTH_PREFIX_SIZE + cipher.len()
            }
        }
    }

    /// Append the unit to `buf`. `Unknown` is written as its bare byte.
    ///
    /// Fails without writing anything if the payload does not fit the
    /// `u32` length prefix.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        match self {
            WireMessage::Ping(token) | WireMessage::PingOk(token) => {
                buf.reserve(2);
                buf.put_u8(self.opcode_byte());
                buf.put_u8(*token);
            }
            WireMessage::Message(cipher) | WireMessage::Raw(cipher) => {
                let prefix = length_prefix(cipher.len())?;
                buf.reserve(self.encoded_len());
                buf.put_u8(self.opcode_byte());
                buf.put_u32(prefix);
                buf.put_slice(cipher);
            }
            _ => buf.put_u8(self.opcode_byte()),
        }
        Ok(())
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    fn opcode_byte(&self) -> u8 {
        match self {
            WireMessage::Unknown(byte) => *byte,
            other => other.opcode().map(u8::from).unwrap_or_default(),
        }
    }
}

fn length_prefix(len: usize) -> Result<u32, WireError> {
    u32::try_from(len).map_err(|_| WireError::Size {
        len,
        max: u32::MAX as usize,
    })
}

/// Incremental decoder for message units
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_payload_size: usize,
}

impl FrameDecoder {
    /// Create a decoder with the default payload limit
    pub fn new() -> Self {
        Self::with_max_payload_size(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a decoder with a custom payload limit
    pub fn with_max_payload_size(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    /// Configured payload limit
    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Decode one unit from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when the unit is not yet
    /// complete.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<WireMessage>, crate::WireError> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };

        let opcode = match Opcode::try_from(first) {
            Ok(opcode) => opcode,
            Err(_) => {
                buf.advance(1);
                return Ok(Some(WireMessage::Unknown(first)));
            }
        };

        match opcode {
            Opcode::Connect | Opcode::ConnectOk | Opcode::Disconnect => {
                buf.advance(1);
                Ok(Some(match opcode {
                    Opcode::Connect => WireMessage::Connect,
                    Opcode::ConnectOk => WireMessage::ConnectOk,
                    _ => WireMessage::Disconnect,
                }))
            }
            Opcode::Ping | Opcode::PingOk => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                buf.advance(1);
                let token = buf.get_u8();
                Ok(Some(if opcode == Opcode::Ping {
                    WireMessage::Ping(token)
                } else {
                    WireMessage::PingOk(token)
                }))
            }
            Opcode::Message | Opcode::Raw => {
                let header = 1 + LENGTH_PREFIX_SIZE;
                if buf.len() < header {
                    return Ok(None);
                }

                let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
                if len > self.max_payload_size {
                    return Err(crate::WireError::Size {
                        len,
                        max: self.max_payload_size,
                    });
                }

                if buf.len() < header + len {
                    buf.reserve(header + len - buf.len());
                    return Ok(None);
                }

                buf.advance(header);
                let cipher = buf.split_to(len).freeze();
                Ok(Some(if opcode == Opcode::Message {
                    WireMessage::Message(cipher)
                } else {
                    WireMessage::Raw(cipher)
                }))
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_units_are_bit_exact() {
        assert_eq!(WireMessage::Connect.to_bytes().unwrap().as_ref(), &[0x01]);
        assert_eq!(WireMessage::ConnectOk.to_bytes().unwrap().as_ref(), &[0x02]);
        assert_eq!(WireMessage::Ping(0x2A).to_bytes().unwrap().as_ref(), &[0x03, 0x2A]);
        assert_eq!(WireMessage::PingOk(0x2A).to_bytes().unwrap().as_ref(), &[0x04, 0x2A]);
        assert_eq!(WireMessage::Disconnect.to_bytes().unwrap().as_ref(), &[0x05]);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_length_prefix_rejects_overflow() {
        assert_eq!(length_prefix(3).unwrap(), 3);
        assert_eq!(length_prefix(u32::MAX as usize).unwrap(), u32::MAX);
        assert!(matches!(
            length_prefix(u32::MAX as usize + 1),
            Err(WireError::Size { .. })
        ));
    }

    #[test]
    fn test_application_unit_layout() {
        let unit = WireMessage::Raw(Bytes::from_static(&[0xAA, 0xBB, 0xCC]));
        assert_eq!(
            unit.to_bytes().unwrap().as_ref(),
            &[0x07, 0x00, 0x00, 0x00, 0x03, 0xAA, 0xBB, 0xCC]
        );
        assert_eq!(unit.encoded_len(), 8);

        let unit = WireMessage::Message(Bytes::from_static(b"{}"));
        assert_eq!(unit.to_bytes().unwrap()[0], 0x06);
    }

    #[test]
    fn test_decode_sequence() {
        let mut buf = BytesMut::new();
        WireMessage::Connect.encode(&mut buf).unwrap();
        WireMessage::Ping(7).encode(&mut buf).unwrap();
        WireMessage::Raw(Bytes::from_static(b"abc")).encode(&mut buf).unwrap();
        WireMessage::Disconnect.encode(&mut buf).unwrap();

        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(WireMessage::Connect));
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(WireMessage::Ping(7)));
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(WireMessage::Raw(Bytes::from_static(b"abc")))
        );
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(WireMessage::Disconnect));
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_units_wait_for_more_data() {
        let mut decoder = FrameDecoder::new();

        let mut buf = BytesMut::from(&[0x03][..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 1);

        let full = WireMessage::Message(Bytes::from(vec![9u8; 32])).to_bytes().unwrap();
        let mut buf = BytesMut::from(&full[..10]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 10);

        buf.extend_from_slice(&full[10..]);
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(WireMessage::Message(Bytes::from(vec![9u8; 32])))
        );
    }

    #[test]
    fn test_unknown_byte_is_consumed() {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&[0x00, 0x42, 0x01][..]);

        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(WireMessage::Unknown(0x00)));
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(WireMessage::Unknown(0x42)));
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(WireMessage::Connect));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut decoder = FrameDecoder::with_max_payload_size(4);
        let mut buf = BytesMut::from(&[0x07, 0x00, 0x00, 0x00, 0x05][..]);

        match decoder.decode(&mut buf) {
            Err(crate::WireError::Size { len, max }) => {
                assert_eq!(len, 5);
                assert_eq!(max, 4);
            }
            other => panic!("expected size error, got {:?}", other),
        }
    }
}
