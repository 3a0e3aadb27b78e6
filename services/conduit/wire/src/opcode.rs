//! Opcode byte that leads every message unit on the wire.

use serde::{Deserialize, Serialize};

/// Message unit kinds as defined in the wire protocol.
///
/// `0x00` is reserved and never sent.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// Session open request, sent by the dialing side after the key exchange
    Connect = 0x01,
    /// Session open acknowledgement
    ConnectOk = 0x02,
    /// Heartbeat request carrying a one byte token
    Ping = 0x03,
    /// Heartbeat reply echoing the token
    PingOk = 0x04,
    /// Graceful close
    Disconnect = 0x05,
    /// Encrypted, codec-serialized structured message
    Message = 0x06,
    /// Encrypted raw byte payload
    Raw = 0x07,
}

impl Opcode {
    /// Whether a 4-byte length prefix and ciphertext follow the opcode
    pub fn is_application(self) -> bool {
        matches!(self, Opcode::Message | Opcode::Raw)
    }

    /// Fixed payload size of control opcodes (`None` for length-prefixed ones)
    pub fn fixed_payload_len(self) -> Option<usize> {
        match self {
            Opcode::Connect | Opcode::ConnectOk | Opcode::Disconnect => Some(0),
            Opcode::Ping | Opcode::PingOk => Some(1),
            Opcode::Message | Opcode::Raw => None,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Opcode::Connect),
            0x02 => Ok(Opcode::ConnectOk),
            0x03 => Ok(Opcode::Ping),
            0x04 => Ok(Opcode::PingOk),
            0x05 => Ok(Opcode::Disconnect),
            0x06 => Ok(Opcode::Message),
            0x07 => Ok(Opcode::Raw),
            _ => Err(crate::WireError::Opcode(value)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> u8 {
        opcode as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_values_are_stable() {
        assert_eq!(u8::from(Opcode::Connect), 1);
        assert_eq!(u8::from(Opcode::ConnectOk), 2);
        assert_eq!(u8::from(Opcode::Ping), 3);
        assert_eq!(u8::from(Opcode::PingOk), 4);
        assert_eq!(u8::from(Opcode::Disconnect), 5);
        assert_eq!(u8::from(Opcode::Message), 6);
        assert_eq!(u8::from(Opcode::Raw), 7);
    }

    #[test]
    fn test_reserved_and_unknown_bytes_rejected() {
        assert!(matches!(
            Opcode::try_from(0x00),
            Err(crate::WireError::Opcode(0))
        ));
        assert!(matches!(
            Opcode::try_from(0x08),
            Err(crate::WireError::Opcode(8))
        ));
        assert!(Opcode::try_from(0xFF).is_err());
    }

    #[test]
    fn test_payload_shapes() {
        assert_eq!(Opcode::Connect.fixed_payload_len(), Some(0));
        assert_eq!(Opcode::Ping.fixed_payload_len(), Some(1));
        assert_eq!(Opcode::Raw.fixed_payload_len(), None);
        assert!(Opcode::Message.is_application());
        assert!(!Opcode::PingOk.is_application());
    }
}
