//! Wire discriminants: packet type tags and termination kinds.

use serde::{Deserialize, Serialize};

use super::CodecError;

/// Packet type tag, the sixth byte of every envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketType {
    Error = 0x00,
    ConnectionRequest = 0x01,
    IdReclaim = 0x02,
    ConnectionResponse = 0x03,
    ServerConnectionResponse = 0x04,
    ConnectionTermination = 0x05,
    ClientUpdate = 0x06,
    ClientLogout = 0x07,
    RenameRequest = 0x08,
    TextMessage = 0x10,
    FileMessage = 0x11,
    TextDirectMessage = 0x12,
    FileDirectMessage = 0x13,
}

impl PacketType {
    /// Every tag in the catalog, in wire order
    pub const ALL: [PacketType; 13] = [
        PacketType::Error,
        PacketType::ConnectionRequest,
        PacketType::IdReclaim,
        PacketType::ConnectionResponse,
        PacketType::ServerConnectionResponse,
        PacketType::ConnectionTermination,
        PacketType::ClientUpdate,
        PacketType::ClientLogout,
        PacketType::RenameRequest,
        PacketType::TextMessage,
        PacketType::FileMessage,
        PacketType::TextDirectMessage,
        PacketType::FileDirectMessage,
    ];

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Self, CodecError> {
        match byte {
            0x00 => Ok(PacketType::Error),
            0x01 => Ok(PacketType::ConnectionRequest),
            0x02 => Ok(PacketType::IdReclaim),
            0x03 => Ok(PacketType::ConnectionResponse),
            0x04 => Ok(PacketType::ServerConnectionResponse),
            0x05 => Ok(PacketType::ConnectionTermination),
            0x06 => Ok(PacketType::ClientUpdate),
            0x07 => Ok(PacketType::ClientLogout),
            0x08 => Ok(PacketType::RenameRequest),
            0x10 => Ok(PacketType::TextMessage),
            0x11 => Ok(PacketType::FileMessage),
            0x12 => Ok(PacketType::TextDirectMessage),
            0x13 => Ok(PacketType::FileDirectMessage),
            other => Err(CodecError::UnknownPacketType(other)),
        }
    }

    /// Direct messages carry sender and recipient ids
    pub fn is_direct_message(self) -> bool {
        matches!(
            self,
            PacketType::TextDirectMessage | PacketType::FileDirectMessage
        )
    }
}

/// How a client ends its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TerminationType {
    /// Leave, keeping the id reclaimable
    Logout = 0x00,
    /// Leave and drop the account
    Delete = 0x01,
}

impl TerminationType {
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Self, CodecError> {
        match byte {
            0x00 => Ok(TerminationType::Logout),
            0x01 => Ok(TerminationType::Delete),
            other => Err(CodecError::UnknownTerminationType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_table_is_total() {
        for ty in PacketType::ALL {
            assert_eq!(PacketType::from_byte(ty.to_byte()).unwrap(), ty);
        }

        let known: Vec<u8> = PacketType::ALL.iter().map(|t| t.to_byte()).collect();
        for byte in 0..=u8::MAX {
            if !known.contains(&byte) {
                assert!(matches!(
                    PacketType::from_byte(byte),
                    Err(CodecError::UnknownPacketType(b)) if b == byte
                ));
            }
        }
    }

    #[test]
    fn test_termination_type() {
        assert_eq!(TerminationType::from_byte(0).unwrap(), TerminationType::Logout);
        assert_eq!(TerminationType::from_byte(1).unwrap(), TerminationType::Delete);
        assert!(matches!(
            TerminationType::from_byte(2),
            Err(CodecError::UnknownTerminationType(2))
        ));
    }
}
