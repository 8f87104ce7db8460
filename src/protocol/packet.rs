//! Packet definitions
//!
//! A [`Packet`] is a timestamp plus one of the thirteen [`Payload`]
//! variants. Its encoded length is always computed from the current field
//! contents and never stored.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::primitives::{blob_len, string_len, FieldReader, PutFields, LENGTH_PREFIX_SIZE};
use super::{CodecError, ErrorCode, PacketType, TerminationType, ENVELOPE_SIZE, PROTOCOL_VERSION};

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Sender and recipient ids shared by the point-to-point variants
pub trait DirectMessage {
    fn recipient_id(&self) -> u32;
    fn sender_id(&self) -> u32;
}

/// File contents plus the metadata sent alongside them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub mime_type: String,
    pub file_name: String,
    pub description: String,
    pub data: Vec<u8>,
}

impl FileAttachment {
    fn encoded_len(&self) -> usize {
        string_len(&self.mime_type)
            + string_len(&self.file_name)
            + string_len(&self.description)
            + blob_len(&self.data)
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_string(&self.mime_type);
        buf.put_string(&self.file_name);
        buf.put_string(&self.description);
        buf.put_blob(&self.data);
    }

    fn decode(reader: &mut FieldReader) -> Result<Self, CodecError> {
        Ok(Self {
            mime_type: reader.read_string()?,
            file_name: reader.read_string()?,
            description: reader.read_string()?,
            data: reader.read_blob()?,
        })
    }
}

/// Text addressed to a single user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDirectMessage {
    pub recipient_id: u32,
    pub sender_id: u32,
    pub text: String,
}

impl DirectMessage for TextDirectMessage {
    fn recipient_id(&self) -> u32 {
        self.recipient_id
    }

    fn sender_id(&self) -> u32 {
        self.sender_id
    }
}

/// File addressed to a single user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDirectMessage {
    pub recipient_id: u32,
    pub sender_id: u32,
    pub file: FileAttachment,
}

impl DirectMessage for FileDirectMessage {
    fn recipient_id(&self) -> u32 {
        self.recipient_id
    }

    fn sender_id(&self) -> u32 {
        self.sender_id
    }
}

/// All packet payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Application-level failure report
    Error {
        code: ErrorCode,
        description: String,
    },

    /// First packet a client sends
    ConnectionRequest {
        name: String,
    },

    /// Reconnect under a previously assigned id
    IdReclaim {
        id: u32,
    },

    /// Answer to a connection request. An empty name means none was given;
    /// see [`Payload::response_name`].
    ConnectionResponse {
        accepted: bool,
        name: String,
    },

    /// Assigned id plus the users already online, in server order
    ServerConnectionResponse {
        id: u32,
        users: Vec<(u32, String)>,
    },

    ConnectionTermination {
        kind: TerminationType,
    },

    /// A user joined or changed name
    ClientUpdate {
        id: u32,
        name: String,
    },

    ClientLogout {
        id: u32,
    },

    RenameRequest {
        name: String,
    },

    /// Broadcast text
    TextMessage {
        text: String,
    },

    /// Broadcast file
    FileMessage(FileAttachment),

    TextDirectMessage(TextDirectMessage),

    FileDirectMessage(FileDirectMessage),
}

impl Payload {
    /// Get the packet type tag
    pub fn packet_type(&self) -> PacketType {
        match self {
            Payload::Error { .. } => PacketType::Error,
            Payload::ConnectionRequest { .. } => PacketType::ConnectionRequest,
            Payload::IdReclaim { .. } => PacketType::IdReclaim,
            Payload::ConnectionResponse { .. } => PacketType::ConnectionResponse,
            Payload::ServerConnectionResponse { .. } => PacketType::ServerConnectionResponse,
            Payload::ConnectionTermination { .. } => PacketType::ConnectionTermination,
            Payload::ClientUpdate { .. } => PacketType::ClientUpdate,
            Payload::ClientLogout { .. } => PacketType::ClientLogout,
            Payload::RenameRequest { .. } => PacketType::RenameRequest,
            Payload::TextMessage { .. } => PacketType::TextMessage,
            Payload::FileMessage(_) => PacketType::FileMessage,
            Payload::TextDirectMessage(_) => PacketType::TextDirectMessage,
            Payload::FileDirectMessage(_) => PacketType::FileDirectMessage,
        }
    }

    /// Sender/recipient view for the two direct-message variants
    pub fn as_direct_message(&self) -> Option<&dyn DirectMessage> {
        match self {
            Payload::TextDirectMessage(dm) => Some(dm as &dyn DirectMessage),
            Payload::FileDirectMessage(dm) => Some(dm),
            _ => None,
        }
    }

    /// Name carried by a connection response, if one was given
    pub fn response_name(&self) -> Option<&str> {
        match self {
            Payload::ConnectionResponse { name, .. } if !name.is_empty() => Some(name),
            _ => None,
        }
    }

    /// Encoded payload size, envelope excluded
    pub fn encoded_len(&self) -> usize {
        match self {
            Payload::Error { description, .. } => 1 + string_len(description),
            Payload::ConnectionRequest { name } => string_len(name),
            Payload::IdReclaim { .. } => 4,
            Payload::ConnectionResponse { name, .. } => 1 + string_len(name),
            Payload::ServerConnectionResponse { users, .. } => {
                4 + LENGTH_PREFIX_SIZE
                    + users.len() * 4
                    + LENGTH_PREFIX_SIZE
                    + users.iter().map(|(_, name)| string_len(name)).sum::<usize>()
            }
            Payload::ConnectionTermination { .. } => 1,
            Payload::ClientUpdate { name, .. } => 4 + string_len(name),
            Payload::ClientLogout { .. } => 4,
            Payload::RenameRequest { name } => string_len(name),
            Payload::TextMessage { text } => string_len(text),
            Payload::FileMessage(file) => file.encoded_len(),
            Payload::TextDirectMessage(dm) => 4 + 4 + string_len(&dm.text),
            Payload::FileDirectMessage(dm) => 4 + 4 + dm.file.encoded_len(),
        }
    }

    /// Write the payload fields in wire order
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Payload::Error { code, description } => {
                buf.put_u8(code.to_byte());
                buf.put_string(description);
            }
            Payload::ConnectionRequest { name } => buf.put_string(name),
            Payload::IdReclaim { id } => buf.put_u32(*id),
            Payload::ConnectionResponse { accepted, name } => {
                buf.put_bool(*accepted);
                buf.put_string(name);
            }
            Payload::ServerConnectionResponse { id, users } => {
                buf.put_u32(*id);
                buf.put_array(users, |b, (user_id, _)| b.put_u32(*user_id));
                buf.put_array(users, |b, (_, name)| b.put_string(name));
            }
            Payload::ConnectionTermination { kind } => buf.put_u8(kind.to_byte()),
            Payload::ClientUpdate { id, name } => {
                buf.put_u32(*id);
                buf.put_string(name);
            }
            Payload::ClientLogout { id } => buf.put_u32(*id),
            Payload::RenameRequest { name } => buf.put_string(name),
            Payload::TextMessage { text } => buf.put_string(text),
            Payload::FileMessage(file) => file.encode(buf),
            Payload::TextDirectMessage(dm) => {
                buf.put_u32(dm.recipient_id);
                buf.put_u32(dm.sender_id);
                buf.put_string(&dm.text);
            }
            Payload::FileDirectMessage(dm) => {
                buf.put_u32(dm.recipient_id);
                buf.put_u32(dm.sender_id);
                dm.file.encode(buf);
            }
        }
    }

    /// Read the payload fields for `packet_type` in wire order
    pub fn decode(packet_type: PacketType, reader: &mut FieldReader) -> Result<Self, CodecError> {
        let payload = match packet_type {
            PacketType::Error => Payload::Error {
                code: ErrorCode::from_byte(reader.read_u8()?)?,
                description: reader.read_string()?,
            },
            PacketType::ConnectionRequest => Payload::ConnectionRequest {
                name: reader.read_string()?,
            },
            PacketType::IdReclaim => Payload::IdReclaim {
                id: reader.read_u32()?,
            },
            PacketType::ConnectionResponse => Payload::ConnectionResponse {
                accepted: reader.read_bool()?,
                name: reader.read_string()?,
            },
            PacketType::ServerConnectionResponse => {
                let id = reader.read_u32()?;
                let ids = reader.read_array(|r| r.read_u32())?;
                let names = reader.read_array(|r| r.read_string())?;
                if ids.len() != names.len() {
                    return Err(CodecError::UserListMismatch {
                        ids: ids.len(),
                        names: names.len(),
                    });
                }
                Payload::ServerConnectionResponse {
                    id,
                    users: ids.into_iter().zip(names).collect(),
                }
            }
            PacketType::ConnectionTermination => Payload::ConnectionTermination {
                kind: TerminationType::from_byte(reader.read_u8()?)?,
            },
            PacketType::ClientUpdate => Payload::ClientUpdate {
                id: reader.read_u32()?,
                name: reader.read_string()?,
            },
            PacketType::ClientLogout => Payload::ClientLogout {
                id: reader.read_u32()?,
            },
            PacketType::RenameRequest => Payload::RenameRequest {
                name: reader.read_string()?,
            },
            PacketType::TextMessage => Payload::TextMessage {
                text: reader.read_string()?,
            },
            PacketType::FileMessage => Payload::FileMessage(FileAttachment::decode(reader)?),
            PacketType::TextDirectMessage => Payload::TextDirectMessage(TextDirectMessage {
                recipient_id: reader.read_u32()?,
                sender_id: reader.read_u32()?,
                text: reader.read_string()?,
            }),
            PacketType::FileDirectMessage => Payload::FileDirectMessage(FileDirectMessage {
                recipient_id: reader.read_u32()?,
                sender_id: reader.read_u32()?,
                file: FileAttachment::decode(reader)?,
            }),
        };
        Ok(payload)
    }
}

/// A complete TTCP packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub payload: Payload,
}

impl Packet {
    /// Create a packet stamped with the current time
    pub fn new(payload: Payload) -> Self {
        Self::with_timestamp(payload, now_millis())
    }

    pub fn with_timestamp(payload: Payload, timestamp: i64) -> Self {
        Self { timestamp, payload }
    }

    pub fn version(&self) -> u8 {
        PROTOCOL_VERSION
    }

    pub fn packet_type(&self) -> PacketType {
        self.payload.packet_type()
    }

    /// Total encoded size from the version byte through the payload
    pub fn encoded_len(&self) -> usize {
        ENVELOPE_SIZE + self.payload.encoded_len()
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        super::Encoder::new().encode(self, &mut buf)?;
        Ok(buf.freeze())
    }
}
