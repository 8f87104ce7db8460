//! Application-level status codes carried by the `Error` packet.
//!
//! These describe what went wrong in the chat session, not in the codec.
//! Codec failures are reported through [`CodecError`].

use std::fmt;

use serde::{Deserialize, Serialize};

use super::CodecError;

/// Status code of an `Error` packet
///
/// `NotConnectedYet` and `RecipientNotFound` share the wire value `0x06`.
/// The byte decodes to `NotConnectedYet`, so `RecipientNotFound` only
/// survives a round trip as its canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    AlreadyLoggedIn,
    NotConnectedYet,
    RecipientNotFound,
    InvalidPackageId,
    IdNotFound,
}

impl ErrorCode {
    pub fn to_byte(self) -> u8 {
        match self {
            ErrorCode::AlreadyLoggedIn => 0x05,
            ErrorCode::NotConnectedYet => 0x06,
            ErrorCode::RecipientNotFound => 0x06,
            ErrorCode::InvalidPackageId => 0x02,
            ErrorCode::IdNotFound => 0x01,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, CodecError> {
        match byte {
            0x01 => Ok(ErrorCode::IdNotFound),
            0x02 => Ok(ErrorCode::InvalidPackageId),
            0x05 => Ok(ErrorCode::AlreadyLoggedIn),
            0x06 => Ok(ErrorCode::NotConnectedYet),
            other => Err(CodecError::UnknownErrorCode(other)),
        }
    }

    /// The member this code decodes back to
    pub fn canonical(self) -> Self {
        match self {
            ErrorCode::RecipientNotFound => ErrorCode::NotConnectedYet,
            other => other,
        }
    }

    pub fn is_alias(self) -> bool {
        self.canonical() != self
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::AlreadyLoggedIn => "already logged in",
            ErrorCode::NotConnectedYet => "not connected yet",
            ErrorCode::RecipientNotFound => "recipient not found",
            ErrorCode::InvalidPackageId => "invalid package id",
            ErrorCode::IdNotFound => "id not found",
        };
        write!(f, "{} (0x{:02x})", name, self.to_byte())
    }
}
