//! Packet definitions
//!
//! The packet type field is owned by the protocol, not by this crate, and
//! several request and response kinds share the same value on the wire.

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;

/// Id a server uses in its auth response when the password was rejected
pub const AUTH_FAILED_ID: i32 = -1;

/// Raw packet type as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketType(pub i32);

impl PacketType {
    /// Generic response carrying command output (also used for sentinels)
    pub const RESPONSE_VALUE: PacketType = PacketType(0);
    /// Execute a console command
    pub const EXEC_COMMAND: PacketType = PacketType(2);
    /// Server answer to an authentication request
    pub const AUTH_RESPONSE: PacketType = PacketType(2);
    /// Authentication request carrying the password
    pub const AUTH: PacketType = PacketType(3);

    pub fn as_i32(self) -> i32 {
        self.0
    }

    /// Authentication requests get exactly one answer and no sentinel
    pub fn is_auth_request(self) -> bool {
        self == Self::AUTH
    }
}

impl From<i32> for PacketType {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => write!(f, "RESPONSE_VALUE"),
            2 => write!(f, "EXEC_COMMAND/AUTH_RESPONSE"),
            3 => write!(f, "AUTH"),
            other => write!(f, "UNKNOWN({})", other),
        }
    }
}

/// One decoded or to-be-encoded protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Request or response id
    pub id: i32,
    /// Packet type
    pub kind: PacketType,
    /// Body without the trailing terminators
    pub body: Bytes,
}

impl Frame {
    pub fn new(id: i32, kind: PacketType, body: impl Into<Bytes>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }

    /// Empty response-type frame used to mark the end of a multi-packet reply
    pub fn sentinel(id: i32) -> Self {
        Self::new(id, PacketType::RESPONSE_VALUE, Bytes::new())
    }

    /// Body decoded as text, replacing invalid UTF-8
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Number of bytes this frame occupies on the wire
    pub fn encoded_len(&self) -> usize {
        super::FRAME_OVERHEAD + self.body.len()
    }
}
