//! rcon-client - Client engine for the RCON protocol
//!
//! Connects to game servers over TCP, authenticates, executes console
//! commands and receives pushed log lines on the same connection.

pub mod config;
pub mod network;
pub mod protocol;

pub use network::{
    AuthState, ConnectionState, Direction, RequestError, Response, Session, SessionConfig,
    SessionError, SessionEvent, SessionResult,
};
pub use protocol::{Frame, PacketType};
