pub mod request;
pub mod response;

use serde_repr::Serialize_repr;
use strum_macros::Display;

use super::error::GatewayError;

/// Gateway opcodes exchanged by the connection state machine.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Serialize_repr)]
#[repr(u8)]
pub enum OpCode {
    /// An application event (inbound)
    Dispatch = 0,
    /// Keep-alive (outbound, or an inbound request for an immediate beat)
    Heartbeat = 1,
    /// Start a new session (outbound)
    Identify = 2,
    /// Re-attach to an existing session (outbound)
    Resume = 6,
    /// The server asks for a fresh socket (inbound)
    Reconnect = 7,
    /// The session is no longer valid (inbound)
    InvalidSession = 9,
    /// Handshake parameters sent right after the socket opens (inbound)
    Hello = 10,
    /// Acknowledgement of a heartbeat (inbound)
    HeartbeatAck = 11,
}

impl TryFrom<u8> for OpCode {
    type Error = GatewayError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Dispatch),
            1 => Ok(Self::Heartbeat),
            2 => Ok(Self::Identify),
            6 => Ok(Self::Resume),
            7 => Ok(Self::Reconnect),
            9 => Ok(Self::InvalidSession),
            10 => Ok(Self::Hello),
            11 => Ok(Self::HeartbeatAck),
            other => Err(GatewayError::UnexpectedOpcode(other)),
        }
    }
}
