use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::OpCode;
use crate::Result;
use crate::gateway::error::GatewayError;

/// Dispatch event name announcing a new session.
pub const READY: &str = "READY";
/// Dispatch event name confirming a successful resume.
pub const RESUMED: &str = "RESUMED";

/// Wire shape of every inbound frame before it is interpreted.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

/// A decoded inbound frame.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Sequence number, present on dispatch events
    pub sequence: Option<u64>,
    /// The opcode-specific payload
    pub payload: Payload,
}

/// Inbound payload, one arm per opcode the client accepts.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Application event
    Dispatch(Event),
    /// The server asks for a heartbeat right away
    Heartbeat,
    /// The server asks the client to reconnect and resume
    Reconnect,
    /// The session was invalidated
    InvalidSession {
        /// Whether the session may still be resumed
        resumable: bool,
    },
    /// Handshake parameters
    Hello(Hello),
    /// A heartbeat was acknowledged
    HeartbeatAck,
}

/// Hello payload.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Hello {
    /// Heartbeat cadence in milliseconds. Signed so that a bogus value can be reported.
    #[serde(alias = "heartbeatIntervalMillis")]
    pub heartbeat_interval: i64,
}

/// An application event delivered to the [`crate::gateway::EventSink`].
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, e.g. `MESSAGE_CREATE`
    pub name: String,
    /// Sequence number the event arrived with
    pub sequence: Option<u64>,
    /// Raw event data
    pub data: Value,
}

impl Event {
    /// Whether this is the session-ready control event.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.name == READY
    }

    /// Whether this is the resume-confirmation control event.
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.name == RESUMED
    }

    /// Try to extract the payload as a [`Ready`].
    #[must_use]
    pub fn as_ready(&self) -> Option<Ready> {
        if self.is_ready() {
            serde_json::from_value(self.data.clone()).ok()
        } else {
            None
        }
    }
}

/// The subset of the READY payload the client needs for session bookkeeping.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Ready {
    /// Session identifier used by Resume
    #[serde(alias = "sessionId")]
    pub session_id: String,
    /// Gateway version the server speaks
    #[serde(default, rename = "v")]
    pub version: Option<u8>,
}

/// Decode one inbound text frame.
pub fn parse_envelope(bytes: &[u8]) -> Result<Envelope> {
    let raw: RawEnvelope = serde_json::from_slice(bytes).map_err(GatewayError::MessageParse)?;

    let payload = match OpCode::try_from(raw.op)? {
        OpCode::Dispatch => {
            let name = raw.t.ok_or_else(|| {
                GatewayError::MessageParse(serde::de::Error::missing_field("t"))
            })?;
            Payload::Dispatch(Event {
                name,
                sequence: raw.s,
                data: raw.d,
            })
        }
        OpCode::Heartbeat => Payload::Heartbeat,
        OpCode::Reconnect => Payload::Reconnect,
        OpCode::InvalidSession => {
            let resumable = match raw.d {
                Value::Bool(resumable) => resumable,
                Value::Null => false,
                other => {
                    return Err(GatewayError::MessageParse(serde::de::Error::invalid_type(
                        serde::de::Unexpected::Other(&other.to_string()),
                        &"a boolean resumable flag",
                    ))
                    .into());
                }
            };
            Payload::InvalidSession { resumable }
        }
        OpCode::Hello => {
            Payload::Hello(serde_json::from_value(raw.d).map_err(GatewayError::MessageParse)?)
        }
        OpCode::HeartbeatAck => Payload::HeartbeatAck,
        op @ (OpCode::Identify | OpCode::Resume) => {
            return Err(GatewayError::UnexpectedOpcode(op as u8).into());
        }
    };

    Ok(Envelope {
        sequence: raw.s,
        payload,
    })
}
