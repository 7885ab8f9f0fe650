#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

use phf::phf_map;

/// Gateway error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum GatewayError {
    /// Error connecting to or communicating with the gateway
    Connection(tokio_tungstenite::tungstenite::Error),
    /// Error decoding a gateway frame
    MessageParse(serde_json::Error),
    /// A frame carried an opcode the client never receives
    UnexpectedOpcode(u8),
    /// Hello carried a heartbeat interval that is not strictly positive
    InvalidHeartbeatInterval(i64),
    /// The transport is closed
    ConnectionClosed,
    /// The server closed the connection with a code that forbids reconnecting
    FatalClose {
        /// Close code sent by the server
        code: u16,
        /// Close reason sent by the server
        reason: String,
    },
    /// The server rejected Identify too many times in a row
    IdentifyRejected {
        /// Number of consecutive rejections
        attempts: u32,
    },
    /// Opening a transport failed more often than the reconnect policy allows
    ReconnectExhausted {
        /// Number of failed attempts
        attempts: u32,
    },
    /// Event stream lagged and missed events
    Lagged {
        /// Number of events that were missed
        count: u64,
    },
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "Gateway connection error: {e}"),
            Self::MessageParse(e) => write!(f, "Failed to decode gateway frame: {e}"),
            Self::UnexpectedOpcode(op) => write!(f, "Unexpected gateway opcode {op}"),
            Self::InvalidHeartbeatInterval(ms) => {
                write!(f, "Invalid heartbeat interval {ms}ms in Hello")
            }
            Self::ConnectionClosed => write!(f, "Gateway connection closed"),
            Self::FatalClose { code, reason } => {
                write!(f, "Gateway closed with fatal code {code}: {reason}")
            }
            Self::IdentifyRejected { attempts } => {
                write!(f, "Identify rejected {attempts} times in a row")
            }
            Self::ReconnectExhausted { attempts } => {
                write!(f, "Gave up reconnecting after {attempts} attempts")
            }
            Self::Lagged { count } => write!(f, "Event stream lagged, missed {count} events"),
        }
    }
}

impl StdError for GatewayError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::MessageParse(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<GatewayError> for crate::error::Error {
    fn from(e: GatewayError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::Gateway, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::Gateway, GatewayError::Connection(e))
    }
}

/// What the client does after the server closes the transport with a given code.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Reconnect and resume the existing session
    Resume,
    /// Reconnect, discarding the session so the next Hello identifies
    Reidentify,
    /// Do not reconnect; surface the close to the caller
    Fatal,
}

impl CloseAction {
    /// Classify a server close code. Codes not listed are treated as resumable.
    #[must_use]
    pub fn from_code(code: u16) -> Self {
        CLOSE_CODES.get(&code).map_or(Self::Resume, |(action, _)| *action)
    }
}

/// Describe a known gateway close code.
#[must_use]
pub fn describe_close_code(code: u16) -> Option<&'static str> {
    CLOSE_CODES.get(&code).map(|(_, description)| *description)
}

static CLOSE_CODES: phf::Map<u16, (CloseAction, &'static str)> = phf_map! {
    4000_u16 => (CloseAction::Resume, "unknown error"),
    4001_u16 => (CloseAction::Resume, "unknown opcode"),
    4002_u16 => (CloseAction::Resume, "decode error"),
    4003_u16 => (CloseAction::Resume, "not authenticated"),
    4004_u16 => (CloseAction::Fatal, "authentication failed"),
    4005_u16 => (CloseAction::Resume, "already authenticated"),
    4007_u16 => (CloseAction::Reidentify, "invalid seq"),
    4008_u16 => (CloseAction::Resume, "rate limited"),
    4009_u16 => (CloseAction::Reidentify, "session timed out"),
    4010_u16 => (CloseAction::Fatal, "invalid shard"),
    4011_u16 => (CloseAction::Fatal, "sharding required"),
    4012_u16 => (CloseAction::Fatal, "invalid API version"),
    4013_u16 => (CloseAction::Fatal, "invalid intent(s)"),
    4014_u16 => (CloseAction::Fatal, "disallowed intent(s)"),
};
