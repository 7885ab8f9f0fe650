use bon::Builder;
use serde::Serialize;
use serde_json::Value;

use super::OpCode;
use crate::Result;
use crate::auth::Credentials;
use crate::gateway::intents::Intents;
use crate::gateway::traits::WithToken;

/// Outbound frame: `{op, d}`.
#[derive(Debug, Serialize)]
struct Frame<D: Serialize> {
    op: OpCode,
    d: D,
}

/// Client properties reported with Identify.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Builder)]
pub struct IdentifyProperties {
    /// Operating system of the client
    #[builder(into)]
    pub os: String,
    /// Client library name
    #[serde(rename = "browser")]
    #[builder(into)]
    pub client: String,
    /// Device name
    #[builder(into)]
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_owned(),
            client: env!("CARGO_PKG_NAME").to_owned(),
            device: env!("CARGO_PKG_NAME").to_owned(),
        }
    }
}

/// Identify payload. The token is attached at serialization time, see [`WithToken`].
#[non_exhaustive]
#[derive(Clone, Debug, Serialize, Builder)]
pub struct Identify {
    /// Capability bitmask
    pub intents: Intents,
    /// Client properties
    #[builder(default)]
    pub properties: IdentifyProperties,
}

impl WithToken for Identify {}

/// Resume payload. The token is attached at serialization time, see [`WithToken`].
#[non_exhaustive]
#[derive(Clone, Debug, Serialize, Builder)]
pub struct Resume {
    /// Session to re-attach to
    #[builder(into)]
    pub session_id: String,
    /// Last sequence number the client processed
    pub seq: u64,
}

impl WithToken for Resume {}

/// Encode a heartbeat carrying the last known sequence number.
pub fn heartbeat(sequence: Option<u64>) -> Result<String> {
    Ok(serde_json::to_string(&Frame {
        op: OpCode::Heartbeat,
        d: sequence,
    })?)
}

/// Encode an Identify frame.
pub fn identify(payload: &Identify, credentials: &Credentials) -> Result<String> {
    authenticated(OpCode::Identify, payload, credentials)
}

/// Encode a Resume frame.
pub fn resume(payload: &Resume, credentials: &Credentials) -> Result<String> {
    authenticated(OpCode::Resume, payload, credentials)
}

fn authenticated<P: WithToken>(op: OpCode, payload: &P, credentials: &Credentials) -> Result<String> {
    let d: Value = payload.with_token(credentials)?;
    Ok(serde_json::to_string(&Frame { op, d })?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn credentials() -> Credentials {
        Credentials::new("token-123")
    }

    #[test]
    fn heartbeat_carries_sequence_or_null() {
        assert_eq!(heartbeat(Some(42)).unwrap(), r#"{"op":1,"d":42}"#);
        assert_eq!(heartbeat(None).unwrap(), r#"{"op":1,"d":null}"#);
    }

    #[test]
    fn identify_frame_shape() {
        let payload = Identify::builder()
            .intents(Intents::GUILDS | Intents::GUILD_MESSAGES)
            .properties(
                IdentifyProperties::builder()
                    .os("linux")
                    .client("rawcord")
                    .device("rawcord")
                    .build(),
            )
            .build();

        let frame: Value = serde_json::from_str(&identify(&payload, &credentials()).unwrap()).unwrap();

        assert_eq!(
            frame,
            json!({
                "op": 2,
                "d": {
                    "token": "token-123",
                    "intents": 513,
                    "properties": { "os": "linux", "browser": "rawcord", "device": "rawcord" }
                }
            })
        );
    }

    #[test]
    fn resume_frame_shape() {
        let payload = Resume::builder().session_id("abc").seq(7).build();

        let frame: Value = serde_json::from_str(&resume(&payload, &credentials()).unwrap()).unwrap();

        assert_eq!(
            frame,
            json!({ "op": 6, "d": { "token": "token-123", "session_id": "abc", "seq": 7 } })
        );
    }

    #[test]
    fn debug_output_never_contains_token() {
        let payload = Resume::builder().session_id("abc").seq(7).build();

        assert!(!format!("{payload:?}").contains("token-123"));
    }
}
