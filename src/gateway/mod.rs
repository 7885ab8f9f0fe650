#![expect(
    clippy::module_name_repetitions,
    reason = "Re-exported names intentionally match their modules for API clarity"
)]

//! Realtime gateway client.
//!
//! A [`Gateway`] keeps one logical session alive across any number of
//! transports. It answers Hello with Identify or Resume, heartbeats at the
//! server-dictated cadence, detects zombie connections, and reconnects and
//! resumes when the socket drops or the server asks for it.
//!
//! # Architecture
//!
//! - [`Gateway`]: handle to the background connection task
//! - [`connection`]: the protocol state machine, one task per gateway
//! - [`HeartbeatScheduler`]: the per-transport heartbeat timer
//! - [`SessionState`]: session id and sequence cursor used to resume
//! - [`Connector`] and [`Transport`]: the socket seam, backed by `tokio-tungstenite`
//! - [`EventSink`]: where dispatch events go
//!
//! # Example
//!
//! ```rust, no_run
//! use futures::StreamExt as _;
//! use rawcord::auth::Credentials;
//! use rawcord::gateway::{Config, Gateway};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gateway = Gateway::connect(Config::default(), Credentials::from_env()?)?;
//!     let mut events = Box::pin(gateway.events()?);
//!
//!     while let Some(event) = events.next().await {
//!         let event = event?;
//!         println!("{} #{:?}", event.name, event.sequence);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod intents;
pub mod session;
pub mod traits;
pub mod transport;
pub mod types;

pub use client::Gateway;
pub use config::{Config, Encoding, ReconnectConfig};
pub use connection::ConnectionState;
pub use error::{CloseAction, GatewayError};
pub use heartbeat::HeartbeatScheduler;
pub use intents::Intents;
pub use session::SessionState;
pub use traits::EventSink;
pub use transport::{Connector, Transport, TransportEvent, WebSocketConnector};
pub use types::response::Event;
