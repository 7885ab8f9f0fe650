//! Transport seam: one open socket per connection attempt.
//!
//! The connection state machine only needs to open a socket, send text, receive
//! notifications, and close. [`WebSocketConnector`] provides that over
//! `tokio-tungstenite`; tests substitute an in-memory implementation.

use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::error::GatewayError;
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Notification produced by an open transport.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportEvent {
    /// A text frame arrived
    Message(String),
    /// The transport closed. `code` is absent when the peer vanished without a close frame.
    Closed {
        /// Close code sent by the peer
        code: Option<u16>,
        /// Close reason sent by the peer
        reason: String,
    },
    /// The transport failed. A [`TransportEvent::Closed`] always follows.
    Error(GatewayError),
}

/// An open byte-stream to the gateway.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one text frame. Fails with [`GatewayError::ConnectionClosed`] once closed.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Wait for the next notification. Never resolves after [`TransportEvent::Closed`].
    async fn recv(&mut self) -> TransportEvent;

    /// Close with the given code. Closing twice is a no-op.
    async fn close(&mut self, code: u16) -> Result<()>;
}

/// Opens transports. Called once per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    /// Open a transport to `url`, resolving once the transport is open.
    async fn connect(&self, url: &Url) -> Result<Self::Transport>;
}

/// [`Connector`] backed by `tokio-tungstenite`.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&self, url: &Url) -> Result<Self::Transport> {
        let (stream, _) = connect_async(url.as_str()).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(%url, "Gateway socket open");

        Ok(WebSocketTransport {
            stream,
            closed: false,
            errored: false,
        })
    }
}

/// [`Transport`] over a WebSocket stream.
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
    errored: bool,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        if self.closed {
            return Err(GatewayError::ConnectionClosed.into());
        }

        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> TransportEvent {
        if self.closed {
            return futures::future::pending().await;
        }

        if self.errored {
            self.closed = true;
            return TransportEvent::Closed {
                code: None,
                reason: "transport error".to_owned(),
            };
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Message(text.to_string()),
                Some(Ok(Message::Close(frame))) => {
                    self.closed = true;
                    return match frame {
                        Some(frame) => TransportEvent::Closed {
                            code: Some(u16::from(frame.code)),
                            reason: frame.reason.to_string(),
                        },
                        None => TransportEvent::Closed {
                            code: None,
                            reason: String::new(),
                        },
                    };
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite; binary frames imply compression, which is not negotiated.
                }
                Some(Err(e)) => {
                    self.errored = true;
                    return TransportEvent::Error(GatewayError::Connection(e));
                }
                None => {
                    self.closed = true;
                    return TransportEvent::Closed {
                        code: None,
                        reason: "stream ended".to_owned(),
                    };
                }
            }
        }
    }

    async fn close(&mut self, code: u16) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Utf8Bytes::from_static(""),
        };
        self.stream.close(Some(frame)).await?;
        Ok(())
    }
}
