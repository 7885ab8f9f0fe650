use async_stream::try_stream;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::config::Config;
use super::connection::{Connection, ConnectionState};
use super::error::GatewayError;
use super::traits::EventSink;
use super::transport::{Connector, WebSocketConnector};
use super::types::response::Event;
use crate::Result;
use crate::auth::Credentials;
use crate::error::{Error, Kind};

/// Handle to a running gateway connection.
///
/// The connection runs on its own task, reconnecting and resuming as needed,
/// until [`Gateway::close`] is called, a fatal condition is hit, or the handle
/// is dropped. Dropping the handle requests the same shutdown as `close` but
/// does not wait for it.
///
/// # Example
///
/// ```rust, no_run
/// use futures::StreamExt as _;
/// use rawcord::auth::Credentials;
/// use rawcord::gateway::{Config, Gateway, Intents};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let mut config = Config::default();
///     config.intents = Intents::GUILDS | Intents::GUILD_MESSAGES;
///
///     let gateway = Gateway::connect(config, Credentials::from_env()?)?;
///     let events = gateway.events()?;
///     let mut events = Box::pin(events);
///
///     while let Some(event) = events.next().await {
///         println!("{}", event?.name);
///     }
///
///     gateway.close().await?;
///     Ok(())
/// }
/// ```
pub struct Gateway {
    state_rx: watch::Receiver<ConnectionState>,
    /// Present when events are fanned out over a broadcast channel
    broadcast_tx: Option<broadcast::Sender<Event>>,
    shutdown: DropGuard,
    task: JoinHandle<Result<()>>,
}

impl Gateway {
    /// Connect to the gateway over WebSocket and broadcast every dispatch event.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(config: Config, credentials: Credentials) -> Result<Self> {
        Self::with_connector(config, credentials, WebSocketConnector)
    }

    /// Like [`Gateway::connect`] with a custom [`Connector`].
    pub fn with_connector<C: Connector>(
        config: Config,
        credentials: Credentials,
        connector: C,
    ) -> Result<Self> {
        let (broadcast_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let mut gateway =
            Self::with_sink(config, credentials, connector, broadcast_tx.clone())?;
        gateway.broadcast_tx = Some(broadcast_tx);

        Ok(gateway)
    }

    /// Start the connection, handing every dispatch event to `sink`.
    ///
    /// [`Gateway::subscribe`] and [`Gateway::events`] are unavailable with a custom sink.
    pub fn with_sink<C: Connector, S: EventSink>(
        config: Config,
        credentials: Credentials,
        connector: C,
        sink: S,
    ) -> Result<Self> {
        // Surface a bad endpoint here instead of inside the reconnect loop.
        config.gateway_url()?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let token = CancellationToken::new();
        let connection = Connection::new(
            config,
            credentials,
            connector,
            sink,
            state_tx,
            token.clone(),
        );
        let task = tokio::spawn(connection.run());

        Ok(Self {
            state_rx,
            broadcast_tx: None,
            shutdown: token.drop_guard(),
            task,
        })
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch channel receiver for state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Subscribe to dispatch events received from now on.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<Event>> {
        self.broadcast_tx
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| Error::validation("Events are delivered to a custom sink"))
    }

    /// Stream of dispatch events received from now on.
    ///
    /// Yields [`GatewayError::Lagged`] if the consumer falls behind by more than
    /// [`Config::event_capacity`] events, then carries on. Ends once the
    /// connection has stopped and this handle is gone.
    pub fn events(&self) -> Result<impl Stream<Item = Result<Event>> + use<>> {
        let mut rx = self.subscribe()?;

        Ok(try_stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Event stream lagged, missed {n} events");
                        Err(GatewayError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Shut the connection down and wait until it has stopped.
    ///
    /// Once this returns, the heartbeat timer and any pending retry are gone and
    /// the transport has been closed with code 1000. Returns the error that
    /// stopped the connection if it had already terminated on its own.
    pub async fn close(self) -> Result<()> {
        let Self { shutdown, task, .. } = self;
        drop(shutdown);

        join(task).await
    }

    /// Wait until the connection stops on its own.
    ///
    /// Resolves with an error for fatal close codes, repeated identify
    /// rejection, or exhausted reconnect attempts.
    pub async fn wait(self) -> Result<()> {
        let Self { shutdown, task, .. } = self;
        let result = join(task).await;
        drop(shutdown);

        result
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("state", &self.state())
            .field("finished", &self.task.is_finished())
            .finish_non_exhaustive()
    }
}

async fn join(task: JoinHandle<Result<()>>) -> Result<()> {
    task.await
        .map_err(|e| Error::with_source(Kind::Internal, e))?
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt as _;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::gateway::connection::{CLOSE_NORMAL, CLOSE_RESUMABLE};
    use crate::gateway::transport::mock::{self, MockPeer, MockServer};

    fn start(config: Config) -> (Gateway, MockServer) {
        let (connector, server) = mock::pair();
        let gateway =
            Gateway::with_connector(config, Credentials::new("test-token"), connector).unwrap();
        (gateway, server)
    }

    async fn wait_for(gateway: &Gateway, expected: ConnectionState) {
        let mut rx = gateway.state_receiver();
        tokio::time::timeout(
            Duration::from_secs(600),
            rx.wait_for(|state| *state == expected),
        )
        .await
        .expect("timed out waiting for state")
        .expect("connection task stopped");
    }

    /// Accept a transport and walk it through Hello, Identify and READY.
    async fn establish(server: &mut MockServer, session_id: &str, seq: u64) -> MockPeer {
        let mut peer = server.accept().await;
        peer.send_json(&json!({ "op": 10, "d": { "heartbeat_interval": 45_000 } }));
        let identify = peer.recv_json().await;
        assert_eq!(identify["op"], 2);
        peer.send_json(&json!({
            "op": 0,
            "s": seq,
            "t": "READY",
            "d": { "session_id": session_id }
        }));
        peer
    }

    #[tokio::test(start_paused = true)]
    async fn zombie_connection_resumes_on_new_transport() {
        let (gateway, mut server) = start(Config::default());
        let mut peer = establish(&mut server, "abc", 1).await;
        wait_for(&gateway, ConnectionState::Connected).await;

        assert_eq!(peer.recv_json().await, json!({ "op": 1, "d": 1 }));
        // No ack: the next tick finds the beat outstanding.
        let mut next = server.accept().await;

        assert_eq!(peer.close_code(), Some(CLOSE_RESUMABLE));
        next.send_json(&json!({ "op": 10, "d": { "heartbeat_interval": 45_000 } }));
        assert_eq!(
            next.recv_json().await,
            json!({ "op": 6, "d": { "token": "test-token", "session_id": "abc", "seq": 1 } })
        );
        assert_eq!(gateway.state(), ConnectionState::Resuming);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_request_resumes_with_latest_sequence() {
        let (gateway, mut server) = start(Config::default());
        let peer = establish(&mut server, "s", 1).await;
        peer.send_json(&json!({ "op": 0, "s": 10, "t": "MESSAGE_CREATE", "d": {} }));
        peer.send_json(&json!({ "op": 7, "d": null }));

        let mut next = server.accept().await;
        next.send_json(&json!({ "op": 10, "d": { "heartbeat_interval": 45_000 } }));

        let resume = next.recv_json().await;
        assert_eq!(resume["op"], 6);
        assert_eq!(resume["d"]["session_id"], "s");
        assert_eq!(resume["d"]["seq"], 10);
        assert_eq!(peer.close_code(), Some(CLOSE_RESUMABLE));

        next.send_json(&json!({ "op": 0, "s": 11, "t": "RESUMED", "d": null }));
        wait_for(&gateway, ConnectionState::Connected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn reidentify_close_code_starts_a_new_session() {
        let (gateway, mut server) = start(Config::default());
        let peer = establish(&mut server, "abc", 3).await;
        wait_for(&gateway, ConnectionState::Connected).await;

        peer.close(4009, "Session timed out");
        let mut next = server.accept().await;
        next.send_json(&json!({ "op": 10, "d": { "heartbeat_interval": 45_000 } }));

        assert_eq!(next.recv_json().await["op"], 2);
        assert_eq!(gateway.state(), ConnectionState::Identifying);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_reresolves_endpoint() {
        let mut config = Config::default();
        config.endpoint = "wss://gateway.example.com/?v=6&compress=zlib-stream".to_owned();
        let (_gateway, mut server) = start(config);

        let peer = server.accept().await;
        drop(peer);
        let next = server.accept().await;

        let pairs: Vec<(String, String)> = next
            .url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            [
                ("compress".to_owned(), "zlib-stream".to_owned()),
                ("v".to_owned(), "10".to_owned()),
                ("encoding".to_owned(), "json".to_owned()),
            ]
        );
        assert_eq!(server.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_deterministic() {
        let (gateway, mut server) = start(Config::default());
        let mut peer = establish(&mut server, "abc", 1).await;
        wait_for(&gateway, ConnectionState::Connected).await;
        let mut state = gateway.state_receiver();

        gateway.close().await.unwrap();

        assert_eq!(*state.borrow_and_update(), ConnectionState::Closed);
        assert_eq!(peer.close_code(), Some(CLOSE_NORMAL));

        tokio::time::sleep(Duration::from_secs(3_600)).await;
        assert!(peer.try_recv_json().is_none(), "no heartbeat after close");
        assert!(server.try_accept().is_none(), "no reconnect after close");
        assert_eq!(server.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_pending_identify_retry() {
        let (gateway, mut server) = start(Config::default());
        let mut peer = establish(&mut server, "abc", 1).await;
        wait_for(&gateway, ConnectionState::Connected).await;

        peer.send_json(&json!({ "op": 9, "d": false }));
        tokio::time::sleep(Duration::from_millis(100)).await;
        gateway.close().await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(peer.try_recv_json().is_none(), "retry fired after close");
    }

    #[tokio::test(start_paused = true)]
    async fn close_while_connecting_stops_cleanly() {
        let mut config = Config::default();
        config.reconnect.max_attempts = None;
        let (gateway, server) = start(config);
        server.refuse_next(u32::MAX);
        tokio::time::sleep(Duration::from_secs(5)).await;

        gateway.close().await.unwrap();

        let attempts = server.attempts();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(server.attempts(), attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_close_code_stops_the_connection() {
        let (gateway, mut server) = start(Config::default());
        let peer = server.accept().await;

        peer.close(4004, "Authentication failed");
        let error = gateway.wait().await.unwrap_err();

        assert_eq!(error.kind(), Kind::Gateway);
        assert!(matches!(
            error.gateway(),
            Some(GatewayError::FatalClose { code: 4004, reason }) if reason == "Authentication failed"
        ));
        assert!(server.try_accept().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let mut config = Config::default();
        config.reconnect.max_attempts = Some(3);
        let (gateway, server) = start(config);
        server.refuse_next(u32::MAX);

        let error = gateway.wait().await.unwrap_err();

        assert!(matches!(
            error.gateway(),
            Some(GatewayError::ReconnectExhausted { attempts: 3 })
        ));
        assert_eq!(server.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_refused_connections() {
        let (gateway, mut server) = start(Config::default());
        server.refuse_next(2);

        let _peer = establish(&mut server, "abc", 1).await;

        wait_for(&gateway, ConnectionState::Connected).await;
        assert_eq!(server.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_budget_restarts_after_connected() {
        let mut config = Config::default();
        config.reconnect.max_attempts = Some(3);
        let (gateway, mut server) = start(config);
        server.refuse_next(2);
        let peer = establish(&mut server, "abc", 1).await;
        wait_for(&gateway, ConnectionState::Connected).await;

        peer.close(4000, "Unknown error");
        server.refuse_next(2);
        let next = server.accept().await;
        next.send_json(&json!({ "op": 10, "d": { "heartbeat_interval": 45_000 } }));

        wait_for(&gateway, ConnectionState::Resuming).await;
        assert_eq!(server.attempts(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn events_stream_yields_dispatches() {
        let (gateway, mut server) = start(Config::default());
        let mut events = Box::pin(gateway.events().unwrap());
        let peer = establish(&mut server, "abc", 1).await;
        peer.send_json(&json!({ "op": 0, "s": 2, "t": "GUILD_CREATE", "d": { "id": "9" } }));

        let ready = events.next().await.unwrap().unwrap();
        let guild = events.next().await.unwrap().unwrap();

        assert_eq!(ready.name, "READY");
        assert_eq!(guild.name, "GUILD_CREATE");
        assert_eq!(guild.sequence, Some(2));
        assert_eq!(guild.data, json!({ "id": "9" }));
    }

    #[tokio::test(start_paused = true)]
    async fn events_stream_reports_lag() {
        let mut config = Config::default();
        config.event_capacity = 2;
        let (gateway, mut server) = start(config);
        let mut events = Box::pin(gateway.events().unwrap());
        let peer = establish(&mut server, "abc", 1).await;
        for seq in 2..=6 {
            peer.send_json(&json!({ "op": 0, "s": seq, "t": "TYPING_START", "d": {} }));
        }
        wait_for(&gateway, ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let error = events.next().await.unwrap().unwrap_err();

        assert!(matches!(error.gateway(), Some(GatewayError::Lagged { count: 4 })));
        assert_eq!(events.next().await.unwrap().unwrap().sequence, Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_sink_receives_events() {
        let (connector, mut server) = mock::pair();
        let (sink, mut rx) = mpsc::unbounded_channel();
        let gateway =
            Gateway::with_sink(Config::default(), Credentials::new("t"), connector, sink).unwrap();

        let _peer = establish(&mut server, "abc", 1).await;

        assert_eq!(rx.recv().await.unwrap().name, "READY");
        assert_eq!(
            gateway.subscribe().unwrap_err().kind(),
            Kind::Validation
        );
    }

    #[tokio::test]
    async fn invalid_endpoint_fails_up_front() {
        let mut config = Config::default();
        config.endpoint = "not a url".to_owned();
        let (connector, _server) = mock::pair();

        let error = Gateway::with_connector(config, Credentials::new("t"), connector).unwrap_err();

        assert_eq!(error.kind(), Kind::Validation);
    }
}
