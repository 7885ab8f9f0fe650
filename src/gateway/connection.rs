#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::future;
use std::pin::Pin;
use std::time::Duration;

use backoff::backoff::Backoff as _;
use strum_macros::Display;
use tokio::sync::watch;
use tokio::time::{Sleep, sleep};
use tokio_util::sync::CancellationToken;

use super::config::Config;
use super::error::{CloseAction, GatewayError};
use super::heartbeat::{Beat, HeartbeatScheduler};
use super::session::SessionState;
use super::traits::EventSink;
use super::transport::{Connector, Transport, TransportEvent};
use super::types::request::{self, Identify, Resume};
use super::types::response::{Event, Hello, Payload, parse_envelope};
use crate::Result;
use crate::auth::Credentials;
use crate::error::Error;

/// Close code for a deliberate shutdown; the server discards the session.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code used when the client intends to resume on a new socket.
pub const CLOSE_RESUMABLE: u16 = 4000;

/// Connection state tracking.
///
/// `Disconnected` is initial and `Closed` is terminal.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    /// Not connected yet
    Disconnected,
    /// Opening a transport
    Connecting,
    /// Transport open, waiting for Hello
    AwaitingHello,
    /// Identify sent, waiting for READY
    Identifying,
    /// Resume sent, waiting for RESUMED
    Resuming,
    /// Session established
    Connected,
    /// Transport lost, about to open a new one
    Reconnecting {
        /// Consecutive failed attempts so far
        attempt: u32,
    },
    /// Shut down; no further reconnection
    Closed,
}

impl ConnectionState {
    /// Check if the session is currently established.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if the connection has stopped for good.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// How the next Hello (or a delayed InvalidSession retry) re-establishes the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    Identify,
    Resume,
}

/// A handshake scheduled after an InvalidSession.
struct PendingRetry {
    sleep: Pin<Box<Sleep>>,
    handshake: Handshake,
}

/// One trigger, as consumed by the serialized entry point.
#[derive(Debug)]
enum Input {
    Shutdown,
    Transport(TransportEvent),
    HeartbeatTick,
    Retry(Handshake),
}

/// Why the current transport is being torn down.
#[derive(Debug)]
enum Teardown {
    /// Open a new transport. `immediate` skips the backoff delay.
    Reconnect { resume: bool, immediate: bool },
    /// The caller asked to close.
    Shutdown,
    /// Stop for good and surface the error.
    Fatal(Error),
}

/// The protocol state machine for one logical gateway connection.
///
/// Every field is owned by the task running [`Connection::run`]. Transport
/// notifications, heartbeat ticks, delayed retries and shutdown requests all
/// arrive through [`Connection::next_input`] and are applied one at a time by
/// [`Connection::handle`], so no two triggers ever mutate the session at once.
pub(crate) struct Connection<C: Connector, S: EventSink> {
    config: Config,
    credentials: Credentials,
    connector: C,
    sink: S,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    session: SessionState,
    heartbeat: HeartbeatScheduler,
    transport: Option<C::Transport>,
    retry: Option<PendingRetry>,
    /// Whether the current transport reached [`ConnectionState::Connected`]
    established: bool,
    identify_rejections: u32,
    shutdown: CancellationToken,
}

impl<C: Connector, S: EventSink> Connection<C, S> {
    pub(crate) fn new(
        config: Config,
        credentials: Credentials,
        connector: C,
        sink: S,
        state_tx: watch::Sender<ConnectionState>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            credentials,
            connector,
            sink,
            state: ConnectionState::Disconnected,
            state_tx,
            session: SessionState::default(),
            heartbeat: HeartbeatScheduler::new(),
            transport: None,
            retry: None,
            established: false,
            identify_rejections: 0,
            shutdown,
        }
    }

    /// Main connection loop with automatic reconnection.
    ///
    /// Returns `Ok(())` after a caller-requested shutdown and an error when the
    /// connection terminates on its own.
    pub(crate) async fn run(mut self) -> Result<()> {
        let mut failures = 0_u32;
        let mut backoff = self.config.reconnect.backoff();

        loop {
            let shutdown = self.shutdown.clone();
            let opened = tokio::select! {
                biased;
                () = shutdown.cancelled() => return self.finish().await,
                result = self.connect() => result,
            };

            if let Err(e) = opened {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Unable to open gateway transport");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;

                failures = failures.saturating_add(1);
                if let Some(e) = self.exhausted(failures) {
                    return Err(e);
                }
                self.set_state(ConnectionState::Reconnecting { attempt: failures });
                if !pause(&shutdown, backoff.next_backoff()).await {
                    return self.finish().await;
                }
                continue;
            }

            match self.drive().await {
                Teardown::Shutdown => return self.finish().await,
                Teardown::Fatal(e) => {
                    self.release(CLOSE_NORMAL).await;
                    self.set_state(ConnectionState::Closed);

                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %e, "Gateway connection terminated");

                    return Err(e);
                }
                Teardown::Reconnect { resume, immediate } => {
                    if !resume {
                        self.session.clear();
                    }
                    self.release(if resume { CLOSE_RESUMABLE } else { CLOSE_NORMAL })
                        .await;

                    if self.established {
                        failures = 0;
                        backoff.reset();
                    }
                    if !immediate {
                        failures = failures.saturating_add(1);
                        if let Some(e) = self.exhausted(failures) {
                            return Err(e);
                        }
                    }

                    #[cfg(feature = "tracing")]
                    tracing::debug!(resume, immediate, attempt = failures, "Reconnecting");

                    self.set_state(ConnectionState::Reconnecting { attempt: failures });
                    if !immediate && !pause(&self.shutdown, backoff.next_backoff()).await {
                        return self.finish().await;
                    }
                }
            }
        }
    }

    /// Open a new transport. Allowed from `Disconnected`, `Reconnecting` and `Closed`.
    pub(crate) async fn connect(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            ConnectionState::Disconnected
                | ConnectionState::Reconnecting { .. }
                | ConnectionState::Closed
        ) {
            return Err(Error::validation(format!(
                "connect() is not allowed while {}",
                self.state
            )));
        }

        let url = self.config.gateway_url()?;
        self.set_state(ConnectionState::Connecting);
        let transport = self.connector.connect(&url).await?;
        self.on_open(transport);

        Ok(())
    }

    fn on_open(&mut self, transport: C::Transport) {
        self.heartbeat.stop();
        self.retry = None;
        self.established = false;
        self.transport = Some(transport);
        self.set_state(ConnectionState::AwaitingHello);
    }

    async fn drive(&mut self) -> Teardown {
        loop {
            let input = self.next_input().await;
            if let Some(teardown) = self.handle(input).await {
                return teardown;
            }
        }
    }

    /// Wait for the next trigger from any source.
    async fn next_input(&mut self) -> Input {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Input::Shutdown,
            event = recv(&mut self.transport) => Input::Transport(event),
            () = self.heartbeat.tick() => Input::HeartbeatTick,
            handshake = wait_retry(&mut self.retry) => Input::Retry(handshake),
        }
    }

    /// Apply one trigger. Returns how to tear down the transport, if it must be.
    async fn handle(&mut self, input: Input) -> Option<Teardown> {
        match input {
            Input::Shutdown => Some(Teardown::Shutdown),
            Input::Transport(TransportEvent::Message(text)) => self.on_frame(&text).await,
            Input::Transport(TransportEvent::Error(e)) => {
                // The close notification that follows drives recovery.
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Gateway transport error");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                None
            }
            Input::Transport(TransportEvent::Closed { code, reason }) => {
                Some(self.on_close(code, reason))
            }
            Input::HeartbeatTick => self.on_heartbeat_tick().await,
            Input::Retry(handshake) => {
                self.handshake(handshake).await;
                None
            }
        }
    }

    async fn on_frame(&mut self, text: &str) -> Option<Teardown> {
        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "Received gateway frame");

        let envelope = match parse_envelope(text.as_bytes()) {
            Ok(envelope) => envelope,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%text, error = %e, "Dropping malformed gateway frame");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                return None;
            }
        };

        if let Some(sequence) = envelope.sequence {
            self.session.record_sequence(sequence);
        }

        match envelope.payload {
            Payload::Hello(hello) => self.on_hello(&hello).await,
            Payload::HeartbeatAck => {
                self.heartbeat.acknowledge();
                None
            }
            Payload::Heartbeat => {
                if self.heartbeat.is_running() {
                    self.heartbeat.mark_sent();
                    self.send(request::heartbeat(self.session.sequence())).await;
                }
                None
            }
            Payload::Dispatch(event) => {
                self.on_dispatch(event);
                None
            }
            Payload::Reconnect => {
                #[cfg(feature = "tracing")]
                tracing::info!("Gateway requested a reconnect");
                Some(Teardown::Reconnect {
                    resume: true,
                    immediate: true,
                })
            }
            Payload::InvalidSession { resumable } => self.on_invalid_session(resumable),
        }
    }

    async fn on_hello(&mut self, hello: &Hello) -> Option<Teardown> {
        if self.state != ConnectionState::AwaitingHello {
            #[cfg(feature = "tracing")]
            tracing::warn!(state = %self.state, "Ignoring Hello outside of the handshake");
            return None;
        }

        let Ok(period) = u64::try_from(hello.heartbeat_interval) else {
            return Some(Self::invalid_interval(hello.heartbeat_interval));
        };
        if period == 0 {
            return Some(Self::invalid_interval(hello.heartbeat_interval));
        }

        self.heartbeat.start(Duration::from_millis(period));

        let handshake = if self.session.resumable().is_some() {
            Handshake::Resume
        } else {
            Handshake::Identify
        };
        self.handshake(handshake).await;

        None
    }

    fn invalid_interval(interval: i64) -> Teardown {
        let error = GatewayError::InvalidHeartbeatInterval(interval);

        #[cfg(feature = "tracing")]
        tracing::error!(%error, "Protocol violation, reconnecting without resume");
        #[cfg(not(feature = "tracing"))]
        let _ = &error;

        Teardown::Reconnect {
            resume: false,
            immediate: false,
        }
    }

    /// Send Resume when the session allows it, Identify otherwise.
    async fn handshake(&mut self, handshake: Handshake) {
        if handshake == Handshake::Resume
            && let Some((session_id, seq)) = self.session.resumable()
        {
            let payload = Resume::builder().session_id(session_id).seq(seq).build();

            #[cfg(feature = "tracing")]
            tracing::debug!(session_id = %payload.session_id, seq, "Sending Resume");

            self.set_state(ConnectionState::Resuming);
            self.send(request::resume(&payload, &self.credentials)).await;
            return;
        }

        self.session.clear();
        let payload = Identify::builder()
            .intents(self.config.intents)
            .properties(self.config.properties.clone())
            .build();

        #[cfg(feature = "tracing")]
        tracing::debug!(intents = payload.intents.bits(), "Sending Identify");

        self.set_state(ConnectionState::Identifying);
        self.send(request::identify(&payload, &self.credentials)).await;
    }

    fn on_dispatch(&mut self, event: Event) {
        if event.is_ready() {
            match event.as_ready() {
                Some(ready) => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(session_id = %ready.session_id, "Session ready");

                    self.session.record_session(ready.session_id);
                    self.identify_rejections = 0;
                    if matches!(
                        self.state,
                        ConnectionState::Identifying | ConnectionState::Resuming
                    ) {
                        self.set_state(ConnectionState::Connected);
                    }
                }
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("READY without a session id");
                }
            }
        } else if event.is_resumed() && self.state == ConnectionState::Resuming {
            #[cfg(feature = "tracing")]
            tracing::info!(session_id = ?self.session.session_id(), "Session resumed");

            self.set_state(ConnectionState::Connected);
        }

        self.sink.deliver(event);
    }

    fn on_invalid_session(&mut self, resumable: bool) -> Option<Teardown> {
        // Nothing to retry until Hello has started the handshake.
        if self.state == ConnectionState::AwaitingHello {
            #[cfg(feature = "tracing")]
            tracing::warn!(resumable, "Ignoring InvalidSession before Hello");
            return None;
        }

        let handshake = if resumable && self.session.resumable().is_some() {
            Handshake::Resume
        } else {
            if self.state == ConnectionState::Identifying {
                self.identify_rejections = self.identify_rejections.saturating_add(1);
                let max = self.config.max_identify_rejections;
                if max > 0 && self.identify_rejections >= max {
                    return Some(Teardown::Fatal(
                        GatewayError::IdentifyRejected {
                            attempts: self.identify_rejections,
                        }
                        .into(),
                    ));
                }
            }
            self.session.clear();
            Handshake::Identify
        };

        let delay = self.config.invalid_session_delay();

        #[cfg(feature = "tracing")]
        tracing::warn!(resumable, ?handshake, ?delay, "Session invalidated");

        self.retry = Some(PendingRetry {
            sleep: Box::pin(sleep(delay)),
            handshake,
        });

        None
    }

    fn on_close(&mut self, code: Option<u16>, reason: String) -> Teardown {
        self.heartbeat.stop();

        #[cfg(feature = "tracing")]
        tracing::info!(
            ?code,
            %reason,
            meaning = code.and_then(super::error::describe_close_code).unwrap_or("unknown"),
            state = %self.state,
            "Gateway transport closed"
        );

        match code.map(|code| (code, CloseAction::from_code(code))) {
            Some((code, CloseAction::Fatal)) => {
                Teardown::Fatal(GatewayError::FatalClose { code, reason }.into())
            }
            Some((_, CloseAction::Reidentify)) => Teardown::Reconnect {
                resume: false,
                immediate: self.established,
            },
            _ => Teardown::Reconnect {
                resume: true,
                immediate: self.established,
            },
        }
    }

    async fn on_heartbeat_tick(&mut self) -> Option<Teardown> {
        match self.heartbeat.on_tick() {
            Beat::Send => {
                self.send(request::heartbeat(self.session.sequence())).await;
                None
            }
            Beat::Missed => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Zombie connection, forcing a resumable reconnect");
                Some(Teardown::Reconnect {
                    resume: true,
                    immediate: true,
                })
            }
        }
    }

    async fn send(&mut self, frame: Result<String>) {
        let result = match (frame, self.transport.as_mut()) {
            (Ok(text), Some(transport)) => transport.send(text).await,
            (Ok(_), None) => Err(GatewayError::ConnectionClosed.into()),
            (Err(e), _) => Err(e),
        };

        if let Err(e) = result {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, "Failed to send gateway frame");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }

    /// Stop the heartbeat, drop any pending retry, and close and drop the transport.
    async fn release(&mut self, code: u16) {
        self.heartbeat.stop();
        self.retry = None;

        if let Some(mut transport) = self.transport.take()
            && let Err(e) = transport.close(code).await
        {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %e, "Error while closing gateway transport");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }

    async fn finish(&mut self) -> Result<()> {
        self.release(CLOSE_NORMAL).await;
        self.set_state(ConnectionState::Closed);

        #[cfg(feature = "tracing")]
        tracing::debug!("Gateway connection closed by caller");

        Ok(())
    }

    fn exhausted(&mut self, failures: u32) -> Option<Error> {
        if !self.config.reconnect.is_exhausted(failures) {
            return None;
        }

        self.set_state(ConnectionState::Closed);

        #[cfg(feature = "tracing")]
        tracing::error!(attempts = failures, "Giving up on the gateway");

        Some(GatewayError::ReconnectExhausted { attempts: failures }.into())
    }

    fn set_state(&mut self, next: ConnectionState) {
        #[cfg(feature = "tracing")]
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "Gateway state transition");
        }

        if next == ConnectionState::Connected {
            self.established = true;
        }
        self.state = next;
        self.state_tx.send_replace(next);
    }
}

/// Wait out a backoff delay. Returns `false` if shutdown was requested meanwhile.
async fn pause(shutdown: &CancellationToken, delay: Option<Duration>) -> bool {
    let Some(delay) = delay else {
        return true;
    };

    tokio::select! {
        biased;
        () = shutdown.cancelled() => false,
        () = sleep(delay) => true,
    }
}

async fn recv<T: Transport>(transport: &mut Option<T>) -> TransportEvent {
    match transport {
        Some(transport) => transport.recv().await,
        None => future::pending().await,
    }
}

async fn wait_retry(retry: &mut Option<PendingRetry>) -> Handshake {
    let Some(scheduled) = retry.as_mut() else {
        return future::pending().await;
    };

    scheduled.sleep.as_mut().await;
    let handshake = scheduled.handshake;
    *retry = None;
    handshake
}
