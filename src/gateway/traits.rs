//! Seams between the connection state machine and its surroundings.

use secrecy::ExposeSecret as _;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use super::types::response::Event;
use crate::auth::Credentials;

/// Receives dispatch events decoded by the connection.
///
/// `deliver` is called from inside the connection task, so it must return
/// promptly and must not call back into the connection. Hand the event off to
/// a channel or queue instead of processing it inline.
///
/// # Example
///
/// ```ignore
/// struct Counter(AtomicU64);
///
/// impl EventSink for Counter {
///     fn deliver(&self, _event: Event) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///     }
/// }
/// ```
pub trait EventSink: Send + Sync + 'static {
    fn deliver(&self, event: Event);
}

impl EventSink for broadcast::Sender<Event> {
    fn deliver(&self, event: Event) {
        // No subscribers is not an error: events are simply not observed.
        _ = self.send(event);
    }
}

impl EventSink for mpsc::UnboundedSender<Event> {
    fn deliver(&self, event: Event) {
        if let Err(e) = self.send(event) {
            #[cfg(feature = "tracing")]
            tracing::debug!(event = %e.0.name, "Event receiver dropped, discarding event");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }
}

/// Payloads that carry the gateway token on the wire.
pub trait WithToken: Serialize + Sized {
    fn with_token(&self, credentials: &Credentials) -> Result<Value, serde_json::Error> {
        let mut payload_json = serde_json::to_value(self)?;

        if let Value::Object(ref mut obj) = payload_json {
            obj.insert(
                "token".to_owned(),
                Value::String(credentials.token.expose_secret().to_owned()),
            );
        }

        Ok(payload_json)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Serialize)]
    struct Payload {
        seq: u64,
    }

    impl WithToken for Payload {}

    fn event(name: &str) -> Event {
        Event {
            name: name.to_owned(),
            sequence: Some(1),
            data: json!({}),
        }
    }

    #[test]
    fn with_token_inserts_token_field() {
        let value = Payload { seq: 3 }
            .with_token(&Credentials::new("t0k3n"))
            .unwrap();

        assert_eq!(value, json!({ "seq": 3, "token": "t0k3n" }));
    }

    #[test]
    fn broadcast_sink_tolerates_no_subscribers() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);

        tx.deliver(event("MESSAGE_CREATE"));
    }

    #[test]
    fn mpsc_sink_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tx.deliver(event("GUILD_CREATE"));

        assert_eq!(rx.try_recv().unwrap().name, "GUILD_CREATE");
    }
}
