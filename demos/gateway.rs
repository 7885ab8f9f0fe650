//! Gateway session walkthrough.
//!
//! This example connects with the token from `RAWCORD_TOKEN` and:
//! 1. Logs every connection state transition
//! 2. Prints dispatch events as they arrive
//! 3. Closes the session cleanly after 50 events or a minute of silence
//!
//! Run with tracing enabled:
//! ```sh
//! RAWCORD_TOKEN=... RUST_LOG=info,rawcord=debug cargo run --example gateway --features tracing
//! ```

use std::time::Duration;

use futures::StreamExt as _;
use rawcord::auth::Credentials;
use rawcord::gateway::{Config, Gateway, Intents};
use tokio::time::timeout;
use tracing::{debug, info, warn};

const MAX_EVENTS: usize = 50;
const IDLE: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut config = Config::default();
    config.intents = Intents::GUILDS | Intents::GUILD_MESSAGES | Intents::DIRECT_MESSAGES;

    let gateway = Gateway::connect(config, Credentials::from_env()?)?;

    let mut states = gateway.state_receiver();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            info!(endpoint = "connection_state", state = %state);
        }
    });

    let mut events = Box::pin(gateway.events()?);
    let mut count = 0;

    while let Ok(Some(result)) = timeout(IDLE, events.next()).await {
        match result {
            Ok(event) => {
                info!(event = %event.name, sequence = ?event.sequence);
                debug!(data = %event.data);
                count += 1;
                if count >= MAX_EVENTS {
                    break;
                }
            }
            Err(e) => warn!(error = %e),
        }
    }

    info!(received = count, "Closing gateway");
    gateway.close().await?;

    Ok(())
}
