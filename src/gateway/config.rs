#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use rand::Rng as _;
use strum_macros::Display;
use url::Url;

use super::intents::Intents;
use super::types::request::IdentifyProperties;
use crate::Result;

/// Public gateway endpoint. Resolved again on every connection attempt.
pub const DEFAULT_ENDPOINT: &str = "wss://gateway.discord.gg";
/// Gateway protocol version requested through the `v` query parameter.
pub const DEFAULT_API_VERSION: u8 = 10;

const DEFAULT_INVALID_SESSION_DELAY_MIN: Duration = Duration::from_secs(1);
const DEFAULT_INVALID_SESSION_DELAY_MAX: Duration = Duration::from_secs(5);
const DEFAULT_MAX_IDENTIFY_REJECTIONS: u32 = 3;
const DEFAULT_EVENT_CAPACITY: usize = 1024;
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_BACKOFF_JITTER: f64 = 0.5;

/// Payload encoding negotiated through the `encoding` query parameter.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Encoding {
    #[default]
    Json,
}

/// Configuration for gateway client behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Base gateway URL, without version or encoding parameters
    pub endpoint: String,
    /// Protocol version to request
    pub api_version: u8,
    /// Payload encoding to request
    pub encoding: Encoding,
    /// Capability bitmask sent with Identify
    pub intents: Intents,
    /// Connection properties sent with Identify
    pub properties: IdentifyProperties,
    /// Lower bound of the randomized wait after an InvalidSession
    pub invalid_session_delay_min: Duration,
    /// Upper bound of the randomized wait after an InvalidSession
    pub invalid_session_delay_max: Duration,
    /// Consecutive Identify rejections tolerated before giving up
    pub max_identify_rejections: u32,
    /// Capacity of the broadcast channel feeding [`super::Gateway::events`]
    pub event_capacity: usize,
    /// Reconnection strategy for failed transport opens
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            api_version: DEFAULT_API_VERSION,
            encoding: Encoding::default(),
            intents: Intents::default(),
            properties: IdentifyProperties::default(),
            invalid_session_delay_min: DEFAULT_INVALID_SESSION_DELAY_MIN,
            invalid_session_delay_max: DEFAULT_INVALID_SESSION_DELAY_MAX,
            max_identify_rejections: DEFAULT_MAX_IDENTIFY_REJECTIONS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Config {
    /// Resolve the URL to open, carrying the version and encoding parameters.
    ///
    /// Any `v` or `encoding` already present on [`Config::endpoint`] is replaced.
    pub fn gateway_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)?;

        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != "v" && key != "encoding")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        url.query_pairs_mut()
            .clear()
            .extend_pairs(retained)
            .append_pair("v", &self.api_version.to_string())
            .append_pair("encoding", &self.encoding.to_string());

        Ok(url)
    }

    /// Pick the wait before answering an InvalidSession, uniformly within the configured bounds.
    #[must_use]
    pub fn invalid_session_delay(&self) -> Duration {
        let min = duration_millis(self.invalid_session_delay_min);
        let max = duration_millis(self.invalid_session_delay_max);

        if max <= min {
            return self.invalid_session_delay_min;
        }

        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Pacing of connection attempts that fail, or drop before the session is established.
///
/// Failures are counted per run: the count and the delay both start over once a
/// transport reaches [`super::ConnectionState::Connected`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Consecutive failed attempts tolerated before the connection gives up with
    /// [`super::GatewayError::ReconnectExhausted`]. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Wait after the first failed attempt
    pub initial_backoff: Duration,
    /// Ceiling on the wait between attempts
    pub max_backoff: Duration,
    /// Growth of the wait after each further failure
    pub backoff_multiplier: f64,
    /// Spread applied to every wait as a fraction of it; `0.0` makes the schedule exact
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: DEFAULT_BACKOFF_JITTER,
        }
    }
}

impl ReconnectConfig {
    /// Fresh delay schedule for one run of failed attempts.
    pub(crate) fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_multiplier(self.backoff_multiplier)
            .with_randomization_factor(self.jitter.clamp(0.0, 1.0))
            // Attempts are bounded by count, never by elapsed time
            .with_max_elapsed_time(None)
            .build()
    }

    /// Whether `failures` consecutive failed attempts use up the budget.
    pub(crate) fn is_exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}
