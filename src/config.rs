//! Client configuration.
//!
//! DESIGN
//! ======
//! One endpoint per client, resolved once at construction. Connection-wide
//! parameters (heartbeat, backoff, circuit breaker) are fixed for the life of
//! the client; only the request timeout can be overridden per call.
//!
//! `from_env` reads `LIVEFEED_*` variables. Unparsable overrides fall back to
//! the defaults rather than failing startup.

use std::time::Duration;

use crate::error::ClientError;

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_AUTH_TIMEOUT_MS: u64 = 10_000;

const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_BACKOFF_CEILING_MS: u64 = 30_000;
const DEFAULT_BACKOFF_JITTER: f64 = 0.1;

const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 10_000;

const DEFAULT_BREAKER_THRESHOLD: usize = 5;
const DEFAULT_BREAKER_WINDOW_MS: u64 = 60_000;
const DEFAULT_BREAKER_COOLDOWN_MS: u64 = 120_000;

/// Runtime configuration for a [`RealtimeClient`](crate::RealtimeClient).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub endpoint: String,
    /// Default deadline for [`Correlator::request`](crate::Correlator::request).
    pub request_timeout: Duration,
    /// Deadline for the transport handshake.
    pub connect_timeout: Duration,
    /// Deadline for the AUTH acknowledgment after the transport opens.
    pub auth_timeout: Duration,
    /// First reconnect delay; doubles per consecutive failure.
    pub backoff_base: Duration,
    /// Upper bound on the reconnect delay.
    pub backoff_ceiling: Duration,
    /// Extra random delay as a fraction of the computed backoff (0.0 disables).
    pub backoff_jitter: f64,
    /// Period between HEARTBEAT frames while authenticated.
    pub heartbeat_interval: Duration,
    /// How long a HEARTBEAT may go unacknowledged before the link is dropped.
    pub heartbeat_timeout: Duration,
    /// Abnormal closures within `breaker_window` that suspend reconnects.
    pub breaker_threshold: usize,
    /// Observation window for the circuit breaker.
    pub breaker_window: Duration,
    /// How long reconnects stay suspended once the breaker trips.
    pub breaker_cooldown: Duration,
}

impl ClientConfig {
    /// Build a config for `endpoint` with default timings.
    ///
    /// `http://` and `https://` endpoints are rewritten to `ws://` and `wss://`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidEndpoint`] for any other scheme.
    pub fn new(endpoint: &str) -> Result<Self, ClientError> {
        Ok(Self {
            endpoint: resolve_ws_url(endpoint)?,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            auth_timeout: Duration::from_millis(DEFAULT_AUTH_TIMEOUT_MS),
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_ceiling: Duration::from_millis(DEFAULT_BACKOFF_CEILING_MS),
            backoff_jitter: DEFAULT_BACKOFF_JITTER,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            heartbeat_timeout: Duration::from_millis(DEFAULT_HEARTBEAT_TIMEOUT_MS),
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            breaker_window: Duration::from_millis(DEFAULT_BREAKER_WINDOW_MS),
            breaker_cooldown: Duration::from_millis(DEFAULT_BREAKER_COOLDOWN_MS),
        })
    }

    /// Load config from `LIVEFEED_*` environment variables.
    ///
    /// `LIVEFEED_WS_URL` is required. Durations are read in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when `LIVEFEED_WS_URL` is unset and
    /// [`ClientError::InvalidEndpoint`] when it has an unsupported scheme.
    pub fn from_env() -> Result<Self, ClientError> {
        let Ok(endpoint) = std::env::var("LIVEFEED_WS_URL") else {
            return Err(ClientError::Config("LIVEFEED_WS_URL is not set".to_owned()));
        };

        let mut config = Self::new(&endpoint)?;
        config.request_timeout = env_millis("LIVEFEED_REQUEST_TIMEOUT_MS", config.request_timeout);
        config.connect_timeout = env_millis("LIVEFEED_CONNECT_TIMEOUT_MS", config.connect_timeout);
        config.auth_timeout = env_millis("LIVEFEED_AUTH_TIMEOUT_MS", config.auth_timeout);
        config.backoff_base = env_millis("LIVEFEED_BACKOFF_BASE_MS", config.backoff_base);
        config.backoff_ceiling = env_millis("LIVEFEED_BACKOFF_CEILING_MS", config.backoff_ceiling);
        config.backoff_jitter = env_parse("LIVEFEED_BACKOFF_JITTER", config.backoff_jitter);
        config.heartbeat_interval = env_millis("LIVEFEED_HEARTBEAT_INTERVAL_MS", config.heartbeat_interval);
        config.heartbeat_timeout = env_millis("LIVEFEED_HEARTBEAT_TIMEOUT_MS", config.heartbeat_timeout);
        config.breaker_threshold = env_parse("LIVEFEED_BREAKER_THRESHOLD", config.breaker_threshold);
        config.breaker_window = env_millis("LIVEFEED_BREAKER_WINDOW_MS", config.breaker_window);
        config.breaker_cooldown = env_millis("LIVEFEED_BREAKER_COOLDOWN_MS", config.breaker_cooldown);
        Ok(config)
    }
}

/// Normalize an endpoint to a WebSocket URL.
///
/// # Errors
///
/// Returns [`ClientError::InvalidEndpoint`] for schemes other than
/// `ws`, `wss`, `http` and `https`.
pub fn resolve_ws_url(endpoint: &str) -> Result<String, ClientError> {
    let trimmed = endpoint.trim().trim_end_matches('/');

    if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        return Ok(trimmed.to_owned());
    }
    if let Some(rest) = trimmed.strip_prefix("http://") {
        return Ok(format!("ws://{rest}"));
    }
    if let Some(rest) = trimmed.strip_prefix("https://") {
        return Ok(format!("wss://{rest}"));
    }

    Err(ClientError::InvalidEndpoint(endpoint.to_owned()))
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    let fallback = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(env_parse(key, fallback))
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
