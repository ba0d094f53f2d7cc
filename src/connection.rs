//! Connection manager: owns the single shared transport.
//!
//! LIFECYCLE
//! =========
//! ```text
//! IDLE → CONNECTING → OPEN → AUTHENTICATING → AUTHENTICATED
//!                                   │                │
//!                       (abnormal)  └──→ CLOSED ←────┘ ──→ backoff → CONNECTING
//!                                          │
//!                       breaker tripped    └──→ SUSPENDED ──(cooldown)──→ CONNECTING
//! close(): any state → CLOSING → CLOSED, no retry
//! ```
//!
//! One background task runs the whole lifecycle. Each session is a
//! `select!` loop over inbound messages, the outbound queue, the heartbeat
//! ticker, auth/heartbeat deadlines, token changes and the shutdown signal.
//! Consumers never touch the transport; they queue frames through the outbox,
//! which is only open while the session is `AUTHENTICATED`.
//!
//! RECOVERY
//! ========
//! - Every closure the application did not ask for is abnormal. It rejects
//!   pending requests with `ConnectionLost` and schedules a reconnect with
//!   exponential backoff.
//! - Abnormal closures are counted in a sliding window. Reaching the
//!   threshold suspends reconnects for the cooldown, then the count resets.
//! - Reaching `AUTHENTICATED` replays one SUBSCRIBE per live topic.
//! - A session is stable once it has stayed `AUTHENTICATED` for one
//!   heartbeat interval. Only a stable session resets the backoff attempt
//!   counter and the closure count, so a server that accepts and then drops
//!   every connection still trips the breaker.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use frames::{Frame, FrameType};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::auth::AuthInjector;
use crate::backoff::{Backoff, CircuitBreaker};
use crate::config::ClientConfig;
use crate::correlator::Correlator;
use crate::error::ClientError;
use crate::registry::TopicRegistry;
use crate::router::MessageRouter;
use crate::transport::{Connector, Transport};

// =============================================================================
// STATE
// =============================================================================

/// Lifecycle state of the shared connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No connection has been requested yet.
    Idle,
    /// Opening the transport.
    Connecting,
    /// Transport open, handshake not started.
    Open,
    /// AUTH frame sent, waiting for the acknowledgment.
    Authenticating,
    /// Ready for traffic, with or without a credential.
    Authenticated,
    /// Graceful close in progress.
    Closing,
    /// No transport. A reconnect may be scheduled.
    Closed,
    /// Circuit breaker open; no reconnects until the cooldown ends.
    Suspended,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Authenticating => "AUTHENTICATING",
            Self::Authenticated => "AUTHENTICATED",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
            Self::Suspended => "SUSPENDED",
        }
    }

    /// Whether a transport is currently open.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Open | Self::Authenticating | Self::Authenticated | Self::Closing)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// MANAGER
// =============================================================================

/// Collaborators the connection task drives.
pub(crate) struct Components {
    pub(crate) auth: Arc<AuthInjector>,
    pub(crate) registry: Arc<TopicRegistry>,
    pub(crate) router: Arc<MessageRouter>,
    pub(crate) correlator: Arc<Correlator>,
}

struct Inner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    retry_count: AtomicU32,
    parts: Components,
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(from = %prev, to = %next, "ws: state");
        }
    }
}

#[derive(Default)]
struct Control {
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

/// Owns the shared connection and its background task.
pub struct ConnectionManager {
    inner: Arc<Inner>,
    control: Mutex<Control>,
}

impl ConnectionManager {
    pub(crate) fn new(config: ClientConfig, connector: Arc<dyn Connector>, parts: Components) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(Inner { config, connector, state, retry_count: AtomicU32::new(0), parts }),
            control: Mutex::new(Control::default()),
        }
    }

    /// Start the connection task if it is not already running.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connection`] when called outside a Tokio runtime.
    pub fn connect(&self) -> Result<(), ClientError> {
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        let running = control.task.as_ref().is_some_and(|t| !t.is_finished());
        let stopping = control.shutdown.as_ref().is_none_or(|s| *s.borrow());
        if running && !stopping {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ClientError::Connection("no tokio runtime available".to_owned()))?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let previous = control.task.take();
        let inner = Arc::clone(&self.inner);

        tracing::info!(endpoint = %inner.config.endpoint, "ws: starting connection task");
        control.shutdown = Some(shutdown);
        control.task = Some(runtime.spawn(async move {
            // A previous task may still be finishing its graceful close.
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    tracing::warn!(error = %e, "ws: previous connection task failed");
                }
            }
            run(inner, shutdown_rx).await;
        }));
        Ok(())
    }

    /// Request a graceful close. No reconnect follows.
    pub fn close(&self) {
        let control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        match control.shutdown.as_ref() {
            Some(shutdown) if control.task.as_ref().is_some_and(|t| !t.is_finished()) => {
                tracing::info!("ws: close requested");
                shutdown.send_replace(true);
            }
            _ => self.inner.set_state(ConnectionState::Closed),
        }
    }

    /// Close and wait for the connection task to finish.
    pub async fn close_and_wait(&self) {
        self.close();
        let task = self
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .task
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "ws: connection task failed");
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver that yields every state transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// `true` while the session is `AUTHENTICATED` and can carry traffic.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Authenticated
    }

    /// Consecutive reconnect attempts since the last stable session.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.inner.retry_count.load(Ordering::SeqCst)
    }
}

// =============================================================================
// RECONNECT LOOP
// =============================================================================

async fn run(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let config = &inner.config;
    let backoff = Backoff::new(config.backoff_base, config.backoff_ceiling, config.backoff_jitter);
    let mut breaker = CircuitBreaker::new(config.breaker_threshold, config.breaker_window);

    loop {
        if *shutdown.borrow() {
            break;
        }

        inner.set_state(ConnectionState::Connecting);
        let attempt = tokio::select! {
            _ = shutdown.changed() => break,
            r = tokio::time::timeout(config.connect_timeout, inner.connector.connect(&config.endpoint)) => r,
        };

        let (end, stable) = match attempt {
            Ok(Ok(transport)) => session(&inner, transport, &mut shutdown).await,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, endpoint = %config.endpoint, "ws: connect failed");
                (SessionEnd::Abnormal(e.to_string()), false)
            }
            Err(_) => {
                tracing::warn!(timeout = ?config.connect_timeout, "ws: connect timed out");
                (SessionEnd::Abnormal("connect timed out".to_owned()), false)
            }
        };

        let SessionEnd::Abnormal(reason) = end else {
            breaker.reset();
            break;
        };
        inner.set_state(ConnectionState::Closed);
        if stable {
            breaker.reset();
        }

        if breaker.record(Instant::now()) {
            tracing::warn!(
                closures = breaker.count(),
                cooldown = ?config.breaker_cooldown,
                %reason,
                "ws: circuit breaker open, suspending reconnects"
            );
            inner.set_state(ConnectionState::Suspended);
            if !wait_or_shutdown(&mut shutdown, config.breaker_cooldown).await {
                break;
            }
            tracing::info!("ws: cooldown elapsed, reconnecting");
            breaker.reset();
            inner.retry_count.store(0, Ordering::SeqCst);
            continue;
        }

        let attempt = inner.retry_count.fetch_add(1, Ordering::SeqCst);
        let delay = backoff.delay(attempt);
        tracing::info!(attempt = attempt + 1, ?delay, %reason, "ws: reconnecting after backoff");
        if !wait_or_shutdown(&mut shutdown, delay).await {
            break;
        }
    }

    inner.set_state(ConnectionState::Closed);
    tracing::info!("ws: connection task stopped");
}

/// Sleep for `delay`. Returns `false` if shutdown was requested first.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.changed() => false,
        () = tokio::time::sleep(delay) => !*shutdown.borrow(),
    }
}

// =============================================================================
// SESSION
// =============================================================================

enum SessionEnd {
    Graceful,
    Abnormal(String),
}

struct SessionState {
    ready: bool,
    stable: bool,
    stable_at: Option<Instant>,
    out_tx: mpsc::UnboundedSender<Frame>,
    heartbeat: Interval,
    auth_deadline: Option<Instant>,
    ack_deadline: Option<Instant>,
}

/// Drive one open transport until it ends. Returns how it ended and whether
/// it became stable.
async fn session(
    inner: &Inner,
    mut transport: Box<dyn Transport>,
    shutdown: &mut watch::Receiver<bool>,
) -> (SessionEnd, bool) {
    let config = &inner.config;
    inner.set_state(ConnectionState::Open);
    tracing::info!(endpoint = %config.endpoint, "ws: transport open");

    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let mut heartbeat = tokio::time::interval_at(Instant::now() + config.heartbeat_interval, config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut s = SessionState {
        ready: false,
        stable: false,
        stable_at: None,
        out_tx,
        heartbeat,
        auth_deadline: None,
        ack_deadline: None,
    };

    let mut token_rx = inner.parts.auth.watch_token();
    token_rx.mark_unchanged();

    inner.set_state(ConnectionState::Authenticating);
    let end = match send_auth(inner, &mut s, transport.as_mut()).await {
        Err(e) => SessionEnd::Abnormal(e.to_string()),
        Ok(()) => loop {
            let auth_deadline = s.auth_deadline;
            let ack_deadline = s.ack_deadline;
            let stable_at = s.stable_at;
            let ready = s.ready;

            tokio::select! {
                _ = shutdown.changed() => break SessionEnd::Graceful,
                msg = transport.recv() => match msg {
                    Some(Ok(text)) => handle_inbound(inner, &mut s, &text),
                    Some(Err(e)) => break SessionEnd::Abnormal(e.to_string()),
                    None => break SessionEnd::Abnormal("closed by peer".to_owned()),
                },
                Some(frame) = out_rx.recv() => {
                    if let Err(e) = transport.send(frames::encode_frame(&frame)).await {
                        break SessionEnd::Abnormal(e.to_string());
                    }
                }
                _ = s.heartbeat.tick(), if ready => {
                    if let Err(e) = transport.send(frames::encode_frame(&Frame::heartbeat())).await {
                        break SessionEnd::Abnormal(e.to_string());
                    }
                    if s.ack_deadline.is_none() {
                        s.ack_deadline = Some(Instant::now() + config.heartbeat_timeout);
                    }
                }
                () = sleep_until_opt(auth_deadline) => {
                    tracing::warn!(timeout = ?config.auth_timeout, "auth: no acknowledgment");
                    break SessionEnd::Abnormal("auth acknowledgment timed out".to_owned());
                }
                () = sleep_until_opt(ack_deadline) => {
                    tracing::warn!(timeout = ?config.heartbeat_timeout, "ws: heartbeat unacknowledged");
                    break SessionEnd::Abnormal("heartbeat timed out".to_owned());
                }
                () = sleep_until_opt(stable_at) => {
                    s.stable_at = None;
                    s.stable = true;
                    inner.retry_count.store(0, Ordering::SeqCst);
                    tracing::debug!("ws: session stable");
                }
                Ok(()) = token_rx.changed() => {
                    token_rx.mark_unchanged();
                    if let Err(e) = on_token_changed(inner, &mut s, transport.as_mut()).await {
                        break SessionEnd::Abnormal(e.to_string());
                    }
                }
            }
        },
    };

    let (reached_ready, stable) = (s.ready, s.stable);
    match end {
        SessionEnd::Graceful => {
            inner.set_state(ConnectionState::Closing);
            teardown(inner);
            if let Err(e) = transport.close().await {
                tracing::debug!(error = %e, "ws: close handshake failed");
            }
            tracing::info!("ws: closed");
        }
        SessionEnd::Abnormal(ref reason) => {
            teardown(inner);
            tracing::warn!(%reason, reached_ready, stable, "ws: abnormal closure");
        }
    }
    (end, stable)
}

/// Send the AUTH frame for the current token, or proceed unauthenticated.
async fn send_auth(inner: &Inner, s: &mut SessionState, transport: &mut dyn Transport) -> Result<(), ClientError> {
    match inner.parts.auth.auth_frame() {
        Some(frame) => {
            transport.send(frames::encode_frame(&frame)).await?;
            s.auth_deadline = Some(Instant::now() + inner.config.auth_timeout);
            tracing::debug!("auth: token sent");
        }
        None => {
            tracing::info!("auth: no token, proceeding unauthenticated");
            s.auth_deadline = None;
            enter_ready(inner, s);
        }
    }
    Ok(())
}

async fn on_token_changed(inner: &Inner, s: &mut SessionState, transport: &mut dyn Transport) -> Result<(), ClientError> {
    if inner.parts.auth.token().is_none() {
        inner.parts.auth.set_authenticated(false);
        inner
            .parts
            .correlator
            .reject_auth_required(&ClientError::Authentication("token cleared".to_owned()));
    }
    send_auth(inner, s, transport).await
}

fn enter_ready(inner: &Inner, s: &mut SessionState) {
    if s.ready {
        return;
    }
    s.ready = true;
    s.heartbeat.reset();
    s.stable_at = Some(Instant::now() + inner.config.heartbeat_interval);
    let resubscribed = inner.parts.registry.resume(s.out_tx.clone());
    inner.set_state(ConnectionState::Authenticated);
    tracing::info!(resubscribed, authenticated = inner.parts.auth.is_authenticated(), "ws: session ready");
}

fn handle_inbound(inner: &Inner, s: &mut SessionState, text: &str) {
    let frame = match frames::decode_frame(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "ws: dropping undecodable frame");
            return;
        }
    };

    match frame.kind {
        FrameType::Auth => handle_auth(inner, s, &frame),
        FrameType::Heartbeat => s.ack_deadline = None,
        FrameType::Subscribe | FrameType::Unsubscribe => {
            tracing::debug!(kind = %frame.kind, topic = %frame.topic, "ws: subscription acknowledged");
        }
        FrameType::Data | FrameType::Error | FrameType::Request => {
            let delivered = inner.parts.router.dispatch(&frame);
            let settled = inner.parts.correlator.settle(&frame);
            tracing::trace!(kind = %frame.kind, topic = %frame.topic, delivered, settled, "ws: inbound");
        }
    }
}

fn handle_auth(inner: &Inner, s: &mut SessionState, frame: &Frame) {
    let auth = &inner.parts.auth;
    let awaiting = s.auth_deadline.take().is_some();

    match AuthInjector::evaluate_ack(frame) {
        Ok(()) if awaiting => {
            auth.set_authenticated(true);
            tracing::info!("auth: accepted");
        }
        Ok(()) => tracing::debug!("auth: unsolicited acknowledgment ignored"),
        Err(e) => {
            tracing::warn!(error = %e, "auth: rejected, continuing unauthenticated");
            auth.set_authenticated(false);
            inner.parts.correlator.reject_auth_required(&e);
        }
    }
    enter_ready(inner, s);
}

fn teardown(inner: &Inner) {
    inner.parts.registry.suspend();
    inner.parts.correlator.reject_all(&ClientError::ConnectionLost);
    inner.parts.auth.set_authenticated(false);
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
