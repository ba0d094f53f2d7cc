//! Shared client context and the per-consumer facade.
//!
//! ARCHITECTURE
//! ============
//! [`RealtimeClient`] is the one context object an application creates. It
//! owns the connection and the shared tables (listeners, topic refcounts,
//! pending requests) and is cheap to clone. Features mount a [`Consumer`]
//! through [`RealtimeClient::consumer`]; the first mount starts the
//! connection.
//!
//! A consumer remembers which topics it declared. Each topic reaches the
//! registry once per consumer, so refcounts count distinct consumers and
//! disposal can never release a reference the consumer did not take.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use frames::{Frame, FrameType};
use serde_json::Value;

use crate::auth::AuthInjector;
use crate::config::ClientConfig;
use crate::connection::{Components, ConnectionManager};
use crate::correlator::{Correlator, RequestOptions};
use crate::error::ClientError;
use crate::outbox::Outbox;
use crate::registry::TopicRegistry;
use crate::router::{Listener, MessageRouter, TopicFilter};
use crate::transport::{Connector, WsConnector};

// =============================================================================
// CLIENT
// =============================================================================

struct Shared {
    auth: Arc<AuthInjector>,
    registry: Arc<TopicRegistry>,
    router: Arc<MessageRouter>,
    correlator: Arc<Correlator>,
    connection: ConnectionManager,
}

/// Process-wide realtime client. Clones share one connection.
#[derive(Clone)]
pub struct RealtimeClient {
    shared: Arc<Shared>,
}

impl RealtimeClient {
    /// Client that connects over WebSocket.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Client over a custom transport.
    #[must_use]
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let outbox = Arc::new(Outbox::new());
        let auth = Arc::new(AuthInjector::default());
        let registry = Arc::new(TopicRegistry::new(Arc::clone(&outbox)));
        let router = Arc::new(MessageRouter::new());
        let correlator = Arc::new(Correlator::new(outbox, Arc::clone(&auth), config.request_timeout));
        let parts = Components {
            auth: Arc::clone(&auth),
            registry: Arc::clone(&registry),
            router: Arc::clone(&router),
            correlator: Arc::clone(&correlator),
        };
        let connection = ConnectionManager::new(config, connector, parts);
        Self { shared: Arc::new(Shared { auth, registry, router, correlator, connection }) }
    }

    /// Client configured from `LIVEFEED_*` environment variables.
    ///
    /// # Errors
    ///
    /// Propagates [`ClientConfig::from_env`] failures.
    pub fn from_env() -> Result<Self, ClientError> {
        Ok(Self::new(ClientConfig::from_env()?))
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.shared.connection
    }

    #[must_use]
    pub fn auth(&self) -> &AuthInjector {
        &self.shared.auth
    }

    #[must_use]
    pub fn registry(&self) -> &TopicRegistry {
        &self.shared.registry
    }

    #[must_use]
    pub fn router(&self) -> &MessageRouter {
        &self.shared.router
    }

    #[must_use]
    pub fn correlator(&self) -> &Correlator {
        &self.shared.correlator
    }

    /// Mount a consumer: register its listener, declare its topics and make
    /// sure the connection is running.
    ///
    /// With a non-empty `topics` list the listener only hears frames for the
    /// topics the consumer currently holds; with none it hears every topic of
    /// its `types`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::DuplicateListener`] if `id` is already mounted.
    /// - [`ClientError::Connection`] outside a Tokio runtime.
    pub fn consumer<I, F, S>(&self, id: &str, types: I, callback: F, topics: &[S]) -> Result<Consumer, ClientError>
    where
        I: IntoIterator<Item = FrameType>,
        F: Fn(&Frame) + Send + Sync + 'static,
        S: AsRef<str>,
    {
        let held = topics.iter().map(|t| t.as_ref().to_owned()).collect::<BTreeSet<_>>();
        let follows_topics = !held.is_empty();
        let filter = if follows_topics { TopicFilter::Topics(held.clone()) } else { TopicFilter::Any };

        self.shared.connection.connect()?;
        self.shared
            .router
            .register(Listener::new(id, types, callback).with_topics(filter))?;
        let declared = held.iter().collect::<Vec<_>>();
        self.shared.registry.subscribe(&declared);

        tracing::debug!(consumer = id, topics = ?declared, "registry: consumer mounted");
        Ok(Consumer {
            id: id.to_owned(),
            client: self.clone(),
            state: Mutex::new(ConsumerState {
                topics: held,
                follows_topics,
                disposed: false,
            }),
            listeners: Arc::default(),
        })
    }

    /// Close the connection gracefully and wait for it to finish.
    pub async fn shutdown(&self) {
        self.shared.connection.close_and_wait().await;
    }
}

// =============================================================================
// CONSUMER
// =============================================================================

struct ConsumerState {
    topics: BTreeSet<String>,
    follows_topics: bool,
    disposed: bool,
}

/// Ids of the extra listeners a consumer still owns. Shared weakly with each
/// [`ListenerHandle`] so a released handle drops out of the list.
type OwnedListeners = Mutex<Vec<String>>;

/// One mounted feature's view of the client. Disposed on drop.
pub struct Consumer {
    id: String,
    client: RealtimeClient,
    state: Mutex<ConsumerState>,
    listeners: Arc<OwnedListeners>,
}

impl Consumer {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client.connection().is_connected()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.client.auth().is_authenticated()
    }

    /// Issue a request with the default timeout.
    ///
    /// # Errors
    ///
    /// See [`Correlator::request`].
    pub async fn request(&self, topic: &str, action: &str, payload: Value) -> Result<Frame, ClientError> {
        self.request_with(topic, action, payload, RequestOptions::default()).await
    }

    /// Issue a request with per-call options.
    ///
    /// # Errors
    ///
    /// See [`Correlator::request`].
    pub async fn request_with(
        &self,
        topic: &str,
        action: &str,
        payload: Value,
        options: RequestOptions,
    ) -> Result<Frame, ClientError> {
        self.client.correlator().request(topic, action, payload, options).await
    }

    /// Declare interest in more topics. Topics this consumer already holds
    /// are ignored. Returns `true` if the subscription is live now rather
    /// than deferred until the connection is ready.
    pub fn subscribe<S: AsRef<str>>(&self, topics: &[S]) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.disposed {
            tracing::warn!(consumer = %self.id, "registry: subscribe on disposed consumer");
            return false;
        }

        let fresh = topics
            .iter()
            .map(AsRef::<str>::as_ref)
            .filter(|t| !state.topics.contains(*t))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_owned)
            .collect::<Vec<_>>();
        state.topics.extend(fresh.iter().cloned());
        self.sync_filter(&state);
        self.client.registry().subscribe(&fresh)
    }

    /// Release topics this consumer holds.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnsubscribeUnderflow`] naming any topic this
    /// consumer does not hold; nothing is released in that case.
    pub fn unsubscribe<S: AsRef<str>>(&self, topics: &[S]) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let wanted = topics.iter().map(AsRef::<str>::as_ref).collect::<BTreeSet<_>>();
        let foreign = wanted
            .iter()
            .filter(|t| !state.topics.contains(**t))
            .map(|t| (*t).to_owned())
            .collect::<Vec<_>>();
        if !foreign.is_empty() {
            tracing::warn!(consumer = %self.id, topics = ?foreign, "registry: consumer does not hold topics");
            return Err(ClientError::UnsubscribeUnderflow(foreign));
        }

        let released = wanted.into_iter().collect::<Vec<_>>();
        self.client.registry().unsubscribe(&released)?;
        for topic in &released {
            state.topics.remove(*topic);
        }
        self.sync_filter(&state);
        Ok(())
    }

    /// Topics this consumer currently holds, sorted.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.topics.iter().cloned().collect()
    }

    /// Register an extra listener. It is removed when the handle is dropped
    /// or when this consumer is disposed, whichever comes first.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::DuplicateListener`] if the id is taken.
    pub fn register_listener(&self, listener: Listener) -> Result<ListenerHandle, ClientError> {
        let id = listener.id.clone();
        let mut owned = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        self.client.router().register(listener)?;
        owned.push(id.clone());
        Ok(ListenerHandle {
            id,
            owner: Arc::downgrade(&self.listeners),
            client: self.client.clone(),
        })
    }

    /// Deregister every listener and release every topic. Idempotent.
    pub fn dispose(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.disposed {
            return;
        }
        state.disposed = true;

        let router = self.client.router();
        router.deregister(&self.id);
        let mut owned = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for id in owned.drain(..) {
            router.deregister(&id);
        }
        drop(owned);

        let topics = std::mem::take(&mut state.topics).into_iter().collect::<Vec<_>>();
        if let Err(e) = self.client.registry().unsubscribe(&topics) {
            tracing::error!(consumer = %self.id, error = %e, "registry: release on dispose failed");
        }
        tracing::debug!(consumer = %self.id, released = topics.len(), "registry: consumer disposed");
    }

    fn sync_filter(&self, state: &ConsumerState) {
        if state.follows_topics {
            self.client
                .router()
                .set_topic_filter(&self.id, TopicFilter::Topics(state.topics.clone()));
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Keeps an extra listener registered. Deregisters on drop.
///
/// The handle only ever removes the registration its consumer made. Once the
/// consumer is disposed, or the handle has been released, it does nothing,
/// even if the same id has since been registered elsewhere.
#[must_use = "dropping the handle deregisters the listener"]
pub struct ListenerHandle {
    id: String,
    owner: Weak<OwnedListeners>,
    client: RealtimeClient,
}

impl ListenerHandle {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Deregister now. Returns `false` if the listener was already gone.
    pub fn unregister(self) -> bool {
        self.release()
    }

    fn release(&self) -> bool {
        let Some(owner) = self.owner.upgrade() else {
            return false;
        };
        let mut owned = owner.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(pos) = owned.iter().position(|id| *id == self.id) else {
            return false;
        };
        owned.swap_remove(pos);
        self.client.router().deregister(&self.id)
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
