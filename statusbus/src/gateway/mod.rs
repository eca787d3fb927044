//! # Client gateway
//!
//! Exposes each [Channel] to live client connections as a namespace mounted
//! at `{root_path}/{channel}`.
//!
//! Every connection first goes through the injected [SessionMiddleware],
//! which attaches a [SharedSession]. Broadcast namespaces then subscribe
//! the connection to the channel's [LatestValue]; each snapshot (starting
//! with the current one) is checked against the [Authorizer] and either
//! queued for the connection verbatim or silently dropped. An unauthorized
//! connection stays open and is re-checked on the next snapshot.
//!
//! Bidirectional namespaces forward client requests to the application's
//! [RequestHandler], behind the same authorization gate.

mod connection;
mod session;
#[cfg(feature = "websocket")]
pub mod websocket;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, PoisonError, RwLock,
};

pub use connection::ClientConnection;
use serde_json::Value;
pub use session::{
    Authorizer, Handshake, MemorySessionStore, Session, SessionAuthorizer, SessionMiddleware,
    SharedSession, DEFAULT_SESSION_COOKIE,
};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::{
    cache::{on_next, ChannelCaches},
    channel::NamespaceKind,
    Channel,
};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unknown namespace: {0}")]
    UnknownNamespace(String),
    #[error("connection rejected: {0}")]
    Rejected(String),
    #[error("not authorized")]
    Unauthorized,
    #[error("namespace {0} does not accept requests")]
    NotBidirectional(Channel),
    #[error("no request handler registered for {0}")]
    NoHandler(Channel),
    #[error("request failed: {0}")]
    Handler(String),
}

/// Application-level handling of requests sent on a bidirectional
/// namespace. The gateway only checks authorization before calling it.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        channel: Channel,
        session: Option<Session>,
        request: Value,
    ) -> Result<Value, GatewayError>;
}

pub(crate) type HandlerSlot = Arc<RwLock<Option<Arc<dyn RequestHandler>>>>;

/// Envelopes queued for a client before it counts as too slow and is
/// disconnected.
pub const DEFAULT_CLIENT_QUEUE: usize = 64;

/// Decrements its namespace counter when dropped.
pub(crate) struct CounterGuard(Arc<AtomicUsize>);

impl CounterGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Liveness of one connection, shared with its cache subscription.
pub(crate) struct Link {
    closed: CancellationToken,
    counter: Mutex<Option<CounterGuard>>,
}

impl Link {
    fn new(counter: CounterGuard) -> Self {
        Self {
            closed: CancellationToken::new(),
            counter: Mutex::new(Some(counter)),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub(crate) async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Stop counting the connection and wake anyone waiting on it.
    /// Idempotent.
    pub(crate) fn close(&self) {
        self.closed.cancel();
        self.counter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

pub struct Gateway {
    root_path: String,
    caches: Arc<ChannelCaches>,
    middleware: Arc<dyn SessionMiddleware>,
    authorizer: Arc<dyn Authorizer>,
    counters: [Arc<AtomicUsize>; 3],
    handler: HandlerSlot,
    queue_capacity: usize,
}

impl Gateway {
    pub fn new(
        root_path: impl Into<String>,
        caches: Arc<ChannelCaches>,
        middleware: Arc<dyn SessionMiddleware>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            root_path: root_path.into(),
            caches,
            middleware,
            authorizer,
            counters: Default::default(),
            handler: Default::default(),
            queue_capacity: DEFAULT_CLIENT_QUEUE,
        }
    }

    /// How many envelopes may wait for a client before it is dropped as
    /// too slow.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    pub fn namespace_path(&self, channel: Channel) -> String {
        format!("{}/{}", self.root_path, channel)
    }

    /// Map a request path (query string allowed) to its namespace.
    pub fn resolve(&self, path: &str) -> Result<Channel, GatewayError> {
        let path = path.split('?').next().unwrap_or_default();
        path.strip_prefix(self.root_path.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|name| name.trim_end_matches('/').parse().ok())
            .ok_or_else(|| GatewayError::UnknownNamespace(path.to_owned()))
    }

    pub fn set_request_handler(&self, handler: Arc<dyn RequestHandler>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Live connections on a namespace.
    pub fn connection_count(&self, channel: Channel) -> usize {
        self.counters[channel.index()].load(Ordering::SeqCst)
    }

    /// Establish a connection on `channel`. Dropping the returned
    /// connection disconnects it.
    pub async fn connect(
        &self,
        channel: Channel,
        handshake: &Handshake,
    ) -> Result<ClientConnection, GatewayError> {
        let session = self.middleware.attach(handshake).await.map_err(|e| {
            warn!(%channel, path = %handshake.path, "Session middleware rejected connection: {e}");
            e
        })?;
        let id = Uuid::new_v4();
        let link = Arc::new(Link::new(CounterGuard::acquire(
            &self.counters[channel.index()],
        )));

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let subscription = match channel.namespace_kind() {
            NamespaceKind::Broadcast => {
                let cache = Arc::clone(self.caches.get(channel));
                let authorizer = Arc::clone(&self.authorizer);
                let gate = session.clone();
                let feed = Arc::clone(&link);
                let subscription = cache.subscribe(on_next(move |envelope| {
                    if feed.is_closed() {
                        return Ok(());
                    }
                    if !session::is_authorized(authorizer.as_ref(), gate.as_ref()) {
                        trace!(%channel, connection = %id, envelope = %envelope.id, "Dropping for unauthorized connection");
                        return Ok(());
                    }
                    match tx.try_send(Arc::clone(envelope)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!(%channel, connection = %id, "Client is not keeping up, disconnecting");
                            feed.close();
                        }
                        Err(TrySendError::Closed(_)) => {
                            trace!(%channel, connection = %id, "Connection already closed");
                        }
                    }
                    Ok(())
                }));
                Some((cache, subscription))
            }
            NamespaceKind::Bidirectional => None,
        };
        // only broadcast namespaces have a feed
        let rx = subscription.as_ref().map(|_| rx);
        debug!(%channel, connection = %id, live = self.connection_count(channel), "Client connected");

        Ok(ClientConnection::new(
            id,
            channel,
            session,
            rx,
            subscription,
            link,
            Arc::clone(&self.authorizer),
            Arc::clone(&self.handler),
        ))
    }

    /// Run the authorization gate for a session without a connection.
    pub fn is_authorized(&self, session: Option<&SharedSession>) -> bool {
        session::is_authorized(self.authorizer.as_ref(), session)
    }
}
