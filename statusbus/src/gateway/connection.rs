use std::sync::{Arc, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc::{error::TryRecvError, Receiver};
use tracing::debug;
use uuid::Uuid;

use crate::{
    cache::Subscription,
    channel::NamespaceKind,
    gateway::{session, Authorizer, GatewayError, HandlerSlot, Link, SharedSession},
    Channel, Envelope, LatestValue,
};

/// One live client connection on a namespace. Dropping it disconnects:
/// the cache subscription is removed and the namespace counter goes down.
///
/// A client whose queue overflows is closed by the gateway: it stops
/// counting as live and [recv](ClientConnection::recv) returns `None`.
pub struct ClientConnection {
    id: Uuid,
    channel: Channel,
    session: Option<SharedSession>,
    rx: Option<Receiver<Arc<Envelope>>>,
    subscription: Option<(Arc<LatestValue>, Subscription)>,
    link: Arc<Link>,
    authorizer: Arc<dyn Authorizer>,
    handler: HandlerSlot,
}

impl ClientConnection {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: Uuid,
        channel: Channel,
        session: Option<SharedSession>,
        rx: Option<Receiver<Arc<Envelope>>>,
        subscription: Option<(Arc<LatestValue>, Subscription)>,
        link: Arc<Link>,
        authorizer: Arc<dyn Authorizer>,
        handler: HandlerSlot,
    ) -> Self {
        Self {
            id,
            channel,
            session,
            rx,
            subscription,
            link,
            authorizer,
            handler,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn session(&self) -> Option<&SharedSession> {
        self.session.as_ref()
    }

    pub fn is_authorized(&self) -> bool {
        session::is_authorized(self.authorizer.as_ref(), self.session.as_ref())
    }

    pub fn is_closed(&self) -> bool {
        self.link.is_closed()
    }

    /// The next envelope that passed the authorization gate, or `None` once
    /// the connection is closed. Never resolves on a bidirectional
    /// namespace until then.
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        let link = Arc::clone(&self.link);
        tokio::select! {
            biased;
            _ = link.closed() => None,
            envelope = async {
                match self.rx.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => envelope,
        }
    }

    pub fn try_recv(&mut self) -> Option<Arc<Envelope>> {
        if self.link.is_closed() {
            return None;
        }
        match self.rx.as_mut()?.try_recv() {
            Ok(envelope) => Some(envelope),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Send a request on a bidirectional namespace.
    pub async fn request(&self, request: Value) -> Result<Value, GatewayError> {
        if self.channel.namespace_kind() != NamespaceKind::Bidirectional {
            return Err(GatewayError::NotBidirectional(self.channel));
        }
        if !self.is_authorized() {
            return Err(GatewayError::Unauthorized);
        }
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(GatewayError::NoHandler(self.channel))?;
        let session = self
            .session
            .as_ref()
            .and_then(|s| s.read().ok().and_then(|guard| guard.clone()));
        handler.handle(self.channel, session, request).await
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        if let Some((cache, subscription)) = self.subscription.take() {
            cache.unsubscribe(&subscription);
        }
        self.link.close();
        debug!(channel = %self.channel, connection = %self.id, "Client disconnected");
    }
}
