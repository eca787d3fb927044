use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use chrono::{DateTime, Duration, Utc};

use crate::gateway::GatewayError;

/// The part of an HTTP session the gateway cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub user_id: Option<String>,
    pub authenticated: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// An authenticated session for `user_id`, optionally expiring after `ttl`.
    pub fn authenticated(user_id: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            authenticated: true,
            expires_at: ttl.map(|ttl| Utc::now() + ttl),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A session attached to a connection. It is shared with whatever owns the
/// session store, so logouts and expiry are seen on the next message.
/// `None` inside the lock means the session was destroyed.
pub type SharedSession = Arc<RwLock<Option<Session>>>;

/// Decides whether a connection may receive (or send) messages right now.
///
/// Must be a pure function of the session and must answer `false` rather
/// than fail when the session is absent, partial or expired.
pub trait Authorizer: Send + Sync + 'static {
    fn is_authorized(&self, session: Option<&Session>) -> bool;
}

/// Authorized while the session is authenticated, names a user and has not
/// expired.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionAuthorizer;

impl Authorizer for SessionAuthorizer {
    fn is_authorized(&self, session: Option<&Session>) -> bool {
        session.is_some_and(|s| {
            s.authenticated
                && s.user_id.as_deref().is_some_and(|u| !u.is_empty())
                && !s.is_expired_at(Utc::now())
        })
    }
}

/// Evaluate `authorizer` against the current state of a shared session.
/// A poisoned session lock counts as unauthorized.
pub(crate) fn is_authorized(authorizer: &dyn Authorizer, session: Option<&SharedSession>) -> bool {
    match session {
        None => authorizer.is_authorized(None),
        Some(shared) => match shared.read() {
            Ok(guard) => authorizer.is_authorized(guard.as_ref()),
            Err(_) => false,
        },
    }
}

/// What the transport knows about a connection when it is established.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub path: String,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
}

impl Handshake {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.header("cookie")?.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then_some(value)
        })
    }
}

/// Attaches a session to an incoming connection before the gateway's
/// authorization gate runs. Returning `Ok(None)` admits the connection
/// without a session (it will not be authorized); an error rejects it.
#[async_trait::async_trait]
pub trait SessionMiddleware: Send + Sync + 'static {
    async fn attach(&self, handshake: &Handshake) -> Result<Option<SharedSession>, GatewayError>;
}

pub const DEFAULT_SESSION_COOKIE: &str = "sid";

/// An in-memory session store keyed by a session cookie.
#[derive(Debug)]
pub struct MemorySessionStore {
    cookie: String,
    sessions: RwLock<HashMap<String, SharedSession>>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_COOKIE)
    }
}

impl MemorySessionStore {
    pub fn new(cookie: impl Into<String>) -> Self {
        Self {
            cookie: cookie.into(),
            sessions: Default::default(),
        }
    }

    /// Store `session` under `sid`, replacing the state seen by any
    /// connection already attached to it.
    pub fn insert(&self, sid: impl Into<String>, session: Session) -> SharedSession {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let shared = sessions.entry(sid.into()).or_default();
        *shared.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
        Arc::clone(shared)
    }

    /// Destroy the session. Attached connections keep their handle but see
    /// no session from now on.
    pub fn invalidate(&self, sid: &str) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        match sessions.get(sid) {
            Some(shared) => {
                *shared.write().unwrap_or_else(PoisonError::into_inner) = None;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, sid: &str) -> Option<SharedSession> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sid)
            .cloned()
    }
}

#[async_trait::async_trait]
impl SessionMiddleware for MemorySessionStore {
    async fn attach(&self, handshake: &Handshake) -> Result<Option<SharedSession>, GatewayError> {
        Ok(handshake.cookie(&self.cookie).and_then(|sid| self.get(sid)))
    }
}
