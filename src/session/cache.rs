//! Find-or-create session pools.
//!
//! Creating and generating a session is expensive, so callers go through a
//! cache: an existing session is handed back iff it would produce the same
//! sequence (value-equal context and configuration) and is still trustworthy
//! (not dirty, not closed, and — for the updatable variant — still accepting
//! updates). Closed sessions are pruned on the next lookup, which is all the
//! deregistration the contract needs.

use super::{BaseSession, Session, SessionConfig, SessionState, UpdatableSession};
use crate::song::RenderingContext;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// What a session must expose to be pooled.
pub trait Cacheable: Session {
    /// The context the session renders.
    fn cache_context(&self) -> &RenderingContext;

    /// The session's configuration.
    fn cache_config(&self) -> &SessionConfig;

    /// Extra reuse predicate beyond state and dirtiness.
    fn reusable(&self) -> bool {
        true
    }
}

impl Cacheable for BaseSession {
    fn cache_context(&self) -> &RenderingContext {
        self.context()
    }

    fn cache_config(&self) -> &SessionConfig {
        self.config()
    }
}

impl Cacheable for UpdatableSession {
    fn cache_context(&self) -> &RenderingContext {
        self.context()
    }

    fn cache_config(&self) -> &SessionConfig {
        self.config()
    }

    fn reusable(&self) -> bool {
        self.updates_enabled()
    }
}

/// A pool of sessions keyed by context and configuration.
///
/// One coarse mutex guards the whole registry; lookups are rare (user-driven)
/// and sessions few, so contention is not a concern.
pub struct SessionCache<S> {
    sessions: Mutex<Vec<Arc<Mutex<S>>>>,
}

/// Pool of [`BaseSession`]s.
pub type BaseSessionCache = SessionCache<BaseSession>;

/// Pool of [`UpdatableSession`]s.
pub type UpdatableSessionCache = SessionCache<UpdatableSession>;

impl<S> Default for SessionCache<S> {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
        }
    }
}

impl<S: Cacheable> SessionCache<S> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a matching live session, creating one with `create` if none
    /// qualifies. Closed sessions encountered during the scan are dropped
    /// from the registry.
    pub fn get_session<F>(
        &self,
        context: &RenderingContext,
        config: &SessionConfig,
        create: F,
    ) -> Arc<Mutex<S>>
    where
        F: FnOnce() -> S,
    {
        let mut pool = self.sessions.lock().expect("session registry poisoned");

        pool.retain(|entry| {
            entry.lock().expect("session poisoned").state() != SessionState::Closed
        });

        for entry in pool.iter() {
            let session = entry.lock().expect("session poisoned");
            let live = matches!(
                session.state(),
                SessionState::New | SessionState::Generated
            );
            if live
                && !session.is_dirty()
                && session.reusable()
                && session.cache_context() == context
                && session.cache_config() == config
            {
                debug!(session = %session.id(), "reusing cached session");
                drop(session);
                return entry.clone();
            }
        }

        let entry = Arc::new(Mutex::new(create()));
        pool.push(entry.clone());
        entry
    }

    /// Number of registered sessions (including not-yet-pruned dirty ones).
    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .len()
    }

    /// Returns true if no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
