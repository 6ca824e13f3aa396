use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::subscription::{Listeners, Subscription};
use super::{AuthError, AuthProvider};
use crate::types::{AuthEvent, AuthStateChange, Session};

#[derive(Debug, Default)]
struct SessionState {
    session: Option<Session>,
    /// Bumped on every applied transition
    revision: u64,
    initialized: bool,
}

/// Precondition checked under the state lock before a transition lands
#[derive(Debug, Clone, Copy)]
enum Guard {
    Always,
    /// No other transition since `revision` was read
    Revision(u64),
    /// The incoming session belongs to the current user
    SameUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Changed,
    Duplicate,
    Stale,
}

struct Inner {
    provider: Arc<dyn AuthProvider>,
    state: Mutex<SessionState>,
    watch_tx: watch::Sender<Option<Session>>,
    listeners: Arc<Listeners>,
    request_timeout: Duration,
    refresh_leeway: chrono::Duration,
    provider_events: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.provider_events.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }
}

/// Owns the current session and fans out session transitions.
///
/// Cloning is cheap; clones share state. Must be created inside a Tokio
/// runtime, since provider events are consumed by a background task.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn AuthProvider>, request_timeout: Duration) -> Self {
        Self::with_refresh_leeway(provider, request_timeout, chrono::Duration::seconds(30))
    }

    /// Sessions expiring within `refresh_leeway` are refreshed on access
    pub fn with_refresh_leeway(
        provider: Arc<dyn AuthProvider>,
        request_timeout: Duration,
        refresh_leeway: chrono::Duration,
    ) -> Self {
        let (watch_tx, _) = watch::channel(None);
        let inner = Arc::new(Inner {
            provider,
            state: Mutex::new(SessionState::default()),
            watch_tx,
            listeners: Arc::new(Listeners::default()),
            request_timeout,
            refresh_leeway,
            provider_events: Mutex::new(None),
        });

        let task = spawn_provider_listener(&inner);
        *inner.provider_events.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);

        Self { inner }
    }

    /// Cached session, without touching the provider
    pub fn current_session(&self) -> Option<Session> {
        self.inner.lock_state().session.clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.inner.lock_state().session.is_some()
    }

    /// Latest known session as a watch channel
    pub fn watch(&self) -> watch::Receiver<Option<Session>> {
        self.inner.watch_tx.subscribe()
    }

    /// Register a handler for every session transition.
    ///
    /// Transitions may arrive before or after `initialize` resolves;
    /// repeated identical states are delivered once.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&AuthStateChange) + Send + Sync + 'static,
    {
        let id = self.inner.listeners.add(Arc::new(handler));
        Subscription::new(id, &self.inner.listeners)
    }

    /// Resolve the session from the provider cache. Always settles on a
    /// session or an explicit absence, bounded by the request timeout.
    pub async fn initialize(&self) -> Option<Session> {
        let revision = self.inner.lock_state().revision;

        let resolved = match self.bounded(self.inner.provider.get_session()).await {
            Ok(Some(session)) if session.expires_within(self.inner.refresh_leeway) => {
                self.try_refresh(&session).await
            }
            Ok(session) => session,
            Err(e) => {
                warn!("Could not resolve initial session: {}", e);
                None
            }
        };

        self.inner.lock_state().initialized = true;
        let change = AuthStateChange::new(AuthEvent::InitialSession, resolved.clone());
        match self.inner.commit(change, Guard::Revision(revision)) {
            Applied::Stale => {
                debug!("Discarding initial session result; state moved on");
                self.current_session()
            }
            _ => resolved,
        }
    }

    /// Current session, resolving it first if needed. Expired sessions are
    /// refreshed when possible, otherwise destroyed.
    pub async fn get_current_session(&self) -> Option<Session> {
        let (initialized, cached, revision) = {
            let state = self.inner.lock_state();
            (state.initialized, state.session.clone(), state.revision)
        };

        if !initialized {
            return self.initialize().await;
        }

        match cached {
            Some(session) if session.expires_within(self.inner.refresh_leeway) => {
                let refreshed = self.try_refresh(&session).await;
                let change = match &refreshed {
                    Some(s) => AuthStateChange::new(AuthEvent::TokenRefreshed, Some(s.clone())),
                    None => AuthStateChange::signed_out(),
                };
                match self.inner.commit(change, Guard::Revision(revision)) {
                    Applied::Stale => {
                        // Signed in, out or refreshed elsewhere while we waited
                        debug!("Discarding refresh result; state moved on");
                        self.current_session()
                    }
                    _ => refreshed,
                }
            }
            other => other,
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let session = self
            .bounded(self.inner.provider.sign_in_with_password(email, password))
            .await
            .map_err(|e| {
                warn!("Sign-in failed for {}: {}", email, e);
                e
            })?;

        self.inner.apply(AuthStateChange::new(AuthEvent::SignedIn, Some(session.clone())));
        Ok(session)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let session = self
            .bounded(self.inner.provider.sign_up(email, password))
            .await
            .map_err(|e| {
                warn!("Sign-up failed for {}: {}", email, e);
                e
            })?;

        self.inner.apply(AuthStateChange::new(AuthEvent::SignedIn, Some(session.clone())));
        Ok(session)
    }

    /// Always ends with no local session; a provider failure is still reported
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let current = self.current_session();

        let result = match &current {
            Some(session) => self.bounded(self.inner.provider.sign_out(session)).await,
            None => Ok(()),
        };

        if let Err(e) = &result {
            warn!("Provider sign-out failed, clearing local session anyway: {}", e);
        }

        self.inner.apply(AuthStateChange::signed_out());
        result
    }

    async fn try_refresh(&self, session: &Session) -> Option<Session> {
        let refresh_token = match session.refresh_token.as_deref() {
            Some(token) => token,
            None => {
                info!("Session for {} expired without a refresh token", session.email());
                return None;
            }
        };

        match self.bounded(self.inner.provider.refresh_session(refresh_token)).await {
            Ok(fresh) => Some(fresh),
            Err(e) => {
                warn!("Session refresh failed for {}: {}", session.email(), e);
                None
            }
        }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, AuthError>>,
    {
        match timeout(self.inner.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Unavailable(format!(
                "no response within {:?}",
                self.inner.request_timeout
            ))),
        }
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

impl Inner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an unconditional transition and notify observers
    fn apply(&self, change: AuthStateChange) -> Applied {
        self.commit(change, Guard::Always)
    }

    /// Check `guard`, record the transition and bump the revision in one
    /// critical section, then notify observers outside it.
    fn commit(&self, change: AuthStateChange, guard: Guard) -> Applied {
        {
            let mut state = self.lock_state();
            let admitted = match guard {
                Guard::Always => true,
                Guard::Revision(revision) => state.revision == revision,
                Guard::SameUser => {
                    let current = state.session.as_ref().map(|s| &s.user.id);
                    current.is_some() && current == change.session.as_ref().map(|s| &s.user.id)
                }
            };
            if !admitted {
                return Applied::Stale;
            }
            if state.session == change.session {
                return Applied::Duplicate;
            }
            state.session = change.session.clone();
            state.revision += 1;
        }

        match &change.session {
            Some(session) => info!("Session {:?} for {}", change.event, session.email()),
            None => info!("Session {:?}", change.event),
        }

        self.watch_tx.send_replace(change.session.clone());
        self.listeners.notify(&change);
        Applied::Changed
    }

    /// Provider-initiated transitions
    fn apply_provider_event(&self, change: AuthStateChange) {
        if change.event == AuthEvent::TokenRefreshed {
            // A refresh for a session we no longer hold must not resurrect it
            if self.commit(change, Guard::SameUser) == Applied::Stale {
                debug!("Ignoring token refresh for a session that is not current");
            }
            return;
        }
        self.apply(change);
    }
}

fn spawn_provider_listener(inner: &Arc<Inner>) -> JoinHandle<()> {
    let mut events = inner.provider.on_auth_state_change();
    let weak: Weak<Inner> = Arc::downgrade(inner);

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(change) => match weak.upgrade() {
                    Some(inner) => inner.apply_provider_event(change),
                    None => break,
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Missed {} provider session events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
