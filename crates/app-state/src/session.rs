//! Session status observation
//!
//! This module wraps the external [`AuthService`] in an [`AuthSessionObserver`]
//! that multiplexes any number of subscribers onto a single upstream listener
//! and owns that listener's lifecycle.

use backend_client::{AuthService, ListenerHandle, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::listeners::{ListenerId, ListenerRegistry};

/// Sign-in state as seen by the session core
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "userId", rename_all = "camelCase")]
pub enum SessionStatus {
    /// No notification has been observed yet
    #[default]
    Unknown,
    /// Nobody is signed in
    SignedOut,
    /// A user is signed in
    SignedIn(UserId),
}

impl SessionStatus {
    /// Map the auth service's view of the current user
    pub fn from_user(user: Option<UserId>) -> Self {
        match user {
            Some(uid) => SessionStatus::SignedIn(uid),
            None => SessionStatus::SignedOut,
        }
    }

    /// The signed-in user, if any
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            SessionStatus::SignedIn(uid) => Some(uid),
            _ => None,
        }
    }

    /// Check if a user is signed in
    pub fn is_signed_in(&self) -> bool {
        matches!(self, SessionStatus::SignedIn(_))
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Unknown => write!(f, "unknown"),
            SessionStatus::SignedOut => write!(f, "signed-out"),
            SessionStatus::SignedIn(uid) => write!(f, "signed-in({})", uid),
        }
    }
}

/// Failure to establish the upstream auth listener
#[derive(Debug, thiserror::Error)]
#[error("failed to establish auth listener: {source}")]
pub struct AuthSubscriptionError {
    #[from]
    source: backend_client::Error,
}

struct Upstream {
    handle: ListenerHandle,
}

struct ObserverInner {
    service: Arc<dyn AuthService>,
    registry: ListenerRegistry<SessionStatus>,
    upstream: Mutex<Option<Upstream>>,
    /// Epoch of the attached upstream listener; 0 when detached
    live_epoch: AtomicU64,
    next_epoch: AtomicU64,
}

impl ObserverInner {
    /// Attach the upstream listener if none is live
    ///
    /// Must run under the registry's delivery lock.
    fn ensure_upstream(self: &Arc<Self>) -> Result<(), AuthSubscriptionError> {
        let mut upstream = self.upstream.lock();
        if upstream.is_some() {
            return Ok(());
        }

        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.live_epoch.store(epoch, Ordering::SeqCst);

        let weak = Arc::downgrade(self);
        let registered = self.service.add_state_listener(Box::new(move |user| {
            if let Some(inner) = weak.upgrade() {
                inner.on_upstream(epoch, user);
            }
        }));

        let handle = match registered {
            Ok(handle) => handle,
            Err(e) => {
                self.live_epoch.store(0, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        *upstream = Some(Upstream { handle });
        drop(upstream);

        // The synchronous read counts as the first notification
        let status = SessionStatus::from_user(self.service.current_user());
        tracing::debug!(%status, epoch, "auth listener attached");
        self.registry.publish(status);
        Ok(())
    }

    fn on_upstream(&self, epoch: u64, user: Option<UserId>) {
        self.registry.exclusive(|| {
            // Re-checked under the delivery lock so a late callback from a
            // detached listener can never reach a newer subscriber
            if self.live_epoch.load(Ordering::SeqCst) != epoch {
                tracing::trace!(epoch, "ignoring callback from detached auth listener");
                return;
            }
            let status = SessionStatus::from_user(user);
            tracing::debug!(%status, "auth state changed");
            self.registry.publish(status);
        });
    }

    /// Take the upstream handle out, marking it detached
    ///
    /// Must run under the registry's delivery lock.
    fn detach(&self) -> Option<Upstream> {
        self.live_epoch.store(0, Ordering::SeqCst);
        self.upstream.lock().take()
    }

    fn release(&self, id: ListenerId) {
        let detached = self.registry.exclusive(|| {
            if self.registry.remove(id) == 0 {
                self.detach()
            } else {
                None
            }
        });

        if let Some(upstream) = detached {
            self.service.remove_state_listener(upstream.handle);
            tracing::debug!("auth listener released");
        }
    }
}

impl Drop for ObserverInner {
    fn drop(&mut self) {
        if let Some(upstream) = self.upstream.get_mut().take() {
            self.service.remove_state_listener(upstream.handle);
        }
    }
}

/// Observer of the external authentication service
///
/// Clones share the same upstream listener and subscriber set.
///
/// # Example
///
/// ```no_run
/// use app_state::session::{AuthSessionObserver, SessionStatus};
/// use backend_client::InMemoryAuthService;
/// use std::sync::Arc;
///
/// let service = Arc::new(InMemoryAuthService::new());
/// let observer = AuthSessionObserver::new(service);
///
/// let subscription = observer
///     .subscribe(|status: &SessionStatus| println!("auth: {status}"))
///     .unwrap();
///
/// // ... later
/// subscription.unsubscribe();
/// ```
#[derive(Clone)]
pub struct AuthSessionObserver {
    inner: Arc<ObserverInner>,
}

impl AuthSessionObserver {
    /// Create an observer for `service`
    ///
    /// No upstream listener is attached until the first subscription.
    pub fn new(service: Arc<dyn AuthService>) -> Self {
        Self {
            inner: Arc::new(ObserverInner {
                service,
                registry: ListenerRegistry::new(SessionStatus::Unknown),
                upstream: Mutex::new(None),
                live_epoch: AtomicU64::new(0),
                next_epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Synchronous snapshot of the session status
    pub fn current_status(&self) -> SessionStatus {
        self.inner.registry.current()
    }

    /// Subscribe to status changes
    ///
    /// `on_change` is called with the current status before this returns,
    /// then on every sign-in/sign-out event.
    pub fn subscribe<F>(&self, on_change: F) -> Result<AuthSubscription, AuthSubscriptionError>
    where
        F: Fn(&SessionStatus) + Send + Sync + 'static,
    {
        let inner = &self.inner;
        inner.registry.exclusive(|| {
            if inner.registry.is_closed() {
                return Err(backend_client::Error::Unavailable(
                    "session observer is closed".to_string(),
                )
                .into());
            }

            inner.ensure_upstream()?;
            match inner.registry.register(Arc::new(on_change)) {
                Some(id) => Ok(AuthSubscription { inner: Arc::clone(inner), id: Some(id) }),
                None => Err(backend_client::Error::Unavailable(
                    "session observer is closed".to_string(),
                )
                .into()),
            }
        })
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Whether an upstream listener is currently attached
    pub fn is_connected(&self) -> bool {
        self.inner.upstream.lock().is_some()
    }

    /// Drop every subscriber and release the upstream listener
    ///
    /// Later `subscribe` calls fail. Idempotent.
    pub fn close(&self) {
        let inner = &self.inner;
        let detached = inner.registry.exclusive(|| {
            inner.registry.close();
            inner.detach()
        });

        if let Some(upstream) = detached {
            inner.service.remove_state_listener(upstream.handle);
            tracing::info!("session observer closed");
        }
    }
}

/// Handle for a session status subscription
///
/// Dropping the handle unsubscribes.
pub struct AuthSubscription {
    inner: Arc<ObserverInner>,
    id: Option<ListenerId>,
}

impl AuthSubscription {
    /// Stop delivery to this subscriber
    ///
    /// No invocation of its callback happens after this returns.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            self.inner.release(id);
        }
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for AuthSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSubscription").field("id", &self.id).finish()
    }
}
