//! Authentication service contract
//!
//! The session core only needs three things from the hosted identity provider:
//! a synchronous read of the signed-in user, a change listener, and a way to
//! remove that listener. [`InMemoryAuthService`] implements the contract for
//! embedding and tests.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::{Error, Result, UserId};

/// Callback invoked with the signed-in user (or `None`) on every auth transition
pub type AuthStateListener = Box<dyn Fn(Option<UserId>) + Send + Sync>;

/// Handle identifying a registered auth listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    /// Create a handle from a raw id
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// External authentication service
pub trait AuthService: Send + Sync {
    /// Currently signed-in user, if any
    fn current_user(&self) -> Option<UserId>;

    /// Register a listener for every subsequent sign-in/sign-out transition
    fn add_state_listener(&self, listener: AuthStateListener) -> Result<ListenerHandle>;

    /// Remove a listener; unknown handles are ignored
    fn remove_state_listener(&self, handle: ListenerHandle);
}

#[derive(Default)]
struct AuthState {
    current: Option<UserId>,
    listeners: Vec<(ListenerHandle, Arc<AuthStateListener>)>,
    next_id: u64,
    listen_failure: Option<String>,
}

/// In-process authentication service
///
/// Listeners are not called on registration; callers read [`current_user`]
/// for the initial state. Notifications are delivered in transition order and
/// never while the state lock is held, so listeners may call back into the
/// service.
///
/// [`current_user`]: AuthService::current_user
#[derive(Default)]
pub struct InMemoryAuthService {
    state: Mutex<AuthState>,
    notify: Mutex<()>,
}

impl InMemoryAuthService {
    /// Create a service with nobody signed in
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a service with `user` already signed in
    pub fn signed_in(user: UserId) -> Self {
        let service = Self::default();
        service.state.lock().current = Some(user);
        service
    }

    /// Sign `user` in and notify listeners
    pub fn sign_in(&self, user: UserId) {
        self.transition(Some(user));
    }

    /// Sign out and notify listeners
    pub fn sign_out(&self) {
        self.transition(None);
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Make subsequent `add_state_listener` calls fail with `message`
    ///
    /// Pass `None` to restore normal behaviour.
    pub fn fail_listeners_with(&self, message: Option<&str>) {
        self.state.lock().listen_failure = message.map(str::to_string);
    }

    fn transition(&self, user: Option<UserId>) {
        let _ordered = self.notify.lock();
        let listeners: Vec<Arc<AuthStateListener>> = {
            let mut state = self.state.lock();
            state.current = user.clone();
            state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        tracing::debug!(signed_in = user.is_some(), "auth transition");
        for listener in listeners {
            listener(user.clone());
        }
    }
}

impl AuthService for InMemoryAuthService {
    fn current_user(&self) -> Option<UserId> {
        self.state.lock().current.clone()
    }

    fn add_state_listener(&self, listener: AuthStateListener) -> Result<ListenerHandle> {
        let mut state = self.state.lock();
        if let Some(message) = &state.listen_failure {
            return Err(Error::Auth(message.clone()));
        }

        state.next_id += 1;
        let handle = ListenerHandle::new(state.next_id);
        state.listeners.push((handle, Arc::new(listener)));
        Ok(handle)
    }

    fn remove_state_listener(&self, handle: ListenerHandle) {
        self.state.lock().listeners.retain(|(h, _)| *h != handle);
    }
}
