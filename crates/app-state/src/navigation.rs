//! Top-level navigation state machine
//!
//! [`AppNavigationStateMachine`] combines three asynchronous event sources
//! (the splash timer, session status changes, and profile fetch completions)
//! into one authoritative [`Screen`]. All state lives on a single event-loop
//! task; the sources only enqueue messages, so they are serialised without
//! locks around the state itself.
//!
//! The transition rules are implemented by [`NavigationState`], which is
//! plain synchronous data and can be driven directly.

use backend_client::UserId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::listeners::{ListenerId, ListenerRegistry};
use crate::observability::{self, ObservabilitySink, OperationalEvent};
use crate::profile::{ProfileResolver, ResolveError, Role, UserProfile};
use crate::session::{AuthSessionObserver, AuthSubscription, SessionStatus};

/// Default splash duration (1.8 seconds)
pub const DEFAULT_SPLASH_DURATION_MS: u64 = 1_800;

/// Default bound on a single profile fetch (10 seconds)
pub const DEFAULT_PROFILE_TIMEOUT_MS: u64 = 10_000;

// =============================================================================
// Configuration
// =============================================================================

/// Navigation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NavigationConfig {
    /// How long the splash screen is shown, in milliseconds
    pub splash_duration_ms: u64,
    /// Upper bound on a profile fetch in milliseconds (None to wait forever)
    pub profile_timeout_ms: Option<u64>,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            splash_duration_ms: DEFAULT_SPLASH_DURATION_MS,
            profile_timeout_ms: Some(DEFAULT_PROFILE_TIMEOUT_MS),
        }
    }
}

impl NavigationConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the splash duration
    pub fn with_splash_duration(mut self, duration: Duration) -> Self {
        self.splash_duration_ms = duration.as_millis() as u64;
        self
    }

    /// Set or clear the profile fetch timeout
    pub fn with_profile_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.profile_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// Splash duration
    pub fn splash_duration(&self) -> Duration {
        Duration::from_millis(self.splash_duration_ms)
    }

    /// Profile fetch timeout
    pub fn profile_timeout(&self) -> Option<Duration> {
        self.profile_timeout_ms.map(Duration::from_millis)
    }
}

// =============================================================================
// Output Types
// =============================================================================

/// Top-level screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Screen {
    /// Boot screen shown before any auth or role decision
    Splash,
    /// Sign-in / sign-up flow
    Auth,
    /// School administrator dashboard
    AdminDashboard,
    /// Teacher and substitute app
    MainApp,
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Screen::Splash => "splash",
            Screen::Auth => "auth",
            Screen::AdminDashboard => "admin-dashboard",
            Screen::MainApp => "main-app",
        };
        f.write_str(name)
    }
}

/// Profile fields passed through to the screens that need them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenContext {
    /// Signed-in user
    pub user_id: Option<UserId>,
    /// Resolved role
    pub role: Option<Role>,
    /// Active school of the user
    pub school_id: Option<String>,
}

impl ScreenContext {
    fn for_profile(user_id: &UserId, profile: &UserProfile) -> Self {
        Self {
            user_id: Some(user_id.clone()),
            role: Some(profile.role),
            school_id: profile.active_school_id.clone(),
        }
    }
}

/// Observable output of the state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenUpdate {
    /// Screen to render
    pub screen: Screen,
    /// Ancillary profile fields
    pub context: ScreenContext,
}

impl ScreenUpdate {
    /// Splash with an empty context
    pub fn splash() -> Self {
        Self { screen: Screen::Splash, context: ScreenContext::default() }
    }

    /// Auth with an empty context
    pub fn auth() -> Self {
        Self { screen: Screen::Auth, context: ScreenContext::default() }
    }
}

// =============================================================================
// State
// =============================================================================

/// Identity of one issued profile fetch
///
/// Only the result of the most recently issued fetch is ever applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTag {
    seq: u64,
    user_id: UserId,
}

impl FetchTag {
    /// Issue order of the fetch
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// User the fetch was issued for
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }
}

/// How a profile outcome was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOutcome {
    /// The profile was applied
    Applied,
    /// The fetch failed and the lowest-privilege profile was applied
    FailedOpen,
    /// The outcome belonged to a superseded fetch and was dropped
    Stale,
}

/// Navigation state and transition rules
#[derive(Debug, Clone)]
pub struct NavigationState {
    output: ScreenUpdate,
    splash_elapsed: bool,
    session: SessionStatus,
    profile: Option<UserProfile>,
    profile_fetch_in_flight: bool,
    pending_fetch: Option<FetchTag>,
    /// Last role-derived output and the user it was derived for
    last_resolved: Option<(UserId, ScreenUpdate)>,
    next_seq: u64,
}

impl Default for NavigationState {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationState {
    /// Initial state: splash showing, session unknown
    pub fn new() -> Self {
        Self {
            output: ScreenUpdate::splash(),
            splash_elapsed: false,
            session: SessionStatus::Unknown,
            profile: None,
            profile_fetch_in_flight: false,
            pending_fetch: None,
            last_resolved: None,
            next_seq: 0,
        }
    }

    /// Current screen
    pub fn screen(&self) -> Screen {
        self.output.screen
    }

    /// Current screen and context
    pub fn output(&self) -> &ScreenUpdate {
        &self.output
    }

    /// Whether the splash timer has fired
    pub fn splash_elapsed(&self) -> bool {
        self.splash_elapsed
    }

    /// Last observed session status
    pub fn session(&self) -> &SessionStatus {
        &self.session
    }

    /// Profile of the signed-in user, once resolved
    pub fn profile(&self) -> Option<&UserProfile> {
        self.profile.as_ref()
    }

    /// Whether a profile fetch is outstanding
    pub fn profile_fetch_in_flight(&self) -> bool {
        self.profile_fetch_in_flight
    }

    /// The fetch whose result will be applied, if any
    pub fn pending_fetch(&self) -> Option<&FetchTag> {
        self.pending_fetch.as_ref()
    }

    /// Record that the splash timer fired
    pub fn on_splash_elapsed(&mut self) {
        self.splash_elapsed = true;
        self.recompute();
    }

    /// Apply a session status change
    ///
    /// Returns the profile fetch to issue when a user signed in.
    pub fn on_session(&mut self, status: SessionStatus) -> Option<FetchTag> {
        let fetch = match &status {
            SessionStatus::SignedIn(uid) => {
                self.next_seq += 1;
                Some(FetchTag { seq: self.next_seq, user_id: uid.clone() })
            }
            SessionStatus::SignedOut | SessionStatus::Unknown => None,
        };

        self.session = status;
        self.profile = None;
        self.profile_fetch_in_flight = fetch.is_some();
        self.pending_fetch = fetch.clone();
        self.recompute();
        fetch
    }

    /// Apply a resolved profile
    pub fn on_profile_resolved(&mut self, tag: &FetchTag, profile: UserProfile) -> ProfileOutcome {
        if !self.is_pending(tag) {
            return ProfileOutcome::Stale;
        }
        self.finish_fetch(profile);
        ProfileOutcome::Applied
    }

    /// Apply a failed fetch by failing open to the lowest privilege
    pub fn on_profile_failed(&mut self, tag: &FetchTag) -> ProfileOutcome {
        if !self.is_pending(tag) {
            return ProfileOutcome::Stale;
        }
        self.finish_fetch(UserProfile::unspecified());
        ProfileOutcome::FailedOpen
    }

    /// Record that the current output has been shown to observers
    ///
    /// Once `Auth` has been shown the session really ended, so a later
    /// sign-in must not bring back the role screen from before it.
    pub fn mark_published(&mut self) {
        if self.output.screen == Screen::Auth {
            self.last_resolved = None;
        }
    }

    /// Whether `tag` identifies the fetch currently awaited
    pub fn is_pending(&self, tag: &FetchTag) -> bool {
        self.pending_fetch.as_ref() == Some(tag)
    }

    fn finish_fetch(&mut self, profile: UserProfile) {
        self.profile = Some(profile);
        self.profile_fetch_in_flight = false;
        self.pending_fetch = None;
        self.recompute();
    }

    fn recompute(&mut self) {
        let next = self.derive();
        if let (SessionStatus::SignedIn(uid), false) = (&self.session, self.profile_fetch_in_flight) {
            if self.splash_elapsed {
                self.last_resolved = Some((uid.clone(), next.clone()));
            }
        }
        self.output = next;
    }

    fn derive(&self) -> ScreenUpdate {
        if !self.splash_elapsed {
            return ScreenUpdate::splash();
        }

        let uid = match &self.session {
            SessionStatus::SignedIn(uid) => uid,
            SessionStatus::Unknown | SessionStatus::SignedOut => return ScreenUpdate::auth(),
        };

        if self.profile_fetch_in_flight {
            // Same user back before Auth was ever shown: hold their screen
            if let Some((resolved_for, update)) = &self.last_resolved {
                if resolved_for == uid {
                    return update.clone();
                }
            }
            // A different user: fall back to Splash rather than keep the
            // previous user's role screen, which would expose their role
            return match self.output.screen {
                Screen::Auth => ScreenUpdate::auth(),
                _ => ScreenUpdate::splash(),
            };
        }

        let profile = self.profile.clone().unwrap_or_default();
        let screen = match profile.role {
            Role::School => Screen::AdminDashboard,
            Role::Teacher | Role::Sub | Role::Unspecified => Screen::MainApp,
        };
        ScreenUpdate { screen, context: ScreenContext::for_profile(uid, &profile) }
    }
}

// =============================================================================
// Event Loop
// =============================================================================

enum NavigationEvent {
    SplashElapsed,
    Session(SessionStatus),
    ProfileFetched {
        tag: FetchTag,
        outcome: Result<UserProfile, ResolveError>,
    },
}

struct EventLoop {
    state: NavigationState,
    resolver: ProfileResolver,
    sink: Arc<dyn ObservabilitySink>,
    registry: Arc<ListenerRegistry<ScreenUpdate>>,
    watch_tx: watch::Sender<ScreenUpdate>,
    events_tx: mpsc::UnboundedSender<NavigationEvent>,
    profile_timeout: Option<Duration>,
}

impl EventLoop {
    async fn run(
        mut self,
        mut events_rx: mpsc::UnboundedReceiver<NavigationEvent>,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                event = events_rx.recv() => match event {
                    Some(event) => {
                        self.handle(event);
                        // Apply everything already queued before publishing, so a
                        // burst such as signed-out then signed-in lands as one change
                        while let Ok(event) = events_rx.try_recv() {
                            self.handle(event);
                        }
                        self.publish();
                    }
                    None => break,
                },
            }
        }
        tracing::debug!("navigation loop stopped");
    }

    fn handle(&mut self, event: NavigationEvent) {
        match event {
            NavigationEvent::SplashElapsed => {
                tracing::debug!("splash elapsed");
                self.state.on_splash_elapsed();
            }
            NavigationEvent::Session(status) => {
                tracing::info!(%status, "session changed");
                if let Some(tag) = self.state.on_session(status) {
                    self.spawn_fetch(tag);
                }
            }
            NavigationEvent::ProfileFetched { tag, outcome } => self.apply_profile(tag, outcome),
        }
    }

    fn apply_profile(&mut self, tag: FetchTag, outcome: Result<UserProfile, ResolveError>) {
        let result = match outcome {
            Ok(profile) => self.state.on_profile_resolved(&tag, profile),
            Err(error) => {
                if self.state.is_pending(&tag) {
                    tracing::warn!(user = %tag.user_id, %error, "profile fetch failed; using lowest privilege");
                    observability::report(
                        &self.sink,
                        OperationalEvent::ProfileResolveFailed { user_id: &tag.user_id, error: &error },
                    );
                }
                self.state.on_profile_failed(&tag)
            }
        };

        if result == ProfileOutcome::Stale {
            tracing::debug!(user = %tag.user_id, seq = tag.seq, "discarding stale profile result");
        }
    }

    fn spawn_fetch(&self, tag: FetchTag) {
        let resolver = self.resolver.clone();
        let events_tx = self.events_tx.clone();
        let limit = self.profile_timeout;

        tokio::spawn(async move {
            let outcome = match limit {
                Some(limit) => tokio::time::timeout(limit, resolver.resolve(&tag.user_id))
                    .await
                    .unwrap_or(Err(ResolveError::Timeout(limit))),
                None => resolver.resolve(&tag.user_id).await,
            };
            // The loop may already be gone; the result is then irrelevant
            let _ = events_tx.send(NavigationEvent::ProfileFetched { tag, outcome });
        });
    }

    fn publish(&mut self) {
        let update = self.state.output().clone();
        if self.registry.publish_if_changed(update.clone()) {
            tracing::debug!(screen = %update.screen, "screen changed");
            self.watch_tx.send_replace(update);
        }
        self.state.mark_published();
    }
}

// =============================================================================
// State Machine
// =============================================================================

#[derive(Default)]
struct Control {
    auth_subscription: Option<AuthSubscription>,
    splash_timer: Option<JoinHandle<()>>,
    stop_tx: Option<oneshot::Sender<()>>,
}

/// Authoritative source of the top-level screen
///
/// Dropping the machine shuts it down.
///
/// # Example
///
/// ```no_run
/// use app_state::navigation::{AppNavigationStateMachine, NavigationConfig, Screen};
/// use app_state::observability::TracingSink;
/// use app_state::profile::ProfileResolver;
/// use app_state::session::AuthSessionObserver;
/// use backend_client::{InMemoryAuthService, InMemoryDocumentStore};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() {
///     let observer = AuthSessionObserver::new(Arc::new(InMemoryAuthService::new()));
///     let resolver = ProfileResolver::new(Arc::new(InMemoryDocumentStore::new()));
///
///     let machine = AppNavigationStateMachine::start(
///         NavigationConfig::default(),
///         &observer,
///         resolver,
///         Arc::new(TracingSink),
///     );
///
///     let _subscription = machine.observe(|screen, context| {
///         println!("render {screen} for {:?}", context.user_id);
///     });
///
///     let mut rx = machine.subscribe();
///     rx.wait_for(|update| update.screen == Screen::Auth).await.unwrap();
///     machine.shutdown();
/// }
/// ```
pub struct AppNavigationStateMachine {
    registry: Arc<ListenerRegistry<ScreenUpdate>>,
    watch_rx: watch::Receiver<ScreenUpdate>,
    control: Mutex<Control>,
    shut_down: AtomicBool,
}

impl AppNavigationStateMachine {
    /// Start the state machine
    ///
    /// Subscribes to `observer`, schedules the splash timer and spawns the
    /// event loop. Must be called from within a Tokio runtime. Never fails:
    /// if the auth subscription cannot be established the failure is
    /// reported to `sink` and the machine stays on [`Screen::Splash`].
    pub fn start(
        config: NavigationConfig,
        observer: &AuthSessionObserver,
        resolver: ProfileResolver,
        sink: Arc<dyn ObservabilitySink>,
    ) -> Self {
        let registry = Arc::new(ListenerRegistry::new(ScreenUpdate::splash()));
        let (watch_tx, watch_rx) = watch::channel(ScreenUpdate::splash());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        let forward = events_tx.clone();
        let auth_subscription = match observer.subscribe(move |status: &SessionStatus| {
            let _ = forward.send(NavigationEvent::Session(status.clone()));
        }) {
            Ok(subscription) => Some(subscription),
            Err(error) => {
                tracing::error!(%error, "auth subscription failed; navigation halted on splash");
                observability::report(&sink, OperationalEvent::AuthSubscriptionFailed(&error));
                None
            }
        };

        // Without auth there is nothing to leave the splash for
        let splash_timer = auth_subscription.as_ref().map(|_| {
            let events_tx = events_tx.clone();
            let delay = config.splash_duration();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events_tx.send(NavigationEvent::SplashElapsed);
            })
        });

        let event_loop = EventLoop {
            state: NavigationState::new(),
            resolver,
            sink,
            registry: Arc::clone(&registry),
            watch_tx,
            events_tx,
            profile_timeout: config.profile_timeout(),
        };
        tokio::spawn(event_loop.run(events_rx, stop_rx));

        tracing::info!(
            splash_ms = config.splash_duration_ms,
            profile_timeout_ms = ?config.profile_timeout_ms,
            "navigation started"
        );

        Self {
            registry,
            watch_rx,
            control: Mutex::new(Control {
                auth_subscription,
                splash_timer,
                stop_tx: Some(stop_tx),
            }),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Current screen and context
    pub fn current(&self) -> ScreenUpdate {
        self.registry.current()
    }

    /// Current screen
    pub fn current_screen(&self) -> Screen {
        self.current().screen
    }

    /// Observe screen changes
    ///
    /// `on_screen_change` is called with the current screen before this
    /// returns, then on every change. Returns `None` after shutdown.
    pub fn observe<F>(&self, on_screen_change: F) -> Option<ScreenSubscription>
    where
        F: Fn(Screen, &ScreenContext) + Send + Sync + 'static,
    {
        let id = self
            .registry
            .register(Arc::new(move |update: &ScreenUpdate| {
                on_screen_change(update.screen, &update.context)
            }))?;

        Some(ScreenSubscription { registry: Arc::clone(&self.registry), id: Some(id) })
    }

    /// Watch channel of screen updates for async consumers
    pub fn subscribe(&self) -> watch::Receiver<ScreenUpdate> {
        self.watch_rx.clone()
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stop the machine
    ///
    /// Unsubscribes from the session observer, cancels a pending splash
    /// timer, and stops observer delivery: no observer callback runs after
    /// the first call returns. Idempotent. In-flight profile fetches finish
    /// on their own and their results are dropped.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let (subscription, timer, stop_tx) = {
            let mut control = self.control.lock();
            (
                control.auth_subscription.take(),
                control.splash_timer.take(),
                control.stop_tx.take(),
            )
        };

        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        if let Some(timer) = timer {
            timer.abort();
        }
        self.registry.close();
        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(());
        }

        tracing::info!("navigation shut down");
    }
}

impl Drop for AppNavigationStateMachine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for AppNavigationStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppNavigationStateMachine")
            .field("current", &self.current())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Handle for a screen observer
///
/// Dropping the handle unsubscribes.
pub struct ScreenSubscription {
    registry: Arc<ListenerRegistry<ScreenUpdate>>,
    id: Option<ListenerId>,
}

impl ScreenSubscription {
    /// Stop delivery to this observer
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            self.registry.remove(id);
        }
    }
}

impl Drop for ScreenSubscription {
    fn drop(&mut self) {
        self.release();
    }
}
