//! End-to-end navigation tests
//!
//! Drives the state machine through the in-memory auth service and a gated
//! document store, with Tokio's clock paused so splash and timeout timing is
//! exact.

use app_state::{
    AppNavigationStateMachine, AuthSessionObserver, NavigationConfig, ObservabilitySink,
    OperationalEvent, ProfileResolver, ResolveError, Role, Screen, ScreenSubscription,
    ScreenUpdate,
};
use backend_client::test_utils::{profiles, users, GatedDocumentStore};
use backend_client::{InMemoryAuthService, UserId};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

const SPLASH: Duration = Duration::from_millis(1_800);

#[derive(Debug, Clone, PartialEq)]
enum Reported {
    AuthSubscription,
    Profile { user: UserId, timed_out: bool },
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<Reported>>);

impl RecordingSink {
    fn events(&self) -> Vec<Reported> {
        self.0.lock().unwrap().clone()
    }
}

impl ObservabilitySink for RecordingSink {
    fn report(&self, event: &OperationalEvent<'_>) {
        let reported = match event {
            OperationalEvent::AuthSubscriptionFailed(_) => Reported::AuthSubscription,
            OperationalEvent::ProfileResolveFailed { user_id, error } => Reported::Profile {
                user: (*user_id).clone(),
                timed_out: matches!(error, ResolveError::Timeout(_)),
            },
        };
        self.0.lock().unwrap().push(reported);
    }
}

struct Harness {
    auth: Arc<InMemoryAuthService>,
    store: Arc<GatedDocumentStore>,
    sink: Arc<RecordingSink>,
    observer: AuthSessionObserver,
    machine: AppNavigationStateMachine,
    screens: Arc<Mutex<Vec<Screen>>>,
    _observed: Option<ScreenSubscription>,
}

impl Harness {
    fn start(auth: InMemoryAuthService, store: GatedDocumentStore, config: NavigationConfig) -> Self {
        let auth = Arc::new(auth);
        let store = Arc::new(store);
        let sink = Arc::new(RecordingSink::default());
        let observer = AuthSessionObserver::new(auth.clone());

        let machine = AppNavigationStateMachine::start(
            config,
            &observer,
            ProfileResolver::new(store.clone()),
            sink.clone(),
        );

        let screens = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&screens);
        let observed = machine.observe(move |screen, _| record.lock().unwrap().push(screen));

        Self { auth, store, sink, observer, machine, screens, _observed: observed }
    }

    fn screens(&self) -> Vec<Screen> {
        self.screens.lock().unwrap().clone()
    }

    async fn wait_for(&self, screen: Screen) -> ScreenUpdate {
        let mut rx = self.machine.subscribe();
        let update = rx.wait_for(|u| u.screen == screen).await.unwrap();
        update.clone()
    }
}

fn with_profile(user: &UserId, profile: backend_client::Document) -> GatedDocumentStore {
    let store = GatedDocumentStore::new();
    store.insert_profile(user, profile);
    store
}

fn no_timeout() -> NavigationConfig {
    NavigationConfig::default().with_profile_timeout(None)
}

#[tokio::test(start_paused = true)]
async fn test_splash_held_until_timer_fires() {
    let started = Instant::now();
    let harness = Harness::start(
        InMemoryAuthService::signed_in(users::principal()),
        with_profile(&users::principal(), profiles::school("lincoln")),
        NavigationConfig::default(),
    );

    tokio::time::sleep(SPLASH - Duration::from_millis(1)).await;
    // The profile is already in hand, the splash still shows
    assert_eq!(harness.store.read_count(users::principal().as_str()), 1);
    assert_eq!(harness.machine.current_screen(), Screen::Splash);

    let update = harness.wait_for(Screen::AdminDashboard).await;
    assert!(started.elapsed() >= SPLASH);
    assert_eq!(update.context.school_id.as_deref(), Some("lincoln"));
    assert_eq!(harness.screens(), vec![Screen::Splash, Screen::AdminDashboard]);
}

#[tokio::test(start_paused = true)]
async fn test_auth_churn_before_timer_keeps_splash() {
    let store = with_profile(&users::teacher(), profiles::teacher("lincoln"));
    store.insert_profile(&users::principal(), profiles::school("lincoln"));
    let harness = Harness::start(InMemoryAuthService::new(), store, NavigationConfig::default());

    harness.auth.sign_in(users::principal());
    tokio::time::sleep(Duration::from_millis(300)).await;
    harness.auth.sign_out();
    tokio::time::sleep(Duration::from_millis(300)).await;
    harness.auth.sign_in(users::teacher());
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(harness.screens(), vec![Screen::Splash]);

    let update = harness.wait_for(Screen::MainApp).await;
    assert_eq!(update.context.user_id, Some(users::teacher()));
    assert_eq!(harness.screens(), vec![Screen::Splash, Screen::MainApp]);
}

#[tokio::test(start_paused = true)]
async fn test_role_mapping() {
    let cases = [
        (Some(profiles::school("s")), Screen::AdminDashboard, Role::School),
        (Some(profiles::teacher("s")), Screen::MainApp, Role::Teacher),
        (Some(profiles::substitute("s")), Screen::MainApp, Role::Sub),
        (Some(profiles::with_role("janitor", "s")), Screen::MainApp, Role::Unspecified),
        (None, Screen::MainApp, Role::Unspecified),
    ];

    for (profile, expected, role) in cases {
        let store = GatedDocumentStore::new();
        if let Some(profile) = profile {
            store.insert_profile(&users::teacher(), profile);
        }
        let harness = Harness::start(
            InMemoryAuthService::signed_in(users::teacher()),
            store,
            NavigationConfig::default(),
        );

        let update = harness.wait_for(expected).await;
        assert_eq!(update.context.role, Some(role));
        harness.machine.shutdown();
    }

    let harness = Harness::start(InMemoryAuthService::new(), GatedDocumentStore::new(), NavigationConfig::default());
    let update = harness.wait_for(Screen::Auth).await;
    assert_eq!(update, ScreenUpdate::auth());
}

#[tokio::test(start_paused = true)]
async fn test_backend_failure_fails_open() {
    let store = with_profile(&users::principal(), profiles::school("lincoln"));
    store.inner().set_outage(Some("firestore unavailable"));

    let harness = Harness::start(
        InMemoryAuthService::signed_in(users::principal()),
        store,
        NavigationConfig::default(),
    );

    let update = harness.wait_for(Screen::MainApp).await;
    assert_eq!(update.context.role, Some(Role::Unspecified));
    assert_eq!(update.context.user_id, Some(users::principal()));
    assert_eq!(
        harness.sink.events(),
        vec![Reported::Profile { user: users::principal(), timed_out: false }]
    );

    // No retry
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.store.read_count(users::principal().as_str()), 1);
    assert_eq!(harness.machine.current_screen(), Screen::MainApp);
}

#[tokio::test(start_paused = true)]
async fn test_slow_profile_times_out_to_main_app() {
    let started = Instant::now();
    let store = with_profile(&users::principal(), profiles::school("lincoln"));
    store.gate(users::principal().as_str());

    let config = NavigationConfig::default().with_profile_timeout(Some(Duration::from_secs(3)));
    let harness = Harness::start(InMemoryAuthService::signed_in(users::principal()), store, config);

    let update = harness.wait_for(Screen::MainApp).await;
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(update.context.role, Some(Role::Unspecified));
    assert_eq!(
        harness.sink.events(),
        vec![Reported::Profile { user: users::principal(), timed_out: true }]
    );
    // Splash, then nothing until the fetch gave up
    assert_eq!(harness.screens(), vec![Screen::Splash, Screen::MainApp]);
}

#[tokio::test(start_paused = true)]
async fn test_stale_profile_result_rejected() {
    let store = with_profile(&users::principal(), profiles::school("lincoln"));
    store.insert_profile(&users::teacher(), profiles::teacher("lincoln"));
    store.gate(users::principal().as_str());
    store.gate(users::teacher().as_str());

    let harness = Harness::start(InMemoryAuthService::new(), store, no_timeout());
    harness.wait_for(Screen::Auth).await;

    harness.auth.sign_in(users::principal());
    tokio::time::sleep(Duration::from_millis(10)).await;
    harness.auth.sign_in(users::teacher());
    tokio::time::sleep(Duration::from_millis(10)).await;

    // A's admin profile lands first and must be dropped
    harness.store.release(users::principal().as_str());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.machine.current_screen(), Screen::Auth);

    harness.store.release(users::teacher().as_str());
    let update = harness.wait_for(Screen::MainApp).await;
    assert_eq!(update.context.user_id, Some(users::teacher()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.machine.current_screen(), Screen::MainApp);
    assert!(!harness.screens().contains(&Screen::AdminDashboard));
    assert!(harness.sink.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_does_not_flash_auth() {
    let harness = Harness::start(
        InMemoryAuthService::signed_in(users::teacher()),
        with_profile(&users::teacher(), profiles::teacher("lincoln")),
        no_timeout(),
    );
    harness.wait_for(Screen::MainApp).await;

    harness.store.gate(users::teacher().as_str());
    harness.auth.sign_out();
    harness.auth.sign_in(users::teacher());

    // The re-fetch stays pending for the whole window
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.store.read_count(users::teacher().as_str()), 2);
    assert_eq!(harness.machine.current_screen(), Screen::MainApp);

    harness.store.release(users::teacher().as_str());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.machine.current_screen(), Screen::MainApp);
    assert_eq!(harness.screens(), vec![Screen::Splash, Screen::MainApp]);
}

#[tokio::test(start_paused = true)]
async fn test_shown_sign_out_then_same_user_waits_on_auth() {
    let harness = Harness::start(
        InMemoryAuthService::signed_in(users::teacher()),
        with_profile(&users::teacher(), profiles::teacher("lincoln")),
        no_timeout(),
    );
    harness.wait_for(Screen::MainApp).await;

    harness.auth.sign_out();
    harness.wait_for(Screen::Auth).await;

    harness.store.gate(users::teacher().as_str());
    harness.auth.sign_in(users::teacher());
    tokio::time::sleep(Duration::from_secs(5)).await;

    // Pending after a visible sign-out: Auth stays, no jump back
    assert_eq!(harness.store.read_count(users::teacher().as_str()), 2);
    assert_eq!(harness.machine.current(), ScreenUpdate::auth());

    harness.store.release(users::teacher().as_str());
    let update = harness.wait_for(Screen::MainApp).await;
    assert_eq!(update.context.school_id.as_deref(), Some("lincoln"));
    assert_eq!(
        harness.screens(),
        vec![Screen::Splash, Screen::MainApp, Screen::Auth, Screen::MainApp]
    );
}

#[tokio::test(start_paused = true)]
async fn test_role_change_while_signed_out_is_not_exposed() {
    let harness = Harness::start(
        InMemoryAuthService::signed_in(users::principal()),
        with_profile(&users::principal(), profiles::school("lincoln")),
        no_timeout(),
    );
    harness.wait_for(Screen::AdminDashboard).await;

    harness.auth.sign_out();
    tokio::time::sleep(Duration::from_secs(3_600)).await;
    assert_eq!(harness.machine.current_screen(), Screen::Auth);

    // Demoted while away
    harness.store.insert_profile(&users::principal(), profiles::teacher("roosevelt"));
    harness.store.gate(users::principal().as_str());
    harness.auth.sign_in(users::principal());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.machine.current(), ScreenUpdate::auth());

    harness.store.release(users::principal().as_str());
    let update = harness.wait_for(Screen::MainApp).await;
    assert_eq!(update.context.role, Some(Role::Teacher));
    assert_eq!(update.context.school_id.as_deref(), Some("roosevelt"));
    assert_eq!(
        harness.screens(),
        vec![Screen::Splash, Screen::AdminDashboard, Screen::Auth, Screen::MainApp]
    );
}

#[tokio::test(start_paused = true)]
async fn test_switching_user_hides_previous_role_screen() {
    let store = with_profile(&users::principal(), profiles::school("lincoln"));
    store.insert_profile(&users::teacher(), profiles::teacher("lincoln"));
    let harness = Harness::start(
        InMemoryAuthService::signed_in(users::principal()),
        store,
        no_timeout(),
    );
    harness.wait_for(Screen::AdminDashboard).await;

    harness.store.gate(users::teacher().as_str());
    harness.auth.sign_in(users::teacher());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.machine.current_screen(), Screen::Splash);

    harness.store.release(users::teacher().as_str());
    harness.wait_for(Screen::MainApp).await;
    assert_eq!(
        harness.screens(),
        vec![Screen::Splash, Screen::AdminDashboard, Screen::Splash, Screen::MainApp]
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_idempotent_and_final() {
    let harness = Harness::start(
        InMemoryAuthService::signed_in(users::teacher()),
        with_profile(&users::teacher(), profiles::teacher("lincoln")),
        NavigationConfig::default(),
    );
    harness.wait_for(Screen::MainApp).await;

    harness.machine.shutdown();
    assert!(harness.machine.is_shut_down());
    let delivered = harness.screens().len();
    harness.machine.shutdown();

    harness.auth.sign_out();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(harness.screens().len(), delivered);
    assert_eq!(harness.auth.listener_count(), 0);
    assert_eq!(harness.observer.subscriber_count(), 0);
    assert!(harness.machine.observe(|_, _| {}).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_watch_unchanged_after_shutdown() {
    let harness = Harness::start(
        InMemoryAuthService::signed_in(users::teacher()),
        with_profile(&users::teacher(), profiles::teacher("lincoln")),
        NavigationConfig::default(),
    );
    harness.wait_for(Screen::MainApp).await;

    let mut rx = harness.machine.subscribe();
    rx.borrow_and_update();
    harness.machine.shutdown();

    harness.auth.sign_out();
    harness.auth.sign_in(users::principal());
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(!rx.has_changed().unwrap_or(false));
    assert_eq!(*rx.borrow(), harness.machine.current());
    assert_eq!(harness.machine.current_screen(), Screen::MainApp);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_splash() {
    let harness = Harness::start(
        InMemoryAuthService::new(),
        GatedDocumentStore::new(),
        NavigationConfig::default(),
    );

    tokio::time::sleep(Duration::from_millis(500)).await;
    harness.machine.shutdown();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(harness.machine.current_screen(), Screen::Splash);
    assert_eq!(harness.screens(), vec![Screen::Splash]);
}

#[tokio::test(start_paused = true)]
async fn test_auth_subscription_failure_halts_on_splash() {
    let auth = InMemoryAuthService::new();
    auth.fail_listeners_with(Some("permission denied"));

    let harness = Harness::start(auth, GatedDocumentStore::new(), NavigationConfig::default());
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(harness.machine.current_screen(), Screen::Splash);
    assert_eq!(harness.screens(), vec![Screen::Splash]);
    assert_eq!(harness.sink.events(), vec![Reported::AuthSubscription]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_from_observer_callback() {
    let auth = Arc::new(InMemoryAuthService::signed_in(users::teacher()));
    let store = Arc::new(with_profile(&users::teacher(), profiles::teacher("lincoln")));
    let observer = AuthSessionObserver::new(auth.clone());

    let machine = Arc::new(AppNavigationStateMachine::start(
        NavigationConfig::default(),
        &observer,
        ProfileResolver::new(store),
        Arc::new(RecordingSink::default()),
    ));

    let calls = Arc::new(Mutex::new(Vec::new()));
    let (handle, record) = (Arc::downgrade(&machine), Arc::clone(&calls));
    let _subscription = machine.observe(move |screen, _| {
        record.lock().unwrap().push(screen);
        if screen == Screen::MainApp {
            if let Some(machine) = handle.upgrade() {
                machine.shutdown();
                // Current value is still readable from inside the callback
                assert_eq!(machine.current_screen(), Screen::MainApp);
            }
        }
    });

    let mut rx = machine.subscribe();
    rx.wait_for(|u| u.screen == Screen::MainApp).await.unwrap();

    assert!(machine.is_shut_down());
    assert_eq!(auth.listener_count(), 0);

    auth.sign_out();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(*calls.lock().unwrap(), vec![Screen::Splash, Screen::MainApp]);
}

#[tokio::test(start_paused = true)]
async fn test_drop_releases_auth_listener() {
    let harness = Harness::start(
        InMemoryAuthService::new(),
        GatedDocumentStore::new(),
        NavigationConfig::default(),
    );
    assert_eq!(harness.auth.listener_count(), 1);

    let Harness { auth, machine, observer, .. } = harness;
    drop(machine);

    assert_eq!(observer.subscriber_count(), 0);
    assert_eq!(auth.listener_count(), 0);
}
