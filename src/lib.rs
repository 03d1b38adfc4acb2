//! EZTeach client core
//!
//! Wires the session observer, profile resolver and navigation state machine
//! together from configuration and injected collaborators. The presentation
//! layer observes [`App::navigation`] and renders whatever screen it reports.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod telemetry;

use anyhow::{Context, Result};
use app_state::{
    AppNavigationStateMachine, AuthSessionObserver, ObservabilitySink, ProfileResolver,
    TracingSink,
};
use backend_client::{AuthService, DocumentStore, FirestoreClient};
use std::sync::Arc;

pub use config::AppConfig;

/// External collaborators the core depends on
#[derive(Clone)]
pub struct Collaborators {
    /// Authentication service
    pub auth: Arc<dyn AuthService>,
    /// Document store holding user profiles
    pub store: Arc<dyn DocumentStore>,
    /// Receiver of operational events
    pub sink: Arc<dyn ObservabilitySink>,
}

impl Collaborators {
    /// Collaborators reporting through `tracing`
    pub fn new(auth: Arc<dyn AuthService>, store: Arc<dyn DocumentStore>) -> Self {
        Self { auth, store, sink: Arc::new(TracingSink) }
    }

    /// Replace the observability sink
    pub fn with_sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sink = sink;
        self
    }
}

/// Running core
pub struct App {
    observer: AuthSessionObserver,
    navigation: AppNavigationStateMachine,
}

impl App {
    /// Session observer, for components that need auth status directly
    pub fn observer(&self) -> &AuthSessionObserver {
        &self.observer
    }

    /// Navigation state machine
    pub fn navigation(&self) -> &AppNavigationStateMachine {
        &self.navigation
    }

    /// Stop navigation and release the auth listener
    pub fn shutdown(&self) {
        self.navigation.shutdown();
        self.observer.close();
    }
}

/// Start the core
///
/// Must be called from within a Tokio runtime.
pub fn launch(config: &AppConfig, collaborators: Collaborators) -> App {
    let observer = AuthSessionObserver::new(collaborators.auth);
    let resolver =
        ProfileResolver::new(collaborators.store).with_collection(&config.profile_collection);

    let navigation = AppNavigationStateMachine::start(
        config.navigation.clone(),
        &observer,
        resolver,
        collaborators.sink,
    );

    tracing::info!(collection = %config.profile_collection, "ezteach core launched");
    App { observer, navigation }
}

/// Firestore-backed profile store from `config`
///
/// # Errors
///
/// Returns an error if no Firestore section is configured or the client
/// cannot be built.
pub fn firestore_store(config: &AppConfig) -> Result<Arc<dyn DocumentStore>> {
    let firestore = config
        .firestore
        .clone()
        .context("no firestore section in config")?;
    let client = FirestoreClient::new(firestore).context("failed to build firestore client")?;
    Ok(Arc::new(client))
}

#[cfg(test)]
mod tests {
    use super::*;
    use app_state::Screen;
    use backend_client::test_utils::{profiles, users, PROFILE_COLLECTION};
    use backend_client::{FirestoreConfig, InMemoryAuthService, InMemoryDocumentStore};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_launch_reads_configured_collection() {
        let auth = Arc::new(InMemoryAuthService::signed_in(users::principal()));
        let store = Arc::new(InMemoryDocumentStore::new());
        store.insert("staff", users::principal().as_str(), profiles::school("lincoln"));
        store.insert(PROFILE_COLLECTION, users::principal().as_str(), profiles::teacher("x"));

        let config = AppConfig { profile_collection: "staff".into(), ..AppConfig::default() };
        let app = launch(&config, Collaborators::new(auth, store));

        let mut rx = app.navigation().subscribe();
        let update = rx
            .wait_for(|u| u.screen != Screen::Splash)
            .await
            .unwrap()
            .clone();
        assert_eq!(update.screen, Screen::AdminDashboard);

        app.shutdown();
        assert!(app.navigation().is_shut_down());
        assert!(!app.observer().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_splash_duration_from_config() {
        let auth = Arc::new(InMemoryAuthService::new());
        let store = Arc::new(InMemoryDocumentStore::new());
        let mut config = AppConfig::default();
        config.navigation.splash_duration_ms = 500;

        let started = tokio::time::Instant::now();
        let app = launch(&config, Collaborators::new(auth, store));

        let mut rx = app.navigation().subscribe();
        rx.wait_for(|u| u.screen == Screen::Auth).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(started.elapsed() < Duration::from_millis(1_800));
    }

    #[test]
    fn test_firestore_store_requires_section() {
        assert!(firestore_store(&AppConfig::default()).is_err());

        let config = AppConfig {
            firestore: Some(FirestoreConfig::new("ezteach-test")),
            ..AppConfig::default()
        };
        assert!(firestore_store(&config).is_ok());
    }
}
