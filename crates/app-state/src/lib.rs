//! Session and navigation core for EZTeach
//!
//! This crate turns authentication and profile-lookup events into the single
//! top-level screen the client should show, resolving the races between the
//! splash timer, auth callbacks and profile fetches.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod listeners;

pub mod navigation;
pub mod observability;
pub mod profile;
pub mod session;

pub use navigation::{
    AppNavigationStateMachine, NavigationConfig, NavigationState, Screen, ScreenContext,
    ScreenSubscription, ScreenUpdate,
};
pub use observability::{ObservabilitySink, OperationalEvent, TracingSink};
pub use profile::{ProfileResolver, ResolveError, Role, UserProfile};
pub use session::{AuthSessionObserver, AuthSubscription, AuthSubscriptionError, SessionStatus};
