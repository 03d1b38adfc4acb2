//! Operational reporting seam
//!
//! Failures the session core absorbs are still reported here so they stay
//! visible to operators. Reporting is best effort: a sink that fails or
//! panics never changes navigation state.

use backend_client::UserId;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::profile::ResolveError;
use crate::session::AuthSubscriptionError;

/// Event worth reporting to an operator
#[derive(Debug)]
pub enum OperationalEvent<'a> {
    /// The auth listener could not be attached; navigation is stuck on splash
    AuthSubscriptionFailed(&'a AuthSubscriptionError),
    /// A profile fetch failed and the user was given the lowest privilege
    ProfileResolveFailed {
        /// User whose profile was being fetched
        user_id: &'a UserId,
        /// Failure cause
        error: &'a ResolveError,
    },
}

/// Receiver of operational events
pub trait ObservabilitySink: Send + Sync {
    /// Record one event
    fn report(&self, event: &OperationalEvent<'_>);
}

/// Sink that forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn report(&self, event: &OperationalEvent<'_>) {
        match event {
            OperationalEvent::AuthSubscriptionFailed(error) => {
                tracing::error!(target: "ezteach::ops", %error, "auth subscription failed");
            }
            OperationalEvent::ProfileResolveFailed { user_id, error } => {
                tracing::warn!(target: "ezteach::ops", user = %user_id, %error, "profile resolve failed");
            }
        }
    }
}

/// Deliver `event` to `sink`, containing any panic
pub(crate) fn report(sink: &Arc<dyn ObservabilitySink>, event: OperationalEvent<'_>) {
    if catch_unwind(AssertUnwindSafe(|| sink.report(&event))).is_err() {
        tracing::error!("observability sink panicked while reporting");
    }
}
