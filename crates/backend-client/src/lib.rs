//! Backend client library for EZTeach
//!
//! This crate defines the contracts the session core needs from the hosted
//! backend (authentication and document storage), together with an in-memory
//! implementation of each and a Firestore REST adapter for profile documents.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod document;
pub mod firestore;
pub mod test_utils;
pub mod types;

pub use auth::{AuthService, AuthStateListener, InMemoryAuthService, ListenerHandle};
pub use document::{DocumentStore, InMemoryDocumentStore};
pub use firestore::{FirestoreClient, FirestoreConfig};
pub use types::{Document, FieldValue, UserId};

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for backend operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// API error with status code and message
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from server
        message: String,
    },

    /// Backend reachable but refusing work (injected outages, closed services)
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}
