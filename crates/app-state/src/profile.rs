//! Profile resolution
//!
//! Maps a signed-in user to their role and active school by reading the
//! user's profile document. A missing or malformed profile is a valid,
//! least-privileged result; only transport failures are errors.

use backend_client::{Document, DocumentStore, FieldValue, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default collection holding profile documents
pub const DEFAULT_PROFILE_COLLECTION: &str = "users";

/// Profile document field carrying the role
pub const ROLE_FIELD: &str = "role";

/// Profile document field carrying the active school
pub const ACTIVE_SCHOOL_FIELD: &str = "activeSchoolId";

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    /// School administrator account
    School,
    /// Classroom teacher
    Teacher,
    /// Substitute teacher
    Sub,
    /// No recognised role
    #[default]
    Unspecified,
}

impl Role {
    /// Parse a stored role name, case-insensitively
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "school" => Some(Role::School),
            "teacher" => Some(Role::Teacher),
            "sub" | "substitute" => Some(Role::Sub),
            _ => None,
        }
    }

    /// Stored role name
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::School => "school",
            Role::Teacher => "teacher",
            Role::Sub => "sub",
            Role::Unspecified => "unspecified",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role and school association of a user
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Account role
    pub role: Role,
    /// School the user is currently working in
    pub active_school_id: Option<String>,
}

impl UserProfile {
    /// Create a profile
    pub fn new(role: Role, active_school_id: Option<String>) -> Self {
        Self { role, active_school_id }
    }

    /// Lowest-privilege profile
    pub fn unspecified() -> Self {
        Self::default()
    }

    /// Read a profile document
    ///
    /// Any field of the wrong type, or a role name that is not recognised,
    /// makes the whole document malformed and yields [`UserProfile::unspecified`].
    pub fn from_document(document: &Document) -> Self {
        let role = match document.get(ROLE_FIELD) {
            None | Some(FieldValue::Null) => Role::Unspecified,
            Some(FieldValue::String(name)) => match Role::parse(name) {
                Some(role) => role,
                None => {
                    tracing::debug!(role = %name, "unrecognised role in profile");
                    return Self::unspecified();
                }
            },
            Some(other) => {
                tracing::debug!(kind = other.kind(), "malformed role field in profile");
                return Self::unspecified();
            }
        };

        let active_school_id = match document.get(ACTIVE_SCHOOL_FIELD) {
            None | Some(FieldValue::Null) => None,
            Some(FieldValue::String(id)) if id.trim().is_empty() => None,
            Some(FieldValue::String(id)) => Some(id.clone()),
            Some(other) => {
                tracing::debug!(kind = other.kind(), "malformed school field in profile");
                return Self::unspecified();
            }
        };

        Self { role, active_school_id }
    }
}

/// Profile fetch failure
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The document store could not be read
    #[error("profile backend failure: {0}")]
    Backend(#[from] backend_client::Error),

    /// The fetch did not complete in time
    #[error("profile fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Resolver of user profiles from the document store
///
/// Clones share only the store handle, so concurrent resolves for different
/// users are independent.
#[derive(Clone)]
pub struct ProfileResolver {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl ProfileResolver {
    /// Create a resolver reading from the default collection
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            collection: DEFAULT_PROFILE_COLLECTION.to_string(),
        }
    }

    /// Read profiles from another collection
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Collection profiles are read from
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Fetch the profile of `user_id`
    ///
    /// Single attempt, no retry.
    pub async fn resolve(&self, user_id: &UserId) -> Result<UserProfile, ResolveError> {
        let document = self
            .store
            .get_document(&self.collection, user_id.as_str())
            .await?;

        let profile = match document {
            Some(document) => UserProfile::from_document(&document),
            None => {
                tracing::debug!(user = %user_id, "no profile document");
                UserProfile::unspecified()
            }
        };

        tracing::debug!(user = %user_id, role = %profile.role, "profile resolved");
        Ok(profile)
    }
}

impl fmt::Debug for ProfileResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileResolver")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}
