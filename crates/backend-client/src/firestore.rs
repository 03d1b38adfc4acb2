//! Firestore REST adapter
//!
//! Implements [`DocumentStore`] over the Firestore v1 REST API. Only keyed
//! document reads are supported. Each call is a single attempt; retry policy
//! belongs to the caller.

use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::document::DocumentStore;
use crate::{Document, Error, FieldValue, Result};

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the Firestore client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FirestoreConfig {
    /// API origin (e.g., "https://firestore.googleapis.com")
    pub base_url: String,
    /// Cloud project id
    pub project_id: String,
    /// Database id
    pub database: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// User agent string
    pub user_agent: String,
    /// ID token of the signed-in user, sent as a bearer token
    #[serde(skip)]
    pub id_token: Option<String>,
}

impl Default for FirestoreConfig {
    fn default() -> Self {
        Self {
            base_url: "https://firestore.googleapis.com".to_string(),
            project_id: String::new(),
            database: "(default)".to_string(),
            timeout_ms: 15_000,
            user_agent: format!("EZTeach/{}", env!("CARGO_PKG_VERSION")),
            id_token: None,
        }
    }
}

impl FirestoreConfig {
    /// Create a config for a project
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    /// Point the client at another origin (emulator, test server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Use a named database
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Authenticate requests with a user ID token
    pub fn with_id_token(mut self, token: impl Into<String>) -> Self {
        self.id_token = Some(token.into());
        self
    }

    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// =============================================================================
// Wire Format
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

fn malformed(field: &str, kind: &str) -> Error {
    Error::InvalidInput(format!("malformed {kind} for field `{field}`"))
}

/// Decode a field map, skipping values that are unsupported or undecodable
///
/// A bad value is a data problem, not a read failure; callers see the
/// field as absent.
fn decode_fields(fields: &Map<String, Value>) -> Document {
    let mut document = Document::new();
    for (name, raw) in fields {
        match decode_value(name, raw) {
            Ok(Some(value)) => document.insert(name.clone(), value),
            Ok(None) => tracing::debug!(field = %name, "skipping unsupported firestore value"),
            Err(error) => tracing::debug!(field = %name, %error, "skipping undecodable firestore value"),
        }
    }
    document
}

/// Decode one typed Firestore value; `Ok(None)` for kinds the client ignores
fn decode_value(field: &str, raw: &Value) -> Result<Option<FieldValue>> {
    let (kind, payload) = raw
        .as_object()
        .and_then(|obj| obj.iter().next())
        .ok_or_else(|| malformed(field, "value"))?;

    let value = match kind.as_str() {
        "nullValue" => FieldValue::Null,
        "booleanValue" => FieldValue::Bool(payload.as_bool().ok_or_else(|| malformed(field, kind))?),
        // int64 values travel as decimal strings
        "integerValue" => FieldValue::Integer(
            payload
                .as_str()
                .and_then(|s| s.parse().ok())
                .or_else(|| payload.as_i64())
                .ok_or_else(|| malformed(field, kind))?,
        ),
        "doubleValue" => FieldValue::Double(payload.as_f64().ok_or_else(|| malformed(field, kind))?),
        "stringValue" => FieldValue::String(text(field, kind, payload)?),
        "timestampValue" => FieldValue::Timestamp(text(field, kind, payload)?),
        "referenceValue" => FieldValue::Reference(text(field, kind, payload)?),
        "arrayValue" => {
            let mut values = Vec::new();
            if let Some(items) = payload.get("values").and_then(Value::as_array) {
                for item in items {
                    match decode_value(field, item) {
                        Ok(Some(value)) => values.push(value),
                        Ok(None) => {}
                        Err(error) => tracing::debug!(%error, "skipping undecodable array element"),
                    }
                }
            }
            FieldValue::Array(values)
        }
        "mapValue" => match payload.get("fields").and_then(Value::as_object) {
            Some(fields) => FieldValue::Map(decode_fields(fields)),
            None => FieldValue::Map(Document::new()),
        },
        _ => return Ok(None),
    };

    Ok(Some(value))
}

fn text(field: &str, kind: &str, payload: &Value) -> Result<String> {
    payload
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| malformed(field, kind))
}

// =============================================================================
// Client
// =============================================================================

/// Firestore document reader
pub struct FirestoreClient {
    /// HTTP client
    client: ReqwestClient,
    /// Configuration
    config: FirestoreConfig,
}

impl FirestoreClient {
    /// Create a new client
    pub fn new(config: FirestoreConfig) -> Result<Self> {
        if config.project_id.is_empty() {
            return Err(Error::InvalidInput("firestore project id is required".to_string()));
        }

        let client = ReqwestClient::builder()
            .timeout(config.timeout())
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { client, config })
    }

    /// Get the client configuration
    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    /// Build the REST URL of a document
    pub fn document_url(&self, collection: &str, id: &str) -> Result<Url> {
        for (label, segment) in [("collection", collection), ("document id", id)] {
            if segment.is_empty() || segment.contains('/') {
                return Err(Error::InvalidInput(format!("invalid {label}: {segment:?}")));
            }
        }

        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| Error::InvalidInput(format!("invalid base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::InvalidInput(format!("base url cannot carry a path: {}", self.config.base_url)))?
            .pop_if_empty()
            .extend([
                "v1",
                "projects",
                self.config.project_id.as_str(),
                "databases",
                self.config.database.as_str(),
                "documents",
                collection,
                id,
            ]);
        Ok(url)
    }
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let url = self.document_url(collection, id)?;

        let mut request = self.client.get(url);
        if let Some(token) = &self.config.id_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) if envelope.error.status.is_empty() => envelope.error.message,
                Ok(envelope) => format!("{}: {}", envelope.error.status, envelope.error.message),
                Err(_) => format!("HTTP {}: {}", status.as_u16(), body),
            };
            return Err(Error::Api { status: status.as_u16(), message });
        }

        let body = response.text().await?;
        let raw: RawDocument = serde_json::from_str(&body)?;
        Ok(Some(decode_fields(&raw.fields)))
    }
}

// =============================================================================
// Tests
// =============================================================================
