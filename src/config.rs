//! Application configuration
//!
//! Loaded from a JSON file; every field is optional and falls back to its
//! default.

use anyhow::{Context, Result};
use app_state::profile::DEFAULT_PROFILE_COLLECTION;
use app_state::NavigationConfig;
use backend_client::FirestoreConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::telemetry::LogConfig;

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// Splash and profile fetch timing
    pub navigation: NavigationConfig,
    /// Collection holding profile documents
    pub profile_collection: String,
    /// Firestore connection, when profiles are read from Firestore
    pub firestore: Option<FirestoreConfig>,
    /// Logging
    pub logging: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            navigation: NavigationConfig::default(),
            profile_collection: DEFAULT_PROFILE_COLLECTION.to_string(),
            firestore: None,
            logging: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse configuration from a JSON string
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.profile_collection.trim().is_empty() {
            anyhow::bail!("profileCollection must not be empty");
        }
        if let Some(firestore) = &self.firestore {
            if firestore.project_id.trim().is_empty() {
                anyhow::bail!("firestore.projectId must not be empty");
            }
        }
        Ok(())
    }
}
