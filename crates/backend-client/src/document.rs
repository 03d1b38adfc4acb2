//! Document store contract
//!
//! A keyed document read by collection and id. Absence of the document, or of
//! any field in it, is reported as data (`Ok(None)` / missing keys), never as
//! an error.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::{Document, Error, Result};

/// Remote, eventually-consistent document database
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document; `Ok(None)` when it does not exist
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>>;
}

/// In-process document store
///
/// Supports an injected outage so callers can exercise transport-failure
/// paths without a network.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<(String, String), Document>>,
    outage: RwLock<Option<String>>,
}

impl InMemoryDocumentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document
    pub fn insert(&self, collection: impl Into<String>, id: impl Into<String>, document: Document) {
        self.documents
            .write()
            .insert((collection.into(), id.into()), document);
    }

    /// Remove a document, returning it if present
    pub fn remove(&self, collection: &str, id: &str) -> Option<Document> {
        self.documents
            .write()
            .remove(&(collection.to_string(), id.to_string()))
    }

    /// Fail every read with `message` until cleared with `None`
    pub fn set_outage(&self, message: Option<&str>) {
        *self.outage.write() = message.map(str::to_string);
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        if let Some(message) = self.outage.read().clone() {
            return Err(Error::Unavailable(message));
        }

        Ok(self
            .documents
            .read()
            .get(&(collection.to_string(), id.to_string()))
            .cloned())
    }
}
