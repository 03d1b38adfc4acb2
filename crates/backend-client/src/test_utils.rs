//! Test utilities and fixtures for backend testing
//!
//! This module provides common user ids, profile documents, and a document
//! store whose reads can be held open so tests control completion order.

#![allow(dead_code)] // Test utilities may not all be used yet

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::document::{DocumentStore, InMemoryDocumentStore};
use crate::{Document, Result, UserId};

/// Collection profile documents live in
pub const PROFILE_COLLECTION: &str = "users";

/// Test user ids
pub mod users {
    use super::*;

    /// School administrator
    pub fn principal() -> UserId {
        UserId::new("uid-principal-0001").unwrap()
    }

    /// Classroom teacher
    pub fn teacher() -> UserId {
        UserId::new("uid-teacher-0002").unwrap()
    }

    /// Substitute teacher
    pub fn substitute() -> UserId {
        UserId::new("uid-sub-0003").unwrap()
    }

    /// User with no profile document
    pub fn newcomer() -> UserId {
        UserId::new("uid-newcomer-0004").unwrap()
    }
}

/// Profile document fixtures
pub mod profiles {
    use super::*;

    /// Profile with a role and active school
    pub fn with_role(role: &str, school_id: &str) -> Document {
        Document::new()
            .with_field("role", role)
            .with_field("activeSchoolId", school_id)
    }

    /// School administrator profile
    pub fn school(school_id: &str) -> Document {
        with_role("school", school_id)
    }

    /// Teacher profile
    pub fn teacher(school_id: &str) -> Document {
        with_role("teacher", school_id)
    }

    /// Substitute profile
    pub fn substitute(school_id: &str) -> Document {
        with_role("sub", school_id)
    }
}

/// Document store whose reads can be held until released
///
/// Ungated ids are served immediately from the inner store. A gated id
/// blocks each read until [`release`](Self::release) hands out a pass, or
/// until [`open`](Self::open) lifts the gate for everyone.
#[derive(Default)]
pub struct GatedDocumentStore {
    inner: InMemoryDocumentStore,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    reads: Mutex<Vec<String>>,
}

impl GatedDocumentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Access the backing store to insert documents or inject outages
    pub fn inner(&self) -> &InMemoryDocumentStore {
        &self.inner
    }

    /// Insert a profile document for `user`
    pub fn insert_profile(&self, user: &UserId, document: Document) {
        self.inner.insert(PROFILE_COLLECTION, user.as_str(), document);
    }

    /// Hold reads for `id` until released
    pub fn gate(&self, id: &str) {
        self.gates
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(0)));
    }

    /// Let exactly one held (or future) read for `id` complete
    pub fn release(&self, id: &str) {
        if let Some(gate) = self.gates.lock().get(id) {
            gate.add_permits(1);
        }
    }

    /// Lift the gate for `id`, letting every held read complete
    pub fn open(&self, id: &str) {
        if let Some(gate) = self.gates.lock().remove(id) {
            gate.close();
        }
    }

    /// Ids read so far, in call order
    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().clone()
    }

    /// Number of reads issued for `id`
    pub fn read_count(&self, id: &str) -> usize {
        self.reads.lock().iter().filter(|r| r.as_str() == id).count()
    }
}

#[async_trait]
impl DocumentStore for GatedDocumentStore {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.reads.lock().push(id.to_string());

        let gate = self.gates.lock().get(id).cloned();
        if let Some(gate) = gate {
            // A closed semaphore means the gate was opened while waiting
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        self.inner.get_document(collection, id).await
    }
}
