//! Profile persistence.
//!
//! The gateway treats durable storage as an external collaborator: a
//! document-store insert keyed by collection name. [`ProfileStore`] is the
//! seam; [`MemoryStore`] backs tests and local runs, and a real document
//! store plugs in behind the same trait.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;

/// Collection that holds account profiles.
pub const PROFILES_COLLECTION: &str = "profiles";

/// An account profile record. Only the slow hash of the password is ever
/// stored, never the raw password.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Account username (decrypted and signature-verified upstream).
    pub name: String,
    /// Slow, salted one-way hash of the password.
    pub password_hash: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// Build a profile stamped with the current time.
    pub fn new(name: String, password_hash: String) -> Self {
        Self {
            name,
            password_hash,
            created_at: Utc::now(),
        }
    }
}

/// Storage failures.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The named collection was never registered.
    #[error("unknown collection `{0}`")]
    UnknownCollection(String),

    /// The backing store failed.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Document-store insert operation, keyed by collection name.
pub trait ProfileStore: Send + Sync {
    /// Insert `records` into `collection`.
    fn insert(&self, collection: &str, records: Vec<Profile>) -> Result<(), PersistenceError>;
}

/// In-memory store with the same collection semantics as a document
/// database: inserts into unregistered collections are rejected.
pub struct MemoryStore {
    collections: Mutex<BTreeMap<String, Vec<Profile>>>,
}

impl MemoryStore {
    /// Create a store with the profiles collection registered.
    pub fn new() -> Self {
        let mut collections = BTreeMap::new();
        collections.insert(PROFILES_COLLECTION.to_string(), Vec::new());
        Self {
            collections: Mutex::new(collections),
        }
    }

    /// Snapshot of a collection's records, for tests and diagnostics.
    pub fn records(&self, collection: &str) -> Vec<Profile> {
        self.collections
            .lock()
            .expect("store mutex poisoned")
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileStore for MemoryStore {
    fn insert(&self, collection: &str, records: Vec<Profile>) -> Result<(), PersistenceError> {
        let mut collections = self
            .collections
            .lock()
            .map_err(|_| PersistenceError::Backend("store mutex poisoned".to_string()))?;

        match collections.get_mut(collection) {
            Some(existing) => {
                existing.extend(records);
                Ok(())
            }
            None => Err(PersistenceError::UnknownCollection(collection.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_into_profiles() {
        let store = MemoryStore::new();
        store
            .insert(
                PROFILES_COLLECTION,
                vec![Profile::new("alice".into(), "$2b$hash".into())],
            )
            .unwrap();

        let records = store.records(PROFILES_COLLECTION);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "alice");
    }

    #[test]
    fn test_unknown_collection_rejected() {
        let store = MemoryStore::new();
        let result = store.insert("sessions", vec![]);
        assert!(matches!(
            result,
            Err(PersistenceError::UnknownCollection(c)) if c == "sessions"
        ));
    }

    #[test]
    fn test_inserts_accumulate() {
        let store = MemoryStore::new();
        store
            .insert(
                PROFILES_COLLECTION,
                vec![Profile::new("a".into(), "h1".into())],
            )
            .unwrap();
        store
            .insert(
                PROFILES_COLLECTION,
                vec![Profile::new("b".into(), "h2".into())],
            )
            .unwrap();

        assert_eq!(store.records(PROFILES_COLLECTION).len(), 2);
    }
}
