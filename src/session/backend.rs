//! Key/value backends for session records.
//!
//! # Responsibilities
//! - Define the narrow contract sessions need from storage
//! - Provide an in-process implementation backed by a sharded map
//!
//! # Design Decisions
//! - `create_if_absent` must be a single indivisible operation; that contract,
//!   not client-side locking, is what makes session creation exactly-once
//! - Records are hashes of plain strings; no implicit serialization

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use thiserror::Error;

/// Failure reported by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend protocol error: {0}")]
    Protocol(String),
}

/// Storage operations a session needs.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Create the record at `key` with `fields` only if no record exists.
    ///
    /// Returns `true` if this call created it, `false` if it already existed.
    async fn create_if_absent(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<bool, BackendError>;

    /// Read one field. `None` when the record or the field is absent.
    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, BackendError>;

    /// Write one field, creating the record if needed.
    async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<(), BackendError>;

    /// Delete the whole record. Deleting an absent record is not an error.
    async fn delete(&self, key: &str) -> Result<(), BackendError>;
}

/// In-process backend: one hash per key in a concurrent map.
///
/// Entry-level locking makes `create_if_absent` atomic per key.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: DashMap<String, HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn create_if_absent(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<bool, BackendError> {
        match self.records.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(fields.iter().cloned().collect());
                Ok(true)
            }
        }
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, BackendError> {
        Ok(self
            .records
            .get(key)
            .and_then(|record| record.get(field).cloned()))
    }

    async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<(), BackendError> {
        self.records
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.records.remove(key);
        Ok(())
    }
}
