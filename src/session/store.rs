//! Session records with exactly-once creation.
//!
//! # Responsibilities
//! - Derive the storage key for an identity
//! - Get-or-create a session in one atomic backend call
//! - Field-level get/set and whole-record destroy
//!
//! # Design Decisions
//! - `Build` racing on one identity yields exactly one `is_new == true`
//! - "Already existed" is a normal outcome, not a `SessionError`
//! - No local "destroyed" state; the backend is the source of truth

use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::session::backend::{BackendError, SessionBackend};
use crate::session::types::UserInfo;

/// Field written when a session is first created.
pub const LOGIN_TIME_FIELD: &str = "loginTime";

/// Storage key for an identity. Distinct identities never share a key.
pub fn session_key(biz_id: i64, user_id: i64) -> String {
    format!("gateway:session:bizId:{biz_id}:userId:{user_id}")
}

/// Error type for session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to create session: {0}")]
    CreateFailed(#[source] BackendError),

    #[error("failed to destroy session: {0}")]
    DestroyFailed(#[source] BackendError),

    #[error("session field access failed: {0}")]
    Backend(#[from] BackendError),
}

/// Handle to the record bound to one identity.
///
/// Cheap to clone; every clone talks to the same backend key.
#[derive(Clone)]
pub struct Session {
    user: UserInfo,
    key: String,
    backend: Arc<dyn SessionBackend>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Session {
    fn new(user: UserInfo, backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            key: session_key(user.biz_id, user.user_id),
            user,
            backend,
        }
    }

    pub fn user_info(&self) -> UserInfo {
        self.user
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read a field. `Ok(None)` means the field (or record) does not exist.
    pub async fn get(&self, field: &str) -> Result<Option<String>, SessionError> {
        Ok(self.backend.get_field(&self.key, field).await?)
    }

    /// Write a field. Values are stored as plain text.
    pub async fn set(&self, field: &str, value: &str) -> Result<(), SessionError> {
        Ok(self.backend.set_field(&self.key, field, value).await?)
    }

    /// Delete the whole record.
    pub async fn destroy(&self) -> Result<(), SessionError> {
        self.backend
            .delete(&self.key)
            .await
            .map_err(SessionError::DestroyFailed)?;
        tracing::debug!(key = %self.key, "Session destroyed");
        Ok(())
    }
}

/// Get-or-create entry point for sessions.
#[derive(Clone)]
pub struct SessionBuilder {
    backend: Arc<dyn SessionBackend>,
}

impl SessionBuilder {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self { backend }
    }

    /// Bind a session to `user`, creating the record if it does not exist.
    ///
    /// Returns the session and whether this call created it.
    pub async fn build(&self, user: UserInfo) -> Result<(Session, bool), SessionError> {
        let session = Session::new(user, Arc::clone(&self.backend));
        let fields = vec![(
            LOGIN_TIME_FIELD.to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        )];

        let created = self
            .backend
            .create_if_absent(session.key(), &fields)
            .await
            .map_err(SessionError::CreateFailed)?;

        if created {
            tracing::debug!(key = %session.key(), "Session created");
        }
        Ok((session, created))
    }
}
