//! Upgrade pipeline: raw stream in, session-bound link out.
//!
//! # Data Flow
//! ```text
//! raw stream
//!     → handshake.rs   AwaitingTarget   request line → hooks.authenticate
//!                      AwaitingHeaders  each header  → hooks.on_header
//!                                       blank line   → hooks.negotiate
//!                      PreResponse      hooks.before_upgrade (session bind)
//!                                       → 101 response (response.rs)
//!                      Done | Aborted   (error response, stream dropped)
//!     → Upgraded { stream, session, status, compression }
//! ```
//!
//! # Design Decisions
//! - Hooks run inline with parsing so the identity is known before the
//!   response is written
//! - Per-request state lives in the state values, not in the hooks
//! - A duplicate session is reported on the successful result, never as an
//!   error

pub mod handshake;
pub mod hooks;
pub mod response;
pub mod upgrader;

use thiserror::Error;
use tokio::io::BufReader;

use crate::auth::AuthError;
use crate::compression::CompressionState;
use crate::session::{Session, SessionError};

pub use handshake::{accept, discard_request_head, HandshakeState, RequestHead};
pub use hooks::{HeaderLatch, UpgradeHooks};
pub use upgrader::{Upgrader, AUTO_CLOSE_HEADER, TOKEN_QUERY_PARAM};

/// Whether the bound session was created by this handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Created,
    /// The identity already had a session (reconnect or second device).
    Existing,
}

impl SessionStatus {
    pub fn is_new(self) -> bool {
        matches!(self, SessionStatus::Created)
    }
}

/// A stream that completed the handshake.
///
/// `stream` keeps any bytes the peer sent after its request head.
#[derive(Debug)]
pub struct Upgraded<S> {
    pub stream: BufReader<S>,
    pub session: Session,
    pub status: SessionStatus,
    pub compression: Option<CompressionState>,
}

/// Why a handshake was aborted.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("I/O error during handshake: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed upgrade request: {0}")]
    Malformed(String),

    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    #[error("method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("unsupported websocket version {0:?}")]
    UnsupportedVersion(Option<String>),

    #[error("invalid request target: {0}")]
    InvalidUri(String),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("session binding failed: {0}")]
    Session(#[from] SessionError),
}

impl UpgradeError {
    /// HTTP status written to the peer for this abort.
    pub fn status(&self) -> u16 {
        match self {
            UpgradeError::Io(_)
            | UpgradeError::Malformed(_)
            | UpgradeError::HeadTooLarge { .. }
            | UpgradeError::InvalidUri(_) => 400,
            UpgradeError::Auth(_) => 401,
            UpgradeError::MethodNotAllowed(_) => 405,
            UpgradeError::UnsupportedVersion(_) => 426,
            UpgradeError::Session(_) => 500,
        }
    }

    /// Label used for the upgrade outcome metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            UpgradeError::Io(_) => "io_error",
            UpgradeError::Auth(_) | UpgradeError::InvalidUri(_) => "auth_failed",
            UpgradeError::Session(_) => "session_error",
            _ => "bad_request",
        }
    }
}
