//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! request target "/ws?token=..."
//!     → upgrade pipeline extracts the token
//!     → TokenDecoder::decode (jwt.rs for HS256 tokens)
//!     → UserClaims { user_id, biz_id } → UserInfo bound to the session
//! ```
//!
//! # Design Decisions
//! - The pipeline depends on the `TokenDecoder` trait only, so key
//!   management and algorithms stay outside the handshake code

pub mod jwt;

use thiserror::Error;

pub use jwt::JwtCodec;

/// Why a token was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,

    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("failed to encode token: {0}")]
    Encode(String),
}

/// Identity carried by a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserClaims {
    pub user_id: i64,
    pub biz_id: i64,
    /// Unix seconds.
    pub issued_at: Option<i64>,
    /// Unix seconds.
    pub expires_at: Option<i64>,
    pub issuer: Option<String>,
}

impl UserClaims {
    pub fn new(user_id: i64, biz_id: i64) -> Self {
        Self {
            user_id,
            biz_id,
            issued_at: None,
            expires_at: None,
            issuer: None,
        }
    }
}

/// Turns a token string into an identity.
///
/// Implementations must reject tampered, expired and malformed tokens.
pub trait TokenDecoder: Send + Sync {
    fn decode(&self, token: &str) -> Result<UserClaims, AuthError>;
}
