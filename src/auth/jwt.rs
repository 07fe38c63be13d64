//! HS256 user tokens.
//!
//! Tokens carry the identity a connection is bound to (`user_id`, `biz_id`)
//! plus the standard `iat`/`exp`/`iss` claims. Decoding accepts an optional
//! `Bearer ` prefix so the same string works in headers and query strings.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, TokenDecoder, UserClaims};
use crate::config::JwtConfig;

/// Default token lifetime when the caller does not set `exp`.
const DEFAULT_TTL_SECS: i64 = 24 * 60 * 60;

/// Wire representation of the claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireClaims {
    user_id: i64,
    biz_id: i64,
    iat: i64,
    exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iss: Option<String>,
}

/// Signs and verifies user tokens with a shared secret.
#[derive(Clone)]
pub struct JwtCodec {
    key: String,
    issuer: String,
}

impl std::fmt::Debug for JwtCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtCodec")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl JwtCodec {
    pub fn new(key: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            issuer: issuer.into(),
        }
    }

    pub fn from_config(config: &JwtConfig) -> Self {
        Self::new(config.key.clone(), config.issuer.clone())
    }

    /// Mint a token for `claims`, filling in `iat`, `exp` (24h) and the
    /// configured issuer when they are absent.
    pub fn encode(&self, claims: &UserClaims) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let issuer = claims
            .issuer
            .clone()
            .or_else(|| (!self.issuer.is_empty()).then(|| self.issuer.clone()));

        let wire = WireClaims {
            user_id: claims.user_id,
            biz_id: claims.biz_id,
            iat: claims.issued_at.unwrap_or(now),
            exp: claims.expires_at.unwrap_or(now + DEFAULT_TTL_SECS),
            iss: issuer,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &wire,
            &EncodingKey::from_secret(self.key.as_bytes()),
        )
        .map_err(|e| AuthError::Encode(e.to_string()))
    }
}

impl TokenDecoder for JwtCodec {
    fn decode(&self, token: &str) -> Result<UserClaims, AuthError> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token);
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<WireClaims>(
            token,
            &DecodingKey::from_secret(self.key.as_bytes()),
            &validation,
        )
        .map_err(|err| {
            use jsonwebtoken::errors::ErrorKind;
            match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(err.to_string()),
            }
        })?;

        let wire = data.claims;
        Ok(UserClaims {
            user_id: wire.user_id,
            biz_id: wire.biz_id,
            issued_at: Some(wire.iat),
            expires_at: Some(wire.exp),
            issuer: wire.iss,
        })
    }
}
