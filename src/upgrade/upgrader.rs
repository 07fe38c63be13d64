//! Gateway hooks: token auth, auto-close header, deflate negotiation and
//! session binding.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

use super::handshake;
use super::hooks::{HeaderLatch, UpgradeHooks};
use super::{SessionStatus, UpgradeError, Upgraded};
use crate::auth::{AuthError, TokenDecoder};
use crate::compression::{self, CompressionState, ExtensionOffer};
use crate::config::CompressionConfig;
use crate::observability::metrics;
use crate::session::{Session, SessionBuilder, UserInfo};

/// Query parameter carrying the access token.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Header whose value `true` lets the gateway close the link when idle.
pub const AUTO_CLOSE_HEADER: &str = "X-AutoClose";

/// Performs gateway handshakes.
#[derive(Clone)]
pub struct Upgrader {
    decoder: Arc<dyn TokenDecoder>,
    sessions: SessionBuilder,
    compression: CompressionConfig,
}

impl std::fmt::Debug for Upgrader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upgrader")
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

impl Upgrader {
    pub fn new(
        decoder: Arc<dyn TokenDecoder>,
        sessions: SessionBuilder,
        compression: CompressionConfig,
    ) -> Self {
        Self {
            decoder,
            sessions,
            compression,
        }
    }

    /// Run the handshake on `stream`.
    pub async fn upgrade<S>(&self, stream: S) -> Result<Upgraded<S>, UpgradeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let start = Instant::now();
        let result = handshake::accept(stream, self).await;

        match &result {
            Ok(upgraded) => {
                let outcome = match upgraded.status {
                    SessionStatus::Created => "created",
                    SessionStatus::Existing => "existing",
                };
                metrics::record_upgrade(outcome, start);
                metrics::record_compression(upgraded.compression.is_some());
            }
            Err(e) => metrics::record_upgrade(e.outcome(), start),
        }
        result
    }

    /// Extract and decode the token carried in the request target.
    fn identify(&self, target: &str) -> Result<UserInfo, UpgradeError> {
        // Origin-form targets are resolved against a placeholder authority.
        let url = if target.starts_with('/') {
            Url::parse(&format!("http://gateway.invalid{target}"))
        } else {
            Url::parse(target)
        }
        .map_err(|e| UpgradeError::InvalidUri(e.to_string()))?;

        let token = url
            .query_pairs()
            .find(|(key, _)| key == TOKEN_QUERY_PARAM)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let claims = self.decoder.decode(&token)?;
        Ok(UserInfo::from(&claims))
    }
}

#[async_trait]
impl UpgradeHooks for Upgrader {
    fn authenticate(&self, target: &str) -> Result<UserInfo, UpgradeError> {
        self.identify(target).inspect_err(|e| {
            tracing::info!(error = %e, "Handshake rejected");
        })
    }

    fn on_header(
        &self,
        name: &str,
        value: &str,
        latch: &mut HeaderLatch,
    ) -> Result<(), UpgradeError> {
        if name.eq_ignore_ascii_case(AUTO_CLOSE_HEADER) {
            latch.auto_close = value == "true";
        }
        Ok(())
    }

    fn negotiate(&self, offers: &[ExtensionOffer]) -> Option<CompressionState> {
        compression::negotiate(&self.compression, offers)
    }

    async fn before_upgrade(&self, user: UserInfo) -> Result<(Session, SessionStatus), UpgradeError> {
        let (session, is_new) = self.sessions.build(user).await.inspect_err(|e| {
            tracing::error!(biz_id = user.biz_id, user_id = user.user_id, error = %e, "Session binding failed");
        })?;

        if is_new {
            tracing::debug!(biz_id = user.biz_id, user_id = user.user_id, "Session created");
            Ok((session, SessionStatus::Created))
        } else {
            tracing::warn!(
                biz_id = user.biz_id,
                user_id = user.user_id,
                "Session already exists, binding another link"
            );
            Ok((session, SessionStatus::Existing))
        }
    }
}
