//! Identity types shared by the session store and the upgrade pipeline.

use serde::{Deserialize, Serialize};

use crate::auth::UserClaims;

/// Identity of the user behind a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// Tenant / business domain.
    pub biz_id: i64,
    /// Unique within `biz_id`.
    pub user_id: i64,
    /// Whether the gateway may close the link when it goes idle.
    pub auto_close: bool,
}

impl UserInfo {
    pub fn new(biz_id: i64, user_id: i64) -> Self {
        Self {
            biz_id,
            user_id,
            auto_close: false,
        }
    }

    pub fn with_auto_close(self, auto_close: bool) -> Self {
        Self { auto_close, ..self }
    }
}

impl From<&UserClaims> for UserInfo {
    fn from(claims: &UserClaims) -> Self {
        Self::new(claims.biz_id, claims.user_id)
    }
}

impl std::fmt::Display for UserInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "biz:{}/user:{}", self.biz_id, self.user_id)
    }
}
