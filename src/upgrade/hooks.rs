//! Decision points the handshake calls out to.

use async_trait::async_trait;

use super::{SessionStatus, UpgradeError};
use crate::compression::{CompressionState, ExtensionOffer};
use crate::session::{Session, UserInfo};

/// Values latched while headers stream past, read once headers end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderLatch {
    pub auto_close: bool,
}

/// Hooks fired by the handshake, one per state.
///
/// `authenticate` and `on_header` run while the request head is still being
/// read; `negotiate` runs once after the blank line; `before_upgrade` runs
/// right before the 101 response is written. Any `Err` aborts the handshake.
#[async_trait]
pub trait UpgradeHooks: Send + Sync {
    /// The request target (path and query) has been read.
    fn authenticate(&self, target: &str) -> Result<UserInfo, UpgradeError>;

    /// One header line, in arrival order. Unknown headers must be ignored.
    fn on_header(
        &self,
        _name: &str,
        _value: &str,
        _latch: &mut HeaderLatch,
    ) -> Result<(), UpgradeError> {
        Ok(())
    }

    /// Extension offers from every `Sec-WebSocket-Extensions` header.
    /// `None` leaves the link uncompressed.
    fn negotiate(&self, offers: &[ExtensionOffer]) -> Option<CompressionState>;

    /// Bind `user` (with the latched flags applied) to a session.
    async fn before_upgrade(&self, user: UserInfo) -> Result<(Session, SessionStatus), UpgradeError>;
}
