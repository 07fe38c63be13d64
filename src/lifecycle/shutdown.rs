//! Shutdown coordination for the gateway.

use tokio_util::sync::CancellationToken;

/// Coordinator for graceful shutdown.
///
/// Hands out child tokens that all long-running tasks can wait on.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Trigger the shutdown signal. Safe to call more than once.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Build a single token that is cancelled as soon as either `a` or `b` is.
///
/// The returned token is a child of `a`; a small watcher task forwards `b`.
/// The watcher exits once the merged token is cancelled, so callers should
/// cancel it (or hold a drop guard) when they stop listening.
pub fn merge_tokens(a: &CancellationToken, b: &CancellationToken) -> CancellationToken {
    let merged = a.child_token();
    if b.is_cancelled() {
        merged.cancel();
        return merged;
    }

    let other = b.clone();
    let watcher = merged.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = other.cancelled() => watcher.cancel(),
            _ = watcher.cancelled() => {}
        }
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn merged_fires_on_first_source() {
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let merged = merge_tokens(&a, &b);
        assert!(!merged.is_cancelled());

        b.cancel();
        tokio::time::timeout(Duration::from_secs(1), merged.cancelled())
            .await
            .expect("merged token should fire when b fires");
        assert!(!a.is_cancelled());
    }

    #[tokio::test]
    async fn merged_fires_on_parent() {
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let merged = merge_tokens(&a, &b);

        a.cancel();
        assert!(merged.is_cancelled());
        assert!(!b.is_cancelled());
    }

    #[tokio::test]
    async fn shutdown_trigger_is_idempotent() {
        let shutdown = Shutdown::new();
        let rx = shutdown.subscribe();
        shutdown.trigger();
        shutdown.trigger();
        assert!(shutdown.is_triggered());
        assert!(rx.is_cancelled());
    }
}
