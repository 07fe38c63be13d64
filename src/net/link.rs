//! Established links and their registry.
//!
//! # Responsibilities
//! - Give each established connection an id, its session and an outbound queue
//! - Track activity so idle links that allow it can be closed
//! - Track live links for graceful shutdown

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::codec::{CloseFrame, OpCode};
use crate::observability::metrics;
use crate::session::Session;
use crate::upgrade::SessionStatus;

/// Unique identifier for a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(Uuid);

impl LinkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("link is closed")]
    Closed,
}

/// One application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// `Text` or `Binary`.
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            opcode: OpCode::Text,
            payload: text.into().into_bytes(),
        }
    }

    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode: OpCode::Binary,
            payload: payload.into(),
        }
    }
}

/// A session-bound connection after a successful handshake.
#[derive(Debug)]
pub struct Link {
    id: LinkId,
    session: Session,
    status: SessionStatus,
    peer_addr: SocketAddr,
    outbound: mpsc::Sender<Message>,
    closed: CancellationToken,
    close_frame: OnceLock<CloseFrame>,
    created: Instant,
    /// Milliseconds after `created` of the last inbound message.
    last_active_ms: AtomicU64,
}

impl Link {
    pub fn new(
        session: Session,
        status: SessionStatus,
        peer_addr: SocketAddr,
        outbound: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            id: LinkId::new(),
            session,
            status,
            peer_addr,
            outbound,
            closed: CancellationToken::new(),
            close_frame: OnceLock::new(),
            created: Instant::now(),
            last_active_ms: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether this link's handshake created the session.
    pub fn session_status(&self) -> SessionStatus {
        self.status
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Queue a message for the peer. Waits while the queue is full.
    pub async fn send(&self, message: Message) -> Result<(), LinkError> {
        if self.closed.is_cancelled() {
            return Err(LinkError::Closed);
        }
        tokio::select! {
            _ = self.closed.cancelled() => Err(LinkError::Closed),
            sent = self.outbound.send(message) => sent.map_err(|_| LinkError::Closed),
        }
    }

    /// Close the link, telling the peer why. The first reason given wins.
    pub fn close_with(&self, frame: CloseFrame) {
        let _ = self.close_frame.set(frame);
        self.closed.cancel();
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the link is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Close status to send the peer, if one was given.
    pub fn close_frame(&self) -> Option<&CloseFrame> {
        self.close_frame.get()
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        let elapsed = self.created.elapsed().as_millis() as u64;
        self.last_active_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// Time since the last inbound message (or since the link was created).
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_active_ms.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(last)
    }

    /// Close the link if its user allows auto-close and it has been idle for
    /// at least `timeout`. Returns whether it was closed.
    pub fn try_close_if_idle(&self, timeout: Duration) -> bool {
        if !self.session.user_info().auto_close || self.is_closed() {
            return false;
        }
        if self.idle_for() < timeout {
            return false;
        }
        tracing::info!(
            link_id = %self.id,
            idle = ?self.idle_for(),
            "Closing idle link"
        );
        self.close_with(CloseFrame::new(crate::codec::control::CLOSE_GOING_AWAY, "idle timeout"));
        true
    }
}

/// Live links, for idle sweeps and graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct LinkRegistry {
    links: Arc<DashMap<LinkId, Arc<Link>>>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a link. It stays registered until the guard is dropped.
    pub fn register(&self, link: Arc<Link>) -> LinkGuard {
        let id = link.id();
        self.links.insert(id, link);
        metrics::record_active_links(self.links.len() as u64);
        LinkGuard {
            links: Arc::clone(&self.links),
            id,
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn get(&self, id: LinkId) -> Option<Arc<Link>> {
        self.links.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Close every idle link that allows it. Returns how many were closed.
    pub fn sweep_idle(&self, timeout: Duration) -> usize {
        // Collect first so no map shard is locked while closing.
        let links: Vec<Arc<Link>> = self.links.iter().map(|e| Arc::clone(e.value())).collect();
        links
            .iter()
            .filter(|link| link.try_close_if_idle(timeout))
            .count()
    }

    /// Close every link with the given reason.
    pub fn close_all(&self, frame: CloseFrame) {
        let links: Vec<Arc<Link>> = self.links.iter().map(|e| Arc::clone(e.value())).collect();
        for link in links {
            link.close_with(frame.clone());
        }
    }
}

/// Removes its link from the registry when dropped.
#[derive(Debug)]
pub struct LinkGuard {
    links: Arc<DashMap<LinkId, Arc<Link>>>,
    id: LinkId,
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        self.links.remove(&self.id);
        metrics::record_active_links(self.links.len() as u64);
        tracing::trace!(link_id = %self.id, "Link unregistered");
    }
}
