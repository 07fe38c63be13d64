//! Gateway server: accept, admit, upgrade, serve.
//!
//! # Data Flow
//! ```text
//! Listener::accept
//!     → TokenLimiter::try_admit   (none left → read head, 503, close)
//!     → Upgrader::upgrade         (bounded by the handshake timeout)
//!     → Link registered, stream split
//!         read task:  Reader → MessageHandler::on_message
//!         write task: Link::send queue + control replies → Writer
//!     → link closed → permit released
//! ```
//!
//! # Design Decisions
//! - The admission permit is held for the whole life of the connection
//! - Control replies (pong, close echo) go ahead of queued messages
//! - On shutdown links get a going-away close and a bounded drain period

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::link::{Link, LinkError, LinkRegistry, Message};
use super::listener::{Listener, ListenerError};
use crate::admission::TokenLimiter;
use crate::codec::control::CLOSE_GOING_AWAY;
use crate::codec::{CloseFrame, CodecError, ControlFrame, Reader, ReplyQueue, Role, Writer};
use crate::config::{LinkConfig, ListenerConfig};
use crate::observability::metrics;
use crate::upgrade::{discard_request_head, response, Upgraded, Upgrader};

/// Pending control replies per link.
const CONTROL_QUEUE: usize = 8;

/// How long a closing link keeps reading for the peer's close reply.
const CLOSE_LINGER: Duration = Duration::from_secs(1);

/// How long a refused connection may take to send its request head.
const REJECT_DRAIN: Duration = Duration::from_millis(500);

/// Why the read loop of a link stopped.
enum ReadEnd {
    /// Peer sent a close frame or hung up.
    Peer,
    /// Closed from this side (handler, idle sweep, shutdown).
    Local,
    /// Protocol or size violation; the frame stream is no longer in sync.
    Failed,
}

/// Error type for the server loop.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Application logic for established links.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_open(&self, _link: &Arc<Link>) {}

    /// Called for every inbound message, in order. An error closes the link.
    async fn on_message(&self, link: &Arc<Link>, message: Message) -> Result<(), LinkError>;

    async fn on_close(&self, _link: &Arc<Link>) {}
}

/// Sends every message straight back.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn on_message(&self, link: &Arc<Link>, message: Message) -> Result<(), LinkError> {
        link.send(message).await
    }
}

/// Accept loop plus per-link tasks.
pub struct GatewayServer<H> {
    limiter: Arc<TokenLimiter>,
    upgrader: Arc<Upgrader>,
    handler: Arc<H>,
    registry: LinkRegistry,
    listener_config: ListenerConfig,
    link_config: LinkConfig,
}

impl<H> Clone for GatewayServer<H> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            upgrader: Arc::clone(&self.upgrader),
            handler: Arc::clone(&self.handler),
            registry: self.registry.clone(),
            listener_config: self.listener_config.clone(),
            link_config: self.link_config.clone(),
        }
    }
}

impl<H: MessageHandler> GatewayServer<H> {
    pub fn new(
        limiter: Arc<TokenLimiter>,
        upgrader: Arc<Upgrader>,
        handler: H,
        listener_config: ListenerConfig,
        link_config: LinkConfig,
    ) -> Self {
        Self {
            limiter,
            upgrader,
            handler: Arc::new(handler),
            registry: LinkRegistry::new(),
            listener_config,
            link_config,
        }
    }

    pub fn registry(&self) -> &LinkRegistry {
        &self.registry
    }

    /// Serve until `shutdown` fires, then drain.
    pub async fn run(self, listener: Listener, shutdown: CancellationToken) -> Result<(), ServerError> {
        let tasks = TaskTracker::new();
        tasks.spawn(idle_sweeper(
            self.registry.clone(),
            self.link_config.idle_timeout(),
            shutdown.clone(),
        ));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let server = self.clone();
                        tasks.spawn(async move { server.handle_connection(stream, peer_addr).await });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }

        drop(listener);
        tracing::info!(links = self.registry.len(), "Draining links");
        self.registry
            .close_all(CloseFrame::new(CLOSE_GOING_AWAY, "server shutdown"));
        tasks.close();

        let drain = self.listener_config.drain_timeout();
        if tokio::time::timeout(drain, tasks.wait()).await.is_err() {
            tracing::warn!(
                remaining = self.registry.len(),
                timeout = ?drain,
                "Drain timed out"
            );
        }
        Ok(())
    }

    async fn handle_connection(&self, mut stream: TcpStream, peer_addr: SocketAddr) {
        let Some(permit) = self.limiter.try_admit() else {
            metrics::record_admission_rejected();
            tracing::debug!(
                peer_addr = %peer_addr,
                capacity = self.limiter.current_capacity(),
                "Admission rejected"
            );
            let _ = tokio::time::timeout(REJECT_DRAIN, discard_request_head(&mut stream)).await;
            if let Err(e) = response::write_status(&mut stream, 503, "gateway at capacity").await {
                tracing::trace!(peer_addr = %peer_addr, error = %e, "Failed to write 503");
            }
            return;
        };

        let timeout = self.listener_config.handshake_timeout();
        let start = std::time::Instant::now();
        let upgraded = match tokio::time::timeout(timeout, self.upgrader.upgrade(stream)).await {
            Ok(Ok(upgraded)) => upgraded,
            Ok(Err(e)) => {
                tracing::debug!(peer_addr = %peer_addr, error = %e, status = e.status(), "Upgrade failed");
                return;
            }
            Err(_) => {
                tracing::debug!(peer_addr = %peer_addr, timeout = ?timeout, "Handshake timed out");
                metrics::record_upgrade("timeout", start);
                return;
            }
        };

        self.serve(upgraded, peer_addr).await;
        drop(permit);
    }

    /// Run one established link to completion.
    pub async fn serve<S>(&self, upgraded: Upgraded<S>, peer_addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Upgraded {
            stream,
            session,
            status,
            compression,
        } = upgraded;
        let (read_half, write_half) = tokio::io::split(stream);

        let (message_tx, message_rx) = mpsc::channel(self.link_config.send_buffer);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);

        let link = Arc::new(Link::new(session, status, peer_addr, message_tx));
        let _guard = self.registry.register(Arc::clone(&link));
        let user = link.session().user_info();
        tracing::info!(
            link_id = %link.id(),
            peer_addr = %peer_addr,
            biz_id = user.biz_id,
            user_id = user.user_id,
            compressed = compression.is_some(),
            "Link established"
        );

        let mut reader = Reader::new(read_half, Role::Server, compression.as_ref())
            .with_max_message_size(self.listener_config.max_message_size)
            .with_control_handler(ReplyQueue::new(control_tx));
        let writer = Writer::new(write_half, Role::Server, compression.as_ref());
        let write_task = tokio::spawn(write_loop(writer, message_rx, control_rx, Arc::clone(&link)));

        self.handler.on_open(&link).await;

        let end = loop {
            let read = tokio::select! {
                _ = link.closed() => break ReadEnd::Local,
                read = reader.read_message() => read,
            };
            match read {
                Ok((opcode, payload)) => {
                    link.touch();
                    metrics::record_message("in");
                    if let Err(e) = self.handler.on_message(&link, Message { opcode, payload }).await {
                        tracing::debug!(link_id = %link.id(), error = %e, "Handler ended link");
                        break ReadEnd::Local;
                    }
                }
                Err(CodecError::Closed(frame)) => {
                    tracing::debug!(link_id = %link.id(), close = ?frame, "Peer closed link");
                    break ReadEnd::Peer;
                }
                Err(CodecError::Eof) => break ReadEnd::Peer,
                Err(e) => {
                    tracing::debug!(link_id = %link.id(), error = %e, "Link read failed");
                    if let Some(code) = e.close_code() {
                        link.close_with(CloseFrame::new(code, ""));
                    }
                    break ReadEnd::Failed;
                }
            }
        };

        link.close();
        self.handler.on_close(&link).await;
        if let Err(e) = write_task.await {
            tracing::warn!(link_id = %link.id(), error = %e, "Write task failed");
        }

        // Consume what the peer still sends so our FIN is not turned into a
        // reset that discards the close frame before the peer reads it.
        match end {
            ReadEnd::Peer => {}
            ReadEnd::Local => {
                let _ = tokio::time::timeout(CLOSE_LINGER, async {
                    while reader.read_message().await.is_ok() {}
                })
                .await;
            }
            ReadEnd::Failed => {
                let _ = tokio::time::timeout(CLOSE_LINGER, discard(reader.into_inner())).await;
            }
        }
        tracing::info!(link_id = %link.id(), "Link closed");
    }
}

/// Drive the write half until the link closes.
async fn write_loop<W>(
    mut writer: Writer<W>,
    mut messages: mpsc::Receiver<Message>,
    mut control: mpsc::Receiver<ControlFrame>,
    link: Arc<Link>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let result = tokio::select! {
            biased;
            Some(frame) = control.recv() => {
                let is_close = matches!(frame, ControlFrame::Close(_));
                let result = writer.write_control(&frame).await;
                if is_close {
                    // Close answered; nothing else may follow it.
                    let _ = writer.shutdown().await;
                    return;
                }
                result
            }
            Some(message) = messages.recv() => {
                metrics::record_message("out");
                writer.write_message(message.opcode, &message.payload).await
            }
            _ = link.closed() => break,
            else => break,
        };
        if let Err(e) = result {
            tracing::debug!(link_id = %link.id(), error = %e, "Link write failed");
            link.close();
            return;
        }
    }

    if let Err(e) = writer.close(link.close_frame().cloned()).await {
        tracing::trace!(link_id = %link.id(), error = %e, "Failed to send close frame");
    }
    let _ = writer.shutdown().await;
}

/// Read and drop bytes until the peer hangs up.
async fn discard<R: AsyncRead + Unpin>(mut io: R) {
    let mut sink = [0u8; 4096];
    while matches!(io.read(&mut sink).await, Ok(n) if n > 0) {}
}

/// Periodically close idle links that allow it.
async fn idle_sweeper(registry: LinkRegistry, timeout: Duration, shutdown: CancellationToken) {
    let period = (timeout / 4).max(Duration::from_millis(100));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let closed = registry.sweep_idle(timeout);
                if closed > 0 {
                    tracing::debug!(closed, "Idle links closed");
                }
            }
        }
    }
}
