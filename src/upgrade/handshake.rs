//! Handshake state machine.
//!
//! # Responsibilities
//! - Read the request head line by line straight off the transport
//! - Fire the matching hook as each piece arrives
//! - Write exactly one response: 101 on success, an error status otherwise
//!
//! # Design Decisions
//! - Each state owns what it needs; nothing is shared with the hooks except
//!   the `HeaderLatch` passed in explicitly
//! - After an auth failure the rest of the head is read (without hooks) so
//!   the error response is not lost to a reset
//! - The head is capped at `MAX_HEAD_SIZE` bytes in total

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};

use super::hooks::{HeaderLatch, UpgradeHooks};
use super::response::{self, WEBSOCKET_VERSION};
use super::{SessionStatus, UpgradeError, Upgraded};
use crate::compression::{parse_offers, CompressionState};
use crate::session::{Session, UserInfo};

/// Largest request head accepted, request line included.
pub const MAX_HEAD_SIZE: usize = 8 * 1024;

/// Protocol headers collected while the hooks see every header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHead {
    pub host: Option<String>,
    pub upgrade: Option<String>,
    pub connection: Option<String>,
    pub key: Option<String>,
    pub version: Option<String>,
    pub extensions: Vec<String>,
}

impl RequestHead {
    fn record(&mut self, name: &str, value: &str) {
        let value = value.to_string();
        if name.eq_ignore_ascii_case("host") {
            self.host = Some(value);
        } else if name.eq_ignore_ascii_case("upgrade") {
            self.upgrade = Some(value);
        } else if name.eq_ignore_ascii_case("connection") {
            self.connection = Some(value);
        } else if name.eq_ignore_ascii_case("sec-websocket-key") {
            self.key = Some(value);
        } else if name.eq_ignore_ascii_case("sec-websocket-version") {
            self.version = Some(value);
        } else if name.eq_ignore_ascii_case("sec-websocket-extensions") {
            self.extensions.push(value);
        }
    }

    /// Check the upgrade headers and return the client key.
    fn validate(&self) -> Result<&str, UpgradeError> {
        if self.host.is_none() {
            return Err(UpgradeError::Malformed("missing Host header".into()));
        }
        if !has_token(self.upgrade.as_deref(), "websocket") {
            return Err(UpgradeError::Malformed("Upgrade header must name websocket".into()));
        }
        if !has_token(self.connection.as_deref(), "upgrade") {
            return Err(UpgradeError::Malformed("Connection header must include upgrade".into()));
        }
        if self.version.as_deref() != Some(WEBSOCKET_VERSION) {
            return Err(UpgradeError::UnsupportedVersion(self.version.clone()));
        }
        match self.key.as_deref() {
            Some(key) if key.len() == 24 && key.ends_with("==") => Ok(key),
            _ => Err(UpgradeError::Malformed("invalid Sec-WebSocket-Key".into())),
        }
    }
}

fn has_token(value: Option<&str>, token: &str) -> bool {
    value.is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
}

/// Where a handshake is.
#[derive(Debug)]
pub enum HandshakeState {
    /// Waiting for the request line.
    AwaitingTarget,
    /// Authenticated; header lines are being read.
    AwaitingHeaders {
        user: UserInfo,
        head: RequestHead,
        latch: HeaderLatch,
    },
    /// Head complete; the session is bound and the response written here.
    PreResponse {
        user: UserInfo,
        accept: String,
        compression: Option<CompressionState>,
    },
    /// 101 written.
    Done {
        session: Session,
        status: SessionStatus,
        compression: Option<CompressionState>,
    },
    /// Failed. `drain` asks for the rest of the head to be read first.
    Aborted { error: UpgradeError, drain: bool },
}

impl HandshakeState {
    pub fn name(&self) -> &'static str {
        match self {
            HandshakeState::AwaitingTarget => "awaiting_target",
            HandshakeState::AwaitingHeaders { .. } => "awaiting_headers",
            HandshakeState::PreResponse { .. } => "pre_response",
            HandshakeState::Done { .. } => "done",
            HandshakeState::Aborted { .. } => "aborted",
        }
    }
}

/// Run the server side of the handshake on `stream`.
///
/// On failure the matching error response has already been written (unless
/// the transport itself failed) and the stream is dropped.
pub async fn accept<S, H>(stream: S, hooks: &H) -> Result<Upgraded<S>, UpgradeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: UpgradeHooks + ?Sized,
{
    let mut io = BufReader::new(stream);
    let mut budget = MAX_HEAD_SIZE;
    let mut state = HandshakeState::AwaitingTarget;

    let (session, status, compression) = loop {
        tracing::trace!(state = state.name(), "Handshake step");
        state = match state {
            HandshakeState::AwaitingTarget => {
                let line = match read_line(&mut io, &mut budget).await {
                    Ok(line) => line,
                    Err(error) => {
                        state = HandshakeState::Aborted { error, drain: false };
                        continue;
                    }
                };
                // A bad request line still leaves the headers in the socket.
                let target = match parse_request_line(&line) {
                    Ok(target) => target,
                    Err(error) => {
                        state = HandshakeState::Aborted { error, drain: true };
                        continue;
                    }
                };
                match hooks.authenticate(&target) {
                    Ok(user) => HandshakeState::AwaitingHeaders {
                        user,
                        head: RequestHead::default(),
                        latch: HeaderLatch::default(),
                    },
                    Err(error) => HandshakeState::Aborted { error, drain: true },
                }
            }

            HandshakeState::AwaitingHeaders {
                user,
                mut head,
                mut latch,
            } => match read_line(&mut io, &mut budget).await {
                Err(error) => HandshakeState::Aborted { error, drain: false },
                Ok(line) if line.is_empty() => match head.validate() {
                    Ok(key) => {
                        let offers = parse_offers(head.extensions.iter().map(String::as_str));
                        HandshakeState::PreResponse {
                            user: user.with_auto_close(latch.auto_close),
                            accept: response::accept_key(key),
                            compression: hooks.negotiate(&offers),
                        }
                    }
                    Err(error) => HandshakeState::Aborted { error, drain: false },
                },
                Ok(line) => match parse_header(&line) {
                    Err(error) => HandshakeState::Aborted { error, drain: false },
                    Ok((name, value)) => {
                        head.record(name, value);
                        match hooks.on_header(name, value, &mut latch) {
                            Ok(()) => HandshakeState::AwaitingHeaders { user, head, latch },
                            Err(error) => HandshakeState::Aborted { error, drain: true },
                        }
                    }
                },
            },

            HandshakeState::PreResponse {
                user,
                accept,
                compression,
            } => match hooks.before_upgrade(user).await {
                Ok((session, status)) => {
                    match response::write_switching_protocols(&mut io, &accept, compression.as_ref())
                        .await
                    {
                        Ok(()) => HandshakeState::Done {
                            session,
                            status,
                            compression,
                        },
                        Err(e) => HandshakeState::Aborted {
                            error: e.into(),
                            drain: false,
                        },
                    }
                }
                Err(error) => HandshakeState::Aborted { error, drain: false },
            },

            HandshakeState::Done {
                session,
                status,
                compression,
            } => break (session, status, compression),

            HandshakeState::Aborted { error, drain } => {
                if drain {
                    drain_head(&mut io, &mut budget).await;
                }
                if !matches!(error, UpgradeError::Io(_)) {
                    if let Err(e) = response::write_rejection(&mut io, &error).await {
                        tracing::debug!(error = %e, "Failed to write handshake rejection");
                    }
                }
                return Err(error);
            }
        };
    };

    Ok(Upgraded {
        stream: io,
        session,
        status,
        compression,
    })
}

/// Read one CRLF- (or LF-) terminated line, charging it to `budget`.
async fn read_line<R>(io: &mut R, budget: &mut usize) -> Result<String, UpgradeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let read = (&mut *io)
        .take(*budget as u64)
        .read_until(b'\n', &mut line)
        .await?;

    if !line.ends_with(b"\n") {
        return Err(if read == *budget {
            UpgradeError::HeadTooLarge {
                limit: MAX_HEAD_SIZE,
            }
        } else {
            UpgradeError::Malformed("connection closed mid-request".into())
        });
    }
    *budget -= read;

    line.pop();
    if line.ends_with(b"\r") {
        line.pop();
    }
    String::from_utf8(line).map_err(|_| UpgradeError::Malformed("request head is not UTF-8".into()))
}

/// Read and discard header lines up to the blank line. Best effort.
async fn drain_head<R>(io: &mut R, budget: &mut usize)
where
    R: AsyncBufRead + Unpin,
{
    while let Ok(line) = read_line(io, budget).await {
        if line.is_empty() {
            break;
        }
    }
}

/// Consume a whole request head without acting on it.
///
/// Used before answering a connection that will not be upgraded at all, so
/// the response is not lost to a reset caused by unread request bytes.
pub async fn discard_request_head<S>(stream: &mut S)
where
    S: AsyncRead + Unpin,
{
    let mut budget = MAX_HEAD_SIZE;
    let mut io = BufReader::new(stream);
    drain_head(&mut io, &mut budget).await;
}

/// Validate `GET <target> HTTP/1.1` and return the target.
fn parse_request_line(line: &str) -> Result<String, UpgradeError> {
    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(UpgradeError::Malformed(format!("bad request line {line:?}")));
    };

    if version != "HTTP/1.1" {
        return Err(UpgradeError::Malformed(format!("unsupported {version}")));
    }
    if method != "GET" {
        return Err(UpgradeError::MethodNotAllowed(method.to_string()));
    }
    if target.is_empty() {
        return Err(UpgradeError::Malformed("empty request target".into()));
    }
    Ok(target.to_string())
}

fn parse_header(line: &str) -> Result<(&str, &str), UpgradeError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| UpgradeError::Malformed(format!("bad header line {line:?}")))?;
    if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(UpgradeError::Malformed(format!("bad header name {name:?}")));
    }
    Ok((name, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthError;
    use crate::compression::{CompressionParams, ExtensionOffer};
    use crate::session::{MemoryBackend, SessionBuilder};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    /// Records the order hooks fire in.
    struct Recorder {
        calls: Mutex<Vec<String>>,
        sessions: SessionBuilder,
        reject_token: bool,
    }

    impl Recorder {
        fn new(reject_token: bool) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                sessions: SessionBuilder::new(Arc::new(MemoryBackend::new())),
                reject_token,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UpgradeHooks for Recorder {
        fn authenticate(&self, target: &str) -> Result<UserInfo, UpgradeError> {
            self.calls.lock().unwrap().push(format!("auth {target}"));
            if self.reject_token {
                return Err(AuthError::InvalidToken("bad".into()).into());
            }
            Ok(UserInfo::new(1, 7))
        }

        fn on_header(&self, name: &str, value: &str, latch: &mut HeaderLatch) -> Result<(), UpgradeError> {
            self.calls.lock().unwrap().push(format!("header {name}"));
            if name.eq_ignore_ascii_case("x-autoclose") {
                latch.auto_close = value == "true";
            }
            Ok(())
        }

        fn negotiate(&self, offers: &[ExtensionOffer]) -> Option<CompressionState> {
            self.calls.lock().unwrap().push(format!("negotiate {}", offers.len()));
            (!offers.is_empty()).then(|| CompressionState {
                params: CompressionParams::default(),
                level: 1,
            })
        }

        async fn before_upgrade(&self, user: UserInfo) -> Result<(Session, SessionStatus), UpgradeError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("bind auto_close={}", user.auto_close));
            let (session, is_new) = self.sessions.build(user).await?;
            let status = if is_new {
                SessionStatus::Created
            } else {
                SessionStatus::Existing
            };
            Ok((session, status))
        }
    }

    const REQUEST: &str = "GET /ws?token=t HTTP/1.1\r\n\
        Host: localhost\r\n\
        Upgrade: websocket\r\n\
        Connection: keep-alive, Upgrade\r\n\
        X-AutoClose: true\r\n\
        Sec-WebSocket-Extensions: permessage-deflate\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    async fn run(request: &str, hooks: &Recorder) -> (Result<Upgraded<tokio::io::DuplexStream>, UpgradeError>, String) {
        let (mut client, server) = duplex(1 << 16);
        client.write_all(request.as_bytes()).await.unwrap();
        let result = accept(server, hooks).await;

        let mut response = vec![0u8; 4096];
        let n = client.read(&mut response).await.unwrap_or(0);
        response.truncate(n);
        (result, String::from_utf8_lossy(&response).into_owned())
    }

    #[tokio::test]
    async fn hooks_fire_in_state_order() {
        let hooks = Recorder::new(false);
        let (result, response) = run(REQUEST, &hooks).await;
        let upgraded = result.unwrap();

        assert_eq!(upgraded.status, SessionStatus::Created);
        assert!(upgraded.session.user_info().auto_close);
        assert!(upgraded.compression.is_some());
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.contains("Sec-WebSocket-Extensions: permessage-deflate\r\n"));

        let calls = hooks.calls();
        assert_eq!(calls.first().map(String::as_str), Some("auth /ws?token=t"));
        assert_eq!(calls.iter().filter(|c| c.starts_with("header ")).count(), 7);
        assert_eq!(calls[calls.len() - 2], "negotiate 1");
        assert_eq!(calls[calls.len() - 1], "bind auto_close=true");
    }

    #[tokio::test]
    async fn auth_failure_stops_before_headers() {
        let hooks = Recorder::new(true);
        let (result, response) = run(REQUEST, &hooks).await;

        assert!(matches!(result, Err(UpgradeError::Auth(_))));
        assert!(response.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert_eq!(hooks.calls(), vec!["auth /ws?token=t".to_string()]);
    }

    #[tokio::test]
    async fn protocol_errors_map_to_status() {
        let cases = [
            ("POST /ws HTTP/1.1\r\n\r\n", 405),
            ("GET /ws HTTP/1.0\r\n\r\n", 400),
            ("GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 8\r\n\r\n", 426),
            ("GET /ws HTTP/1.1\r\nHost: x\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n", 400),
            ("GET /ws HTTP/1.1\r\nnot a header\r\n\r\n", 400),
        ];
        for (request, status) in cases {
            let hooks = Recorder::new(false);
            let (result, response) = run(request, &hooks).await;
            let error = result.unwrap_err();
            assert_eq!(error.status(), status, "{request:?}");
            assert!(
                response.starts_with(&format!("HTTP/1.1 {status} ")),
                "{response:?}"
            );
            assert!(!hooks.calls().iter().any(|c| c.starts_with("bind")));
        }
    }

    #[tokio::test]
    async fn rejected_request_line_consumes_headers() {
        let hooks = Recorder::new(false);
        let request = format!(
            "DELETE /ws HTTP/1.1\r\nHost: localhost\r\nX-Padding: {}\r\n\r\n",
            "p".repeat(2048)
        );
        // The pipe is far smaller than the request: the client can only
        // finish writing if the server reads every header.
        let (mut client, server) = duplex(64);
        let writer = tokio::spawn(async move {
            let written = client.write_all(request.as_bytes()).await;
            (client, written)
        });

        let result = accept(server, &hooks).await;
        assert!(matches!(result, Err(UpgradeError::MethodNotAllowed(_))));

        let (mut client, written) = writer.await.unwrap();
        written.unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 405 "), "{response:?}");
        assert!(hooks.calls().is_empty());
    }

    #[tokio::test]
    async fn discard_request_head_stops_at_blank_line() {
        let (mut client, mut server) = duplex(1 << 12);
        client
            .write_all(b"GET /ws HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        // The client stays open, so only the blank line can end the read.
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            discard_request_head(&mut server),
        )
        .await
        .unwrap();
        drop(client);
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let hooks = Recorder::new(false);
        let request = format!(
            "GET /ws HTTP/1.1\r\nX-Padding: {}\r\n\r\n",
            "a".repeat(MAX_HEAD_SIZE)
        );
        let (result, _) = run(&request, &hooks).await;
        assert!(matches!(result, Err(UpgradeError::HeadTooLarge { .. })));
    }

    #[tokio::test]
    async fn pipelined_bytes_stay_in_stream() {
        let hooks = Recorder::new(false);
        let (mut client, server) = duplex(1 << 16);
        client
            .write_all(format!("{REQUEST}\u{1}\u{2}").as_bytes())
            .await
            .unwrap();

        let mut upgraded = accept(server, &hooks).await.unwrap();
        let mut leftover = [0u8; 2];
        upgraded.stream.read_exact(&mut leftover).await.unwrap();
        assert_eq!(leftover, [1, 2]);
    }
}
