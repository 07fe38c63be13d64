//! Handshake responses.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use super::UpgradeError;
use crate::compression::CompressionState;

/// The only protocol version this gateway speaks.
pub const WEBSOCKET_VERSION: &str = "13";

/// `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(client_key: &str) -> String {
    derive_accept_key(client_key.as_bytes())
}

/// Write the `101 Switching Protocols` response.
pub async fn write_switching_protocols<W>(
    io: &mut W,
    accept: &str,
    compression: Option<&CompressionState>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut head = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n"
    );
    if let Some(state) = compression {
        head.push_str("Sec-WebSocket-Extensions: ");
        head.push_str(&state.params.to_header_value());
        head.push_str("\r\n");
    }
    head.push_str("\r\n");

    io.write_all(head.as_bytes()).await?;
    io.flush().await
}

/// Write a plain-text error response for an aborted handshake.
pub async fn write_rejection<W>(io: &mut W, error: &UpgradeError) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_status(io, error.status(), &error.to_string()).await
}

/// Write a complete non-upgrade response and flush it.
pub async fn write_status<W>(io: &mut W, status: u16, body: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut head = format!(
        "HTTP/1.1 {status} {}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n",
        reason_phrase(status),
        body.len()
    );
    if status == 426 {
        head.push_str(&format!("Sec-WebSocket-Version: {WEBSOCKET_VERSION}\r\n"));
    }
    head.push_str("\r\n");
    head.push_str(body);

    io.write_all(head.as_bytes()).await?;
    io.flush().await
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        405 => "Method Not Allowed",
        426 => "Upgrade Required",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthError;

    #[test]
    fn accept_key_matches_rfc_example() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[tokio::test]
    async fn rejection_is_a_complete_response() {
        let mut out = Vec::new();
        write_rejection(&mut out, &UpgradeError::Auth(AuthError::MissingToken))
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\nauthentication failed: missing token"));
    }

    #[tokio::test]
    async fn version_mismatch_advertises_supported_version() {
        let mut out = Vec::new();
        write_rejection(&mut out, &UpgradeError::UnsupportedVersion(Some("8".into())))
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
    }
}
