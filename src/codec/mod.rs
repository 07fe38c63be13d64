//! Frame codec.
//!
//! # Data Flow
//! ```text
//! inbound bytes
//!     → frame.rs FrameHeader::read (+ unmask)
//!     → reader.rs: control frames → ControlHandler, data frames → message
//!     → inflate if the first frame had rsv1 set
//!     → Vec<u8> payload
//!
//! outbound payload
//!     → writer.rs: deflate if negotiated, one frame, mask if client
//!     → write + flush
//! ```
//!
//! # Design Decisions
//! - Reader and Writer are independent so a link can drive each direction
//!   from its own task
//! - Control replies travel through a queue (`ReplyQueue`) to the task that
//!   owns the write half

pub mod control;
pub mod frame;
pub mod reader;
pub mod writer;

use thiserror::Error;

pub use control::{CloseFrame, ControlFrame, ControlHandler, IgnoreControl, ReplyQueue};
pub use frame::{OpCode, Role};
pub use reader::Reader;
pub use writer::Writer;

use crate::compression::CompressionError;

/// Error type for reading and writing messages.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    Eof,

    #[error("peer sent close frame")]
    Closed(Option<CloseFrame>),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    #[error("text message is not valid UTF-8")]
    InvalidUtf8,

    #[error("compression error: {0}")]
    Compression(CompressionError),
}

impl From<CompressionError> for CodecError {
    fn from(err: CompressionError) -> Self {
        match err {
            CompressionError::TooLarge { limit } => CodecError::MessageTooLarge { limit },
            other => CodecError::Compression(other),
        }
    }
}

impl CodecError {
    /// Close status to send the peer when this error ends a link, if any.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            CodecError::Protocol(_) | CodecError::Compression(_) => {
                Some(control::CLOSE_PROTOCOL_ERROR)
            }
            CodecError::MessageTooLarge { .. } => Some(control::CLOSE_TOO_BIG),
            CodecError::InvalidUtf8 => Some(control::CLOSE_INVALID_PAYLOAD),
            CodecError::Io(_) | CodecError::Eof | CodecError::Closed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::{CompressionParams, CompressionState};
    use tokio::io::{duplex, AsyncWriteExt};

    fn compression(client_no_context: bool) -> CompressionState {
        CompressionState {
            params: CompressionParams {
                server_max_window_bits: 15,
                client_max_window_bits: Some(12),
                server_no_context_takeover: true,
                client_no_context_takeover: client_no_context,
            },
            level: 6,
        }
    }

    fn payloads() -> Vec<Vec<u8>> {
        vec![
            Vec::new(),
            b"hello".to_vec(),
            vec![0xAB; 200],
            b"abcdefgh".iter().copied().cycle().take(100_000).collect(),
        ]
    }

    #[tokio::test]
    async fn round_trip_uncompressed() {
        let (client, server) = duplex(1 << 20);
        let mut writer = Writer::new(client, Role::Client, None);
        let mut reader = Reader::new(server, Role::Server, None);

        for payload in payloads() {
            writer.write(&payload).await.unwrap();
            assert_eq!(reader.read().await.unwrap(), payload);
        }
    }

    #[tokio::test]
    async fn round_trip_compressed_both_directions() {
        for client_no_context in [true, false] {
            let state = compression(client_no_context);
            let (client, server) = duplex(1 << 20);
            let (client_rd, client_wr) = tokio::io::split(client);
            let (server_rd, server_wr) = tokio::io::split(server);

            let mut client_writer = Writer::new(client_wr, Role::Client, Some(&state));
            let mut server_reader = Reader::new(server_rd, Role::Server, Some(&state));
            let mut server_writer = Writer::new(server_wr, Role::Server, Some(&state));
            let mut client_reader = Reader::new(client_rd, Role::Client, Some(&state));

            for payload in payloads() {
                client_writer.write(&payload).await.unwrap();
                assert_eq!(server_reader.read().await.unwrap(), payload);

                server_writer.write(&payload).await.unwrap();
                assert_eq!(client_reader.read().await.unwrap(), payload);
            }
        }
    }

    #[tokio::test]
    async fn compressed_frames_have_rsv1() {
        let state = compression(true);
        let (client, mut server) = duplex(1 << 16);
        let mut writer = Writer::new(client, Role::Server, Some(&state)).with_opcode(OpCode::Text);
        writer.write(b"compress me please").await.unwrap();

        let header = frame::FrameHeader::read(&mut server).await.unwrap();
        assert!(header.rsv1);
        assert_eq!(header.opcode, OpCode::Text);
        assert!(header.mask.is_none());
    }

    #[tokio::test]
    async fn fragments_are_reassembled_around_control_frames() {
        let (mut client, server) = duplex(1 << 16);
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let mut reader = Reader::new(server, Role::Server, None).with_control_handler(ReplyQueue::new(tx));

        let mut wire = Vec::new();
        for (fin, opcode, data) in [
            (false, OpCode::Text, &b"hel"[..]),
            (true, OpCode::Ping, &b"p"[..]),
            (true, OpCode::Continuation, &b"lo"[..]),
        ] {
            let key = [9, 8, 7, 6];
            frame::FrameHeader {
                fin,
                rsv1: false,
                opcode,
                mask: Some(key),
                payload_len: data.len() as u64,
            }
            .encode(&mut wire);
            let mut masked = data.to_vec();
            frame::apply_mask(&mut masked, key);
            wire.extend_from_slice(&masked);
        }
        client.write_all(&wire).await.unwrap();

        assert_eq!(
            reader.read_message().await.unwrap(),
            (OpCode::Text, b"hello".to_vec())
        );
        assert_eq!(rx.recv().await, Some(ControlFrame::Pong(b"p".to_vec())));
    }

    #[tokio::test]
    async fn close_frame_ends_reading() {
        let (client, server) = duplex(1 << 16);
        let mut writer = Writer::new(client, Role::Client, None);
        let mut reader = Reader::new(server, Role::Server, None);

        writer
            .close(Some(CloseFrame::new(control::CLOSE_NORMAL, "done")))
            .await
            .unwrap();
        match reader.read().await {
            Err(CodecError::Closed(Some(close))) => {
                assert_eq!(close.code, control::CLOSE_NORMAL);
                assert_eq!(close.reason, "done");
            }
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_rejects_unmasked_frames() {
        let (client, server) = duplex(1 << 16);
        let mut writer = Writer::new(client, Role::Server, None);
        let mut reader = Reader::new(server, Role::Server, None);

        writer.write(b"unmasked").await.unwrap();
        assert!(matches!(reader.read().await, Err(CodecError::Protocol(_))));
    }

    #[tokio::test]
    async fn compressed_frame_requires_negotiation() {
        let state = compression(true);
        let (client, server) = duplex(1 << 16);
        let mut writer = Writer::new(client, Role::Client, Some(&state));
        let mut reader = Reader::new(server, Role::Server, None);

        writer.write(b"payload").await.unwrap();
        assert!(matches!(reader.read().await, Err(CodecError::Protocol(_))));
    }

    #[tokio::test]
    async fn size_limit_applies_before_and_after_inflate() {
        let (client, server) = duplex(1 << 20);
        let mut writer = Writer::new(client, Role::Client, None);
        let mut reader = Reader::new(server, Role::Server, None).with_max_message_size(1024);
        writer.write(&[1u8; 2048]).await.unwrap();
        assert!(matches!(
            reader.read().await,
            Err(CodecError::MessageTooLarge { limit: 1024 })
        ));

        let state = compression(true);
        let (client, server) = duplex(1 << 20);
        let mut writer = Writer::new(client, Role::Client, Some(&state));
        let mut reader = Reader::new(server, Role::Server, Some(&state)).with_max_message_size(1024);
        writer.write(&[0u8; 64 * 1024]).await.unwrap();
        assert!(matches!(
            reader.read().await,
            Err(CodecError::MessageTooLarge { limit: 1024 })
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_text_is_rejected() {
        let (client, server) = duplex(1 << 16);
        let mut writer = Writer::new(client, Role::Client, None).with_opcode(OpCode::Text);
        let mut reader = Reader::new(server, Role::Server, None);
        writer.write(&[0xff, 0xfe]).await.unwrap();
        assert!(matches!(reader.read().await, Err(CodecError::InvalidUtf8)));
    }

    #[tokio::test]
    async fn clean_eof_is_reported() {
        let (client, server) = duplex(64);
        drop(client);
        let mut reader = Reader::new(server, Role::Server, None);
        assert!(matches!(reader.read().await, Err(CodecError::Eof)));
    }
}
