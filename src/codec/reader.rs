//! Message reader.
//!
//! # Responsibilities
//! - Parse frames off the transport in arrival order
//! - Hand control frames to a `ControlHandler` and skip them
//! - Reassemble fragmented messages and inflate compressed ones
//!
//! # Design Decisions
//! - The compression flag is taken from the first frame of a message only
//! - The size limit is checked before payload bytes are buffered and again
//!   after inflation

use tokio::io::{AsyncRead, AsyncReadExt};

use super::control::{ControlFrame, ControlHandler, IgnoreControl};
use super::frame::{apply_mask, FrameHeader, OpCode, Role};
use super::CodecError;
use crate::compression::{CompressionState, Inflater};

/// Default largest message accepted, after decompression.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Reads whole messages from one direction of a connection.
pub struct Reader<R> {
    io: R,
    role: Role,
    inflater: Option<Inflater>,
    max_message_size: usize,
    handler: Box<dyn ControlHandler>,
}

impl<R> std::fmt::Debug for Reader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("role", &self.role)
            .field("compressed", &self.inflater.is_some())
            .field("max_message_size", &self.max_message_size)
            .finish_non_exhaustive()
    }
}

impl<R: AsyncRead + Unpin> Reader<R> {
    /// Wrap `io`. Compressed messages are accepted only when `compression`
    /// was negotiated.
    pub fn new(io: R, role: Role, compression: Option<&CompressionState>) -> Self {
        Self {
            io,
            role,
            inflater: compression.map(|state| state.inflater(role)),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            handler: Box::new(IgnoreControl),
        }
    }

    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    pub fn with_control_handler(mut self, handler: impl ControlHandler + 'static) -> Self {
        self.handler = Box::new(handler);
        self
    }

    /// Read the next message payload.
    pub async fn read(&mut self) -> Result<Vec<u8>, CodecError> {
        let (_, payload) = self.read_message().await?;
        Ok(payload)
    }

    /// Read the next message along with its type (`Text` or `Binary`).
    ///
    /// A close frame from the peer ends the stream with `CodecError::Closed`
    /// after the control handler has seen it.
    pub async fn read_message(&mut self) -> Result<(OpCode, Vec<u8>), CodecError> {
        let mut started: Option<(OpCode, bool)> = None;
        let mut buf = Vec::new();

        loop {
            let header = FrameHeader::read(&mut self.io).await?;
            if header.mask.is_some() != self.role.expects_masked() {
                return Err(CodecError::Protocol(match self.role {
                    Role::Server => "client frame is not masked".into(),
                    Role::Client => "server frame is masked".into(),
                }));
            }

            if header.opcode.is_control() {
                let mut payload = Vec::new();
                self.read_payload(&header, &mut payload).await?;
                let frame = ControlFrame::from_parts(header.opcode, payload)?;
                self.handler.on_control(&frame)?;
                if let ControlFrame::Close(close) = frame {
                    return Err(CodecError::Closed(close));
                }
                continue;
            }

            match (header.opcode, started) {
                (OpCode::Continuation, None) => {
                    return Err(CodecError::Protocol("continuation without a message".into()));
                }
                (OpCode::Continuation, Some(_)) => {
                    if header.rsv1 {
                        return Err(CodecError::Protocol("rsv1 set on continuation".into()));
                    }
                }
                (_, Some(_)) => {
                    return Err(CodecError::Protocol("message interleaved with another".into()));
                }
                (opcode, None) => {
                    if header.rsv1 && self.inflater.is_none() {
                        return Err(CodecError::Protocol(
                            "compressed frame without negotiated compression".into(),
                        ));
                    }
                    started = Some((opcode, header.rsv1));
                }
            }

            let total = (buf.len() as u64).saturating_add(header.payload_len);
            if total > self.max_message_size as u64 {
                return Err(CodecError::MessageTooLarge {
                    limit: self.max_message_size,
                });
            }
            self.read_payload(&header, &mut buf).await?;

            if header.fin {
                break;
            }
        }

        let Some((opcode, compressed)) = started else {
            return Err(CodecError::Protocol("empty message".into()));
        };

        let payload = match (&mut self.inflater, compressed) {
            (Some(inflater), true) => inflater.decompress(&buf, self.max_message_size)?,
            _ => buf,
        };

        if opcode == OpCode::Text && std::str::from_utf8(&payload).is_err() {
            return Err(CodecError::InvalidUtf8);
        }
        Ok((opcode, payload))
    }

    /// Append the frame payload to `buf`, unmasked.
    async fn read_payload(
        &mut self,
        header: &FrameHeader,
        buf: &mut Vec<u8>,
    ) -> Result<(), CodecError> {
        let start = buf.len();
        let len = usize::try_from(header.payload_len).map_err(|_| CodecError::MessageTooLarge {
            limit: self.max_message_size,
        })?;
        buf.resize(start + len, 0);
        self.io.read_exact(&mut buf[start..]).await?;
        if let Some(key) = header.mask {
            apply_mask(&mut buf[start..], key);
        }
        Ok(())
    }

    pub fn get_ref(&self) -> &R {
        &self.io
    }

    pub fn into_inner(self) -> R {
        self.io
    }
}
