//! Message writer.
//!
//! Every message goes out as a single frame and every call ends with a flush,
//! so message boundaries on the wire match `write` calls.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::control::{CloseFrame, ControlFrame};
use super::frame::{apply_mask, FrameHeader, OpCode, Role};
use super::CodecError;
use crate::compression::{CompressionState, Deflater};

/// Writes whole messages to one direction of a connection.
pub struct Writer<W> {
    io: W,
    role: Role,
    opcode: OpCode,
    deflater: Option<Deflater>,
    buf: Vec<u8>,
}

impl<W> std::fmt::Debug for Writer<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("role", &self.role)
            .field("opcode", &self.opcode)
            .field("compressed", &self.deflater.is_some())
            .finish_non_exhaustive()
    }
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    /// Wrap `io`. `write` sends binary messages unless `with_opcode` says
    /// otherwise; all data messages are compressed when `compression` is set.
    pub fn new(io: W, role: Role, compression: Option<&CompressionState>) -> Self {
        Self {
            io,
            role,
            opcode: OpCode::Binary,
            deflater: compression.map(|state| state.deflater(role)),
            buf: Vec::new(),
        }
    }

    pub fn with_opcode(mut self, opcode: OpCode) -> Self {
        self.opcode = opcode;
        self
    }

    pub fn is_compressed(&self) -> bool {
        self.deflater.is_some()
    }

    /// Write one message with the writer's default type.
    pub async fn write(&mut self, payload: &[u8]) -> Result<(), CodecError> {
        self.write_message(self.opcode, payload).await
    }

    /// Write one `Text` or `Binary` message.
    pub async fn write_message(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), CodecError> {
        if !matches!(opcode, OpCode::Text | OpCode::Binary) {
            return Err(CodecError::Protocol(format!("{opcode:?} is not a message type")));
        }

        match self.deflater.as_mut() {
            Some(deflater) => {
                let packed = deflater.compress(payload)?;
                self.write_frame(opcode, true, packed).await
            }
            None => self.write_frame(opcode, false, payload.to_vec()).await,
        }
    }

    pub async fn write_control(&mut self, frame: &ControlFrame) -> Result<(), CodecError> {
        let payload = frame.payload()?;
        self.write_frame(frame.opcode(), false, payload).await
    }

    /// Send a close frame. The transport itself stays open.
    pub async fn close(&mut self, frame: Option<CloseFrame>) -> Result<(), CodecError> {
        self.write_control(&ControlFrame::Close(frame)).await
    }

    async fn write_frame(
        &mut self,
        opcode: OpCode,
        rsv1: bool,
        mut payload: Vec<u8>,
    ) -> Result<(), CodecError> {
        let mask = self.role.masks_outgoing().then(rand::random::<[u8; 4]>);
        let header = FrameHeader {
            fin: true,
            rsv1,
            opcode,
            mask,
            payload_len: payload.len() as u64,
        };
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        self.buf.clear();
        header.encode(&mut self.buf);
        self.buf.extend_from_slice(&payload);
        self.io.write_all(&self.buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Shut down the write half of the transport.
    pub async fn shutdown(&mut self) -> Result<(), CodecError> {
        self.io.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.io
    }
}
