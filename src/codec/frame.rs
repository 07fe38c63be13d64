//! Frame header layout (RFC 6455 section 5.2).

use tokio::io::{AsyncRead, AsyncReadExt};

use super::CodecError;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Which end of the connection this codec speaks for.
///
/// Clients mask every frame they send; servers never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// Whether frames sent by this side carry a masking key.
    pub fn masks_outgoing(self) -> bool {
        matches!(self, Role::Client)
    }

    /// Whether frames received by this side must carry a masking key.
    pub fn expects_masked(self) -> bool {
        matches!(self, Role::Server)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(CodecError::Protocol(format!("unknown opcode {other:#x}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    /// Set on the first frame of a compressed message.
    pub rsv1: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

impl FrameHeader {
    /// Read one header.
    ///
    /// A peer that closes the stream exactly at a frame boundary yields
    /// `CodecError::Eof`; anything shorter is an I/O error.
    pub async fn read<R>(io: &mut R) -> Result<Self, CodecError>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = [0u8; 2];
        if io.read(&mut head[..1]).await? == 0 {
            return Err(CodecError::Eof);
        }
        io.read_exact(&mut head[1..]).await?;

        let fin = head[0] & 0x80 != 0;
        let rsv1 = head[0] & 0x40 != 0;
        if head[0] & 0x30 != 0 {
            return Err(CodecError::Protocol("reserved bits set".into()));
        }
        let opcode = OpCode::try_from(head[0] & 0x0F)?;
        let masked = head[1] & 0x80 != 0;

        let payload_len = match head[1] & 0x7F {
            126 => u64::from(io.read_u16().await?),
            127 => {
                let len = io.read_u64().await?;
                if len & (1 << 63) != 0 {
                    return Err(CodecError::Protocol("payload length overflow".into()));
                }
                len
            }
            len => u64::from(len),
        };

        if opcode.is_control() {
            if !fin {
                return Err(CodecError::Protocol("fragmented control frame".into()));
            }
            if rsv1 {
                return Err(CodecError::Protocol("compressed control frame".into()));
            }
            if payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(CodecError::Protocol("control frame too long".into()));
            }
        }

        let mask = if masked {
            let mut key = [0u8; 4];
            io.read_exact(&mut key).await?;
            Some(key)
        } else {
            None
        };

        Ok(Self {
            fin,
            rsv1,
            opcode,
            mask,
            payload_len,
        })
    }

    /// Append the encoded header to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let mut first = self.opcode.as_u8();
        if self.fin {
            first |= 0x80;
        }
        if self.rsv1 {
            first |= 0x40;
        }
        buf.push(first);

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        match self.payload_len {
            len if len < 126 => buf.push(mask_bit | len as u8),
            len if len <= u64::from(u16::MAX) => {
                buf.push(mask_bit | 126);
                buf.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len => {
                buf.push(mask_bit | 127);
                buf.extend_from_slice(&len.to_be_bytes());
            }
        }

        if let Some(key) = self.mask {
            buf.extend_from_slice(&key);
        }
    }
}

/// XOR `data` with the masking key. Applying it twice restores the input.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}
