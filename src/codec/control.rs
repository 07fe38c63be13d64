//! Control frames and what the reader does with them.

use tokio::sync::mpsc;

use super::frame::{OpCode, MAX_CONTROL_PAYLOAD};
use super::CodecError;

/// Normal closure status code.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint is going away (server shutdown, idle timeout).
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
pub const CLOSE_INVALID_PAYLOAD: u16 = 1007;
pub const CLOSE_TOO_BIG: u16 = 1009;

/// Status code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Parse a close payload. An empty payload carries no status.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>, CodecError> {
        match payload {
            [] => Ok(None),
            [_] => Err(CodecError::Protocol("truncated close status".into())),
            [hi, lo, reason @ ..] => {
                let code = u16::from_be_bytes([*hi, *lo]);
                if !is_valid_close_code(code) {
                    return Err(CodecError::Protocol(format!("invalid close code {code}")));
                }
                let reason = std::str::from_utf8(reason)
                    .map_err(|_| CodecError::Protocol("close reason is not UTF-8".into()))?;
                Ok(Some(Self::new(code, reason)))
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(2 + self.reason.len());
        payload.extend_from_slice(&self.code.to_be_bytes());
        payload.extend_from_slice(self.reason.as_bytes());
        payload
    }
}

fn is_valid_close_code(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseFrame>),
}

impl ControlFrame {
    pub fn from_parts(opcode: OpCode, payload: Vec<u8>) -> Result<Self, CodecError> {
        match opcode {
            OpCode::Ping => Ok(ControlFrame::Ping(payload)),
            OpCode::Pong => Ok(ControlFrame::Pong(payload)),
            OpCode::Close => Ok(ControlFrame::Close(CloseFrame::parse(&payload)?)),
            other => Err(CodecError::Protocol(format!("{other:?} is not a control opcode"))),
        }
    }

    pub fn opcode(&self) -> OpCode {
        match self {
            ControlFrame::Ping(_) => OpCode::Ping,
            ControlFrame::Pong(_) => OpCode::Pong,
            ControlFrame::Close(_) => OpCode::Close,
        }
    }

    pub fn payload(&self) -> Result<Vec<u8>, CodecError> {
        let payload = match self {
            ControlFrame::Ping(data) | ControlFrame::Pong(data) => data.clone(),
            ControlFrame::Close(None) => Vec::new(),
            ControlFrame::Close(Some(close)) => close.encode(),
        };
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(CodecError::Protocol("control payload too long".into()));
        }
        Ok(payload)
    }
}

/// Receives control frames seen by a `Reader` between data frames.
pub trait ControlHandler: Send {
    fn on_control(&mut self, frame: &ControlFrame) -> Result<(), CodecError>;
}

/// Drops every control frame. The reader still reports a close.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreControl;

impl ControlHandler for IgnoreControl {
    fn on_control(&mut self, _frame: &ControlFrame) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Queues the replies a peer expects (pong for ping, close for close) for
/// whichever task owns the write half.
#[derive(Debug, Clone)]
pub struct ReplyQueue {
    tx: mpsc::Sender<ControlFrame>,
}

impl ReplyQueue {
    pub fn new(tx: mpsc::Sender<ControlFrame>) -> Self {
        Self { tx }
    }
}

impl ControlHandler for ReplyQueue {
    fn on_control(&mut self, frame: &ControlFrame) -> Result<(), CodecError> {
        let reply = match frame {
            ControlFrame::Ping(data) => ControlFrame::Pong(data.clone()),
            ControlFrame::Pong(_) => return Ok(()),
            ControlFrame::Close(close) => ControlFrame::Close(close.clone()),
        };
        match self.tx.try_send(reply) {
            Ok(()) => Ok(()),
            // Writer side already gone; nothing left to answer.
            Err(mpsc::error::TrySendError::Closed(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Control reply queue full, dropping reply");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_payload_parsing() {
        assert_eq!(CloseFrame::parse(&[]).unwrap(), None);
        assert!(CloseFrame::parse(&[0x03]).is_err());

        let close = CloseFrame::new(CLOSE_GOING_AWAY, "bye");
        assert_eq!(CloseFrame::parse(&close.encode()).unwrap(), Some(close));

        assert!(CloseFrame::parse(&1005u16.to_be_bytes()).is_err());
        assert!(CloseFrame::parse(&[0x03, 0xE8, 0xff, 0xfe]).is_err());
    }

    #[test]
    fn oversized_control_payload_is_refused() {
        assert!(ControlFrame::Ping(vec![0; 126]).payload().is_err());
        assert_eq!(ControlFrame::Ping(vec![7; 125]).payload().unwrap().len(), 125);
    }

    #[tokio::test]
    async fn reply_queue_answers_ping_and_close() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut handler = ReplyQueue::new(tx);

        handler.on_control(&ControlFrame::Ping(b"hi".to_vec())).unwrap();
        handler.on_control(&ControlFrame::Pong(b"ignored".to_vec())).unwrap();
        handler
            .on_control(&ControlFrame::Close(Some(CloseFrame::new(CLOSE_NORMAL, ""))))
            .unwrap();

        assert_eq!(rx.recv().await, Some(ControlFrame::Pong(b"hi".to_vec())));
        assert_eq!(
            rx.recv().await,
            Some(ControlFrame::Close(Some(CloseFrame::new(CLOSE_NORMAL, ""))))
        );
        assert!(rx.try_recv().is_err());
    }
}
