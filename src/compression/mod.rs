//! permessage-deflate support.
//!
//! # Data Flow
//! ```text
//! Sec-WebSocket-Extensions offer (handshake)
//!     → negotiate.rs: pick the first acceptable offer, clamp to config
//!     → Option<CompressionState>   (None = uncompressed link)
//!     → response header advertises the agreed parameters
//!
//! established link:
//!     Writer → deflate.rs Deflater (fresh context per message)
//!     Reader → deflate.rs Inflater (reset per message if the peer
//!              agreed to no_context_takeover)
//! ```
//!
//! # Design Decisions
//! - A failed negotiation is not an error; the link is simply uncompressed
//! - The server always compresses each message independently, which is valid
//!   whether or not the peer asked for it

pub mod deflate;
pub mod negotiate;

pub use deflate::{CompressionError, Deflater, Inflater};
pub use negotiate::{negotiate, parse_offers, ExtensionOffer};

/// Extension token used in `Sec-WebSocket-Extensions`.
pub const EXTENSION_NAME: &str = "permessage-deflate";

/// Largest LZ77 window exponent allowed by the extension.
pub const MAX_WINDOW_BITS: u8 = 15;

/// Smallest LZ77 window exponent allowed by the extension.
pub const MIN_WINDOW_BITS: u8 = 8;

/// Parameters both peers agreed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionParams {
    /// Window exponent the server compresses with.
    pub server_max_window_bits: u8,
    /// Window exponent the client compresses with, when the client offered
    /// to accept a limit.
    pub client_max_window_bits: Option<u8>,
    /// Server starts every message with an empty window.
    pub server_no_context_takeover: bool,
    /// Client starts every message with an empty window.
    pub client_no_context_takeover: bool,
}

impl Default for CompressionParams {
    fn default() -> Self {
        Self {
            server_max_window_bits: MAX_WINDOW_BITS,
            client_max_window_bits: None,
            server_no_context_takeover: false,
            client_no_context_takeover: false,
        }
    }
}

impl CompressionParams {
    /// Render as a `Sec-WebSocket-Extensions` value.
    pub fn to_header_value(&self) -> String {
        let mut value = String::from(EXTENSION_NAME);
        if self.server_no_context_takeover {
            value.push_str("; server_no_context_takeover");
        }
        if self.client_no_context_takeover {
            value.push_str("; client_no_context_takeover");
        }
        if self.server_max_window_bits < MAX_WINDOW_BITS {
            value.push_str(&format!(
                "; server_max_window_bits={}",
                self.server_max_window_bits
            ));
        }
        if let Some(bits) = self.client_max_window_bits {
            value.push_str(&format!("; client_max_window_bits={bits}"));
        }
        value
    }
}

/// Negotiated compression for one link. Immutable after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionState {
    pub params: CompressionParams,
    /// Deflate level used by this side's writer.
    pub level: u32,
}

impl CompressionState {
    /// Compressor for messages this side sends in `role`.
    pub fn deflater(&self, role: crate::codec::Role) -> Deflater {
        let bits = match role {
            crate::codec::Role::Server => self.params.server_max_window_bits,
            crate::codec::Role::Client => self
                .params
                .client_max_window_bits
                .unwrap_or(MAX_WINDOW_BITS),
        };
        Deflater::new(self.level, bits)
    }

    /// Decompressor for messages this side receives in `role`.
    pub fn inflater(&self, role: crate::codec::Role) -> Inflater {
        let peer_resets = match role {
            crate::codec::Role::Server => self.params.client_no_context_takeover,
            crate::codec::Role::Client => self.params.server_no_context_takeover,
        };
        Inflater::new(peer_resets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_value_lists_agreed_params() {
        let params = CompressionParams {
            server_max_window_bits: 12,
            client_max_window_bits: Some(10),
            server_no_context_takeover: true,
            client_no_context_takeover: false,
        };
        assert_eq!(
            params.to_header_value(),
            "permessage-deflate; server_no_context_takeover; \
             server_max_window_bits=12; client_max_window_bits=10"
        );
        assert_eq!(
            CompressionParams::default().to_header_value(),
            "permessage-deflate"
        );
    }
}
