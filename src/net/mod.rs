//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop)
//!     → server.rs   (admission, handshake timeout, upgrade)
//!     → link.rs     (registered link, idle tracking)
//!     → MessageHandler
//!
//! Link lifetime:
//!     Established → Closing (peer close, idle, shutdown, error) → Closed
//! ```
//!
//! # Design Decisions
//! - Admission happens after accept so a refused peer gets a 503, not a hang
//! - Each link is tracked for graceful shutdown
//! - Read and write halves run independently

pub mod link;
pub mod listener;
pub mod server;

pub use link::{Link, LinkError, LinkId, LinkRegistry, Message};
pub use listener::{Listener, ListenerError};
pub use server::{EchoHandler, GatewayServer, MessageHandler, ServerError};
