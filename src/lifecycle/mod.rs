//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Limiter → Token codec → Session builder
//!         → Upgrader → Server
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain links → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then the listener
//! - Ordered shutdown: stop accept, drain, close
//! - Drain has a timeout: remaining links are abandoned after the deadline

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{merge_tokens, Shutdown};
