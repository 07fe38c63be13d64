//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! authenticated UserInfo (from the upgrade pipeline)
//!     → store.rs SessionBuilder::build
//!         → backend.rs create_if_absent (one atomic call)
//!           MemoryBackend (in process) | RedisBackend (Lua script)
//!     → (Session, is_new)
//!
//! business logic during the link's life:
//!     Session::get / set → backend field access
//!     Session::destroy   → backend delete
//! ```

pub mod backend;
pub mod redis_backend;
pub mod store;
pub mod types;

pub use backend::{BackendError, MemoryBackend, SessionBackend};
pub use redis_backend::RedisBackend;
pub use store::{session_key, Session, SessionBuilder, SessionError};
pub use types::UserInfo;
