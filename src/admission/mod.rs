//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted TCP connection
//!     → limiter.rs (try_admit: one unit per connection, non-blocking)
//!         ├─ granted → upgrade pipeline; permit held for the link's lifetime
//!         └─ refused → 503 written, connection closed
//!
//! Background:
//!     ramp-up task (one per limiter) → capacity += step every interval → max
//! ```
//!
//! # Design Decisions
//! - Exhaustion is an expected outcome (`bool` / `Option`), never an error
//! - Warm-up avoids accepting full load on a cold instance

pub mod limiter;

pub use limiter::{AdmissionPermit, LimiterError, TokenLimiter};
