//! Session-bound WebSocket gateway library.

pub mod admission;
pub mod auth;
pub mod codec;
pub mod compression;
pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod session;
pub mod upgrade;

pub use config::schema::GatewayConfig;
pub use lifecycle::startup::{build_gateway, connect_backend, Gateway, StartupError};
pub use lifecycle::Shutdown;
pub use net::{EchoHandler, GatewayServer, MessageHandler};
