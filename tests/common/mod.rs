//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use ws_gateway::auth::{JwtCodec, UserClaims};
use ws_gateway::net::Listener;
use ws_gateway::session::MemoryBackend;
use ws_gateway::{build_gateway, EchoHandler, GatewayConfig, MessageHandler, Shutdown, StartupError};

pub const TEST_KEY: &str = "integration-test-secret";

/// Config bound to an ephemeral loopback port with short timeouts.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.listener.handshake_timeout_ms = 2_000;
    config.listener.drain_timeout_secs = 1;
    config.jwt.key = TEST_KEY.to_string();
    config.jwt.issuer = "integration-tests".to_string();
    config
}

/// A gateway running in the background of a test.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub tokens: Arc<JwtCodec>,
    pub backend: Arc<MemoryBackend>,
    handle: JoinHandle<Result<(), StartupError>>,
}

impl TestGateway {
    pub fn token(&self, user_id: i64, biz_id: i64) -> String {
        self.tokens.encode(&UserClaims::new(user_id, biz_id)).unwrap()
    }

    pub fn url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={}", self.addr, token)
    }

    /// Trigger shutdown and wait for the drain to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("gateway did not stop")
            .unwrap()
            .unwrap();
    }
}

pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    start_gateway_with(config, EchoHandler).await
}

pub async fn start_gateway_with<H: MessageHandler>(config: GatewayConfig, handler: H) -> TestGateway {
    let backend = Arc::new(MemoryBackend::new());
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let gateway = build_gateway(config, backend.clone()).unwrap();
    let tokens = Arc::clone(&gateway.tokens);
    let shutdown = Shutdown::new();
    let handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { gateway.serve(listener, handler, shutdown).await })
    };

    TestGateway {
        addr,
        shutdown,
        tokens,
        backend,
        handle,
    }
}
