//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Connect the configured session backend
//! - Build subsystems in dependency order
//! - Start the ramp-up task, bind the listener and serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The listener binds last (traffic only when ready)
//! - The limiter is closed once the server has drained

use std::sync::Arc;
use thiserror::Error;

use crate::admission::{LimiterError, TokenLimiter};
use crate::auth::JwtCodec;
use crate::config::{
    validation::validate_config, GatewayConfig, SessionBackendKind, SessionConfig, ValidationError,
};
use crate::lifecycle::Shutdown;
use crate::net::{GatewayServer, Listener, ListenerError, MessageHandler, ServerError};
use crate::session::{BackendError, MemoryBackend, RedisBackend, SessionBackend, SessionBuilder};
use crate::upgrade::Upgrader;

/// Error type for startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {}", format_errors(.0))]
    Config(Vec<ValidationError>),

    #[error("session backend: {0}")]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Limiter(#[from] LimiterError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Assembled core, ready to serve.
pub struct Gateway {
    pub config: GatewayConfig,
    pub limiter: Arc<TokenLimiter>,
    pub tokens: Arc<JwtCodec>,
    pub sessions: SessionBuilder,
    pub upgrader: Arc<Upgrader>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("limiter", &self.limiter)
            .field("upgrader", &self.upgrader)
            .finish_non_exhaustive()
    }
}

/// Open the session backend selected in `config`.
pub async fn connect_backend(config: &SessionConfig) -> Result<Arc<dyn SessionBackend>, StartupError> {
    match config.backend {
        SessionBackendKind::Memory => {
            tracing::info!("Using in-process session backend");
            Ok(Arc::new(MemoryBackend::new()))
        }
        SessionBackendKind::Redis => Ok(Arc::new(RedisBackend::connect(&config.redis).await?)),
    }
}

/// Validate `config` and build the core subsystems on top of `backend`.
pub fn build_gateway(
    config: GatewayConfig,
    backend: Arc<dyn SessionBackend>,
) -> Result<Gateway, StartupError> {
    validate_config(&config).map_err(StartupError::Config)?;

    let limiter = Arc::new(TokenLimiter::new(&config.limiter)?);
    let tokens = Arc::new(JwtCodec::from_config(&config.jwt));
    let sessions = SessionBuilder::new(backend);
    let upgrader = Arc::new(Upgrader::new(
        tokens.clone(),
        sessions.clone(),
        config.compression.clone(),
    ));

    tracing::info!(
        compression = config.compression.enabled,
        initial_capacity = limiter.current_capacity(),
        max_capacity = limiter.max_capacity(),
        "Gateway core initialized"
    );

    Ok(Gateway {
        config,
        limiter,
        tokens,
        sessions,
        upgrader,
    })
}

impl Gateway {
    /// Server wired to this gateway's limiter and upgrader.
    pub fn server<H: MessageHandler>(&self, handler: H) -> GatewayServer<H> {
        GatewayServer::new(
            Arc::clone(&self.limiter),
            Arc::clone(&self.upgrader),
            handler,
            self.config.listener.clone(),
            self.config.link.clone(),
        )
    }

    /// Bind the listener and serve until `shutdown` is triggered.
    pub async fn run<H: MessageHandler>(self, handler: H, shutdown: Shutdown) -> Result<(), StartupError> {
        let listener = Listener::bind(&self.config.listener).await?;
        self.serve(listener, handler, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` is triggered.
    pub async fn serve<H: MessageHandler>(
        self,
        listener: Listener,
        handler: H,
        shutdown: Shutdown,
    ) -> Result<(), StartupError> {
        let ramp_up = {
            let limiter = Arc::clone(&self.limiter);
            let cancel = shutdown.subscribe();
            tokio::spawn(async move { limiter.start_ramp_up(cancel).await })
        };

        let server = self.server(handler);
        let result = server.run(listener, shutdown.subscribe()).await;

        self.limiter.close();
        if let Err(e) = ramp_up.await {
            tracing::warn!(error = %e, "Ramp-up task failed");
        }
        tracing::info!("Shutdown complete");
        Ok(result?)
    }
}
