//! Redis-backed session storage.
//!
//! # Design Decisions
//! - Creation is one Lua script, so the existence check and the write are a
//!   single server-side step shared by every gateway instance
//! - A small fixed set of multiplexed connection managers, picked round robin;
//!   each one reconnects on its own after a dropped connection

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client, IntoConnectionInfo, RedisError, Script};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::backend::{BackendError, SessionBackend};
use crate::config::RedisConfig;

/// Writes the hash only when the key does not exist yet. Returns 1 when it
/// created the record, 0 otherwise.
const CREATE_IF_ABSENT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    redis.call('HSET', KEYS[1], unpack(ARGV))
    return 1
else
    return 0
end
"#;

/// Session backend on a Redis server.
pub struct RedisBackend {
    connections: Vec<ConnectionManager>,
    next: AtomicUsize,
    create_script: Script,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Open `config.pool_size` connections to the configured server.
    pub async fn connect(config: &RedisConfig) -> Result<Self, BackendError> {
        let mut info = format!("redis://{}", config.addr)
            .into_connection_info()
            .map_err(backend_error)?;
        info.redis.db = config.db;
        info.redis.password = config.password.clone();

        let client = Client::open(info).map_err(backend_error)?;
        let mut connections = Vec::with_capacity(config.pool_size);
        for _ in 0..config.pool_size.max(1) {
            connections.push(client.get_connection_manager().await.map_err(backend_error)?);
        }

        tracing::info!(
            addr = %config.addr,
            db = config.db,
            pool_size = connections.len(),
            "Connected to Redis"
        );

        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
            create_script: Script::new(CREATE_IF_ABSENT),
        })
    }

    fn connection(&self) -> ConnectionManager {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[index].clone()
    }
}

#[async_trait]
impl SessionBackend for RedisBackend {
    async fn create_if_absent(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<bool, BackendError> {
        // HSET with no field/value pairs is a Redis error.
        if fields.is_empty() {
            return Err(BackendError::Protocol(
                "cannot create a record without fields".to_string(),
            ));
        }

        let mut invocation = self.create_script.key(key);
        for (field, value) in fields {
            invocation.arg(field).arg(value);
        }
        let mut conn = self.connection();
        let reply: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(backend_error)?;
        created_from_reply(reply)
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, BackendError> {
        let mut conn = self.connection();
        conn.hget(key, field).await.map_err(backend_error)
    }

    async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<(), BackendError> {
        let mut conn = self.connection();
        conn.hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(backend_error)
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        let mut conn = self.connection();
        conn.del::<_, ()>(key).await.map_err(backend_error)
    }
}

fn created_from_reply(reply: i64) -> Result<bool, BackendError> {
    match reply {
        1 => Ok(true),
        0 => Ok(false),
        other => Err(BackendError::Protocol(format!(
            "unexpected create reply {other}"
        ))),
    }
}

/// Connection-level failures are worth retrying later; everything else is a
/// protocol problem.
fn backend_error(error: RedisError) -> BackendError {
    if error.is_io_error()
        || error.is_connection_refusal()
        || error.is_connection_dropped()
        || error.is_timeout()
    {
        BackendError::Unavailable(error.to_string())
    } else {
        BackendError::Protocol(error.to_string())
    }
}
