//! Redis-backed distributed lock store
//!
//! Relies on the atomic `SET key value NX PX ttl` primitive: the claim
//! either lands as a whole or not at all, and expires on its own before
//! the next legitimate fire time. Every request carries a bounded
//! timeout so a hung Redis call can never stall the beat loop.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::time::timeout;
use tracing::debug;

use cronbeat_core::{SchedulerError, SchedulerResult};
use cronbeat_domain::LockStore;

pub struct RedisLockStore {
    connection: ConnectionManager,
    request_timeout: Duration,
}

impl RedisLockStore {
    pub async fn connect(url: &str, request_timeout: Duration) -> SchedulerResult<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            SchedulerError::LockUnavailable(format!("Failed to create Redis client: {e}"))
        })?;

        let connection = timeout(request_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                SchedulerError::LockUnavailable("Connecting to Redis timed out".to_string())
            })?
            .map_err(|e| {
                SchedulerError::LockUnavailable(format!("Failed to connect to Redis: {e}"))
            })?;

        debug!("Connected to Redis lock store");
        Ok(Self {
            connection,
            request_timeout,
        })
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(&self, key: &str, token: &str, ttl_ms: i64) -> SchedulerResult<bool> {
        let mut connection = self.connection.clone();

        let command = async move {
            let reply: redis::RedisResult<Option<String>> = redis::cmd("SET")
                .arg(key)
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut connection)
                .await;
            reply
        };

        let reply = timeout(self.request_timeout, command)
            .await
            .map_err(|_| {
                SchedulerError::LockUnavailable(format!("SET NX PX timed out for key {key}"))
            })?
            .map_err(|e| SchedulerError::LockUnavailable(e.to_string()))?;

        // SET ... NX returns OK when the key was written, Nil otherwise
        Ok(reply.is_some())
    }
}
