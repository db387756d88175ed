//! Redis-backed status store, for deployments where workers and the API
//! run in separate processes.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{StatusStore, TaskStatus};
use crate::types::AppResult;

/// Key prefix for task status entries in Redis.
const KEY_PREFIX: &str = "opportunity_radar:task:";

pub struct RedisStatusStore {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RedisStatusStore {
    /// Connect to `redis_url`; entries expire `ttl_secs` after their last update.
    pub async fn new(redis_url: &str, ttl_secs: u64) -> AppResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, ttl_secs })
    }

    fn key(task_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, task_id)
    }

    async fn read(&self, task_id: &str) -> AppResult<Option<TaskStatus>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::key(task_id)).await?;
        raw.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(Into::into)
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn publish(&self, task_id: &str, status: TaskStatus) -> AppResult<()> {
        // Each task has a single writer, so read-then-write cannot race
        // with another publish for the same key.
        if self.read(task_id).await?.is_some_and(|current| current.is_terminal()) {
            return Ok(());
        }

        let json = serde_json::to_string(&status)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(Self::key(task_id), json, self.ttl_secs).await?;
        Ok(())
    }

    async fn poll(&self, task_id: &str) -> AppResult<TaskStatus> {
        Ok(self.read(task_id).await?.unwrap_or_else(TaskStatus::pending))
    }

    async fn health_check(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
