use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{StatusStore, TaskStatus};
use crate::types::AppResult;

/// Status store for a single process (API and workers share memory).
#[derive(Clone, Default)]
pub struct MemoryStatusStore {
    inner: Arc<RwLock<HashMap<String, TaskStatus>>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn publish(&self, task_id: &str, status: TaskStatus) -> AppResult<()> {
        let mut guard = self.inner.write().await;
        if guard.get(task_id).is_some_and(|current| current.is_terminal()) {
            return Ok(());
        }
        guard.insert(task_id.to_string(), status);
        Ok(())
    }

    async fn poll(&self, task_id: &str) -> AppResult<TaskStatus> {
        let guard = self.inner.read().await;
        Ok(guard.get(task_id).cloned().unwrap_or_else(TaskStatus::pending))
    }
}
