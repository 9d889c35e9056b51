//! Cursor durability hook
//!
//! Optional extension point so paused/resumed tasks can survive process
//! restarts. Not required for correctness inside a single process lifetime;
//! the queue works fine without a store.

use async_trait::async_trait;
use dashmap::DashMap;
use fanout_common::TaskId;

/// Persists task cursors across process restarts.
#[async_trait]
pub trait CursorStore: Send + Sync + std::fmt::Debug {
    /// Persist the cursor for a task.
    ///
    /// # Errors
    /// If the backing store cannot be written. Persist failures are logged
    /// and otherwise ignored by the dispatch loop.
    async fn persist(&self, task: TaskId, cursor: usize) -> anyhow::Result<()>;

    /// Load the last persisted cursor for a task, if any.
    ///
    /// # Errors
    /// If the backing store cannot be read.
    async fn load(&self, task: TaskId) -> anyhow::Result<Option<usize>>;
}

/// In-memory cursor store for tests and transient deployments.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: DashMap<TaskId, usize>,
}

impl MemoryCursorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn persist(&self, task: TaskId, cursor: usize) -> anyhow::Result<()> {
        self.cursors.insert(task, cursor);
        Ok(())
    }

    async fn load(&self, task: TaskId) -> anyhow::Result<Option<usize>> {
        Ok(self.cursors.get(&task).map(|entry| *entry.value()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryCursorStore::new();
        let id = TaskId::generate();

        assert_eq!(store.load(id).await.unwrap(), None);

        store.persist(id, 7).await.unwrap();
        assert_eq!(store.load(id).await.unwrap(), Some(7));

        store.persist(id, 9).await.unwrap();
        assert_eq!(store.load(id).await.unwrap(), Some(9));
    }
}
