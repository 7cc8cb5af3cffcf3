//! 进程内检查点存储

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Checkpoint, CheckpointError, CheckpointStatus, CheckpointStore, ResumeToken};

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.session_id.clone(), checkpoint);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.checkpoints.read().await.get(session_id).cloned())
    }

    async fn claim(&self, token: &ResumeToken) -> Result<Checkpoint, CheckpointError> {
        let mut checkpoints = self.checkpoints.write().await;
        let checkpoint = checkpoints
            .get_mut(&token.session_id)
            .ok_or_else(|| CheckpointError::NotFound(token.session_id.clone()))?;
        checkpoint.claim(token)?;
        Ok(checkpoint.clone())
    }

    async fn suspended_sessions(&self) -> Result<Vec<String>, CheckpointError> {
        let mut ids: Vec<String> = self
            .checkpoints
            .read()
            .await
            .values()
            .filter(|c| c.status == CheckpointStatus::Suspended)
            .map(|c| c.session_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
