//! 检查点：Gate 挂起时保存完整 SessionState，恢复时按令牌取回
//!
//! 每个会话只保留最新一次挂起；检查点只能被 `claim` 一次，之后状态变为 Resumed。
//! 会话结束归档为 Finished；运行中出现致命错误归档为 Failed 并记录原因，二者都不能再恢复。
//! 实现：InMemoryCheckpointStore（进程内）、FileCheckpointStore（每会话一个 JSON 文件，可跨进程恢复）。

pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{now_millis, AgentRole, SessionState};

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;

/// 检查点错误
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("No checkpoint for session {0}")]
    NotFound(String),
    #[error("Session {0} was already resumed from this checkpoint")]
    AlreadyResumed(String),
    #[error("Resume token for session {0} does not match the latest suspension")]
    StaleToken(String),
    #[error("Checkpoint IO error: {0}")]
    Io(String),
    #[error("Checkpoint serialization error: {0}")]
    Serde(String),
}

/// 恢复令牌：会话 ID + 本次挂起的唯一标识
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken {
    pub session_id: String,
    pub token: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Suspended,
    Resumed,
    /// 会话已结束，保留最终状态
    Finished,
    /// 致命错误中止了运行，error 字段记录原因
    Failed,
}

/// 一次挂起的完整快照
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    pub token: String,
    /// 挂起所在节点（恢复时执行它的 continuation）
    pub cursor: AgentRole,
    pub prompt: String,
    pub state: SessionState,
    pub status: CheckpointStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: i64,
}

impl Checkpoint {
    pub fn new(state: SessionState, cursor: AgentRole, prompt: impl Into<String>) -> Self {
        Self {
            session_id: state.session_id.clone(),
            token: uuid::Uuid::new_v4().to_string(),
            cursor,
            prompt: prompt.into(),
            state,
            status: CheckpointStatus::Suspended,
            error: None,
            created_at: now_millis(),
        }
    }

    pub fn resume_token(&self) -> ResumeToken {
        ResumeToken {
            session_id: self.session_id.clone(),
            token: self.token.clone(),
        }
    }

    /// 校验令牌并标记为已恢复；同一挂起只能成功一次
    pub fn claim(&mut self, token: &ResumeToken) -> Result<(), CheckpointError> {
        if self.token != token.token {
            return Err(CheckpointError::StaleToken(token.session_id.clone()));
        }
        if self.status != CheckpointStatus::Suspended {
            return Err(CheckpointError::AlreadyResumed(token.session_id.clone()));
        }
        self.status = CheckpointStatus::Resumed;
        Ok(())
    }

    /// 归档最终状态；令牌不变，之后的恢复请求得到 AlreadyResumed
    pub fn finish(&mut self, state: SessionState, cursor: AgentRole) {
        self.state = state;
        self.cursor = cursor;
        self.prompt.clear();
        self.status = CheckpointStatus::Finished;
        self.created_at = now_millis();
    }

    /// 归档中止时的最后状态与错误原因
    pub fn fail(&mut self, state: SessionState, cursor: AgentRole, reason: impl Into<String>) {
        self.finish(state, cursor);
        self.status = CheckpointStatus::Failed;
        self.error = Some(reason.into());
    }
}

/// 呈现给调用方的挂起信息
#[derive(Clone, Debug)]
pub struct Suspension {
    pub session_id: String,
    pub prompt: String,
    pub token: ResumeToken,
}

/// 检查点存储接口，按 session_id 索引
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 保存（覆盖该会话上一次的检查点）
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError>;

    /// 读取会话最新检查点
    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// 原子地校验令牌、标记 Resumed 并返回检查点
    async fn claim(&self, token: &ResumeToken) -> Result<Checkpoint, CheckpointError>;

    /// 仍处于挂起状态的会话 ID
    async fn suspended_sessions(&self) -> Result<Vec<String>, CheckpointError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_checkpoint_cannot_be_claimed() {
        let mut cp = Checkpoint::new(SessionState::new("s1", "h"), AgentRole::Gate, "status");
        let token = cp.resume_token();
        cp.claim(&token).unwrap();
        cp.fail(SessionState::new("s1", "h"), AgentRole::Executor, "routing error");
        assert_eq!(cp.status, CheckpointStatus::Failed);
        assert_eq!(cp.error.as_deref(), Some("routing error"));
        assert!(cp.prompt.is_empty());
        assert!(matches!(cp.claim(&token), Err(CheckpointError::AlreadyResumed(_))));
    }

    #[test]
    fn test_claim_is_single_use() {
        let state = SessionState::new("s1", "h");
        let mut cp = Checkpoint::new(state, AgentRole::Gate, "status");
        let token = cp.resume_token();
        assert!(cp.claim(&token).is_ok());
        assert!(matches!(cp.claim(&token), Err(CheckpointError::AlreadyResumed(_))));
    }

    #[test]
    fn test_finished_checkpoint_cannot_be_claimed() {
        let mut cp = Checkpoint::new(SessionState::new("s1", "h"), AgentRole::Gate, "p");
        let token = cp.resume_token();
        cp.claim(&token).unwrap();
        cp.finish(SessionState::new("s1", "h"), AgentRole::Gate);
        assert_eq!(cp.status, CheckpointStatus::Finished);
        assert!(matches!(cp.claim(&token), Err(CheckpointError::AlreadyResumed(_))));
    }

    #[test]
    fn test_claim_rejects_foreign_token() {
        let mut cp = Checkpoint::new(SessionState::new("s1", "h"), AgentRole::Gate, "p");
        let bogus = ResumeToken {
            session_id: "s1".into(),
            token: "other".into(),
        };
        assert!(matches!(cp.claim(&bogus), Err(CheckpointError::StaleToken(_))));
        assert_eq!(cp.status, CheckpointStatus::Suspended);
    }
}
