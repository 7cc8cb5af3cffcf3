//! 核心层：会话状态与 reducer、错误分类、恢复策略

pub mod error;
pub mod recovery;
pub mod state;

pub use error::{AgentError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use state::{
    now_millis, AgentRole, CommandOutcome, CommandRecord, Finding, PartialState, SessionState,
    Strategy, Task, TaskStatus,
};
