//! 编排错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：SchemaParseError / LlmError 决定 RetryWithPrompt / Retry / Degrade，
//! RoutingError 与 ConfigError 属于契约错误，直接 Abort。

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::core::AgentRole;

/// 会话运行过程中可能出现的错误（推理输出格式、工具、路由、配置、检查点）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 推理引擎输出不符合期望 schema；节点内部重试一次后降级，不会传到调度器
    #[error("Schema parse error: {0}")]
    SchemaParseError(String),

    /// 单次工具调用失败（超时、异常、未知工具），只影响对应的 CommandRecord
    #[error("Tool error: {0}")]
    ToolError(String),

    /// 路由谓词返回了边上未声明的标签：编程契约被破坏，终止会话
    #[error("Routing error at {from}: label '{label}' is not declared on this edge")]
    RoutingError { from: AgentRole, label: String },

    /// 构建期缺少角色 / 工具绑定 / 边
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl AgentError {
    /// 是否为会话级致命错误（调度器遇到时直接终止）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::RoutingError { .. } | AgentError::ConfigError(_) | AgentError::Checkpoint(_)
        )
    }
}

/// 恢复引擎根据错误类型与已尝试次数给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 将格式提醒追加到上下文后重试
    RetryWithPrompt(String),
    /// 原样重试（如网络抖动）
    Retry,
    /// 放弃本次调用，节点输出空更新并记录 warning
    Degrade(String),
    /// 终止会话
    Abort,
}
